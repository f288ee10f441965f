//! In-memory storage adapter
//!
//! Provides a fast, ephemeral store that exists only in memory.
//! Useful for tests and scratch stores that need the full adapter contract
//! without disk I/O.

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};
use std::task::{Context, Poll};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWrite;

use crate::backend::{
    option_visibility, pipe, read_via_stream, write_via_stream, Adapter, ByteStream,
    CreateDirOutcome, DirDescriptor, EntryType, Metadata, Options, Prefix, Probe, Visibility,
    VisibilityOutcome,
};
use crate::error::{Result, StorageError};
use crate::local::guess_mime;

/// In-memory entry
#[derive(Clone, Debug)]
enum MemoryEntry {
    File {
        data: Vec<u8>,
        mode: u32,
        created: DateTime<Utc>,
        modified: DateTime<Utc>,
    },
    Directory {
        mode: u32,
        created: DateTime<Utc>,
    },
}

impl MemoryEntry {
    fn directory(mode: u32) -> Self {
        Self::Directory {
            mode,
            created: Utc::now(),
        }
    }

    const fn is_dir(&self) -> bool {
        matches!(self, Self::Directory { .. })
    }

    const fn mode(&self) -> u32 {
        match self {
            Self::File { mode, .. } | Self::Directory { mode, .. } => *mode,
        }
    }

    fn set_mode(&mut self, new_mode: u32) {
        match self {
            Self::File { mode, .. } | Self::Directory { mode, .. } => *mode = new_mode,
        }
    }
}

type Entries = Arc<RwLock<HashMap<String, MemoryEntry>>>;

fn poisoned<T>(_: PoisonError<T>) -> io::Error {
    io::Error::other("Lock poisoned")
}

fn missing(path: &str) -> StorageError {
    io::Error::new(io::ErrorKind::NotFound, format!("Not found: {path}")).into()
}

fn public_dir_mode() -> u32 {
    Visibility::Public.mode_for(EntryType::Dir)
}

/// In-memory storage adapter
///
/// All data is stored in memory and lost when the last handle is dropped.
/// Thread-safe via internal `RwLock`. Keys are resolved paths under the
/// adapter's prefix (`/` by default).
#[derive(Clone)]
pub struct MemoryAdapter {
    prefix: Prefix,
    entries: Entries,
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAdapter {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        let prefix = Prefix::new("/");
        let mut entries = HashMap::new();
        // Root always exists
        entries.insert(prefix.as_str().to_string(), MemoryEntry::directory(public_dir_mode()));
        Self {
            prefix,
            entries: Arc::new(RwLock::new(entries)),
        }
    }

    /// Create with initial file contents
    pub fn with_files<P, B>(files: impl IntoIterator<Item = (P, B)>) -> Result<Self>
    where
        P: AsRef<str>,
        B: AsRef<[u8]>,
    {
        let store = Self::new();
        for (path, content) in files {
            let resolved = store.prefix.apply(path.as_ref());
            store.insert_file(&resolved, content.as_ref().to_vec(), Visibility::Public)?;
        }
        Ok(store)
    }

    /// View of the same entries rooted under another prefix
    ///
    /// The prefix is always anchored at `/`, and its directory chain is
    /// created up front so the view's root exists immediately.
    pub fn with_prefix(&self, prefix: &str) -> Self {
        let prefix = Prefix::new(&format!("/{}", prefix.trim_start_matches('/')));
        if let Ok(mut entries) = self.entries.write() {
            let root = prefix.as_str().to_string();
            if !entries.contains_key(&root) && ensure_parents(&mut entries, &root).is_ok() {
                entries.insert(root, MemoryEntry::directory(public_dir_mode()));
            }
        }
        Self {
            prefix,
            entries: Arc::clone(&self.entries),
        }
    }

    fn resolve(&self, path: &str) -> String {
        self.prefix.apply(path)
    }

    fn entry(&self, resolved: &str) -> Result<Option<MemoryEntry>> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.get(resolved).cloned())
    }

    fn insert_file(&self, resolved: &str, data: Vec<u8>, visibility: Visibility) -> Result<()> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        commit_file(&mut entries, resolved, data, visibility)?;
        Ok(())
    }

    fn to_metadata(&self, resolved: &str, entry: &MemoryEntry) -> Metadata {
        let path = self.prefix.remove(resolved);
        match entry {
            MemoryEntry::File {
                data,
                created,
                modified,
                ..
            } => Metadata {
                path,
                entry_type: EntryType::File,
                modified_at: *modified,
                created_at: *created,
                size: Some(data.len() as u64),
            },
            MemoryEntry::Directory { created, .. } => Metadata {
                path,
                entry_type: EntryType::Dir,
                modified_at: *created,
                created_at: *created,
                size: None,
            },
        }
    }

    /// Keys strictly below `resolved`
    fn descendants(entries: &HashMap<String, MemoryEntry>, resolved: &str) -> Vec<String> {
        let prefix = if resolved == "/" {
            "/".to_string()
        } else {
            format!("{resolved}/")
        };
        entries
            .keys()
            .filter(|k| k.starts_with(&prefix) && k.as_str() != resolved)
            .cloned()
            .collect()
    }
}

/// Create missing parent directories of `path`
fn ensure_parents(entries: &mut HashMap<String, MemoryEntry>, path: &str) -> io::Result<()> {
    let mut current = String::new();
    let parts: Vec<&str> = path.split('/').collect();
    for part in &parts[..parts.len().saturating_sub(1)] {
        if part.is_empty() && current.is_empty() {
            current.push('/');
            continue;
        }
        if !current.is_empty() && !current.ends_with('/') {
            current.push('/');
        }
        current.push_str(part);
        let entry = entries
            .entry(current.clone())
            .or_insert_with(|| MemoryEntry::directory(public_dir_mode()));
        if !entry.is_dir() {
            return Err(io::Error::other(format!("Not a directory: {current}")));
        }
    }
    Ok(())
}

fn commit_file(
    entries: &mut HashMap<String, MemoryEntry>,
    path: &str,
    data: Vec<u8>,
    visibility: Visibility,
) -> io::Result<()> {
    ensure_parents(entries, path)?;
    let now = Utc::now();
    let created = match entries.get(path) {
        Some(MemoryEntry::Directory { .. }) => {
            return Err(io::Error::other(format!("Is a directory: {path}")));
        }
        Some(MemoryEntry::File { created, .. }) => *created,
        None => now,
    };
    entries.insert(
        path.to_string(),
        MemoryEntry::File {
            data,
            mode: visibility.mode_for(EntryType::File),
            created,
            modified: now,
        },
    );
    Ok(())
}

#[async_trait]
impl Adapter for MemoryAdapter {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn prefix(&self) -> &Prefix {
        &self.prefix
    }

    async fn has(&self, path: &str) -> bool {
        matches!(self.entry(&self.resolve(path)), Ok(Some(_)))
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        read_via_stream(self, path).await
    }

    async fn read_stream(&self, path: &str) -> Probe<ByteStream> {
        match self.entry(&self.resolve(path)) {
            Ok(Some(MemoryEntry::File { data, .. })) => {
                Probe::Found(Box::new(io::Cursor::new(data)))
            }
            _ => Probe::NotFound,
        }
    }

    async fn write(&self, path: &str, contents: &[u8], options: &Options) -> Result<()> {
        write_via_stream(self, path, contents, options).await
    }

    async fn write_stream(
        &self,
        path: &str,
        source: ByteStream,
        options: &Options,
    ) -> Result<u64> {
        let resolved = self.resolve(path);
        {
            let mut entries = self.entries.write().map_err(poisoned)?;
            ensure_parents(&mut entries, &resolved)?;
        }
        let sink = MemorySink {
            path: resolved,
            buffer: Vec::new(),
            visibility: option_visibility(options),
            entries: Arc::clone(&self.entries),
        };
        pipe(source, Box::new(sink)).await
    }

    async fn rename(&self, path: &str, new_path: &str) -> Result<()> {
        let from = self.resolve(path);
        let to = self.resolve(new_path);

        let mut entries = self.entries.write().map_err(poisoned)?;
        if !entries.contains_key(&from) {
            return Err(missing(&from));
        }
        ensure_parents(&mut entries, &to)?;
        let entry = entries.remove(&from).ok_or_else(|| missing(&from))?;

        // Directories carry their subtree along
        for key in Self::descendants(&entries, &from) {
            if let Some(child) = entries.remove(&key) {
                let moved = format!("{to}{}", &key[from.len()..]);
                entries.insert(moved, child);
            }
        }
        entries.insert(to, entry);
        Ok(())
    }

    async fn copy(&self, path: &str, new_path: &str) -> Result<()> {
        let from = self.resolve(path);
        let to = self.resolve(new_path);

        let mut entries = self.entries.write().map_err(poisoned)?;
        let (data, mode) = match entries.get(&from) {
            Some(MemoryEntry::File { data, mode, .. }) => (data.clone(), *mode),
            Some(MemoryEntry::Directory { .. }) => {
                return Err(io::Error::other(format!("Cannot copy directory: {from}")).into());
            }
            None => return Err(missing(&from)),
        };
        commit_file(&mut entries, &to, data, Visibility::from_mode(mode))?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let resolved = self.resolve(path);
        let mut entries = self.entries.write().map_err(poisoned)?;
        match entries.get(&resolved) {
            Some(MemoryEntry::File { .. }) => {
                entries.remove(&resolved);
                Ok(())
            }
            Some(MemoryEntry::Directory { .. }) => {
                Err(io::Error::other(format!("Not a file: {resolved}")).into())
            }
            None => Err(missing(&resolved)),
        }
    }

    async fn list_dir(&self, dir: &str, recursive: bool) -> Result<Vec<Metadata>> {
        let resolved = self.resolve(dir);
        let entries = self.entries.read().map_err(poisoned)?;

        match entries.get(&resolved) {
            Some(MemoryEntry::Directory { .. }) => {}
            Some(MemoryEntry::File { .. }) => {
                return Err(io::Error::other(format!("Not a directory: {resolved}")).into());
            }
            None => return Err(missing(&resolved)),
        }

        let base_depth = resolved.trim_end_matches('/').matches('/').count();
        let mut keys: Vec<String> = Self::descendants(&entries, &resolved)
            .into_iter()
            .filter(|k| recursive || k.matches('/').count() == base_depth + 1)
            .collect();
        keys.sort();

        Ok(keys
            .iter()
            .filter_map(|k| entries.get(k).map(|e| self.to_metadata(k, e)))
            .collect())
    }

    async fn create_dir(&self, dir: &str, options: &Options) -> CreateDirOutcome {
        let resolved = self.resolve(dir);
        let descriptor = DirDescriptor {
            path: self.prefix.remove(&resolved),
        };
        let mode = option_visibility(options).mode_for(EntryType::Dir);

        let Ok(mut entries) = self.entries.write() else {
            return CreateDirOutcome::Failed(io::ErrorKind::Other);
        };
        match entries.get(&resolved) {
            Some(MemoryEntry::Directory { .. }) => return CreateDirOutcome::AlreadyExists(descriptor),
            Some(MemoryEntry::File { .. }) => {
                return CreateDirOutcome::Failed(io::ErrorKind::AlreadyExists)
            }
            None => {}
        }
        if let Err(e) = ensure_parents(&mut entries, &resolved) {
            return CreateDirOutcome::Failed(e.kind());
        }
        entries.insert(resolved, MemoryEntry::directory(mode));
        CreateDirOutcome::Created(descriptor)
    }

    async fn delete_dir(&self, dir: &str) -> Result<()> {
        let resolved = self.resolve(dir);
        let mut entries = self.entries.write().map_err(poisoned)?;
        match entries.get(&resolved) {
            Some(MemoryEntry::Directory { .. }) => {}
            Some(MemoryEntry::File { .. }) => {
                return Err(io::Error::other(format!("Not a directory: {resolved}")).into());
            }
            None => return Err(missing(&resolved)),
        }
        for key in Self::descendants(&entries, &resolved) {
            entries.remove(&key);
        }
        if resolved != "/" {
            entries.remove(&resolved);
        }
        Ok(())
    }

    async fn metadata(&self, path: &str) -> Probe<Metadata> {
        let resolved = self.resolve(path);
        match self.entry(&resolved) {
            Ok(Some(entry)) => Probe::Found(self.to_metadata(&resolved, &entry)),
            _ => Probe::NotFound,
        }
    }

    async fn size(&self, path: &str) -> Probe<u64> {
        match self.entry(&self.resolve(path)) {
            Ok(Some(MemoryEntry::File { data, .. })) => Probe::Found(data.len() as u64),
            _ => Probe::NotFound,
        }
    }

    async fn mime_type(&self, path: &str) -> Probe<String> {
        let resolved = self.resolve(path);
        match self.entry(&resolved) {
            Ok(Some(MemoryEntry::File { .. })) => Probe::Found(guess_mime(&resolved)),
            _ => Probe::NotFound,
        }
    }

    async fn set_visibility(&self, path: &str, visibility: Visibility) -> VisibilityOutcome {
        let resolved = self.resolve(path);
        let Ok(mut entries) = self.entries.write() else {
            return VisibilityOutcome::PermissionDenied(io::ErrorKind::Other);
        };
        let Some(entry) = entries.get_mut(&resolved) else {
            return VisibilityOutcome::NotFound;
        };
        let kind = if entry.is_dir() {
            EntryType::Dir
        } else {
            EntryType::File
        };
        entry.set_mode(visibility.mode_for(kind));
        VisibilityOutcome::Applied(visibility)
    }

    async fn get_visibility(&self, path: &str) -> Result<Visibility> {
        let entry = self
            .entry(&self.resolve(path))?
            .ok_or_else(|| StorageError::not_found(path))?;
        Ok(Visibility::from_mode(entry.mode()))
    }
}

/// Buffers a streamed write and commits it on shutdown
struct MemorySink {
    path: String,
    buffer: Vec<u8>,
    visibility: Visibility,
    entries: Entries,
}

impl AsyncWrite for MemorySink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.get_mut().buffer.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let mut entries = this.entries.write().map_err(poisoned)?;
        let data = std::mem::take(&mut this.buffer);
        Poll::Ready(commit_file(&mut entries, &this.path, data, this.visibility))
    }
}
