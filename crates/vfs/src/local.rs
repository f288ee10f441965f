use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use tracing::{debug, warn};

use crate::backend::{
    option_visibility, pipe, read_via_stream, Adapter, ByteStream, CreateDirOutcome,
    DirDescriptor, EntryType, Metadata, Options, Prefix, Probe, Visibility, VisibilityOutcome,
};
use crate::error::{Result, StorageError};
use crate::io::{IoBackend, NativeStat, TokioIo};

/// Construction options for [`LocalAdapter`]
#[derive(Clone, Default)]
pub struct LocalOptions {
    /// Root directory; required
    pub prefix: Option<String>,
    /// Substitute I/O implementation, [`TokioIo`] when absent
    pub io: Option<Arc<dyn IoBackend>>,
}

/// Stat result tagged with the virtual path it was looked up for
#[derive(Debug, Clone)]
struct StatInfo {
    path: String,
    stat: NativeStat,
}

/// Local filesystem adapter - maps virtual paths under a root directory
///
/// Parent directories are created on demand for every write, rename and copy.
/// Probe operations (`has`, `metadata`, `size`, ...) treat any stat failure,
/// permission errors included, as absence.
#[derive(Clone)]
pub struct LocalAdapter {
    prefix: Prefix,
    io: Arc<dyn IoBackend>,
}

impl LocalAdapter {
    /// Create a local adapter rooted at `root` using `tokio::fs`
    pub fn new(root: impl AsRef<std::path::Path>) -> Self {
        Self::with_io(root, Arc::new(TokioIo))
    }

    /// Create a local adapter rooted at `root` with a custom I/O backend
    ///
    /// A relative root is anchored at the current working directory, so that
    /// virtual paths can never be mistaken for already-resolved ones.
    pub fn with_io(root: impl AsRef<std::path::Path>, io: Arc<dyn IoBackend>) -> Self {
        let root = root.as_ref();
        let anchored = std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf());
        Self {
            prefix: Prefix::new(&normalize_prefix(&anchored.to_string_lossy())),
            io,
        }
    }

    /// Create from options, failing when no prefix was given
    pub fn from_options(options: LocalOptions) -> Result<Self> {
        let prefix = options.prefix.ok_or(StorageError::MissingPrefix)?;
        let io = options.io.unwrap_or_else(|| Arc::new(TokioIo));
        Ok(Self::with_io(prefix, io))
    }

    /// New adapter over the same I/O backend, rooted elsewhere
    pub fn with_prefix(&self, prefix: &str) -> Self {
        Self::with_io(prefix, Arc::clone(&self.io))
    }

    /// Check that the root exists, is a directory and can be listed.
    ///
    /// Meant for setup time, not per operation.
    pub async fn validate(&self) -> Result<()> {
        let root = self.prefix.as_str();
        let accessible = match self.io.stat(root).await {
            Ok(stat) if stat.is_dir => self.io.check_readable(root).await.is_ok(),
            _ => false,
        };
        if accessible {
            Ok(())
        } else {
            Err(StorageError::RootNotAccessible {
                root: root.to_string(),
            })
        }
    }

    fn resolve(&self, path: &str) -> String {
        self.prefix.apply(path)
    }

    /// Stat a resolved path; every failure becomes `NotFound`
    async fn stat_info(&self, resolved: &str) -> Probe<StatInfo> {
        match self.io.stat(resolved).await {
            Ok(stat) => Probe::Found(StatInfo {
                path: self.prefix.remove(resolved),
                stat,
            }),
            Err(_) => Probe::NotFound,
        }
    }

    /// Make sure the parent directory of `resolved` exists
    async fn ensure_directory(&self, resolved: &str) -> Result<()> {
        let dir = parent_of(resolved);
        if let Probe::Found(info) = self.stat_info(dir).await {
            if info.stat.is_dir {
                return Ok(());
            }
        }

        let mode = Visibility::Public.mode_for(EntryType::Dir);
        match self.io.create_dir(dir, mode, true).await {
            Ok(()) => debug!(dir = %dir, "Created parent directory"),
            // A concurrent creator wins; the stat below decides
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }

        match self.stat_info(dir).await {
            Probe::Found(info) if info.stat.is_dir => Ok(()),
            _ => Err(StorageError::DirectoryCreate {
                dir: dir.to_string(),
            }),
        }
    }

    fn walk<'a>(
        &'a self,
        location: String,
        recursive: bool,
        items: &'a mut Vec<Metadata>,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let names = self.io.read_dir(&location).await?;
            let mut subdirs = Vec::new();
            for name in names {
                let child = format!("{location}/{name}");
                // Entries removed between read_dir and stat are skipped
                let Probe::Found(info) = self.stat_info(&child).await else {
                    continue;
                };
                if recursive && info.stat.is_dir && !info.stat.is_symlink {
                    subdirs.push(child);
                }
                items.push(normalize_file_info(&info));
            }
            for subdir in subdirs {
                self.walk(subdir, recursive, items).await?;
            }
            Ok(())
        }
        .boxed()
    }

    async fn apply_file_visibility(&self, resolved: &str, options: &Options) -> Result<()> {
        if options.visibility.is_some() {
            let mode = option_visibility(options).mode_for(EntryType::File);
            self.io.chmod(resolved, mode).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Adapter for LocalAdapter {
    fn kind(&self) -> &'static str {
        "local"
    }

    fn prefix(&self) -> &Prefix {
        &self.prefix
    }

    async fn has(&self, path: &str) -> bool {
        self.stat_info(&self.resolve(path)).await.is_found()
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        read_via_stream(self, path).await
    }

    async fn read_stream(&self, path: &str) -> Probe<ByteStream> {
        let resolved = self.resolve(path);
        match self.io.open_read(&resolved).await {
            Ok(stream) => Probe::Found(stream),
            Err(e) => {
                debug!(path = %resolved, error = %e, "Open for read failed");
                Probe::NotFound
            }
        }
    }

    async fn write(&self, path: &str, contents: &[u8], options: &Options) -> Result<()> {
        let resolved = self.resolve(path);
        self.ensure_directory(&resolved).await?;
        self.io.write_file(&resolved, contents).await?;
        self.apply_file_visibility(&resolved, options).await
    }

    async fn write_stream(
        &self,
        path: &str,
        source: ByteStream,
        options: &Options,
    ) -> Result<u64> {
        let resolved = self.resolve(path);
        self.ensure_directory(&resolved).await?;
        let sink = self.io.open_write(&resolved).await?;
        let written = pipe(source, sink).await?;
        self.apply_file_visibility(&resolved, options).await?;
        debug!(path = %resolved, bytes = written, "Stream written");
        Ok(written)
    }

    async fn rename(&self, path: &str, new_path: &str) -> Result<()> {
        let from = self.resolve(path);
        let to = self.resolve(new_path);
        self.ensure_directory(&to).await?;
        self.io.rename(&from, &to).await?;
        Ok(())
    }

    async fn copy(&self, path: &str, new_path: &str) -> Result<()> {
        let from = self.resolve(path);
        let to = self.resolve(new_path);
        self.ensure_directory(&to).await?;
        self.io.copy_file(&from, &to).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.io.remove_file(&self.resolve(path)).await?;
        Ok(())
    }

    async fn list_dir(&self, dir: &str, recursive: bool) -> Result<Vec<Metadata>> {
        let mut items = Vec::new();
        self.walk(self.resolve(dir), recursive, &mut items).await?;
        Ok(items)
    }

    async fn create_dir(&self, dir: &str, options: &Options) -> CreateDirOutcome {
        let visibility = option_visibility(options);
        let mode = visibility.mode_for(EntryType::Dir);
        let resolved = self.resolve(dir);
        let descriptor = DirDescriptor {
            path: self.prefix.remove(&resolved),
        };

        let mut result = self.io.create_dir(&resolved, mode, false).await;
        if matches!(&result, Err(e) if e.kind() == std::io::ErrorKind::NotFound) {
            // Missing ancestors: build the whole chain
            result = self.io.create_dir(&resolved, mode, true).await;
        }

        match result {
            Ok(()) => CreateDirOutcome::Created(descriptor),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                CreateDirOutcome::AlreadyExists(descriptor)
            }
            Err(e) => {
                warn!(dir = %resolved, error = %e, "Directory creation failed");
                CreateDirOutcome::Failed(e.kind())
            }
        }
    }

    async fn delete_dir(&self, dir: &str) -> Result<()> {
        self.io.remove_dir_all(&self.resolve(dir)).await?;
        Ok(())
    }

    async fn metadata(&self, path: &str) -> Probe<Metadata> {
        self.stat_info(&self.resolve(path))
            .await
            .map(|info| normalize_file_info(&info))
    }

    /// Byte length of a file; directories have no size
    async fn size(&self, path: &str) -> Probe<u64> {
        match self.stat_info(&self.resolve(path)).await {
            Probe::Found(info) if !info.stat.is_dir => Probe::Found(info.stat.size),
            _ => Probe::NotFound,
        }
    }

    async fn mime_type(&self, path: &str) -> Probe<String> {
        match self.stat_info(&self.resolve(path)).await {
            Probe::Found(info) if !info.stat.is_dir => Probe::Found(guess_mime(&info.path)),
            _ => Probe::NotFound,
        }
    }

    async fn set_visibility(&self, path: &str, visibility: Visibility) -> VisibilityOutcome {
        let resolved = self.resolve(path);
        let Probe::Found(info) = self.stat_info(&resolved).await else {
            return VisibilityOutcome::NotFound;
        };
        let entry = if info.stat.is_dir {
            EntryType::Dir
        } else {
            EntryType::File
        };

        match self.io.chmod(&resolved, visibility.mode_for(entry)).await {
            Ok(()) => VisibilityOutcome::Applied(visibility),
            Err(e) => {
                warn!(path = %resolved, error = %e, "Permission change failed");
                VisibilityOutcome::PermissionDenied(e.kind())
            }
        }
    }

    async fn get_visibility(&self, path: &str) -> Result<Visibility> {
        let info = self.stat_info(&self.resolve(path)).await.require(path)?;
        Ok(Visibility::from_mode(info.stat.mode))
    }
}

/// Lexically normalize a root path into forward-slash form
fn normalize_prefix(prefix: &str) -> String {
    let slashed = prefix.replace('\\', "/");
    let absolute = slashed.starts_with('/');

    let mut segments: Vec<&str> = Vec::new();
    for segment in slashed.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.last().is_some_and(|last| *last != "..") {
                    segments.pop();
                } else if !absolute {
                    // Cannot climb above "/", but a relative root may start higher
                    segments.push("..");
                }
            }
            name => segments.push(name),
        }
    }

    let joined = segments.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Parent directory of a resolved path
fn parent_of(resolved: &str) -> &str {
    match resolved.rfind('/') {
        Some(0) => "/",
        Some(idx) => &resolved[..idx],
        None => ".",
    }
}

fn to_timestamp(time: Option<SystemTime>) -> DateTime<Utc> {
    DateTime::from(time.unwrap_or(SystemTime::UNIX_EPOCH))
}

/// Map a native stat onto the public metadata shape
fn normalize_file_info(info: &StatInfo) -> Metadata {
    let entry_type = if info.stat.is_dir {
        EntryType::Dir
    } else if info.stat.is_symlink {
        EntryType::Link
    } else {
        EntryType::File
    };
    let modified_at = to_timestamp(info.stat.modified);
    // Not every filesystem records birth time
    let created_at = info.stat.created.map_or(modified_at, DateTime::from);

    Metadata {
        path: info.path.clone(),
        entry_type,
        modified_at,
        created_at,
        size: (entry_type == EntryType::File).then_some(info.stat.size),
    }
}

pub(crate) fn guess_mime(path: &str) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CHUNK_SIZE;
    use tempfile::tempdir;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix("/srv/data/"), "/srv/data");
        assert_eq!(normalize_prefix("/srv/./data/../files"), "/srv/files");
        assert_eq!(normalize_prefix("C:\\Users\\me\\store"), "C:/Users/me/store");
        assert_eq!(normalize_prefix("../up/./here"), "../up/here");
        assert_eq!(normalize_prefix("/.."), "/");
        assert_eq!(normalize_prefix(""), ".");
    }

    #[test]
    fn test_parent_of() {
        assert_eq!(parent_of("/srv/data/a.txt"), "/srv/data");
        assert_eq!(parent_of("/a.txt"), "/");
        assert_eq!(parent_of("a.txt"), ".");
    }

    #[test]
    fn test_missing_prefix_fails() {
        let result = LocalAdapter::from_options(LocalOptions::default());
        assert!(matches!(result, Err(StorageError::MissingPrefix)));
    }

    #[test]
    fn test_rebind_keeps_original() {
        let adapter = LocalAdapter::new("/srv/a");
        let rebound = adapter.with_prefix("/srv/b/");
        assert_eq!(adapter.prefix().as_str(), "/srv/a");
        assert_eq!(rebound.prefix().as_str(), "/srv/b");
    }

    #[tokio::test]
    async fn test_streaming_read_write() {
        let dir = tempdir().unwrap();
        let fs = LocalAdapter::new(dir.path());

        let test_data = b"Hello, streaming world!";
        let source: ByteStream = Box::new(std::io::Cursor::new(test_data.to_vec()));
        let written = fs
            .write_stream("test.txt", source, &Options::default())
            .await
            .unwrap();
        assert_eq!(written, test_data.len() as u64);

        let mut reader = fs.read_stream("test.txt").await.found().unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, test_data);
    }

    #[tokio::test]
    async fn test_large_file_streaming() {
        let dir = tempdir().unwrap();
        let fs = LocalAdapter::new(dir.path());

        let chunk_count = 4;
        let data = vec![0xABu8; CHUNK_SIZE * chunk_count];
        let source: ByteStream = Box::new(std::io::Cursor::new(data.clone()));
        fs.write_stream("large.bin", source, &Options::default())
            .await
            .unwrap();

        assert_eq!(
            fs.size("large.bin").await,
            Probe::Found((CHUNK_SIZE * chunk_count) as u64)
        );
        assert_eq!(fs.read("large.bin").await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_read_stream_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let fs = LocalAdapter::new(dir.path());
        assert!(!fs.read_stream("nope.txt").await.is_found());
        assert!(fs.read("nope.txt").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_metadata_uses_virtual_path() {
        let dir = tempdir().unwrap();
        let fs = LocalAdapter::new(dir.path());
        fs.write("docs/a.md", b"# a", &Options::default())
            .await
            .unwrap();

        let meta = fs.metadata("docs/a.md").await.found().unwrap();
        assert_eq!(meta.path, "docs/a.md");
        assert_eq!(meta.entry_type, EntryType::File);
        assert_eq!(meta.size, Some(3));

        let meta = fs.metadata("docs").await.found().unwrap();
        assert_eq!(meta.entry_type, EntryType::Dir);
        assert_eq!(meta.size, None);
    }

    #[tokio::test]
    async fn test_recursive_listing() {
        let dir = tempdir().unwrap();
        let fs = LocalAdapter::new(dir.path());
        let opts = Options::default();
        fs.write("tree/a.txt", b"a", &opts).await.unwrap();
        fs.write("tree/sub/b.txt", b"b", &opts).await.unwrap();
        fs.write("tree/sub/deeper/c.txt", b"c", &opts).await.unwrap();

        let shallow = fs.list_dir("tree", false).await.unwrap();
        assert_eq!(shallow.len(), 2);

        let all = fs.list_dir("tree", true).await.unwrap();
        let mut paths: Vec<_> = all.iter().map(|m| m.path.as_str()).collect();
        let sub = paths.iter().position(|p| *p == "tree/sub").unwrap();
        let b = paths.iter().position(|p| *p == "tree/sub/b.txt").unwrap();
        assert!(sub < b);
        paths.sort_unstable();
        assert_eq!(
            paths,
            vec![
                "tree/a.txt",
                "tree/sub",
                "tree/sub/b.txt",
                "tree/sub/deeper",
                "tree/sub/deeper/c.txt",
            ]
        );
    }

    #[tokio::test]
    async fn test_mime_type() {
        let dir = tempdir().unwrap();
        let fs = LocalAdapter::new(dir.path());
        let opts = Options::default();
        fs.write("page.html", b"<p></p>", &opts).await.unwrap();
        fs.write("blob", b"\0", &opts).await.unwrap();

        assert_eq!(fs.mime_type("page.html").await, Probe::Found("text/html".into()));
        assert_eq!(
            fs.mime_type("blob").await,
            Probe::Found("application/octet-stream".into())
        );
        assert_eq!(fs.mime_type("missing.txt").await, Probe::NotFound);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_classified_as_link() {
        let dir = tempdir().unwrap();
        let fs = LocalAdapter::new(dir.path());
        fs.write("target.txt", b"t", &Options::default())
            .await
            .unwrap();
        std::os::unix::fs::symlink(dir.path().join("target.txt"), dir.path().join("alias"))
            .unwrap();

        let meta = fs.metadata("alias").await.found().unwrap();
        assert_eq!(meta.entry_type, EntryType::Link);
        assert_eq!(meta.size, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_write_with_private_visibility() {
        let dir = tempdir().unwrap();
        let fs = LocalAdapter::new(dir.path());
        let opts = Options::with_visibility(Visibility::Private);
        fs.write("secret.txt", b"s", &opts).await.unwrap();
        assert_eq!(
            fs.get_visibility("secret.txt").await.unwrap(),
            Visibility::Private
        );
    }
}
