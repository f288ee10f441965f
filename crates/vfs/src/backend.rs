use std::fmt;
use std::io;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{Result, StorageError};

/// Default chunk size for streaming (64KB)
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Readable byte stream handed out by `read_stream` and consumed by `write_stream`
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Writable byte sink produced by a backend for streaming writes
pub type ByteSink = Box<dyn AsyncWrite + Send + Unpin>;

/// Root location an adapter resolves virtual paths against.
///
/// Stored without trailing slashes and never empty. A prefix is fixed for the
/// lifetime of the adapter holding it; rebinding produces a new adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Prefix(String);

impl Prefix {
    pub fn new(prefix: &str) -> Self {
        let trimmed = prefix.trim_end_matches('/');
        let value = if !trimmed.is_empty() {
            trimmed
        } else if prefix.is_empty() {
            "."
        } else {
            "/"
        };
        Self(value.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Whether `path` already lies under this prefix
    fn is_applied(&self, path: &str) -> bool {
        if self.is_root() {
            return path.starts_with('/');
        }
        path.strip_prefix(self.0.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }

    /// Map a virtual path to a resolved path. Idempotent.
    pub fn apply(&self, path: &str) -> String {
        if self.is_applied(path) {
            return path.to_string();
        }
        let relative = path.trim_start_matches('/');
        if relative.is_empty() {
            self.0.clone()
        } else if self.is_root() {
            format!("/{relative}")
        } else {
            format!("{}/{relative}", self.0)
        }
    }

    /// Map a resolved path back to its virtual path.
    ///
    /// Only meaningful for paths produced by [`Prefix::apply`]; anything else
    /// just loses its leading slashes.
    pub fn remove(&self, resolved: &str) -> String {
        resolved
            .strip_prefix(self.0.as_str())
            .unwrap_or(resolved)
            .trim_start_matches('/')
            .to_string()
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Entry classification in a [`Metadata`] record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    File,
    Dir,
    Link,
}

/// Normalized file/directory metadata, identical in shape across adapters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Virtual path, never the resolved one
    pub path: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub modified_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Byte size, present for files only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl Metadata {
    pub fn is_file(&self) -> bool {
        self.entry_type == EntryType::File
    }

    pub fn is_dir(&self) -> bool {
        self.entry_type == EntryType::Dir
    }
}

/// File permission bits: (public, private)
const FILE_MODES: (u32, u32) = (0o644, 0o600);
/// Directory permission bits: (public, private)
const DIR_MODES: (u32, u32) = (0o755, 0o700);

/// Coarse public/private permission classification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

impl Visibility {
    /// Parse a visibility name; anything but `private` is `public`.
    pub fn parse(value: &str) -> Self {
        match value {
            "private" => Self::Private,
            _ => Self::Public,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }

    /// Permission bits for an entry of this visibility
    pub const fn mode_for(self, entry: EntryType) -> u32 {
        let (public, private) = match entry {
            EntryType::Dir => DIR_MODES,
            EntryType::File | EntryType::Link => FILE_MODES,
        };
        match self {
            Self::Public => public,
            Self::Private => private,
        }
    }

    /// Classify permission bits: readable by group or others means public
    pub const fn from_mode(mode: u32) -> Self {
        if mode & 0o044 == 0 {
            Self::Private
        } else {
            Self::Public
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options accepted by `write`, `write_stream` and `create_dir`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    /// Raw visibility name, see [`option_visibility`]
    #[serde(default)]
    pub visibility: Option<String>,
}

impl Options {
    pub fn with_visibility(visibility: Visibility) -> Self {
        Self {
            visibility: Some(visibility.as_str().to_string()),
        }
    }
}

/// Resolve the visibility requested by `options`, defaulting to public.
///
/// Unknown values are coerced to public rather than rejected.
pub fn option_visibility(options: &Options) -> Visibility {
    options
        .visibility
        .as_deref()
        .map_or(Visibility::Public, Visibility::parse)
}

/// Outcome of a probe: absence is a value, not an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<T> {
    Found(T),
    NotFound,
}

impl<T> Probe<T> {
    pub const fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    pub fn found(self) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            Self::NotFound => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Probe<U> {
        match self {
            Self::Found(value) => Probe::Found(f(value)),
            Self::NotFound => Probe::NotFound,
        }
    }

    /// Turn absence into [`StorageError::NotFound`] for `path`
    pub fn require(self, path: &str) -> Result<T> {
        self.found().ok_or_else(|| StorageError::not_found(path))
    }
}

impl<T> From<Option<T>> for Probe<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::NotFound, Self::Found)
    }
}

/// Descriptor returned for a directory by `create_dir`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirDescriptor {
    pub path: String,
}

/// Outcome of `create_dir`. Creation never raises; callers inspect this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateDirOutcome {
    Created(DirDescriptor),
    /// The backend reported the directory as already present
    AlreadyExists(DirDescriptor),
    Failed(io::ErrorKind),
}

impl CreateDirOutcome {
    /// Created and already-existing directories both count as success
    pub const fn succeeded(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }

    pub const fn descriptor(&self) -> Option<&DirDescriptor> {
        match self {
            Self::Created(dir) | Self::AlreadyExists(dir) => Some(dir),
            Self::Failed(_) => None,
        }
    }
}

/// Outcome of `set_visibility`. Permission changes never raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityOutcome {
    Applied(Visibility),
    PermissionDenied(io::ErrorKind),
    NotFound,
}

impl VisibilityOutcome {
    pub const fn applied(self) -> Option<Visibility> {
        match self {
            Self::Applied(visibility) => Some(visibility),
            _ => None,
        }
    }
}

/// Storage adapter contract - every backend implements this
///
/// Paths given to an adapter are virtual paths already validated by
/// [`crate::normalize_path`]. Buffered `read`/`write` can be built from the
/// streaming primitives with [`read_via_stream`] and [`write_via_stream`];
/// adapters opt in explicitly.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Short adapter name for logs (`local`, `memory`, ...)
    fn kind(&self) -> &'static str;

    /// Root this adapter resolves paths against
    fn prefix(&self) -> &Prefix;

    /// Check if a file or directory exists
    async fn has(&self, path: &str) -> bool;

    /// Read entire file contents
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Open a file for streaming read
    async fn read_stream(&self, path: &str) -> Probe<ByteStream>;

    /// Write entire file contents (create or overwrite)
    async fn write(&self, path: &str, contents: &[u8], options: &Options) -> Result<()>;

    /// Pipe `source` into a file, returning the number of bytes written
    async fn write_stream(&self, path: &str, source: ByteStream, options: &Options)
        -> Result<u64>;

    /// Rename/move a file
    async fn rename(&self, path: &str, new_path: &str) -> Result<()>;

    /// Copy a file to a new location
    async fn copy(&self, path: &str, new_path: &str) -> Result<()>;

    /// Remove a file
    async fn delete(&self, path: &str) -> Result<()>;

    /// List directory contents as metadata records
    async fn list_dir(&self, dir: &str, recursive: bool) -> Result<Vec<Metadata>>;

    /// Create a directory with the visibility from `options`
    async fn create_dir(&self, dir: &str, options: &Options) -> CreateDirOutcome;

    /// Remove a directory and everything below it
    async fn delete_dir(&self, dir: &str) -> Result<()>;

    /// Get normalized metadata
    async fn metadata(&self, path: &str) -> Probe<Metadata>;

    /// Get file size in bytes
    async fn size(&self, path: &str) -> Probe<u64>;

    /// Guess the MIME type of a file
    async fn mime_type(&self, path: &str) -> Probe<String>;

    async fn set_visibility(&self, path: &str, visibility: Visibility) -> VisibilityOutcome;

    async fn get_visibility(&self, path: &str) -> Result<Visibility>;
}

/// Buffered read built on `read_stream`
///
/// Fails with [`StorageError::NotFound`] when the stream cannot be opened and
/// with whatever error the stream yields mid-read.
pub async fn read_via_stream<A>(adapter: &A, path: &str) -> Result<Vec<u8>>
where
    A: Adapter + ?Sized,
{
    let mut stream = adapter.read_stream(path).await.require(path)?;
    let mut buffer = Vec::new();
    stream.read_to_end(&mut buffer).await?;
    Ok(buffer)
}

/// Buffered write built on `write_stream`, feeding `contents` as a one-shot source
pub async fn write_via_stream<A>(
    adapter: &A,
    path: &str,
    contents: &[u8],
    options: &Options,
) -> Result<()>
where
    A: Adapter + ?Sized,
{
    let source: ByteStream = Box::new(io::Cursor::new(contents.to_vec()));
    adapter.write_stream(path, source, options).await?;
    Ok(())
}

/// Pump `source` into `sink` and close the sink.
///
/// The copy is pull-driven, so a slow sink throttles reads from the source.
/// Returns only after `shutdown` has flushed the sink; an error on either side
/// ends the pipe and both ends are dropped.
pub(crate) async fn pipe(source: ByteStream, mut sink: ByteSink) -> Result<u64> {
    let mut reader = BufReader::with_capacity(CHUNK_SIZE, source);
    let copied = tokio::io::copy_buf(&mut reader, &mut sink).await?;
    sink.shutdown().await?;
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::normalize_path;
    use proptest::prelude::*;

    #[test]
    fn test_applies_prefix() {
        let prefix = Prefix::new("uploads");
        assert_eq!(prefix.apply("file.txt"), "uploads/file.txt");
        assert_eq!(prefix.apply("/file.txt"), "uploads/file.txt");
        assert_eq!(prefix.apply(""), "uploads");
    }

    #[test]
    fn test_prefix_applied_once() {
        let prefix = Prefix::new("uploads");
        let mut path = prefix.apply("file.txt");
        path = prefix.apply(&path);
        path = prefix.apply(&path);
        assert_eq!(path, "uploads/file.txt");
    }

    #[test]
    fn test_prefix_boundary() {
        let prefix = Prefix::new("uploads");
        // Shares the prefix's characters but is a different entry
        assert_eq!(prefix.apply("uploads.txt"), "uploads/uploads.txt");
    }

    #[test]
    fn test_prefix_trailing_slash_and_root() {
        assert_eq!(Prefix::new("/srv/data/").as_str(), "/srv/data");
        assert_eq!(Prefix::new("/srv/data//").as_str(), "/srv/data");
        assert_eq!(Prefix::new("/").as_str(), "/");
        assert_eq!(Prefix::new("").as_str(), ".");

        let root = Prefix::new("/");
        assert_eq!(root.apply("etc/hosts"), "/etc/hosts");
        assert_eq!(root.remove("/etc/hosts"), "etc/hosts");
    }

    #[test]
    fn test_remove_prefix() {
        let prefix = Prefix::new("/srv/data");
        assert_eq!(prefix.remove("/srv/data/a/b.txt"), "a/b.txt");
        assert_eq!(prefix.remove("/srv/data"), "");
    }

    #[test]
    fn test_option_visibility() {
        assert_eq!(option_visibility(&Options::default()), Visibility::Public);
        assert_eq!(
            option_visibility(&Options::with_visibility(Visibility::Private)),
            Visibility::Private
        );
        let bogus = Options {
            visibility: Some("secret".into()),
        };
        assert_eq!(option_visibility(&bogus), Visibility::Public);
    }

    #[test]
    fn test_permission_table() {
        assert_eq!(Visibility::Public.mode_for(EntryType::File), 0o644);
        assert_eq!(Visibility::Private.mode_for(EntryType::File), 0o600);
        assert_eq!(Visibility::Public.mode_for(EntryType::Dir), 0o755);
        assert_eq!(Visibility::Private.mode_for(EntryType::Dir), 0o700);
        assert_eq!(Visibility::from_mode(0o100_644), Visibility::Public);
        assert_eq!(Visibility::from_mode(0o040_700), Visibility::Private);
    }

    #[test]
    fn test_metadata_shape() {
        let now = Utc::now();
        let file = Metadata {
            path: "a.txt".into(),
            entry_type: EntryType::File,
            modified_at: now,
            created_at: now,
            size: Some(3),
        };
        let json = serde_json::to_value(&file).unwrap();
        assert_eq!(json["type"], "file");
        assert_eq!(json["size"], 3);
        assert!(json.get("modified_at").is_some());
        assert!(json.get("created_at").is_some());

        let dir = Metadata {
            entry_type: EntryType::Dir,
            size: None,
            ..file
        };
        let json = serde_json::to_value(&dir).unwrap();
        assert_eq!(json["type"], "dir");
        assert!(json.get("size").is_none());
    }

    #[test]
    fn test_probe_helpers() {
        let found: Probe<u64> = Some(8).into();
        assert!(found.is_found());
        assert_eq!(found.clone().map(|n| n * 2), Probe::Found(16));
        assert_eq!(found.require("x").unwrap(), 8);

        let missing: Probe<u64> = None.into();
        assert!(missing.require("x").unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_pipe_flushes_sink() {
        let source: ByteStream = Box::new(io::Cursor::new(b"helloworld".to_vec()));
        let (client, mut server) = tokio::io::duplex(4);
        let reader = tokio::spawn(async move {
            let mut out = Vec::new();
            server.read_to_end(&mut out).await.unwrap();
            out
        });
        let copied = pipe(source, Box::new(client)).await.unwrap();
        assert_eq!(copied, 10);
        assert_eq!(reader.await.unwrap(), b"helloworld");
    }

    proptest! {
        #[test]
        fn prefixing_is_idempotent(path in "[a-z]{1,6}(/[a-z]{1,6}){0,3}") {
            let prefix = Prefix::new("/srv/store");
            let once = prefix.apply(&path);
            prop_assert_eq!(prefix.apply(&once), once);
        }

        #[test]
        fn prefix_round_trips(path in "[a-z.]{1,6}(/[a-z.]{1,6}){0,3}") {
            if let Ok(virtual_path) = normalize_path(&path) {
                let prefix = Prefix::new("/srv/store/");
                prop_assert_eq!(prefix.remove(&prefix.apply(&virtual_path)), virtual_path);
            }
        }

        #[test]
        fn prefix_sharing_first_segment_round_trips(
            root in "[a-z]{1,6}",
            rest in "[a-z]{1,6}(/[a-z]{1,6}){0,2}",
        ) {
            // Virtual paths may repeat the root's own name
            let prefix = Prefix::new(&format!("/{root}"));
            let virtual_path = format!("{root}/{rest}");
            let resolved = prefix.apply(&virtual_path);
            prop_assert_eq!(&resolved, &format!("/{root}/{virtual_path}"));
            prop_assert_eq!(prefix.apply(&resolved), resolved.clone());
            prop_assert_eq!(prefix.remove(&resolved), virtual_path);
        }
    }
}
