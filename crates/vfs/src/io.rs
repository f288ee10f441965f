//! Pluggable I/O for the local adapter
//!
//! [`LocalAdapter`](crate::LocalAdapter) never touches `tokio::fs` directly;
//! it goes through an [`IoBackend`] so tests can substitute a double that
//! injects failures.

use std::io;
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::io::{BufReader, BufWriter};

use crate::backend::{ByteSink, ByteStream, CHUNK_SIZE};

/// Native stat result as reported by an [`IoBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeStat {
    /// Target is a directory (symlinks followed)
    pub is_dir: bool,
    /// The entry itself is a symbolic link
    pub is_symlink: bool,
    pub size: u64,
    /// Unix permission bits (approximated elsewhere)
    pub mode: u32,
    pub modified: Option<SystemTime>,
    pub created: Option<SystemTime>,
}

impl NativeStat {
    pub fn from_std(meta: &std::fs::Metadata, is_symlink: bool) -> Self {
        Self {
            is_dir: meta.is_dir(),
            is_symlink,
            size: meta.len(),
            mode: permission_bits(meta),
            modified: meta.modified().ok(),
            created: meta.created().ok(),
        }
    }
}

#[cfg(unix)]
fn permission_bits(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(meta: &std::fs::Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

/// Primitive filesystem operations on resolved (absolute) paths
#[async_trait]
pub trait IoBackend: Send + Sync {
    /// Stat without following a final symlink unless it resolves
    async fn stat(&self, path: &str) -> io::Result<NativeStat>;

    /// Succeeds when the directory can be listed
    async fn check_readable(&self, path: &str) -> io::Result<()>;

    async fn write_file(&self, path: &str, contents: &[u8]) -> io::Result<()>;

    async fn open_read(&self, path: &str) -> io::Result<ByteStream>;

    /// Create or truncate a file for streaming write
    async fn open_write(&self, path: &str) -> io::Result<ByteSink>;

    async fn rename(&self, from: &str, to: &str) -> io::Result<()>;

    async fn copy_file(&self, from: &str, to: &str) -> io::Result<()>;

    async fn remove_file(&self, path: &str) -> io::Result<()>;

    /// Entry names (not paths) in native enumeration order
    async fn read_dir(&self, path: &str) -> io::Result<Vec<String>>;

    async fn create_dir(&self, path: &str, mode: u32, recursive: bool) -> io::Result<()>;

    async fn remove_dir_all(&self, path: &str) -> io::Result<()>;

    async fn chmod(&self, path: &str, mode: u32) -> io::Result<()>;
}

/// Default backend over `tokio::fs`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioIo;

#[async_trait]
impl IoBackend for TokioIo {
    async fn stat(&self, path: &str) -> io::Result<NativeStat> {
        let link_meta = tokio::fs::symlink_metadata(path).await?;
        if !link_meta.file_type().is_symlink() {
            return Ok(NativeStat::from_std(&link_meta, false));
        }
        // Report the target when it resolves, the link itself when dangling
        match tokio::fs::metadata(path).await {
            Ok(target) => Ok(NativeStat::from_std(&target, true)),
            Err(_) => Ok(NativeStat::from_std(&link_meta, true)),
        }
    }

    async fn check_readable(&self, path: &str) -> io::Result<()> {
        tokio::fs::read_dir(path).await.map(|_| ())
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> io::Result<()> {
        tokio::fs::write(path, contents).await
    }

    async fn open_read(&self, path: &str) -> io::Result<ByteStream> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Box::new(BufReader::with_capacity(CHUNK_SIZE, file)))
    }

    async fn open_write(&self, path: &str) -> io::Result<ByteSink> {
        let file = tokio::fs::File::create(path).await?;
        Ok(Box::new(BufWriter::with_capacity(CHUNK_SIZE, file)))
    }

    async fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        tokio::fs::rename(from, to).await
    }

    async fn copy_file(&self, from: &str, to: &str) -> io::Result<()> {
        tokio::fs::copy(from, to).await.map(|_| ())
    }

    async fn remove_file(&self, path: &str) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }

    async fn read_dir(&self, path: &str) -> io::Result<Vec<String>> {
        let mut reader = tokio::fs::read_dir(path).await?;
        let mut names = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    async fn create_dir(&self, path: &str, mode: u32, recursive: bool) -> io::Result<()> {
        let mut builder = tokio::fs::DirBuilder::new();
        builder.recursive(recursive);
        #[cfg(unix)]
        builder.mode(mode);
        #[cfg(not(unix))]
        let _ = mode;
        builder.create(path).await
    }

    async fn remove_dir_all(&self, path: &str) -> io::Result<()> {
        tokio::fs::remove_dir_all(path).await
    }

    #[cfg(unix)]
    async fn chmod(&self, path: &str, mode: u32) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
    }

    #[cfg(not(unix))]
    async fn chmod(&self, path: &str, mode: u32) -> io::Result<()> {
        let mut permissions = tokio::fs::metadata(path).await?.permissions();
        permissions.set_readonly(mode & 0o200 == 0);
        tokio::fs::set_permissions(path, permissions).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn as_str(path: &std::path::Path) -> String {
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn test_stat_file_and_dir() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"abc").unwrap();

        let stat = TokioIo.stat(&as_str(&file)).await.unwrap();
        assert!(!stat.is_dir);
        assert!(!stat.is_symlink);
        assert_eq!(stat.size, 3);
        assert!(stat.modified.is_some());

        let stat = TokioIo.stat(&as_str(dir.path())).await.unwrap();
        assert!(stat.is_dir);
    }

    #[tokio::test]
    async fn test_stream_round_trip() {
        let dir = tempdir().unwrap();
        let path = as_str(&dir.path().join("s.bin"));

        let mut sink = TokioIo.open_write(&path).await.unwrap();
        sink.write_all(b"streamed").await.unwrap();
        sink.shutdown().await.unwrap();
        drop(sink);

        let mut stream = TokioIo.open_read(&path).await.unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"streamed");
    }

    #[tokio::test]
    async fn test_create_dir_reports_already_exists() {
        let dir = tempdir().unwrap();
        let path = as_str(&dir.path().join("x"));
        TokioIo.create_dir(&path, 0o755, false).await.unwrap();
        let err = TokioIo.create_dir(&path, 0o755, false).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_chmod_sets_mode() {
        let dir = tempdir().unwrap();
        let path = as_str(&dir.path().join("m.txt"));
        TokioIo.write_file(&path, b"m").await.unwrap();
        TokioIo.chmod(&path, 0o600).await.unwrap();
        assert_eq!(TokioIo.stat(&path).await.unwrap().mode, 0o600);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stat_dangling_symlink() {
        let dir = tempdir().unwrap();
        let link = dir.path().join("dangling");
        std::os::unix::fs::symlink(dir.path().join("missing"), &link).unwrap();

        let stat = TokioIo.stat(&as_str(&link)).await.unwrap();
        assert!(stat.is_symlink);
        assert!(!stat.is_dir);
    }
}
