//! Filesystem facade
//!
//! Validates every incoming path with [`normalize_path`] and forwards to the
//! bound adapter. Paths that escape the root are rejected here, before any
//! adapter I/O happens.

use std::sync::Arc;

use base64::Engine;
use tracing::instrument;

use crate::backend::{
    Adapter, ByteStream, CreateDirOutcome, Metadata, Options, Probe, Visibility,
    VisibilityOutcome,
};
use crate::error::{Result, StorageError};
use crate::path::normalize_path;

/// How `read_string` turns file bytes into text
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Encoding {
    #[default]
    Utf8,
    Base64,
}

/// Path-validating handle over a storage adapter
#[derive(Clone)]
pub struct Filesystem {
    adapter: Arc<dyn Adapter>,
}

impl std::fmt::Debug for Filesystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filesystem").finish_non_exhaustive()
    }
}

impl Filesystem {
    pub fn new(adapter: impl Adapter + 'static) -> Self {
        Self {
            adapter: Arc::new(adapter),
        }
    }

    pub fn from_arc(adapter: Arc<dyn Adapter>) -> Self {
        Self { adapter }
    }

    /// The bound adapter, for adapter-specific escape hatches
    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.adapter
    }

    /// Check existence; the root itself (empty path) reports `false`
    #[instrument(level = "debug", skip(self))]
    pub async fn has(&self, path: &str) -> Result<bool> {
        let path = normalize_path(path)?;
        if path.is_empty() {
            return Ok(false);
        }
        Ok(self.adapter.has(&path).await)
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let path = normalize_path(path)?;
        self.adapter.read(&path).await
    }

    /// Read a file and decode it as text
    #[instrument(level = "debug", skip(self))]
    pub async fn read_string(&self, path: &str, encoding: Encoding) -> Result<String> {
        let path = normalize_path(path)?;
        let bytes = self.adapter.read(&path).await?;
        match encoding {
            Encoding::Utf8 => {
                String::from_utf8(bytes).map_err(|_| StorageError::InvalidEncoding { path })
            }
            Encoding::Base64 => Ok(base64::engine::general_purpose::STANDARD.encode(bytes)),
        }
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn read_stream(&self, path: &str) -> Result<Probe<ByteStream>> {
        let path = normalize_path(path)?;
        Ok(self.adapter.read_stream(&path).await)
    }

    #[instrument(level = "debug", skip(self, contents))]
    pub async fn write(
        &self,
        path: &str,
        contents: impl AsRef<[u8]> + Send,
        options: &Options,
    ) -> Result<()> {
        let path = normalize_path(path)?;
        self.adapter.write(&path, contents.as_ref(), options).await
    }

    #[instrument(level = "debug", skip(self, source))]
    pub async fn write_stream(
        &self,
        path: &str,
        source: ByteStream,
        options: &Options,
    ) -> Result<u64> {
        let path = normalize_path(path)?;
        self.adapter.write_stream(&path, source, options).await
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn delete(&self, path: &str) -> Result<()> {
        let path = normalize_path(path)?;
        self.adapter.delete(&path).await
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn copy(&self, path: &str, dest: &str) -> Result<()> {
        let path = normalize_path(path)?;
        let dest = normalize_path(dest)?;
        self.adapter.copy(&path, &dest).await
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn rename(&self, path: &str, dest: &str) -> Result<()> {
        let path = normalize_path(path)?;
        let dest = normalize_path(dest)?;
        self.adapter.rename(&path, &dest).await
    }

    /// Alias for [`Filesystem::rename`]
    pub async fn move_to(&self, path: &str, dest: &str) -> Result<()> {
        self.rename(path, dest).await
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn list_dir(&self, dir: &str, recursive: bool) -> Result<Vec<Metadata>> {
        let dir = normalize_path(dir)?;
        self.adapter.list_dir(&dir, recursive).await
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn create_dir(&self, dir: &str, options: &Options) -> Result<CreateDirOutcome> {
        let dir = normalize_path(dir)?;
        Ok(self.adapter.create_dir(&dir, options).await)
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn delete_dir(&self, dir: &str) -> Result<()> {
        let dir = normalize_path(dir)?;
        self.adapter.delete_dir(&dir).await
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn metadata(&self, path: &str) -> Result<Probe<Metadata>> {
        let path = normalize_path(path)?;
        Ok(self.adapter.metadata(&path).await)
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn size(&self, path: &str) -> Result<Probe<u64>> {
        let path = normalize_path(path)?;
        Ok(self.adapter.size(&path).await)
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn mime_type(&self, path: &str) -> Result<Probe<String>> {
        let path = normalize_path(path)?;
        Ok(self.adapter.mime_type(&path).await)
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn set_visibility(
        &self,
        path: &str,
        visibility: Visibility,
    ) -> Result<VisibilityOutcome> {
        let path = normalize_path(path)?;
        Ok(self.adapter.set_visibility(&path, visibility).await)
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn get_visibility(&self, path: &str) -> Result<Visibility> {
        let path = normalize_path(path)?;
        self.adapter.get_visibility(&path).await
    }
}
