//! Error types for stowage
//!
//! Probe-style operations (`has`, `metadata`, `size`, `read_stream`, ...)
//! report absence through [`crate::Probe`] instead of an error. Everything
//! here is a genuine failure the caller has to handle.

use thiserror::Error;

/// Result type alias using [`StorageError`].
pub type Result<T> = std::result::Result<T, StorageError>;

/// Storage error types.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Local adapter constructed without a `prefix` option.
    #[error("local adapter: path prefix option is required")]
    MissingPrefix,

    /// The adapter root is missing, not a directory, or unreadable.
    #[error("the root \"{root}\" is not readable/writable")]
    RootNotAccessible { root: String },

    /// A virtual path traverses above the store root.
    #[error("path is outside of the defined root, path [{path}]")]
    PathEscapesRoot { path: String },

    /// A parent directory could not be created before a write.
    #[error("unable to create base directory \"{dir}\"")]
    DirectoryCreate { dir: String },

    /// No store registered under this name.
    #[error("invalid storage ({name})")]
    UnknownStore { name: String },

    /// Store configuration names an adapter kind that does not exist.
    #[error("unknown adapter kind: {kind}")]
    InvalidAdapter { kind: String },

    /// Buffered read or visibility lookup on a path that does not exist.
    #[error("not found: {path}")]
    NotFound { path: String },

    /// File contents are not valid in the requested encoding.
    #[error("contents of {path} are not valid utf-8")]
    InvalidEncoding { path: String },

    /// Store configuration could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error from the underlying backend.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// True for absence conditions, whether reported by this crate or by the OS.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    pub(crate) fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }
}
