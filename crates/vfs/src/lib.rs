//! Storage abstraction for stowage
//!
//! A [`Filesystem`] validates virtual paths and forwards them to an
//! [`Adapter`]. Two adapters ship here: [`LocalAdapter`] over the native
//! filesystem and [`MemoryAdapter`] for tests and scratch space. Named
//! filesystems live in a [`StoreManager`].

pub mod backend;
pub mod config;
pub mod error;
pub mod filesystem;
pub mod io;
pub mod local;
pub mod manager;
pub mod memory;
pub mod path;

pub use backend::{
    option_visibility, read_via_stream, write_via_stream, Adapter, ByteSink, ByteStream,
    CreateDirOutcome, DirDescriptor, EntryType, Metadata, Options, Prefix, Probe, Visibility,
    VisibilityOutcome, CHUNK_SIZE,
};
pub use config::{StorageConfig, StoreConfig};
pub use error::{Result, StorageError};
pub use filesystem::{Encoding, Filesystem};
pub use io::{IoBackend, NativeStat, TokioIo};
pub use local::{LocalAdapter, LocalOptions};
pub use manager::{StoreFactory, StoreManager};
pub use memory::MemoryAdapter;
pub use path::normalize_path;
