//! Store configuration
//!
//! Reads store declarations from ~/.config/stowage/stores.toml

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, StorageError};
use crate::filesystem::Filesystem;
use crate::local::{LocalAdapter, LocalOptions};
use crate::manager::StoreManager;
use crate::memory::MemoryAdapter;

/// Declaration of a single named store
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Adapter kind: `local` or `memory`
    pub adapter: String,
    #[serde(default)]
    pub prefix: Option<String>,
    /// Check the root before registering (local only)
    #[serde(default)]
    pub validate: bool,
}

/// Full store configuration file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    /// Store used when none is named explicitly
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub stores: BTreeMap<String, StoreConfig>,
}

impl StorageConfig {
    /// Load configuration from default path, empty when the file is absent
    pub fn load() -> Result<Self> {
        let path = Self::default_config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from_path(&path)
    }

    /// Get default config path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stowage")
            .join("stores.toml")
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StorageError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| StorageError::Config(e.to_string()))
    }

    /// Build every declared store and register it with `manager`
    pub async fn register_all(&self, manager: &StoreManager) -> Result<()> {
        for (name, store) in &self.stores {
            let fs = store.build().await?;
            manager.register_store(name.clone(), fs).await;
        }
        Ok(())
    }
}

impl StoreConfig {
    /// Construct the filesystem this declaration describes
    pub async fn build(&self) -> Result<Filesystem> {
        match self.adapter.as_str() {
            "local" => {
                let adapter = LocalAdapter::from_options(LocalOptions {
                    prefix: self.prefix.clone(),
                    io: None,
                })?;
                if self.validate {
                    adapter.validate().await?;
                }
                Ok(Filesystem::new(adapter))
            }
            "memory" => {
                let adapter = MemoryAdapter::new();
                Ok(Filesystem::new(match &self.prefix {
                    Some(prefix) => adapter.with_prefix(prefix),
                    None => adapter,
                }))
            }
            other => Err(StorageError::InvalidAdapter {
                kind: other.to_string(),
            }),
        }
    }
}

impl StoreManager {
    /// Manager holding every store declared in `config`
    pub async fn from_config(config: &StorageConfig) -> Result<Self> {
        let manager = Self::new();
        config.register_all(&manager).await?;
        Ok(manager)
    }
}
