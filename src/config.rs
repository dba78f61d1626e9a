//! Configuration for the unlock engine

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::EngineError;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("unlock-engine")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Storage directory for the engine database
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Database file name inside the storage directory
    #[serde(default = "default_db_file")]
    pub db_file: String,

    /// Event bus channel capacity
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Enrollments processed per batch during a re-lock sweep
    #[serde(default = "default_sweep_batch_size")]
    pub sweep_batch_size: usize,
}

fn default_db_file() -> String {
    "courses.db".to_string()
}

fn default_event_capacity() -> usize {
    1024
}

fn default_sweep_batch_size() -> usize {
    64
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            db_file: default_db_file(),
            event_capacity: default_event_capacity(),
            sweep_batch_size: default_sweep_batch_size(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| EngineError::Config(format!("Failed to parse {:?}: {}", path, e)))
    }

    /// Load configuration from a TOML file, falling back to defaults if missing
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(_) => Self::default(),
        }
    }

    /// Full path to the database file
    pub fn db_path(&self) -> PathBuf {
        self.storage_dir.join(&self.db_file)
    }
}
