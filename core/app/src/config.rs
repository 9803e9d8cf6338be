//! Facade configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use cloudfs_storage::{BackendKind, DriveEndpoints, DriveFault};

/// Errors building a `CloudStorage`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Drive transport setup failed: {0}")]
    Drive(#[from] DriveFault),

    #[error("Backend '{0}' is not configured")]
    MissingBackend(BackendKind),

    #[error(transparent)]
    Registry(#[from] cloudfs_common::Error),
}

/// Synced container settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NativeConfig {
    /// Container directory; the native backend is only registered when set.
    pub container: Option<PathBuf>,
}

/// Duplicate-name monitor settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplicateConfig {
    /// Period of background reconciliation scans; none or zero scans only on request.
    pub scan_interval_secs: Option<u64>,
    /// Treat paths differing only in case as the same name.
    pub fold_case: bool,
}

impl DuplicateConfig {
    pub fn scan_interval(&self) -> Option<Duration> {
        self.scan_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

/// Top-level configuration; every field has a default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudStorageConfig {
    /// Active backend at startup. Defaults to the native backend when a
    /// container is configured, the drive otherwise.
    pub provider: Option<BackendKind>,
    pub native: NativeConfig,
    pub drive: DriveEndpoints,
    pub duplicates: DuplicateConfig,
    /// Let `unlink` and `rmdir` of a missing path succeed.
    pub ignore_missing_on_unlink: bool,
}

impl CloudStorageConfig {
    /// Parse from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }
}
