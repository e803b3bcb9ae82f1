//! Configuration for artisync.
//!
//! Loaded from TOML; every section and field falls back to its default when
//! absent, so an empty file is a valid configuration.

use crate::error::{Result, SyncError};
use artisync_paths::CaseSensitivity;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Registry lock behaviour.
    pub lock: LockConfig,
    /// Transaction behaviour.
    pub apply: ApplyConfig,
    /// Content hashing.
    pub hashing: HashingConfig,
    /// Path comparison and storage locations.
    pub paths: PathsConfig,
    /// Registry persistence.
    pub registry: RegistryConfig,
}

/// Registry lock settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Give up acquiring the lock after this long.
    pub timeout_ms: u64,
    /// Delay between acquisition attempts.
    pub poll_interval_ms: u64,
    /// A held lock older than this is considered abandoned.
    pub stale_after_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            poll_interval_ms: 50,
            stale_after_secs: 300,
        }
    }
}

impl LockConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

/// What happens to a tracked file that upstream deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Leave the local file and its registry record alone.
    #[default]
    Skip,
    /// Remove the file, keeping a `<dest>.bak.<timestamp>` copy beside it.
    Soft,
    /// Remove the file outright.
    Hard,
}

/// Transaction settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyConfig {
    /// Abort the batch on any conflict instead of skipping it.
    pub strict: bool,
    pub delete_policy: DeletePolicy,
    /// Context lines around each hunk in conflict diffs.
    pub diff_context_lines: usize,
    /// Replace an untracked destination that differs from the proposed
    /// content, keeping a `<dest>.bak.<timestamp>` copy, instead of
    /// reporting a conflict.
    pub overwrite_untracked_with_backup: bool,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            strict: false,
            delete_policy: DeletePolicy::Skip,
            diff_context_lines: 3,
            overwrite_untracked_with_backup: false,
        }
    }
}

/// Registry persistence settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Keep `<registry>.bak`, the last copy that parsed, on every save.
    pub keep_backup: bool,
    /// Fall back to the backup when the registry is corrupt.
    pub recover_from_backup: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            keep_backup: true,
            recover_from_backup: false,
        }
    }
}

/// Hashing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HashingConfig {
    /// Read size per chunk when streaming files into the hasher.
    pub chunk_size: usize,
    /// Worker threads for parallel hashing (0 = rayon's default pool).
    pub workers: usize,
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            chunk_size: crate::fingerprint::DEFAULT_CHUNK_SIZE,
            workers: 0,
        }
    }
}

/// Path settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub case_sensitivity: CaseSensitivity,
    /// Registry location override (defaults to [`crate::dirs::data_dir`]).
    pub data_dir: Option<PathBuf>,
}

impl SyncConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("failed to read config file '{}': {e}", path.display()))
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            SyncError::Config(format!("failed to parse config file '{}': {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save atomically (temp file, fsync, rename).
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| SyncError::Config(format!("failed to serialize config: {e}")))?;
        crate::durable::write_atomic(path, content.as_bytes())
            .map_err(|e| SyncError::io(path, e))
    }

    pub fn validate(&self) -> Result<()> {
        if self.hashing.chunk_size == 0 {
            return Err(SyncError::Config("hashing.chunk_size must be > 0".into()));
        }
        if self.lock.poll_interval_ms > self.lock.timeout_ms && self.lock.timeout_ms > 0 {
            return Err(SyncError::Config(
                "lock.poll_interval_ms must not exceed lock.timeout_ms".into(),
            ));
        }
        Ok(())
    }

    /// Directory holding registries and locks.
    pub fn data_dir(&self) -> PathBuf {
        self.paths.data_dir.clone().unwrap_or_else(crate::dirs::data_dir)
    }
}
