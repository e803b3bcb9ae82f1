//! Well-known artisync locations.
//!
//! | Purpose | Default | Override |
//! |---------|---------|----------|
//! | Data (registries, locks) | `dirs::data_dir()/artisync/` | `ARTISYNC_DATA_DIR` |
//! | Config | `dirs::config_dir()/artisync/` | `ARTISYNC_CONFIG_DIR` |
//!
//! Each scope owns exactly one registry file plus its colocated lock file.

use crate::artifact::Scope;
use std::path::{Path, PathBuf};

/// Persistent data directory. Override with `ARTISYNC_DATA_DIR`.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("ARTISYNC_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("artisync"))
        .unwrap_or_else(|| PathBuf::from("/tmp/artisync-data"))
}

/// Config directory. Override with `ARTISYNC_CONFIG_DIR`.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("ARTISYNC_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("artisync"))
        .unwrap_or_else(|| PathBuf::from("/tmp/artisync-config"))
}

#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Registry file for `scope` under `data_dir`.
#[must_use]
pub fn registry_file_in(data_dir: &Path, scope: Scope) -> PathBuf {
    data_dir.join(format!("registry.{scope}.json"))
}

/// Lock file colocated with a registry file.
#[must_use]
pub fn lock_file_for(registry: &Path) -> PathBuf {
    let mut name = registry
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    registry.with_file_name(name)
}

/// Default approved root for user-scope artifacts: `~/.claude`.
#[must_use]
pub fn default_user_root() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".claude"))
}
