//! Working directory layout.
//!
//! ```text
//! $DCS_DEPLOY_ROOT (default ~/.dcs_deploy)
//! ├── config_db.json
//! ├── downloads/
//! ├── overlays/
//! │   └── <overlay>/register.yaml
//! └── flash/
//!     └── <config_id>/
//!         ├── prepare_status.json
//!         └── Linux_for_Tegra/
//! ```

use std::path::PathBuf;

use crate::consts::{CONFIG_DB_FILENAME, DEFAULT_ROOT_DIRNAME, ROOT_ENV, STATUS_FILENAME};

/// Returns the user's home directory.
///
/// Falls back to the current directory when `HOME` is unset.
pub fn home_dir() -> PathBuf {
  std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."))
}

/// Root of all downloaded and generated files.
pub fn root_dir() -> PathBuf {
  match std::env::var_os(ROOT_ENV) {
    Some(root) if !root.is_empty() => PathBuf::from(root),
    _ => home_dir().join(DEFAULT_ROOT_DIRNAME),
  }
}

pub fn download_dir() -> PathBuf {
  root_dir().join("downloads")
}

/// Default location of the configuration database.
pub fn config_db_path() -> PathBuf {
  root_dir().join(CONFIG_DB_FILENAME)
}

pub fn overlays_dir() -> PathBuf {
  root_dir().join("overlays")
}

pub fn flash_dir() -> PathBuf {
  root_dir().join("flash")
}

/// Per-configuration working directory.
pub fn config_dir(config_id: &str) -> PathBuf {
  flash_dir().join(config_id)
}

/// Status document of a configuration.
pub fn status_path(config_id: &str) -> PathBuf {
  config_dir(config_id).join(STATUS_FILENAME)
}

/// Extracted vendor tree of a configuration.
pub fn l4t_dir(config_id: &str) -> PathBuf {
  config_dir(config_id).join("Linux_for_Tegra")
}

pub fn rootfs_dir(config_id: &str) -> PathBuf {
  l4t_dir(config_id).join("rootfs")
}
