//! Configuration database lookup.
//!
//! The database is a JSON object mapping configuration names to the resources
//! needed to provision one device/storage/board/version combination:
//!
//! ```json
//! {
//!   "orin_nx_36_3": {
//!     "device": "orin_nx",
//!     "storage": ["nvme", "emmc"],
//!     "board": "2.0",
//!     "l4t_version": "36.3",
//!     "rootfs_type": "ubuntu",
//!     "l4t": "https://example.com/Jetson_Linux_R36.3.0_aarch64.tbz2",
//!     "rootfs": "https://example.com/rootfs.tbz2",
//!     "board_config": "dcs2.0+p3767-0000",
//!     "overlays": ["hardware_support_layer"]
//!   }
//! }
//! ```

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ConfigDbError {
  #[error("failed to read config database {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid config database: {0}")]
  Parse(#[from] serde_json::Error),

  #[error("unsupported configuration: {0}")]
  NoMatch(String),
}

/// One database entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
  pub device: String,
  #[serde(deserialize_with = "one_or_many")]
  pub storage: Vec<String>,
  #[serde(deserialize_with = "one_or_many")]
  pub board: Vec<String>,
  pub l4t_version: String,
  pub rootfs_type: String,
  /// Vendor BSP archive URL.
  pub l4t: String,
  /// Root filesystem archive URL.
  pub rootfs: String,
  /// Board configuration name passed to the flash scripts.
  pub board_config: String,
  #[serde(default)]
  pub board_expansion: Option<String>,
  #[serde(default)]
  pub overlays: Vec<String>,
  /// Image generation needs the device attached in recovery mode.
  #[serde(default)]
  pub device_required_for_images: bool,
  /// `vendor:product` pairs that identify the device in recovery mode.
  #[serde(default)]
  pub recovery_usb_ids: Vec<String>,
}

impl ConfigEntry {
  fn matches(&self, query: &Query) -> bool {
    self.device == query.device
      && self.l4t_version == query.l4t_version
      && self.rootfs_type == query.rootfs_type
      && self.board.contains(&query.board)
      && self.storage.contains(&query.storage)
  }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum OneOrMany {
    One(String),
    Many(Vec<String>),
  }

  Ok(match OneOrMany::deserialize(deserializer)? {
    OneOrMany::One(value) => vec![value],
    OneOrMany::Many(values) => values,
  })
}

/// The parameters an operator selects a configuration by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Query {
  pub device: String,
  pub l4t_version: String,
  pub board: String,
  pub storage: String,
  pub rootfs_type: String,
}

impl Query {
  /// Directory-safe identifier of the selected configuration.
  pub fn config_id(&self) -> String {
    format!(
      "{}_{}_{}_{}_{}",
      self.device, self.storage, self.board, self.l4t_version, self.rootfs_type
    )
  }

  /// Ordered tokens identifying a run of this configuration.
  pub fn identifier(&self) -> Vec<String> {
    vec![
      self.device.clone(),
      self.l4t_version.clone(),
      self.board.clone(),
      self.storage.clone(),
      self.rootfs_type.clone(),
    ]
  }
}

/// A matched entry together with the query that selected it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigMatch {
  pub name: String,
  pub query: Query,
  pub entry: ConfigEntry,
}

/// Values available for each selection parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConfigOptions {
  pub devices: Vec<String>,
  pub l4t_versions: Vec<String>,
  pub boards: Vec<String>,
  pub storages: Vec<String>,
  pub rootfs_types: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigDb {
  entries: BTreeMap<String, ConfigEntry>,
}

impl ConfigDb {
  pub fn load(path: &Path) -> Result<Self, ConfigDbError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigDbError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let db = Self::parse(&content)?;
    info!(path = %path.display(), entries = db.entries.len(), "loaded config database");
    Ok(db)
  }

  pub fn parse(content: &str) -> Result<Self, ConfigDbError> {
    Ok(serde_json::from_str(content)?)
  }

  pub fn entries(&self) -> impl Iterator<Item = (&str, &ConfigEntry)> {
    self.entries.iter().map(|(name, entry)| (name.as_str(), entry))
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// First entry (by name) matching every query field.
  pub fn find(&self, query: &Query) -> Result<ConfigMatch, ConfigDbError> {
    let (name, entry) = self
      .entries
      .iter()
      .find(|(_, entry)| entry.matches(query))
      .ok_or_else(|| ConfigDbError::NoMatch(query.config_id()))?;

    debug!(name = %name, config_id = %query.config_id(), "matched configuration");
    Ok(ConfigMatch {
      name: name.clone(),
      query: query.clone(),
      entry: entry.clone(),
    })
  }

  /// Distinct values per parameter. Boards and versions are sorted
  /// numerically where they look like dotted numbers.
  pub fn options(&self) -> ConfigOptions {
    let mut devices = BTreeSet::new();
    let mut versions = BTreeSet::new();
    let mut boards = BTreeSet::new();
    let mut storages = BTreeSet::new();
    let mut rootfs_types = BTreeSet::new();

    for entry in self.entries.values() {
      devices.insert(entry.device.clone());
      versions.insert(entry.l4t_version.clone());
      boards.extend(entry.board.iter().cloned());
      storages.extend(entry.storage.iter().cloned());
      rootfs_types.insert(entry.rootfs_type.clone());
    }

    let numeric = |set: BTreeSet<String>| {
      let mut values: Vec<String> = set.into_iter().collect();
      values.sort_by(|a, b| version_cmp(a, b));
      values
    };

    ConfigOptions {
      devices: devices.into_iter().collect(),
      l4t_versions: numeric(versions),
      boards: numeric(boards),
      storages: storages.into_iter().collect(),
      rootfs_types: rootfs_types.into_iter().collect(),
    }
  }
}

/// Compare dotted version strings component-wise, numerically where both
/// components are numbers.
pub fn version_cmp(a: &str, b: &str) -> Ordering {
  let mut left = a.split('.');
  let mut right = b.split('.');
  loop {
    match (left.next(), right.next()) {
      (None, None) => return Ordering::Equal,
      (None, Some(_)) => return Ordering::Less,
      (Some(_), None) => return Ordering::Greater,
      (Some(l), Some(r)) => {
        let ord = match (l.parse::<u64>(), r.parse::<u64>()) {
          (Ok(l), Ok(r)) => l.cmp(&r),
          _ => l.cmp(r),
        };
        if ord != Ordering::Equal {
          return ord;
        }
      }
    }
  }
}
