mod flash;
mod list;
mod manual;
mod status;

use std::path::Path;

use clap::Args;

use dcs_deploy_lib::config_db::{ConfigDb, ConfigMatch, Query};
use dcs_deploy_lib::pipeline::PipelineError;

pub use flash::{FlashArgs, cmd_flash};
pub use list::cmd_list;
pub use manual::cmd_manual_mode;
pub use status::cmd_status;

/// Parameters selecting one configuration database entry.
#[derive(Debug, Clone, Args)]
pub struct Selection {
  /// Target device (e.g. orin_nx, xavier_nx)
  pub device: String,

  /// L4T release (e.g. 36.3)
  pub l4t_version: String,

  /// Carrier board revision (e.g. 2.0)
  pub board: String,

  /// Storage medium (emmc, nvme, usb)
  pub storage: String,

  /// Root filesystem flavour
  #[arg(long, default_value = "ubuntu")]
  pub rootfs_type: String,
}

impl Selection {
  pub fn query(&self) -> Query {
    Query {
      device: self.device.clone(),
      l4t_version: self.l4t_version.clone(),
      board: self.board.clone(),
      storage: self.storage.clone(),
      rootfs_type: self.rootfs_type.clone(),
    }
  }
}

pub(crate) fn load_db(path: &Path) -> Result<ConfigDb, PipelineError> {
  Ok(ConfigDb::load(path)?)
}

pub(crate) fn select(path: &Path, selection: &Selection) -> Result<ConfigMatch, PipelineError> {
  Ok(load_db(path)?.find(&selection.query())?)
}
