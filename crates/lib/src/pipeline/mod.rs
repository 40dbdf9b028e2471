//! Group sequencing for the provisioning pipeline.
//!
//! Groups run strictly in [`GroupKind::ORDER`]. A group is entered only if the
//! plan has steps for it and every earlier group succeeded. Per-group policy:
//!
//! - `prepare` is skipped when the previous run had the same identifier,
//!   finished successfully and installed the same set of overlays.
//! - `images-phase-1` (and any group the plan marks) waits for the device in
//!   recovery mode first.
//! - `flash-gen-prepare-odmfuse` is entered only when an overlay implements it,
//!   runs at most once per configuration and needs operator confirmation.
//! - everything else always runs.

mod device;
mod driver;
mod plan;

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::config_db::ConfigDbError;
use crate::exec::ExecError;
use crate::overlay::OverlayError;
use crate::resources::ResourceError;
use crate::status::StatusError;

pub use device::{Confirm, DeviceProbe, Interrupt, NVIDIA_USB_VENDOR, UsbRecoveryProbe, wait_for_device};
pub use driver::{DriverOptions, GroupOutcome, ODMFUSE_CONFIRM_PHRASE, PipelineDriver, RunReport};
pub use plan::{PipelinePlan, PlannedStep, StepContext};

/// Pipeline groups, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroupKind {
  Prepare,
  #[serde(rename = "images-phase-0")]
  ImagesPhase0,
  GenImages,
  #[serde(rename = "images-phase-1")]
  ImagesPhase1,
  #[serde(rename = "flash-gen-prepare-odmfuse")]
  OdmFuse,
  Flash,
}

impl GroupKind {
  pub const ORDER: [GroupKind; 6] = [
    GroupKind::Prepare,
    GroupKind::ImagesPhase0,
    GroupKind::GenImages,
    GroupKind::ImagesPhase1,
    GroupKind::OdmFuse,
    GroupKind::Flash,
  ];

  /// Group name in the status document.
  pub fn name(self) -> &'static str {
    match self {
      GroupKind::Prepare => "prepare",
      GroupKind::ImagesPhase0 => "images-phase-0",
      GroupKind::GenImages => "gen-images",
      GroupKind::ImagesPhase1 => "images-phase-1",
      GroupKind::OdmFuse => "flash-gen-prepare-odmfuse",
      GroupKind::Flash => "flash",
    }
  }
}

impl fmt::Display for GroupKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// Errors that abort a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
  #[error("overlay error: {0}")]
  Overlay(#[from] OverlayError),

  #[error("status error: {0}")]
  Status(#[from] StatusError),

  #[error("config database error: {0}")]
  ConfigDb(#[from] ConfigDbError),

  #[error("resource error: {0}")]
  Resource(#[from] ResourceError),

  #[error(transparent)]
  Exec(#[from] ExecError),

  #[error("step '{step}' in group '{group}' failed with code {code}")]
  StepFailed { group: GroupKind, step: String, code: i32 },

  #[error("device not detected in recovery mode within {}s", .timeout.as_secs())]
  DeviceNotDetected { timeout: Duration },

  #[error("device probe failed: {0}")]
  Probe(#[source] std::io::Error),

  #[error("operator declined {0}")]
  Declined(String),

  #[error("interrupted by operator")]
  Interrupted,

  #[error("configuration error: {0}")]
  Config(String),
}

impl PipelineError {
  /// Process exit code for this failure.
  pub fn exit_code(&self) -> i32 {
    match self {
      PipelineError::Config(_) | PipelineError::ConfigDb(_) => 2,
      PipelineError::Overlay(err) => match err {
        OverlayError::FunctionFailed { .. } => 3,
        OverlayError::Status(_) => 5,
        OverlayError::Exec(_) => 7,
        _ => 2,
      },
      PipelineError::StepFailed { .. } => 3,
      PipelineError::DeviceNotDetected { .. } => 4,
      PipelineError::Status(_) => 5,
      PipelineError::Declined(_) => 6,
      PipelineError::Resource(_) | PipelineError::Exec(_) | PipelineError::Probe(_) => 7,
      PipelineError::Interrupted => 130,
    }
  }
}
