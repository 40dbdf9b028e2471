//! On-disk status document types.
//!
//! # Example Status File
//!
//! ```json
//! {
//!   "identifier": ["orin_nx", "nvme", "2.0", "36.3", "ubuntu"],
//!   "valid_retval": {
//!     "fn_overlay@flash-gen-prepare-is-needed.cmd_3": [0, 1]
//!   },
//!   "prepare": {
//!     "status": true,
//!     "last_processing_step": "install_local_overlay@hardware_support_layer",
//!     "states": {
//!       "extract_l4t": 0,
//!       "install_local_overlay@hardware_support_layer": 0
//!     }
//!   }
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Exit code recorded for a step that has started but not finished.
pub const PENDING: i32 = -1;

/// Acceptance set applied to steps without a `valid_retval` entry.
pub const DEFAULT_ACCEPTED: &[i32] = &[0];

/// Persisted record of one group.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupRecord {
  /// Aggregate completion flag, derived from `states` and acceptance sets.
  pub status: bool,
  /// Name of the step most recently marked as processing.
  #[serde(default)]
  pub last_processing_step: String,
  /// Last exit code per step, [`PENDING`] while running.
  #[serde(default)]
  pub states: BTreeMap<String, i32>,
}

/// The whole status file for one provisioning configuration.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusDocument {
  /// Tokens of the invocation that last wrote this document.
  #[serde(default)]
  pub identifier: Vec<String>,
  /// Per-step acceptance sets overriding [`DEFAULT_ACCEPTED`].
  #[serde(default)]
  pub valid_retval: BTreeMap<String, Vec<i32>>,
  /// Group records keyed by group name.
  #[serde(flatten)]
  pub groups: BTreeMap<String, GroupRecord>,
}

impl StatusDocument {
  /// Codes accepted for `step`.
  pub fn accepted_codes(&self, step: &str) -> &[i32] {
    self
      .valid_retval
      .get(step)
      .map(Vec::as_slice)
      .unwrap_or(DEFAULT_ACCEPTED)
  }

  /// Recompute a group's aggregate status from its states.
  ///
  /// True iff every recorded step has an accepted code, so an existing group
  /// with no steps is complete. A group that was never entered is not.
  pub fn aggregate_status(&self, group: &str) -> bool {
    self.groups.get(group).is_some_and(|record| {
      record
        .states
        .iter()
        .all(|(step, code)| *code != PENDING && self.accepted_codes(step).contains(code))
    })
  }
}

/// Outcome of comparing recorded step names against an expected set.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StateDiff {
  /// Expected suffixes with no recorded step.
  pub new: BTreeSet<String>,
  /// Recorded suffixes that are no longer expected.
  pub missing: BTreeSet<String>,
}

impl StateDiff {
  pub fn is_equal(&self) -> bool {
    self.new.is_empty() && self.missing.is_empty()
  }
}

/// Result of a single step, as reported to [`super::StatusStore::set_status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
  /// Exit code of the step.
  pub code: i32,
  /// Step name; defaults to the group's last processing step.
  pub step: Option<String>,
  /// Recompute the group's aggregate status after recording.
  pub last_step: bool,
  /// Acceptance set for this step, replacing the default `{0}`.
  pub accepted: Option<Vec<i32>>,
}

impl StepOutcome {
  /// Outcome for the last processing step.
  pub fn code(code: i32) -> Self {
    Self {
      code,
      step: None,
      last_step: false,
      accepted: None,
    }
  }

  pub fn for_step(mut self, step: impl Into<String>) -> Self {
    self.step = Some(step.into());
    self
  }

  pub fn last(mut self) -> Self {
    self.last_step = true;
    self
  }

  pub fn accepting(mut self, codes: impl Into<Vec<i32>>) -> Self {
    self.accepted = Some(codes.into());
    self
  }
}

/// Errors that can occur when working with the status store.
#[derive(Debug, Error)]
pub enum StatusError {
  /// Failed to read the status file.
  #[error("failed to read status file: {0}")]
  Read(#[source] io::Error),

  /// Failed to parse the status file.
  #[error("failed to parse status file: {0}")]
  Parse(#[source] serde_json::Error),

  /// Failed to serialize the status document.
  #[error("failed to serialize status document: {0}")]
  Serialize(#[source] serde_json::Error),

  /// Failed to create the directory holding the status file.
  #[error("failed to create status directory: {0}")]
  CreateDir(#[source] io::Error),

  /// Failed to write the status file.
  #[error("failed to write status file: {0}")]
  Write(#[source] io::Error),

  /// `set_status` was called without a step name before any step started.
  #[error("group '{0}' has no processing step to record a status for")]
  NoProcessingStep(String),

  /// The pending marker was listed as an accepted code.
  #[error("step '{0}' cannot accept the pending marker {PENDING}")]
  PendingCodeAccepted(String),
}
