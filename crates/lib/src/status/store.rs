//! Durable status store for one provisioning configuration.
//!
//! Every mutation is written to disk before the call returns, using an
//! atomic write (temp file, then rename). A step is marked pending before it
//! runs, so a crash mid-step always reads back as incomplete.
//!
//! No file locking is performed: concurrent runs against the same
//! configuration directory are unsupported.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io;
use std::mem;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::types::{PENDING, StateDiff, StatusDocument, StatusError, StepOutcome};

/// Handle to a group, returned by [`StatusStore::change_group`].
///
/// Every group-scoped operation takes a handle, so the active group is always
/// explicit at the call site.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupHandle {
  name: String,
}

impl GroupHandle {
  pub fn name(&self) -> &str {
    &self.name
  }
}

/// Crash-safe record of per-step outcomes and run identity.
#[derive(Debug)]
pub struct StatusStore {
  path: PathBuf,
  document: StatusDocument,
  current_identifier: Vec<String>,
  previous_identifier: Vec<String>,
  /// Groups whose sticky last-step flag is set.
  last_step_groups: HashSet<String>,
}

impl StatusStore {
  /// Load the status document at `path`, or start empty if it doesn't exist.
  ///
  /// The identifier found on disk becomes the previous identifier. The
  /// current identifier is written together with the next mutation.
  pub fn load(path: impl Into<PathBuf>, identifier: Vec<String>) -> Result<Self, StatusError> {
    let path = path.into();
    let document = read_document(&path)?;
    let previous_identifier = document.identifier.clone();

    info!(
      path = %path.display(),
      groups = document.groups.len(),
      previous = ?previous_identifier,
      current = ?identifier,
      "loaded status document"
    );

    Ok(Self {
      path,
      document,
      current_identifier: identifier,
      previous_identifier,
      last_step_groups: HashSet::new(),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn document(&self) -> &StatusDocument {
    &self.document
  }

  pub fn previous_identifier(&self) -> &[String] {
    &self.previous_identifier
  }

  pub fn current_identifier(&self) -> &[String] {
    &self.current_identifier
  }

  /// Switch to `name`, creating an empty group block on first use.
  pub fn change_group(&mut self, name: &str) -> GroupHandle {
    self.document.groups.entry(name.to_string()).or_default();
    debug!(group = name, "changed group");
    GroupHandle { name: name.to_string() }
  }

  /// Mark `step` pending and the group incomplete, then persist.
  pub fn set_processing_step(&mut self, group: &GroupHandle, step: &str) -> Result<(), StatusError> {
    let record = self.document.groups.entry(group.name.clone()).or_default();
    record.states.insert(step.to_string(), PENDING);
    record.last_processing_step = step.to_string();
    record.status = false;

    info!(group = %group.name, step, "processing step");
    self.persist()
  }

  /// Record the exit code of a step, then persist.
  ///
  /// The group's aggregate status is recomputed when `outcome.last_step` is
  /// set or the group's sticky last-step flag is already set.
  pub fn set_status(&mut self, group: &GroupHandle, outcome: StepOutcome) -> Result<(), StatusError> {
    let record = self.document.groups.entry(group.name.clone()).or_default();

    let step = match outcome.step {
      Some(step) => step,
      None if !record.last_processing_step.is_empty() => record.last_processing_step.clone(),
      None => return Err(StatusError::NoProcessingStep(group.name.clone())),
    };

    if let Some(accepted) = &outcome.accepted
      && accepted.contains(&PENDING)
    {
      return Err(StatusError::PendingCodeAccepted(step));
    }

    record.states.insert(step.clone(), outcome.code);

    if let Some(accepted) = outcome.accepted {
      self.document.valid_retval.insert(step.clone(), accepted);
    }

    if outcome.last_step {
      self.last_step_groups.insert(group.name.clone());
    }

    let accepted = self.document.accepted_codes(&step).contains(&outcome.code);
    if accepted {
      info!(group = %group.name, step = %step, code = outcome.code, "step finished");
    } else {
      warn!(group = %group.name, step = %step, code = outcome.code, "step finished with rejected code");
    }

    if self.last_step_groups.contains(&group.name) {
      let status = self.document.aggregate_status(&group.name);
      if let Some(record) = self.document.groups.get_mut(&group.name) {
        record.status = status;
      }
      debug!(group = %group.name, status, "recomputed group status");
    }

    self.persist()
  }

  /// Set the sticky last-step flag for a group.
  pub fn mark_last_step(&mut self, group: &GroupHandle) {
    self.last_step_groups.insert(group.name.clone());
  }

  /// Set the sticky last-step flag, recompute the aggregate and persist.
  pub fn finalize_group(&mut self, group: &GroupHandle) -> Result<bool, StatusError> {
    self.last_step_groups.insert(group.name.clone());
    self.document.groups.entry(group.name.clone()).or_default();
    let status = self.document.aggregate_status(&group.name);
    if let Some(record) = self.document.groups.get_mut(&group.name) {
      record.status = status;
    }

    info!(group = %group.name, status, "group finished");
    self.persist()?;
    Ok(status)
  }

  /// Clear a group's recorded steps so a fresh run starts from nothing.
  pub fn reset_group(&mut self, group: &GroupHandle) -> Result<(), StatusError> {
    let record = self.document.groups.entry(group.name.clone()).or_default();
    let steps = mem::take(&mut record.states);
    record.last_processing_step.clear();
    record.status = false;
    for step in steps.keys() {
      self.document.valid_retval.remove(step);
    }
    self.last_step_groups.remove(&group.name);

    debug!(group = %group.name, "reset group");
    self.persist()
  }

  /// Whether the previous run's identifier matches the current one, ignoring
  /// `exclude` tokens. Tokens are compared as sets.
  pub fn is_identifier_same_as_prev(&self, exclude: &[&str]) -> bool {
    let filter = |tokens: &[String]| -> BTreeSet<String> {
      tokens
        .iter()
        .filter(|t| !exclude.contains(&t.as_str()))
        .cloned()
        .collect()
    };
    filter(&self.current_identifier) == filter(&self.previous_identifier)
  }

  /// Compare recorded step suffixes under `prefix` with `expected`.
  pub fn compare_states(&self, group: &GroupHandle, prefix: &str, expected: &[String]) -> StateDiff {
    let found: BTreeSet<String> = self
      .document
      .groups
      .get(&group.name)
      .map(|record| {
        record
          .states
          .keys()
          .filter_map(|step| step.strip_prefix(prefix))
          .map(str::to_string)
          .collect()
      })
      .unwrap_or_default();
    let expected: BTreeSet<String> = expected.iter().cloned().collect();

    StateDiff {
      new: expected.difference(&found).cloned().collect(),
      missing: found.difference(&expected).cloned().collect(),
    }
  }

  /// Cached aggregate status of a group.
  ///
  /// If the status file has disappeared since it was loaded, the document is
  /// reloaded first so stale in-memory completion is never reported.
  pub fn status(&mut self, group: &GroupHandle) -> Result<bool, StatusError> {
    if !self.path.exists() {
      warn!(path = %self.path.display(), "status file vanished, reloading");
      self.reload()?;
    }
    Ok(
      self
        .document
        .groups
        .get(&group.name)
        .map(|record| record.status)
        .unwrap_or(false),
    )
  }

  /// Last recorded code for a step.
  pub fn step_code(&self, group: &GroupHandle, step: &str) -> Option<i32> {
    self
      .document
      .groups
      .get(&group.name)
      .and_then(|record| record.states.get(step).copied())
  }

  fn reload(&mut self) -> Result<(), StatusError> {
    self.document = read_document(&self.path)?;
    self.previous_identifier = self.document.identifier.clone();
    self.last_step_groups.clear();
    Ok(())
  }

  fn persist(&mut self) -> Result<(), StatusError> {
    self.document.identifier = self.current_identifier.clone();

    if let Some(dir) = self.path.parent() {
      fs::create_dir_all(dir).map_err(StatusError::CreateDir)?;
    }

    let content = serde_json::to_string_pretty(&self.document).map_err(StatusError::Serialize)?;

    let mut temp_name = self.path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);
    fs::write(&temp_path, &content).map_err(StatusError::Write)?;
    fs::rename(&temp_path, &self.path).map_err(StatusError::Write)?;

    debug!(path = %self.path.display(), "status persisted");
    Ok(())
  }
}

fn read_document(path: &Path) -> Result<StatusDocument, StatusError> {
  match fs::read_to_string(path) {
    Ok(content) => serde_json::from_str(&content).map_err(StatusError::Parse),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(StatusDocument::default()),
    Err(e) => Err(StatusError::Read(e)),
  }
}
