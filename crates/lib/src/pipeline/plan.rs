//! Declarative description of a pipeline run.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::exec::ProcessRunner;
use crate::overlay::OverlayDispatcher;
use crate::status::{GroupHandle, StatusStore};

use super::{GroupKind, PipelineError};

/// What a step action can reach while it runs.
///
/// `S` is plan-specific state shared by every step of a run, such as
/// parameters collected from overlays for a later flash command.
pub struct StepContext<'s, 'r, S> {
  pub store: &'s mut StatusStore,
  pub group: &'s GroupHandle,
  pub dispatcher: &'s mut OverlayDispatcher<'r>,
  pub runner: &'r dyn ProcessRunner,
  pub state: &'s mut S,
}

type Action<'p, S> = Box<dyn FnMut(&mut StepContext<'_, '_, S>) -> Result<i32, PipelineError> + 'p>;

/// One unit of work in a group.
pub struct PlannedStep<'p, S> {
  pub name: String,
  /// Exit codes accepted for this step; `None` means `{0}`.
  pub accepted: Option<Vec<i32>>,
  /// Whether the driver wraps the step in its own status entry. Overlay
  /// dispatch steps record their calls themselves.
  pub recorded: bool,
  action: Action<'p, S>,
}

impl<'p, S> PlannedStep<'p, S> {
  /// A step recorded under `name` in the group's status.
  pub fn new<F>(name: impl Into<String>, action: F) -> Self
  where
    F: FnMut(&mut StepContext<'_, '_, S>) -> Result<i32, PipelineError> + 'p,
  {
    Self {
      name: name.into(),
      accepted: None,
      recorded: true,
      action: Box::new(action),
    }
  }

  /// A step that records nothing itself, used for overlay dispatch.
  pub fn dispatch<F>(name: impl Into<String>, action: F) -> Self
  where
    F: FnMut(&mut StepContext<'_, '_, S>) -> Result<i32, PipelineError> + 'p,
  {
    Self {
      recorded: false,
      ..Self::new(name, action)
    }
  }

  pub fn accepting(mut self, codes: Vec<i32>) -> Self {
    self.accepted = Some(codes);
    self
  }

  pub fn accepts(&self, code: i32) -> bool {
    match &self.accepted {
      Some(codes) => codes.contains(&code),
      None => code == 0,
    }
  }

  pub(crate) fn run(&mut self, ctx: &mut StepContext<'_, '_, S>) -> Result<i32, PipelineError> {
    (self.action)(ctx)
  }
}

impl<S> fmt::Debug for PlannedStep<'_, S> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PlannedStep")
      .field("name", &self.name)
      .field("accepted", &self.accepted)
      .field("recorded", &self.recorded)
      .finish_non_exhaustive()
  }
}

/// Ordered steps per group.
pub struct PipelinePlan<'p, S> {
  groups: BTreeMap<GroupKind, Vec<PlannedStep<'p, S>>>,
  device_groups: BTreeSet<GroupKind>,
}

impl<S> Default for PipelinePlan<'_, S> {
  fn default() -> Self {
    Self {
      groups: BTreeMap::new(),
      device_groups: BTreeSet::from([GroupKind::ImagesPhase1]),
    }
  }
}

impl<'p, S> PipelinePlan<'p, S> {
  pub fn new() -> Self {
    Self::default()
  }

  /// Append a step to a group.
  pub fn step(mut self, group: GroupKind, step: PlannedStep<'p, S>) -> Self {
    self.groups.entry(group).or_default().push(step);
    self
  }

  pub fn push(&mut self, group: GroupKind, step: PlannedStep<'p, S>) {
    self.groups.entry(group).or_default().push(step);
  }

  /// Wait for the device in recovery mode before entering `group`.
  pub fn require_device(mut self, group: GroupKind) -> Self {
    self.device_groups.insert(group);
    self
  }

  pub fn requires_device(&self, group: GroupKind) -> bool {
    self.device_groups.contains(&group)
  }

  pub fn has_group(&self, group: GroupKind) -> bool {
    self.groups.get(&group).is_some_and(|steps| !steps.is_empty())
  }

  pub fn step_names(&self, group: GroupKind) -> Vec<&str> {
    self
      .groups
      .get(&group)
      .map(|steps| steps.iter().map(|s| s.name.as_str()).collect())
      .unwrap_or_default()
  }

  pub(crate) fn take_group(&mut self, group: GroupKind) -> Vec<PlannedStep<'p, S>> {
    self.groups.remove(&group).unwrap_or_default()
  }
}
