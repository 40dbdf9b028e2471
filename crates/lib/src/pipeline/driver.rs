//! Runs a [`PipelinePlan`] against a status store.

use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::consts::INSTALL_OVERLAY_PREFIX;
use crate::exec::ProcessRunner;
use crate::overlay::{OverlayDispatcher, OverlayRegistry, points};
use crate::placeholder::KeyMap;
use crate::status::{GroupHandle, StatusStore, StepOutcome};

use super::device::{Confirm, DeviceProbe, Interrupt, wait_for_device};
use super::plan::{PipelinePlan, PlannedStep, StepContext};
use super::{GroupKind, PipelineError};

/// Phrase the operator must type before irreversible fusing.
pub const ODMFUSE_CONFIRM_PHRASE: &str = "burn fuses";

/// Knobs of a pipeline run.
#[derive(Debug, Clone)]
pub struct DriverOptions {
  /// Re-run `prepare` even when the skip gate would allow skipping.
  pub force_prepare: bool,
  /// Identifier tokens ignored by the `prepare` skip gate.
  pub identifier_exclude: Vec<String>,
  /// Step prefix of overlay installation steps in `prepare`.
  pub overlay_step_prefix: String,
  pub recovery_timeout: Duration,
  pub poll_interval: Duration,
}

impl Default for DriverOptions {
  fn default() -> Self {
    Self {
      force_prepare: false,
      identifier_exclude: Vec::new(),
      overlay_step_prefix: INSTALL_OVERLAY_PREFIX.to_string(),
      recovery_timeout: Duration::from_secs(120),
      poll_interval: Duration::from_millis(500),
    }
  }
}

/// How a group ended in a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupOutcome {
  /// Cached completion was still valid.
  Skipped,
  Completed,
  /// The plan had nothing for the group, or its gate was closed.
  NotEntered,
}

/// Per-group outcomes of a run, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
  pub groups: Vec<(GroupKind, GroupOutcome)>,
}

impl RunReport {
  pub fn outcome(&self, group: GroupKind) -> Option<GroupOutcome> {
    self.groups.iter().find(|(g, _)| *g == group).map(|(_, o)| *o)
  }
}

struct Never;

impl Interrupt for Never {
  fn interrupted(&self) -> bool {
    false
  }
}

/// Sequences pipeline groups, consulting the status store for skip decisions.
pub struct PipelineDriver<'a> {
  registry: &'a OverlayRegistry,
  runner: &'a dyn ProcessRunner,
  keymap: &'a KeyMap,
  probe: Option<&'a dyn DeviceProbe>,
  interrupt: &'a dyn Interrupt,
  confirm: Option<&'a dyn Confirm>,
  options: DriverOptions,
}

impl<'a> PipelineDriver<'a> {
  pub fn new(registry: &'a OverlayRegistry, runner: &'a dyn ProcessRunner, keymap: &'a KeyMap) -> Self {
    Self {
      registry,
      runner,
      keymap,
      probe: None,
      interrupt: &Never,
      confirm: None,
      options: DriverOptions::default(),
    }
  }

  pub fn with_probe(mut self, probe: &'a dyn DeviceProbe) -> Self {
    self.probe = Some(probe);
    self
  }

  pub fn with_interrupt(mut self, interrupt: &'a dyn Interrupt) -> Self {
    self.interrupt = interrupt;
    self
  }

  pub fn with_confirm(mut self, confirm: &'a dyn Confirm) -> Self {
    self.confirm = Some(confirm);
    self
  }

  pub fn with_options(mut self, options: DriverOptions) -> Self {
    self.options = options;
    self
  }

  /// Run every group of `plan` in order.
  ///
  /// The first failing group aborts the run; groups after it are not entered.
  pub fn run<S>(
    &self,
    store: &mut StatusStore,
    mut plan: PipelinePlan<'_, S>,
    state: &mut S,
  ) -> Result<RunReport, PipelineError> {
    let mut dispatcher = OverlayDispatcher::new(self.registry, self.runner, self.keymap);
    let mut report = RunReport::default();

    for kind in GroupKind::ORDER {
      let outcome = self.run_group(store, &mut dispatcher, &mut plan, kind, state).inspect_err(|e| {
        error!(group = %kind, error = %e, "group failed");
      })?;
      report.groups.push((kind, outcome));
    }

    Ok(report)
  }

  fn run_group<S>(
    &self,
    store: &mut StatusStore,
    dispatcher: &mut OverlayDispatcher<'a>,
    plan: &mut PipelinePlan<'_, S>,
    kind: GroupKind,
    state: &mut S,
  ) -> Result<GroupOutcome, PipelineError> {
    if !plan.has_group(kind) {
      return Ok(GroupOutcome::NotEntered);
    }

    match kind {
      GroupKind::Prepare => {
        let expected = overlay_suffixes(plan, kind, &self.options.overlay_step_prefix);
        let group = store.change_group(kind.name());
        if self.can_skip_prepare(store, &group, &expected)? {
          info!(group = %kind, "previous preparation is still valid, skipping");
          return Ok(GroupOutcome::Skipped);
        }
      }
      GroupKind::OdmFuse => {
        if !self.registry.has_functions(points::FLASH_GEN_PREPARE_ODMFUSE) {
          info!(group = %kind, "no overlay implements odmfuse, not entering");
          return Ok(GroupOutcome::NotEntered);
        }
        let group = store.change_group(kind.name());
        if store.status(&group)? {
          info!(group = %kind, "odmfuse already performed for this configuration");
          return Ok(GroupOutcome::Skipped);
        }
        self.confirm_odmfuse()?;
      }
      _ => {}
    }

    if plan.requires_device(kind) {
      let probe = self
        .probe
        .ok_or_else(|| PipelineError::Config(format!("group '{kind}' needs a device probe")))?;
      wait_for_device(
        probe,
        self.interrupt,
        self.options.recovery_timeout,
        self.options.poll_interval,
      )?;
    }

    let group = store.change_group(kind.name());
    store.reset_group(&group)?;
    info!(group = %kind, "entering group");

    for mut step in plan.take_group(kind) {
      let mut ctx = StepContext {
        store: &mut *store,
        group: &group,
        dispatcher: &mut *dispatcher,
        runner: self.runner,
        state: &mut *state,
      };
      run_step(kind, &mut step, &mut ctx)?;
    }

    let status = store.finalize_group(&group)?;
    info!(group = %kind, status, "group completed");
    Ok(GroupOutcome::Completed)
  }

  fn can_skip_prepare(
    &self,
    store: &mut StatusStore,
    group: &GroupHandle,
    expected: &[String],
  ) -> Result<bool, PipelineError> {
    if self.options.force_prepare {
      info!("forced preparation");
      return Ok(false);
    }

    let exclude: Vec<&str> = self.options.identifier_exclude.iter().map(String::as_str).collect();
    if !store.is_identifier_same_as_prev(&exclude) {
      info!(
        previous = ?store.previous_identifier(),
        current = ?store.current_identifier(),
        "identifier changed"
      );
      return Ok(false);
    }

    if !store.status(group)? {
      info!("previous preparation did not complete");
      return Ok(false);
    }

    let diff = store.compare_states(group, &self.options.overlay_step_prefix, expected);
    if !diff.is_equal() {
      info!(new = ?diff.new, missing = ?diff.missing, "overlay set changed");
      return Ok(false);
    }

    Ok(true)
  }

  fn confirm_odmfuse(&self) -> Result<(), PipelineError> {
    let action = "irreversible ODM fuse programming";
    let confirmed = self
      .confirm
      .is_some_and(|confirm| confirm.confirm_phrase(action, ODMFUSE_CONFIRM_PHRASE));
    if confirmed {
      warn!("operator confirmed ODM fuse programming");
      Ok(())
    } else {
      Err(PipelineError::Declined(action.to_string()))
    }
  }
}

fn overlay_suffixes<S>(plan: &PipelinePlan<'_, S>, kind: GroupKind, prefix: &str) -> Vec<String> {
  plan
    .step_names(kind)
    .into_iter()
    .filter_map(|name| name.strip_prefix(prefix))
    .map(str::to_string)
    .collect()
}

fn run_step<S>(
  kind: GroupKind,
  step: &mut PlannedStep<'_, S>,
  ctx: &mut StepContext<'_, '_, S>,
) -> Result<(), PipelineError> {
  info!(group = %kind, step = %step.name, "running step");

  if step.recorded {
    ctx.store.set_processing_step(ctx.group, &step.name)?;
  }

  let code = step.run(ctx)?;

  if step.recorded {
    let mut outcome = StepOutcome::code(code).for_step(step.name.clone());
    if let Some(accepted) = &step.accepted {
      outcome = outcome.accepting(accepted.clone());
    }
    ctx.store.set_status(ctx.group, outcome)?;
  }

  if !step.accepts(code) {
    error!(group = %kind, step = %step.name, code, "step failed");
    return Err(PipelineError::StepFailed {
      group: kind,
      step: step.name.clone(),
      code,
    });
  }

  info!(group = %kind, step = %step.name, code, "step succeeded");
  Ok(())
}
