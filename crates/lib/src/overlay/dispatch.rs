//! Execution of registered overlay functions.
//!
//! Every extension point is classified into exactly one discipline:
//!
//! - `lt4-initrd-params`: each function must exit 0; stdout and declared
//!   environment are accumulated for a downstream flash command.
//! - `cmd`: each function runs for side effect and exit codes are summed,
//!   unless the point declares an acceptance set, in which case any other
//!   code is fatal.
//! - `option`: nothing runs; declared option tokens are collected.
//!
//! Executing calls are wrapped in a status step named
//! `fn_overlay@<point>.<type>_<sequence>`, so an interrupted call shows up as
//! pending on the next run.

use tracing::{debug, info};

use crate::exec::{ProcessOutput, ProcessRunner};
use crate::placeholder::KeyMap;
use crate::status::{GroupHandle, StatusStore, StepOutcome};

use super::OverlayError;
use super::registry::OverlayRegistry;
use super::types::{ExtensionPoint, FunctionKind, OverlayFunction};

/// Which overlays a dispatch call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target<'a> {
  /// Every registered overlay implementing the point.
  All,
  /// A single named overlay.
  Overlay(&'a str),
}

/// Aggregated result of a `cmd` dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmdOutcome {
  /// Sum of all exit codes.
  pub code_sum: i32,
  /// Exit code per overlay, in call order.
  pub codes: Vec<(String, i32)>,
}

impl CmdOutcome {
  pub fn calls(&self) -> usize {
    self.codes.len()
  }
}

/// Accumulated `lt4-initrd-params` contributions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitrdParams {
  /// Space-joined stdout of every function.
  pub args: String,
  /// Space-joined declared environment strings.
  pub env: String,
}

impl InitrdParams {
  /// Append another set of contributions.
  pub fn extend(&mut self, other: InitrdParams) {
    push_joined(&mut self.args, &other.args);
    push_joined(&mut self.env, &other.env);
  }
}

fn push_joined(acc: &mut String, value: &str) {
  let value = value.trim();
  if value.is_empty() {
    return;
  }
  if !acc.is_empty() {
    acc.push(' ');
  }
  acc.push_str(value);
}

/// Runs overlay functions against a status store.
pub struct OverlayDispatcher<'a> {
  registry: &'a OverlayRegistry,
  runner: &'a dyn ProcessRunner,
  keymap: &'a KeyMap,
  sequence: usize,
}

impl<'a> OverlayDispatcher<'a> {
  pub fn new(registry: &'a OverlayRegistry, runner: &'a dyn ProcessRunner, keymap: &'a KeyMap) -> Self {
    Self {
      registry,
      runner,
      keymap,
      sequence: 0,
    }
  }

  pub fn registry(&self) -> &OverlayRegistry {
    self.registry
  }

  /// Run `cmd` functions for side effect and sum their exit codes.
  pub fn dispatch_cmd(
    &mut self,
    store: &mut StatusStore,
    group: &GroupHandle,
    point: &str,
    target: Target<'_>,
    extra_args: &[String],
  ) -> Result<CmdOutcome, OverlayError> {
    let declared = self.extension_point(point, FunctionKind::Cmd)?.clone();
    let mut outcome = CmdOutcome::default();

    for function in self.select(point, target, FunctionKind::Cmd)? {
      let output = self.run_function(store, group, function, &declared, extra_args)?;

      if let Some(accepted) = &declared.accepted_codes
        && !accepted.contains(&output.code)
      {
        return Err(OverlayError::FunctionFailed {
          overlay: function.overlay.clone(),
          point: point.to_string(),
          code: output.code,
        });
      }

      outcome.code_sum += output.code;
      outcome.codes.push((function.overlay.clone(), output.code));
    }

    info!(point, calls = outcome.calls(), code_sum = outcome.code_sum, "dispatched cmd functions");
    Ok(outcome)
  }

  /// Run `lt4-initrd-params` functions and accumulate their output.
  ///
  /// Any non-zero exit aborts immediately.
  pub fn dispatch_initrd_params(
    &mut self,
    store: &mut StatusStore,
    group: &GroupHandle,
    point: &str,
    target: Target<'_>,
    extra_args: &[String],
  ) -> Result<InitrdParams, OverlayError> {
    let declared = self.extension_point(point, FunctionKind::InitrdParams)?.clone();
    let mut params = InitrdParams::default();

    for function in self.select(point, target, FunctionKind::InitrdParams)? {
      let output = self.run_function(store, group, function, &declared, extra_args)?;

      if output.code != 0 {
        return Err(OverlayError::FunctionFailed {
          overlay: function.overlay.clone(),
          point: point.to_string(),
          code: output.code,
        });
      }

      push_joined(&mut params.args, &output.stdout);
      push_joined(&mut params.env, &function.env);
    }

    info!(point, args = %params.args, env = %params.env, "collected initrd params");
    Ok(params)
  }

  /// Collect `option` tokens. Nothing is executed or recorded.
  pub fn collect_options(&self, point: &str, target: Target<'_>) -> Result<Vec<String>, OverlayError> {
    self.extension_point(point, FunctionKind::Option)?;

    let options: Vec<String> = self
      .select(point, target, FunctionKind::Option)?
      .into_iter()
      .flat_map(|f| f.options.iter().cloned())
      .collect();

    debug!(point, ?options, "collected options");
    Ok(options)
  }

  fn extension_point(&self, point: &str, expected: FunctionKind) -> Result<&'a ExtensionPoint, OverlayError> {
    let declared = self
      .registry
      .capabilities()
      .get(point)
      .ok_or_else(|| OverlayError::UnknownExtensionPoint(point.to_string()))?;

    if declared.discipline != expected {
      return Err(OverlayError::DisciplineMismatch {
        point: point.to_string(),
        expected,
        declared: declared.discipline,
      });
    }
    Ok(declared)
  }

  fn select(
    &self,
    point: &str,
    target: Target<'_>,
    expected: FunctionKind,
  ) -> Result<Vec<&'a OverlayFunction>, OverlayError> {
    let functions = match target {
      Target::All => self.registry.functions_for(point),
      Target::Overlay(name) => {
        if !self.registry.is_registered(name) {
          return Err(OverlayError::UnknownOverlay(name.to_string()));
        }
        self.registry.function(name, point).into_iter().collect()
      }
    };

    for function in &functions {
      if function.kind != expected {
        return Err(OverlayError::DisciplineMismatch {
          point: point.to_string(),
          expected,
          declared: function.kind,
        });
      }
    }
    Ok(functions)
  }

  fn run_function(
    &mut self,
    store: &mut StatusStore,
    group: &GroupHandle,
    function: &OverlayFunction,
    declared: &ExtensionPoint,
    extra_args: &[String],
  ) -> Result<ProcessOutput, OverlayError> {
    let command = function.resolve(self.keymap, extra_args, self.registry.base_dir())?;

    let step = format!("fn_overlay@{}.{}_{}", function.name, function.kind, self.sequence);
    self.sequence += 1;

    info!(overlay = %function.overlay, step = %step, "running overlay function");
    store.set_processing_step(group, &step)?;

    let output = self.runner.run(&command)?;

    let mut outcome = StepOutcome::code(output.code).for_step(step);
    if let Some(accepted) = &declared.accepted_codes {
      outcome = outcome.accepting(accepted.clone());
    }
    store.set_status(group, outcome)?;

    Ok(output)
  }
}
