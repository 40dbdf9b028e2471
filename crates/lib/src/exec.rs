//! Process execution.
//!
//! Every external program the pipeline touches (vendor scripts, overlay
//! functions, `sudo` helpers) runs through a [`ProcessRunner`], so the
//! pipeline can be driven against a fake in tests.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use thiserror::Error;
use tracing::{debug, info};

/// A fully resolved program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
  pub program: String,
  pub args: Vec<String>,
  pub cwd: Option<PathBuf>,
  pub env: BTreeMap<String, String>,
  /// Capture stdout/stderr instead of passing them through to the terminal.
  pub capture: bool,
}

impl CommandSpec {
  pub fn new(program: impl Into<String>) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
      cwd: None,
      env: BTreeMap::new(),
      capture: true,
    }
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(arg.into());
    self
  }

  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }

  pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
    self.cwd = Some(dir.into());
    self
  }

  pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.env.insert(key.into(), value.into());
    self
  }

  /// Let output flow to the terminal.
  pub fn passthrough(mut self) -> Self {
    self.capture = false;
    self
  }
}

impl fmt::Display for CommandSpec {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (key, value) in &self.env {
      write!(f, "{}={} ", key, value)?;
    }
    write!(f, "{}", self.program)?;
    for arg in &self.args {
      write!(f, " {}", arg)?;
    }
    Ok(())
  }
}

/// Exit code and captured output of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
  pub code: i32,
  pub stdout: String,
  pub stderr: String,
}

impl ProcessOutput {
  pub fn success(&self) -> bool {
    self.code == 0
  }
}

/// Errors that prevent a process from producing an exit code.
#[derive(Debug, Error)]
pub enum ExecError {
  /// The program could not be started.
  #[error("failed to spawn {program}: {source}")]
  Spawn {
    program: String,
    #[source]
    source: io::Error,
  },

  /// The process was killed by a signal.
  #[error("{program} was terminated by a signal")]
  Terminated { program: String },
}

/// Synchronous process execution.
pub trait ProcessRunner {
  /// Run a command to completion and return its exit code and output.
  ///
  /// A non-zero exit code is not an error at this level.
  fn run(&self, command: &CommandSpec) -> Result<ProcessOutput, ExecError>;
}

/// Runs commands on the host with [`std::process::Command`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
  fn run(&self, spec: &CommandSpec) -> Result<ProcessOutput, ExecError> {
    info!(command = %spec, "executing command");

    let mut command = Command::new(&spec.program);
    command.args(&spec.args).envs(&spec.env);
    if let Some(cwd) = &spec.cwd {
      command.current_dir(cwd);
    }

    let spawn_err = |source| ExecError::Spawn {
      program: spec.program.clone(),
      source,
    };

    let (status, stdout, stderr) = if spec.capture {
      let output = command.stdin(Stdio::null()).output().map_err(spawn_err)?;
      (
        output.status,
        String::from_utf8_lossy(&output.stdout).trim().to_string(),
        String::from_utf8_lossy(&output.stderr).trim().to_string(),
      )
    } else {
      let status = command.status().map_err(spawn_err)?;
      (status, String::new(), String::new())
    };

    if !stderr.is_empty() {
      debug!(stderr = %stderr, "command stderr");
    }
    if !stdout.is_empty() {
      debug!(stdout = %stdout, "command stdout");
    }

    let code = status.code().ok_or_else(|| ExecError::Terminated {
      program: spec.program.clone(),
    })?;

    debug!(program = %spec.program, code, "command exited");
    Ok(ProcessOutput { code, stdout, stderr })
  }
}
