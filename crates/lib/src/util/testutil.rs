//! Test utilities for dcs-deploy-lib.
//!
//! [`FakeRunner`] stands in for the host process runner so pipeline and
//! overlay tests never spawn real vendor scripts.

use std::cell::RefCell;
use std::io;

use crate::exec::{CommandSpec, ExecError, ProcessOutput, ProcessRunner};

enum Response {
  Exit { code: i32, stdout: String },
  SpawnFailure,
}

/// Records every command and answers with canned responses.
///
/// Responses are matched by suffix of `program` or of the rendered command
/// line; the first match wins. Unmatched commands exit 0 with no output.
#[derive(Default)]
pub struct FakeRunner {
  responses: Vec<(String, Response)>,
  calls: RefCell<Vec<CommandSpec>>,
}

impl FakeRunner {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(mut self, suffix: &str, code: i32, stdout: &str) -> Self {
    self.responses.push((
      suffix.to_string(),
      Response::Exit {
        code,
        stdout: stdout.to_string(),
      },
    ));
    self
  }

  pub fn fail_spawn(mut self, suffix: &str) -> Self {
    self.responses.push((suffix.to_string(), Response::SpawnFailure));
    self
  }

  pub fn calls(&self) -> Vec<CommandSpec> {
    self.calls.borrow().clone()
  }
}

impl ProcessRunner for FakeRunner {
  fn run(&self, command: &CommandSpec) -> Result<ProcessOutput, ExecError> {
    self.calls.borrow_mut().push(command.clone());

    let line = command.to_string();
    let response = self
      .responses
      .iter()
      .find(|(suffix, _)| command.program.ends_with(suffix.as_str()) || line.ends_with(suffix.as_str()));

    match response {
      Some((_, Response::Exit { code, stdout })) => Ok(ProcessOutput {
        code: *code,
        stdout: stdout.clone(),
        stderr: String::new(),
      }),
      Some((_, Response::SpawnFailure)) => Err(ExecError::Spawn {
        program: command.program.clone(),
        source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
      }),
      None => Ok(ProcessOutput::default()),
    }
  }
}
