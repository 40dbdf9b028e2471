use anyhow::{Result, bail};
use std::io::{self, IsTerminal, Write};
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::terminal;
use dcs_deploy_lib::pipeline::{Confirm, Interrupt};
use tracing::warn;

use crate::output::print_warning;

/// Ask the operator to type `phrase` exactly.
pub fn confirm_phrase(action: &str, phrase: &str) -> Result<bool> {
  if !io::stdin().is_terminal() || !io::stderr().is_terminal() {
    bail!("Cannot confirm {} in non-interactive mode.", action);
  }

  write!(io::stderr(), "{} cannot be undone. Type '{}' to continue: ", action, phrase)?;
  io::stderr().flush()?;

  let mut input = String::new();
  io::stdin().read_line(&mut input)?;

  Ok(input.trim() == phrase)
}

/// Terminal confirmation for irreversible pipeline steps.
pub struct TerminalConfirm;

impl Confirm for TerminalConfirm {
  fn confirm_phrase(&self, action: &str, phrase: &str) -> bool {
    match confirm_phrase(action, phrase) {
      Ok(confirmed) => confirmed,
      Err(err) => {
        print_warning(&err.to_string());
        false
      }
    }
  }
}

/// Cancels bounded waits when the operator presses Esc.
pub struct EscapeKey {
  interactive: bool,
}

impl EscapeKey {
  pub fn new() -> Self {
    Self {
      interactive: io::stdin().is_terminal(),
    }
  }
}

impl Interrupt for EscapeKey {
  fn interrupted(&self) -> bool {
    if !self.interactive || terminal::enable_raw_mode().is_err() {
      return false;
    }

    // Raw mode only while draining, so subprocess output keeps normal line endings.
    let mut pressed = false;
    while event::poll(Duration::ZERO).unwrap_or(false) {
      if let Ok(Event::Key(KeyEvent {
        code: KeyCode::Esc,
        kind: KeyEventKind::Press,
        ..
      })) = event::read()
      {
        pressed = true;
      }
    }

    leave_raw_mode(terminal::disable_raw_mode());
    pressed
  }
}

fn leave_raw_mode(result: io::Result<()>) {
  if let Err(e) = result {
    warn!(error = %e, "failed to leave raw terminal mode, run 'reset' to restore the terminal");
  }
}
