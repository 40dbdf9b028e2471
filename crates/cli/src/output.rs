//! CLI output formatting utilities.
//!
//! Colored status lines, durations and Unicode symbols. Logs go to stderr
//! through `tracing`; these helpers print the operator-facing summary.

use std::time::Duration;

use anyhow::Context;
use owo_colors::{OwoColorize, Stream};

use dcs_deploy_lib::pipeline::GroupOutcome;

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const SKIPPED: &str = "↷";
  pub const ARROW: &str = "→";
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  let millis = duration.subsec_millis();

  if secs >= 60 {
    let mins = secs / 60;
    let remaining_secs = secs % 60;
    format!("{}m {}s", mins, remaining_secs)
  } else if secs > 0 {
    format!("{}.{:02}s", secs, millis / 10)
  } else {
    format!("{}ms", millis)
  }
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

/// One line per group of a finished run.
pub fn print_outcome(group: &str, outcome: GroupOutcome) {
  match outcome {
    GroupOutcome::Completed => println!(
      "  {} {}",
      symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
      group
    ),
    GroupOutcome::Skipped => println!(
      "  {} {} {}",
      symbols::SKIPPED.if_supports_color(Stream::Stdout, |s| s.cyan()),
      group,
      "(up to date)".if_supports_color(Stream::Stdout, |s| s.dimmed())
    ),
    GroupOutcome::NotEntered => println!(
      "  {} {}",
      symbols::INFO.if_supports_color(Stream::Stdout, |s| s.dimmed()),
      group.if_supports_color(Stream::Stdout, |s| s.dimmed())
    ),
  }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}
