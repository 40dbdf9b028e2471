//! Implementation of the `dcs-deploy flash` command.
//!
//! Resolves the configuration, registers its overlays and runs the pipeline:
//! - Prepares the BSP tree (skipped when the previous preparation still holds)
//! - Generates images
//! - Waits for the device in recovery mode and flashes it
//!
//! Progress is recorded in the configuration's status file so an interrupted
//! run resumes where it stopped.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Args;
use tracing::info;

use dcs_deploy_lib::exec::SystemRunner;
use dcs_deploy_lib::paths;
use dcs_deploy_lib::pipeline::{DriverOptions, PipelineDriver, PipelineError, UsbRecoveryProbe};
use dcs_deploy_lib::provision::{JetsonProvisioner, JetsonState, Layout};
use dcs_deploy_lib::resources::{HttpDownloader, TarExtractor};
use dcs_deploy_lib::status::StatusStore;

use crate::output::{format_duration, print_info, print_outcome, print_success};
use crate::prompts::{EscapeKey, TerminalConfirm};

use super::Selection;

/// Invocation flags that never invalidate a finished preparation.
const VOLATILE_FLAGS: [&str; 2] = ["--verbose", "--force"];

#[derive(Debug, Args)]
pub struct FlashArgs {
  #[command(flatten)]
  pub selection: Selection,

  /// Redo the preparation even if the previous one is still valid
  #[arg(short, long)]
  pub force: bool,

  /// Directory holding local overlays (default: $DCS_DEPLOY_ROOT/overlays)
  #[arg(long, value_name = "DIR")]
  pub overlays_dir: Option<PathBuf>,

  /// Argument passed to every overlay installer as --KEY VALUE
  #[arg(long = "overlay-arg", value_name = "KEY=VALUE", value_parser = parse_key_val)]
  pub overlay_args: Vec<(String, String)>,

  /// Seconds to wait for the device in recovery mode
  #[arg(long, default_value_t = 120, value_name = "SECS")]
  pub recovery_timeout: u64,

  /// Only download and prepare the BSP tree
  #[arg(long)]
  pub prepare_only: bool,
}

fn parse_key_val(s: &str) -> Result<(String, String)> {
  let Some((key, value)) = s.split_once('=') else {
    bail!("expected KEY=VALUE, got '{}'", s);
  };
  if key.is_empty() {
    bail!("empty key in '{}'", s);
  }
  Ok((key.to_string(), value.to_string()))
}

/// Identifier of this invocation: configuration tokens plus flags.
fn identifier(provisioner: &JetsonProvisioner<'_>, args: &FlashArgs, verbose: bool) -> Vec<String> {
  let mut tokens = provisioner.identifier();
  if args.force {
    tokens.push("--force".to_string());
  }
  if verbose {
    tokens.push("--verbose".to_string());
  }
  tokens
}

pub fn cmd_flash(config_db: &Path, args: &FlashArgs, verbose: bool) -> Result<()> {
  let started = Instant::now();
  let config = super::select(config_db, &args.selection)?;
  let config_id = config.query.config_id();
  let overlays_dir = args.overlays_dir.clone().unwrap_or_else(paths::overlays_dir);

  let downloader = HttpDownloader::new();
  let extractor = TarExtractor::new().with_sudo(true).with_progress(true);
  let provisioner = JetsonProvisioner::new(
    &config,
    Layout::for_config(&config_id),
    &overlays_dir,
    &downloader,
    &extractor,
  )
  .with_overlay_args(args.overlay_args.clone());

  let registry = provisioner
    .registry()
    .map_err(PipelineError::from)
    .context("Failed to register overlays")?;
  let keymap = provisioner.keymap();

  let status_path = paths::status_path(&config_id);
  let mut store = StatusStore::load(&status_path, identifier(&provisioner, args, verbose))
    .map_err(PipelineError::from)
    .with_context(|| format!("Failed to load {}", status_path.display()))?;

  let probe = UsbRecoveryProbe::new(config.entry.recovery_usb_ids.clone());
  let interrupt = EscapeKey::new();
  let confirm = TerminalConfirm;
  let runner = SystemRunner;
  let options = DriverOptions {
    force_prepare: args.force,
    identifier_exclude: VOLATILE_FLAGS.iter().map(|s| s.to_string()).collect(),
    recovery_timeout: Duration::from_secs(args.recovery_timeout),
    ..DriverOptions::default()
  };
  let driver = PipelineDriver::new(&registry, &runner, &keymap)
    .with_probe(&probe)
    .with_interrupt(&interrupt)
    .with_confirm(&confirm)
    .with_options(options);

  print_info(&format!("Configuration {} ({})", config.name, config_id));
  if !args.prepare_only {
    print_info("Put the device in recovery mode when asked. Press Esc to cancel waiting.");
  }

  let plan = if args.prepare_only {
    provisioner.prepare_plan()
  } else {
    provisioner.plan()
  };
  let mut state = JetsonState::default();
  let report = driver.run(&mut store, plan, &mut state).context("Flash failed")?;

  println!();
  for (group, outcome) in &report.groups {
    print_outcome(group.name(), *outcome);
  }
  info!(status = %status_path.display(), "status saved");

  println!();
  let elapsed = format_duration(started.elapsed());
  if args.prepare_only {
    print_success(&format!("Preparation finished in {}", elapsed));
  } else {
    print_success(&format!("Flashing finished in {}", elapsed));
  }

  Ok(())
}
