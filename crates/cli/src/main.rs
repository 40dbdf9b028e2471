mod cmd;
mod output;
mod prompts;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dcs_deploy_lib::consts::APP_NAME;
use dcs_deploy_lib::paths;
use dcs_deploy_lib::pipeline::PipelineError;

use cmd::{FlashArgs, Selection};
use output::print_error;

/// dcs-deploy - provision Jetson-based boards
#[derive(Parser)]
#[command(name = APP_NAME)]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Configuration database (default: $DCS_DEPLOY_ROOT/config_db.json)
  #[arg(long, global = true, value_name = "FILE")]
  config_db: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// List supported configurations
  List {
    /// Output as JSON
    #[arg(long)]
    json: bool,
  },

  /// Print the resources of a configuration without running anything
  ManualMode {
    #[command(flatten)]
    selection: Selection,
  },

  /// Prepare, generate images and flash a device
  Flash(FlashArgs),

  /// Show recorded progress of a configuration
  Status {
    #[command(flatten)]
    selection: Selection,

    /// Output as JSON
    #[arg(long)]
    json: bool,
  },
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let config_db = cli.config_db.unwrap_or_else(paths::config_db_path);

  let result = match cli.command {
    Commands::List { json } => cmd::cmd_list(&config_db, json),
    Commands::ManualMode { selection } => cmd::cmd_manual_mode(&config_db, &selection),
    Commands::Flash(args) => cmd::cmd_flash(&config_db, &args, cli.verbose),
    Commands::Status { selection, json } => cmd::cmd_status(&config_db, &selection, json, cli.verbose),
  };

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      print_error(&format!("{:#}", err));
      ExitCode::from(exit_code(&err))
    }
  }
}

/// Pipeline errors carry their own exit code; anything else is 1.
fn exit_code(err: &anyhow::Error) -> u8 {
  err
    .chain()
    .find_map(|cause| cause.downcast_ref::<PipelineError>())
    .and_then(|err| u8::try_from(err.exit_code()).ok())
    .unwrap_or(1)
}
