//! Status command implementation.
//!
//! Displays recorded progress of one configuration, group by group.

use std::path::Path;

use anyhow::{Context, Result};

use dcs_deploy_lib::paths;
use dcs_deploy_lib::pipeline::{GroupKind, PipelineError};
use dcs_deploy_lib::status::{PENDING, StatusStore};

use crate::output::{self, print_info, print_json, print_stat};

use super::Selection;

pub fn cmd_status(config_db: &Path, selection: &Selection, json: bool, verbose: bool) -> Result<()> {
  let config = super::select(config_db, selection)?;
  let config_id = config.query.config_id();
  let path = paths::status_path(&config_id);

  if !path.exists() {
    if json {
      return print_json(&serde_json::json!({ "config_id": config_id, "status": null }));
    }
    print_info(&format!("No progress recorded for {}. Run 'dcs-deploy flash' first.", config_id));
    return Ok(());
  }

  // Loading never writes; the identifier only reaches disk with a mutation.
  let store = StatusStore::load(&path, Vec::new())
    .map_err(PipelineError::from)
    .with_context(|| format!("Failed to read {}", path.display()))?;
  let document = store.document();

  if json {
    return print_json(&serde_json::json!({ "config_id": config_id, "status": document }));
  }

  print_info(&format!("Configuration {}", config_id));
  print_stat("Identifier", &document.identifier.join(" "));
  println!();

  for kind in GroupKind::ORDER {
    let Some(record) = document.groups.get(kind.name()) else {
      continue;
    };

    if record.status {
      println!("  {} {}", output::symbols::SUCCESS, kind);
    } else if record.last_processing_step.is_empty() {
      println!("  {} {}", output::symbols::INFO, kind);
    } else {
      println!(
        "  {} {} (stopped at {})",
        output::symbols::ERROR,
        kind,
        record.last_processing_step
      );
    }

    if verbose {
      for (step, code) in &record.states {
        let code = if *code == PENDING { "pending".to_string() } else { code.to_string() };
        println!("      {} = {}", step, code);
      }
    }
  }

  Ok(())
}
