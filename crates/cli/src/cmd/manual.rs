//! `dcs-deploy manual-mode`: show what a flash would use, without running it.

use std::path::Path;

use anyhow::Result;

use dcs_deploy_lib::paths;
use dcs_deploy_lib::resources::url_to_filename;

use crate::output::{print_stat, print_success, symbols};

use super::Selection;

pub fn cmd_manual_mode(config_db: &Path, selection: &Selection) -> Result<()> {
  let config = super::select(config_db, selection)?;
  let entry = &config.entry;
  let config_id = config.query.config_id();

  print_success(&format!("Configuration {} ({})", config.name, config_id));
  print_stat("L4T archive", &entry.l4t);
  print_stat("Rootfs archive", &entry.rootfs);
  print_stat("Board config", &entry.board_config);
  if let Some(expansion) = &entry.board_expansion {
    print_stat("Board expansion", expansion);
  }
  print_stat("Device needed for images", &entry.device_required_for_images.to_string());

  println!();
  print_stat("Downloads", &paths::download_dir().display().to_string());
  for url in [&entry.l4t, &entry.rootfs] {
    println!("    {} {}", symbols::ARROW, url_to_filename(url));
  }
  print_stat("Working directory", &paths::config_dir(&config_id).display().to_string());
  print_stat("Status file", &paths::status_path(&config_id).display().to_string());

  if !entry.overlays.is_empty() {
    println!();
    println!("Overlays:");
    for overlay in &entry.overlays {
      println!("  {} {}", symbols::INFO, overlay);
    }
  }

  Ok(())
}
