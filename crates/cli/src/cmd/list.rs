//! `dcs-deploy list`: print the supported configurations.

use std::path::Path;

use anyhow::Result;
use serde::Serialize;

use dcs_deploy_lib::config_db::{ConfigEntry, ConfigOptions};

use crate::output::{print_info, print_json, print_stat};

#[derive(Serialize)]
struct ListOutput<'a> {
  configurations: Vec<Configuration<'a>>,
  options: ConfigOptions,
}

#[derive(Serialize)]
struct Configuration<'a> {
  name: &'a str,
  #[serde(flatten)]
  entry: &'a ConfigEntry,
}

pub fn cmd_list(config_db: &Path, json: bool) -> Result<()> {
  let db = super::load_db(config_db)?;

  if json {
    let output = ListOutput {
      configurations: db.entries().map(|(name, entry)| Configuration { name, entry }).collect(),
      options: db.options(),
    };
    return print_json(&output);
  }

  if db.is_empty() {
    print_info("The configuration database is empty.");
    return Ok(());
  }

  for (name, entry) in db.entries() {
    print_info(name);
    print_stat("Device", &entry.device);
    print_stat("L4T", &entry.l4t_version);
    print_stat("Board", &entry.board.join(", "));
    print_stat("Storage", &entry.storage.join(", "));
    print_stat("Rootfs", &entry.rootfs_type);
    if !entry.overlays.is_empty() {
      print_stat("Overlays", &entry.overlays.join(", "));
    }
    println!();
  }

  let options = db.options();
  println!("Available options:");
  print_stat("Devices", &options.devices.join(" "));
  print_stat("L4T versions", &options.l4t_versions.join(" "));
  print_stat("Boards", &options.boards.join(" "));
  print_stat("Storages", &options.storages.join(" "));
  print_stat("Rootfs types", &options.rootfs_types.join(" "));

  Ok(())
}
