//! `list` and `manual-mode` output.

use predicates::prelude::*;
use serde_json::Value;

use super::common::TestEnv;

#[test]
fn list_prints_every_configuration() {
  let env = TestEnv::new();
  env
    .cmd()
    .arg("list")
    .assert()
    .success()
    .stdout(predicate::str::contains("orin_nx_36_3_ubuntu"))
    .stdout(predicate::str::contains("xavier_nx_35_5_ubuntu"))
    .stdout(predicate::str::contains("nvme, usb"))
    .stdout(predicate::str::contains("hardware_support_layer, dcs_first_boot"));
}

#[test]
fn list_json_includes_options() {
  let env = TestEnv::new();
  let output = env.cmd().args(["list", "--json"]).output().unwrap();
  assert!(output.status.success());

  let json: Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(json["configurations"].as_array().unwrap().len(), 2);
  assert_eq!(json["configurations"][0]["name"], "orin_nx_36_3_ubuntu");
  assert_eq!(json["options"]["boards"], serde_json::json!(["1.2", "1.10", "2.0"]));
  assert_eq!(json["options"]["storages"], serde_json::json!(["emmc", "nvme", "usb"]));
}

#[test]
fn manual_mode_shows_resources() {
  let env = TestEnv::new();
  env
    .cmd()
    .args(["manual-mode", "xavier_nx", "35.5", "1.10", "emmc"])
    .assert()
    .success()
    .stdout(predicate::str::contains("jetson_linux_r35.5.0_aarch64.tbz2"))
    .stdout(predicate::str::contains("dcs1.2+p3668-0001"))
    .stdout(predicate::str::contains("camera_adapter"))
    .stdout(predicate::str::contains("xavier_nx_emmc_1.10_35.5_ubuntu"));
}

#[test]
fn manual_mode_rejects_unknown_board() {
  let env = TestEnv::new();
  env
    .cmd()
    .args(["manual-mode", "xavier_nx", "35.5", "9.9", "emmc"])
    .assert()
    .code(2);
}
