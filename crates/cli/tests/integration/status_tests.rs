//! `status` output for recorded and missing progress.

use predicates::prelude::*;
use serde_json::Value;

use super::common::TestEnv;

const STATUS_PATH: &str = "flash/orin_nx_nvme_2.0_36.3_ubuntu/prepare_status.json";

const INTERRUPTED: &str = r#"{
  "identifier": ["orin_nx", "36.3", "2.0", "nvme", "ubuntu"],
  "valid_retval": {},
  "prepare": {
    "status": true,
    "last_processing_step": "install_local_overlay@dcs_first_boot",
    "states": { "apply_binaries": 0, "install_local_overlay@dcs_first_boot": 0 }
  },
  "gen-images": {
    "status": false,
    "last_processing_step": "generate_images",
    "states": { "fn_overlay@img-gen-internal.lt4-initrd-params_0": 0, "generate_images": -1 }
  }
}"#;

#[test]
fn no_progress_yet() {
  let env = TestEnv::new();
  env
    .cmd()
    .args(["status", "orin_nx", "36.3", "2.0", "nvme"])
    .assert()
    .success()
    .stdout(predicate::str::contains("No progress recorded"));
}

#[test]
fn shows_where_a_run_stopped() {
  let env = TestEnv::new();
  env.write_file(STATUS_PATH, INTERRUPTED);

  env
    .cmd()
    .args(["status", "orin_nx", "36.3", "2.0", "nvme", "--verbose"])
    .assert()
    .success()
    .stdout(predicate::str::contains("prepare"))
    .stdout(predicate::str::contains("gen-images (stopped at generate_images)"))
    .stdout(predicate::str::contains("generate_images = pending"));
}

#[test]
fn status_json_is_the_document() {
  let env = TestEnv::new();
  env.write_file(STATUS_PATH, INTERRUPTED);

  let output = env
    .cmd()
    .args(["status", "orin_nx", "36.3", "2.0", "nvme", "--json"])
    .output()
    .unwrap();
  assert!(output.status.success());

  let json: Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(json["config_id"], "orin_nx_nvme_2.0_36.3_ubuntu");
  assert_eq!(json["status"]["prepare"]["status"], true);
  assert_eq!(json["status"]["gen-images"]["states"]["generate_images"], -1);
}

#[test]
fn status_does_not_modify_the_document() {
  let env = TestEnv::new();
  env.write_file(STATUS_PATH, INTERRUPTED);

  env.cmd().args(["status", "orin_nx", "36.3", "2.0", "nvme"]).assert().success();

  let content = std::fs::read_to_string(env.root_path().join(STATUS_PATH)).unwrap();
  assert_eq!(content, INTERRUPTED);
}
