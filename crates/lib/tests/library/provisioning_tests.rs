//! End-to-end runs of the Jetson plan against scripted collaborators.

use std::fs;
use std::time::Duration;

use dcs_deploy_lib::config_db::ConfigMatch;
use dcs_deploy_lib::overlay::OverlayError;
use dcs_deploy_lib::pipeline::{
  Confirm, DeviceProbe, DriverOptions, GroupKind, GroupOutcome, PipelineDriver, PipelineError, RunReport,
};
use dcs_deploy_lib::provision::{JetsonProvisioner, JetsonState};
use dcs_deploy_lib::status::StatusStore;
use serde_json::Value;

use super::common::*;

fn provision(
  ws: &Workspace,
  config: &ConfigMatch,
  runner: &ScriptedRunner,
  resources: &StubResources,
  confirm: Option<&dyn Confirm>,
) -> (Result<RunReport, PipelineError>, JetsonState) {
  provision_with(ws, config, runner, resources, confirm, &Present, DriverOptions::default())
}

fn provision_with(
  ws: &Workspace,
  config: &ConfigMatch,
  runner: &ScriptedRunner,
  resources: &StubResources,
  confirm: Option<&dyn Confirm>,
  probe: &dyn DeviceProbe,
  options: DriverOptions,
) -> (Result<RunReport, PipelineError>, JetsonState) {
  let provisioner = JetsonProvisioner::new(config, ws.layout(config), ws.overlays_dir(), resources, resources);
  let registry = provisioner.registry().unwrap();
  let keymap = provisioner.keymap();
  let mut store = StatusStore::load(ws.status_path(config), provisioner.identifier()).unwrap();

  let mut driver = PipelineDriver::new(&registry, runner, &keymap)
    .with_probe(probe)
    .with_options(options);
  if let Some(confirm) = confirm {
    driver = driver.with_confirm(confirm);
  }

  let mut state = JetsonState::default();
  let result = driver.run(&mut store, provisioner.plan(), &mut state);
  (result, state)
}

fn document(ws: &Workspace, config: &ConfigMatch) -> Value {
  let content = fs::read_to_string(ws.status_path(config)).unwrap();
  serde_json::from_str(&content).unwrap()
}

fn standard_overlays(ws: &Workspace) {
  ws.overlay("sec_boot", SEC_BOOT, true);
  ws.overlay("dcs_first_boot", "", false);
}

mod full_run {
  use super::*;

  #[test]
  fn runs_every_group_and_records_status() {
    let ws = Workspace::new();
    standard_overlays(&ws);
    let config = ws.config("nvme");
    let runner = ScriptedRunner::new().answer("initrd_params.sh dcs2.0+p3767-0000", 0, "--uefi-enc key.pem");
    let resources = StubResources::default();

    let (result, state) = provision(&ws, &config, &runner, &resources, None);
    let report = result.unwrap();

    assert_eq!(report.outcome(GroupKind::Prepare), Some(GroupOutcome::Completed));
    assert_eq!(report.outcome(GroupKind::GenImages), Some(GroupOutcome::Completed));
    assert_eq!(report.outcome(GroupKind::ImagesPhase1), Some(GroupOutcome::NotEntered));
    assert_eq!(report.outcome(GroupKind::OdmFuse), Some(GroupOutcome::NotEntered));
    assert_eq!(report.outcome(GroupKind::Flash), Some(GroupOutcome::Completed));

    assert_eq!(state.img_types, vec!["encrypted"]);
    assert_eq!(state.initrd.env, "ROOTFS_ENC=1");
    assert_eq!(resources.downloads.borrow().len(), 2);

    assert!(runner.called("sec_boot/install.sh"));
    assert!(runner.called("orin_nx 36.3 2.0 none nvme ubuntu"));
    assert!(!runner.called("dcs_first_boot/install.sh"));
    assert!(runner.called("./apply_binaries.sh"));

    let flash = runner
      .calls()
      .into_iter()
      .find(|line| line.contains("--flash-only"))
      .expect("flash command");
    assert!(flash.contains("ROOTFS_ENC=1 ./tools/kernel_flash/l4t_initrd_flash.sh --flash-only"));
    assert!(flash.contains("--external-device nvme0n1p1"));
    assert!(flash.contains("--uefi-enc key.pem dcs2.0+p3767-0000 internal"));

    let doc = document(&ws, &config);
    assert_eq!(doc["identifier"], serde_json::json!(["orin_nx", "36.3", "2.0", "nvme", "ubuntu"]));
    assert_eq!(doc["prepare"]["status"], true);
    assert_eq!(doc["prepare"]["states"]["install_local_overlay@sec_boot"], 0);
    assert_eq!(doc["prepare"]["states"]["install_local_overlay@dcs_first_boot"], 0);
    assert_eq!(doc["gen-images"]["status"], true);
    assert_eq!(doc["gen-images"]["states"]["generate_images"], 0);
    assert_eq!(doc["flash"]["status"], true);
    assert!(doc.get("flash-gen-prepare-odmfuse").is_none());
  }

  #[test]
  fn second_run_skips_preparation() {
    let ws = Workspace::new();
    standard_overlays(&ws);
    let config = ws.config("nvme");
    let resources = StubResources::default();

    let (first, _) = provision(&ws, &config, &ScriptedRunner::new(), &resources, None);
    first.unwrap();

    let runner = ScriptedRunner::new();
    let (second, _) = provision(&ws, &config, &runner, &resources, None);
    let report = second.unwrap();

    assert_eq!(report.outcome(GroupKind::Prepare), Some(GroupOutcome::Skipped));
    assert_eq!(report.outcome(GroupKind::Flash), Some(GroupOutcome::Completed));
    assert!(!runner.called("apply_binaries.sh"));
    assert!(runner.called("--flash-only"));
    assert_eq!(resources.downloads.borrow().len(), 2);
  }

  #[test]
  fn added_overlay_reruns_preparation() {
    let ws = Workspace::new();
    standard_overlays(&ws);
    let config = ws.config("nvme");
    let resources = StubResources::default();
    provision(&ws, &config, &ScriptedRunner::new(), &resources, None).0.unwrap();

    ws.overlay("extra_layer", "", true);
    let mut changed = config.clone();
    changed.entry.overlays.push("extra_layer".into());

    let runner = ScriptedRunner::new();
    let report = provision(&ws, &changed, &runner, &resources, None).0.unwrap();

    assert_eq!(report.outcome(GroupKind::Prepare), Some(GroupOutcome::Completed));
    assert!(runner.called("extra_layer/install.sh"));
    assert_eq!(document(&ws, &changed)["prepare"]["states"]["install_local_overlay@extra_layer"], 0);
  }

  #[test]
  fn different_storage_uses_its_own_status_file() {
    let ws = Workspace::new();
    standard_overlays(&ws);
    let resources = StubResources::default();
    let nvme = ws.config("nvme");
    provision(&ws, &nvme, &ScriptedRunner::new(), &resources, None).0.unwrap();

    let usb = ws.config("usb");
    let runner = ScriptedRunner::new();
    let report = provision(&ws, &usb, &runner, &resources, None).0.unwrap();

    assert_ne!(ws.status_path(&nvme), ws.status_path(&usb));
    assert_eq!(report.outcome(GroupKind::Prepare), Some(GroupOutcome::Completed));
    assert!(runner.called("apply_binaries.sh"));
  }
}

mod failures {
  use super::*;

  #[test]
  fn overlay_failure_stops_before_flashing() {
    let ws = Workspace::new();
    standard_overlays(&ws);
    let config = ws.config("nvme");
    let runner = ScriptedRunner::new().answer("initrd_params.sh dcs2.0+p3767-0000", 3, "");

    let (result, _) = provision(&ws, &config, &runner, &StubResources::default(), None);
    let err = result.unwrap_err();

    assert!(matches!(
      err,
      PipelineError::Overlay(OverlayError::FunctionFailed { code: 3, .. })
    ));
    assert_eq!(err.exit_code(), 3);
    assert!(!runner.called("--flash-only"));

    let doc = document(&ws, &config);
    assert_eq!(doc["prepare"]["status"], true);
    assert_eq!(doc["gen-images"]["status"], false);
    assert!(doc.get("flash").is_none());
  }

  #[test]
  fn failed_generation_is_recorded() {
    let ws = Workspace::new();
    standard_overlays(&ws);
    let config = ws.config("nvme");
    let runner = ScriptedRunner::new().answer("dcs2.0+p3767-0000 internal", 1, "");

    let (result, _) = provision(&ws, &config, &runner, &StubResources::default(), None);

    match result.unwrap_err() {
      PipelineError::StepFailed { group, step, code } => {
        assert_eq!(group, GroupKind::GenImages);
        assert_eq!(step, "generate_images");
        assert_eq!(code, 1);
      }
      other => panic!("unexpected error: {other}"),
    }
    assert_eq!(document(&ws, &config)["gen-images"]["states"]["generate_images"], 1);
  }

  #[test]
  fn interrupted_preparation_is_redone() {
    let ws = Workspace::new();
    standard_overlays(&ws);
    let config = ws.config("nvme");
    let status = ws.status_path(&config);
    fs::create_dir_all(status.parent().unwrap()).unwrap();
    fs::write(
      &status,
      r#"{
        "identifier": ["orin_nx", "36.3", "2.0", "nvme", "ubuntu"],
        "prepare": {
          "status": false,
          "last_processing_step": "apply_binaries",
          "states": { "download_resources": 0, "extract_l4t": 0, "extract_rootfs": 0, "apply_binaries": -1 }
        }
      }"#,
    )
    .unwrap();

    let runner = ScriptedRunner::new();
    let report = provision(&ws, &config, &runner, &StubResources::default(), None).0.unwrap();

    assert_eq!(report.outcome(GroupKind::Prepare), Some(GroupOutcome::Completed));
    assert!(runner.called("apply_binaries.sh"));
    assert_eq!(document(&ws, &config)["prepare"]["states"]["apply_binaries"], 0);
  }
}

mod flash_hooks {
  use super::*;

  const FUSE: &str = r#"
functions:
  flash-gen-prepare-odmfuse:
    type: cmd
    cmd: burn.sh
"#;

  const PREPARE: &str = r#"
functions:
  flash-gen-prepare-is-needed:
    type: cmd
    cmd: needed.sh
  flash-gen-prepare:
    type: cmd
    cmd: prepare.sh
"#;

  #[test]
  fn odmfuse_runs_once_after_confirmation() {
    let ws = Workspace::new();
    standard_overlays(&ws);
    ws.overlay("dcs_first_boot", FUSE, false);
    let config = ws.config("nvme");
    let resources = StubResources::default();

    let runner = ScriptedRunner::new();
    let report = provision(&ws, &config, &runner, &resources, Some(&Types("burn fuses")))
      .0
      .unwrap();
    assert_eq!(report.outcome(GroupKind::OdmFuse), Some(GroupOutcome::Completed));
    assert!(runner.called("dcs_first_boot/burn.sh"));

    let again = ScriptedRunner::new();
    let report = provision(&ws, &config, &again, &resources, Some(&Types("burn fuses")))
      .0
      .unwrap();
    assert_eq!(report.outcome(GroupKind::OdmFuse), Some(GroupOutcome::Skipped));
    assert!(!again.called("burn.sh"));
  }

  #[test]
  fn declined_odmfuse_stops_the_run() {
    let ws = Workspace::new();
    standard_overlays(&ws);
    ws.overlay("dcs_first_boot", FUSE, false);
    let config = ws.config("nvme");

    let runner = ScriptedRunner::new();
    let (result, _) = provision(&ws, &config, &runner, &StubResources::default(), Some(&Types("yes")));
    let err = result.unwrap_err();

    assert!(matches!(err, PipelineError::Declined(_)));
    assert_eq!(err.exit_code(), 6);
    assert!(!runner.called("burn.sh"));
    assert!(!runner.called("--flash-only"));
  }

  #[test]
  fn flash_preparation_follows_is_needed() {
    let ws = Workspace::new();
    standard_overlays(&ws);
    ws.overlay("dcs_first_boot", PREPARE, false);
    let config = ws.config("nvme");

    let runner = ScriptedRunner::new().answer("needed.sh", 1, "");
    let (result, state) = provision(&ws, &config, &runner, &StubResources::default(), None);
    result.unwrap();
    assert!(state.flash_prepare_needed);
    assert!(runner.called("dcs_first_boot/prepare.sh"));

    let runner = ScriptedRunner::new().answer("needed.sh", 0, "");
    let (result, state) = provision(&ws, &config, &runner, &StubResources::default(), None);
    result.unwrap();
    assert!(!state.flash_prepare_needed);
    assert!(!runner.called("prepare.sh"));
  }

  #[test]
  fn is_needed_code_outside_accepted_set_fails() {
    let ws = Workspace::new();
    standard_overlays(&ws);
    ws.overlay("dcs_first_boot", PREPARE, false);
    let config = ws.config("nvme");

    let runner = ScriptedRunner::new().answer("needed.sh", 2, "");
    let err = provision(&ws, &config, &runner, &StubResources::default(), None)
      .0
      .unwrap_err();

    assert!(matches!(
      err,
      PipelineError::Overlay(OverlayError::FunctionFailed { code: 2, .. })
    ));
    assert!(!runner.called("--flash-only"));
  }
}

mod split_run {
  use super::*;

  const DEVICE_HOOKS: &str = r#"
functions:
  img-gen-internal-prepare:
    type: cmd
    cmd: prepare_images.sh
  img-gen-external:
    type: lt4-initrd-params
    cmd: external_params.sh
  img-gen-cleanup:
    type: cmd
    cmd: cleanup.sh
"#;

  fn position(calls: &[String], needle: &str) -> usize {
    calls
      .iter()
      .position(|line| line.contains(needle))
      .unwrap_or_else(|| panic!("no call containing '{needle}' in {calls:#?}"))
  }

  fn short_wait() -> DriverOptions {
    DriverOptions {
      recovery_timeout: Duration::from_millis(20),
      poll_interval: Duration::from_millis(1),
      ..DriverOptions::default()
    }
  }

  #[test]
  fn phases_run_in_order_around_the_device_wait() {
    let ws = Workspace::new();
    ws.overlay("sec_boot", SEC_BOOT, true);
    ws.overlay("dcs_first_boot", DEVICE_HOOKS, false);
    let config = ws.split_config("nvme");
    let runner = ScriptedRunner::new()
      .answer("initrd_params.sh dcs2.0+p3767-0000", 0, "--uefi-enc key.pem")
      .answer("external_params.sh", 0, "--external-only");
    let probe = WatchingProbe::new(&runner);

    let (result, state) = provision_with(
      &ws,
      &config,
      &runner,
      &StubResources::default(),
      None,
      &probe,
      DriverOptions::default(),
    );
    let report = result.unwrap();

    assert_eq!(report.outcome(GroupKind::ImagesPhase0), Some(GroupOutcome::Completed));
    assert_eq!(report.outcome(GroupKind::GenImages), Some(GroupOutcome::Completed));
    assert_eq!(report.outcome(GroupKind::ImagesPhase1), Some(GroupOutcome::Completed));
    assert_eq!(report.outcome(GroupKind::Flash), Some(GroupOutcome::Completed));
    assert_eq!(state.img_types, vec!["encrypted"]);

    let calls = runner.calls();
    let prepare = position(&calls, "prepare_images.sh");
    let internal = position(&calls, "initrd_params.sh");
    let host_generation = position(&calls, "--no-flash");
    let external = position(&calls, "external_params.sh");
    let cleanup = position(&calls, "cleanup.sh");
    let flash = position(&calls, "--flash-only");
    assert!(prepare < internal && internal < host_generation && host_generation < external);
    assert!(external < cleanup && cleanup < flash);
    assert_eq!(calls.iter().filter(|line| line.contains("--no-flash")).count(), 2);

    // The first device check happens after host generation, before phase 1.
    let first_seen = probe.first_seen.get().unwrap();
    assert_eq!(first_seen, external);

    assert!(calls[flash].contains("--uefi-enc key.pem --external-only dcs2.0+p3767-0000 internal"));

    let doc = document(&ws, &config);
    assert_eq!(doc["images-phase-0"]["status"], true);
    assert_eq!(doc["gen-images"]["states"]["generate_images"], 0);
    assert!(doc["gen-images"]["states"].get("generate_images_device").is_none());
    assert_eq!(doc["images-phase-1"]["states"]["generate_images_device"], 0);
    assert!(doc["images-phase-1"]["states"].get("generate_images").is_none());
    assert_eq!(doc["images-phase-1"]["status"], true);
  }

  #[test]
  fn missing_device_stops_before_phase_one() {
    let ws = Workspace::new();
    ws.overlay("sec_boot", SEC_BOOT, true);
    ws.overlay("dcs_first_boot", DEVICE_HOOKS, false);
    let config = ws.split_config("nvme");
    let runner = ScriptedRunner::new();

    let (result, _) = provision_with(
      &ws,
      &config,
      &runner,
      &StubResources::default(),
      None,
      &Absent,
      short_wait(),
    );
    let err = result.unwrap_err();

    assert!(matches!(err, PipelineError::DeviceNotDetected { .. }));
    assert_eq!(err.exit_code(), 4);
    assert!(runner.called("prepare_images.sh"));
    assert!(!runner.called("external_params.sh"));
    assert!(!runner.called("cleanup.sh"));
    assert_eq!(runner.calls().iter().filter(|line| line.contains("--no-flash")).count(), 1);

    let doc = document(&ws, &config);
    assert_eq!(doc["images-phase-0"]["status"], true);
    assert_eq!(doc["gen-images"]["status"], true);
    assert!(doc.get("images-phase-1").is_none());
  }

  #[test]
  fn phase_without_hooks_is_recorded_complete() {
    let ws = Workspace::new();
    standard_overlays(&ws);
    let config = ws.split_config("nvme");
    let runner = ScriptedRunner::new();

    let report = provision(&ws, &config, &runner, &StubResources::default(), None)
      .0
      .unwrap();

    assert_eq!(report.outcome(GroupKind::ImagesPhase0), Some(GroupOutcome::Completed));
    let doc = document(&ws, &config);
    assert_eq!(doc["images-phase-0"]["states"], serde_json::json!({}));
    assert_eq!(doc["images-phase-0"]["status"], true);
  }
}
