//! Status document persistence across store instances.

use std::fs;

use dcs_deploy_lib::status::{PENDING, StatusError, StatusStore, StepOutcome};
use tempfile::TempDir;

fn tokens(items: &[&str]) -> Vec<String> {
  items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn pending_step_survives_a_crash() {
  let dir = TempDir::new().unwrap();
  let path = dir.path().join("cfg").join("prepare_status.json");

  {
    let mut store = StatusStore::load(&path, tokens(&["orin_nx", "36.3"])).unwrap();
    let group = store.change_group("prepare");
    store.set_processing_step(&group, "extract_l4t").unwrap();
    store.set_status(&group, StepOutcome::code(0)).unwrap();
    store.set_processing_step(&group, "apply_binaries").unwrap();
    // dropped without recording a status
  }

  let mut store = StatusStore::load(&path, tokens(&["orin_nx", "36.3"])).unwrap();
  let group = store.change_group("prepare");
  assert_eq!(store.previous_identifier(), ["orin_nx", "36.3"]);
  assert_eq!(store.step_code(&group, "extract_l4t"), Some(0));
  assert_eq!(store.step_code(&group, "apply_binaries"), Some(PENDING));
  assert!(!store.status(&group).unwrap());
  assert!(store.is_identifier_same_as_prev(&[]));
}

#[test]
fn finalized_group_reads_back_complete() {
  let dir = TempDir::new().unwrap();
  let path = dir.path().join("prepare_status.json");

  let mut store = StatusStore::load(&path, tokens(&["a"])).unwrap();
  let group = store.change_group("flash");
  store.set_processing_step(&group, "fn_overlay@flash-gen-prepare-is-needed.cmd_0").unwrap();
  store.set_status(&group, StepOutcome::code(1).accepting(vec![0, 1])).unwrap();
  assert!(store.finalize_group(&group).unwrap());

  let mut reloaded = StatusStore::load(&path, tokens(&["b"])).unwrap();
  let group = reloaded.change_group("flash");
  assert!(reloaded.status(&group).unwrap());
  assert_eq!(
    reloaded.document().accepted_codes("fn_overlay@flash-gen-prepare-is-needed.cmd_0"),
    [0, 1]
  );
  assert!(!reloaded.is_identifier_same_as_prev(&[]));
  assert!(!dir.path().join("prepare_status.json.tmp").exists());
}

#[test]
fn corrupt_document_is_reported() {
  let dir = TempDir::new().unwrap();
  let path = dir.path().join("prepare_status.json");
  fs::write(&path, "{ not json").unwrap();

  let err = StatusStore::load(&path, vec![]).unwrap_err();
  assert!(matches!(err, StatusError::Parse(_)));
}

#[test]
fn pending_marker_cannot_be_accepted() {
  let dir = TempDir::new().unwrap();
  let mut store = StatusStore::load(dir.path().join("s.json"), vec![]).unwrap();
  let group = store.change_group("gen-images");
  store.set_processing_step(&group, "generate_images").unwrap();

  let err = store
    .set_status(&group, StepOutcome::code(PENDING).accepting(vec![0, PENDING]))
    .unwrap_err();
  assert!(matches!(err, StatusError::PendingCodeAccepted(_)));
}
