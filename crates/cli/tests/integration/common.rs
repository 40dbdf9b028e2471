//! Shared test helpers for CLI integration tests.

use std::path::PathBuf;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Get path to a fixture file.
pub fn fixture_path(name: &str) -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR"))
    .join("tests")
    .join("fixtures")
    .join(name)
}

/// Isolated working root with the fixture configuration database.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn new() -> Self {
    let env = Self {
      temp: TempDir::new().unwrap(),
    };
    std::fs::copy(fixture_path("config_db.json"), env.root_path().join("config_db.json")).unwrap();
    env
  }

  /// Working root (isolated per test).
  pub fn root_path(&self) -> PathBuf {
    let p = self.temp.path().join("dcs_deploy");
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  /// Write a file relative to the working root.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.root_path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  /// Command with the working root pointed at this environment.
  pub fn cmd(&self) -> Command {
    let mut cmd = cargo_bin_cmd!("dcs-deploy");
    cmd.env("DCS_DEPLOY_ROOT", self.root_path()).env("RUST_LOG", "warn");
    cmd
  }
}
