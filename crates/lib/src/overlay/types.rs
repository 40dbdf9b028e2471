//! Overlay function and extension point types.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::exec::CommandSpec;
use crate::placeholder::{self, KeyMap, PlaceholderError};

use super::OverlayError;

/// Execution discipline of an overlay function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionKind {
  /// Runs for side effect; exit codes are summed.
  #[serde(rename = "cmd")]
  Cmd,
  /// Contributes a static token list, nothing is executed.
  #[serde(rename = "option")]
  Option,
  /// Runs and contributes its stdout to the initrd flash command line.
  #[serde(rename = "lt4-initrd-params")]
  InitrdParams,
}

impl FunctionKind {
  pub fn as_str(self) -> &'static str {
    match self {
      FunctionKind::Cmd => "cmd",
      FunctionKind::Option => "option",
      FunctionKind::InitrdParams => "lt4-initrd-params",
    }
  }
}

impl fmt::Display for FunctionKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Extension point names known to the Jetson provisioning pipeline.
pub mod points {
  pub const IMG_GEN_INTERNAL: &str = "img-gen-internal";
  pub const IMG_GEN_EXTERNAL: &str = "img-gen-external";
  pub const IMG_GEN_INTERNAL_PREPARE: &str = "img-gen-internal-prepare";
  pub const IMG_GEN_CLEANUP: &str = "img-gen-cleanup";
  pub const FLASH_GEN_PREPARE: &str = "flash-gen-prepare";
  pub const FLASH_GEN_PREPARE_IS_NEEDED: &str = "flash-gen-prepare-is-needed";
  pub const FLASH_GEN_PREPARE_ODMFUSE: &str = "flash-gen-prepare-odmfuse";
  pub const GET_IMG_TYPE: &str = "get-img-type";
}

/// A declared extension point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionPoint {
  pub discipline: FunctionKind,
  /// Exit codes accepted from each call. `None` means codes are summed and
  /// left to the caller to judge.
  pub accepted_codes: Option<Vec<i32>>,
}

/// The closed vocabulary of extension points a registry accepts.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CapabilitySet {
  points: BTreeMap<String, ExtensionPoint>,
}

impl CapabilitySet {
  pub fn new() -> Self {
    Self::default()
  }

  /// Declare a point whose calls are judged by the caller.
  pub fn with_point(mut self, name: &str, discipline: FunctionKind) -> Self {
    self.points.insert(
      name.to_string(),
      ExtensionPoint {
        discipline,
        accepted_codes: None,
      },
    );
    self
  }

  /// Declare a point where any code outside `codes` is fatal.
  pub fn with_accepting(mut self, name: &str, discipline: FunctionKind, codes: &[i32]) -> Self {
    self.points.insert(
      name.to_string(),
      ExtensionPoint {
        discipline,
        accepted_codes: Some(codes.to_vec()),
      },
    );
    self
  }

  /// Extension points of the Jetson image generation and flash pipeline.
  pub fn jetson() -> Self {
    use points::*;

    Self::new()
      .with_point(IMG_GEN_INTERNAL, FunctionKind::InitrdParams)
      .with_point(IMG_GEN_EXTERNAL, FunctionKind::InitrdParams)
      .with_point(IMG_GEN_INTERNAL_PREPARE, FunctionKind::Cmd)
      .with_point(IMG_GEN_CLEANUP, FunctionKind::Cmd)
      .with_point(FLASH_GEN_PREPARE, FunctionKind::Cmd)
      .with_point(FLASH_GEN_PREPARE_ODMFUSE, FunctionKind::Cmd)
      // 0 = not needed, 1 = needed
      .with_accepting(FLASH_GEN_PREPARE_IS_NEEDED, FunctionKind::Cmd, &[0, 1])
      .with_point(GET_IMG_TYPE, FunctionKind::Option)
  }

  pub fn get(&self, name: &str) -> Option<&ExtensionPoint> {
    self.points.get(name)
  }

  pub fn contains(&self, name: &str) -> bool {
    self.points.contains_key(name)
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.points.keys().map(String::as_str)
  }
}

/// `register.yaml` as written by overlay authors.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct OverlayManifest {
  #[serde(default)]
  pub functions: Option<BTreeMap<String, FunctionDecl>>,
}

/// One function entry of an overlay manifest.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct FunctionDecl {
  #[serde(rename = "type")]
  pub kind: FunctionKind,
  #[serde(default)]
  pub cmd: Option<String>,
  #[serde(default)]
  pub args: Vec<String>,
  #[serde(default)]
  pub options: Vec<String>,
  #[serde(default, rename = "get-env")]
  pub env: String,
}

/// A validated function registered by an overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayFunction {
  /// Extension point name.
  pub name: String,
  pub kind: FunctionKind,
  pub overlay: String,
  /// Script path relative to the overlay directory.
  pub cmd: String,
  pub args: Vec<String>,
  pub env: String,
  pub options: Vec<String>,
}

impl OverlayFunction {
  /// Build the invocation for this function.
  ///
  /// The program is `<overlays_base>/<overlay>/<cmd>` made absolute, followed
  /// by `extra_args` and the resolved argument templates.
  pub fn resolve(
    &self,
    keymap: &KeyMap,
    extra_args: &[String],
    overlays_base: &Path,
  ) -> Result<CommandSpec, OverlayError> {
    let args = self
      .args
      .iter()
      .map(|template| placeholder::substitute(template, keymap))
      .collect::<Result<Vec<_>, _>>()
      .map_err(|PlaceholderError::Unmapped(key)| OverlayError::UnmappedPlaceholder {
        overlay: self.overlay.clone(),
        key,
      })?;

    Ok(
      CommandSpec::new(self.script_path(overlays_base).to_string_lossy())
        .args(extra_args.iter().cloned())
        .args(args),
    )
  }

  /// Absolute path of the function's script.
  pub fn script_path(&self, overlays_base: &Path) -> PathBuf {
    let path = overlays_base.join(&self.overlay).join(&self.cmd);
    std::path::absolute(&path).unwrap_or(path)
  }
}
