//! Overlay manifest loading and function indexing.
//!
//! # Layout
//!
//! ```text
//! <overlays_base>/
//! └── sec_boot_rfs_enc/
//!     ├── register.yaml
//!     └── tools/initrd_params.sh
//! ```
//!
//! # Example Manifest
//!
//! ```yaml
//! functions:
//!   img-gen-internal:
//!     type: lt4-initrd-params
//!     cmd: tools/initrd_params.sh
//!     args: ["<BOARD>", "--internal"]
//!     get-env: ROOTFS_ENC=1
//!   get-img-type:
//!     type: option
//!     options: ["encrypted"]
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::OverlayError;
use super::types::{CapabilitySet, FunctionKind, OverlayFunction, OverlayManifest};

/// Manifest file name within an overlay directory.
pub const MANIFEST_FILENAME: &str = "register.yaml";

/// Result of registering an overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
  /// The overlay declared this many functions.
  Registered { functions: usize },
  /// The overlay has no manifest or declares no functions.
  NothingToRegister,
}

#[derive(Debug, Clone)]
struct RegisteredOverlay {
  name: String,
  functions: BTreeMap<String, OverlayFunction>,
}

/// Index of overlay functions, validated against a capability set.
#[derive(Debug, Clone)]
pub struct OverlayRegistry {
  base_dir: PathBuf,
  capabilities: CapabilitySet,
  /// Overlays in registration order.
  overlays: Vec<RegisteredOverlay>,
}

impl OverlayRegistry {
  pub fn new(base_dir: impl Into<PathBuf>, capabilities: CapabilitySet) -> Self {
    Self {
      base_dir: base_dir.into(),
      capabilities,
      overlays: Vec::new(),
    }
  }

  pub fn base_dir(&self) -> &Path {
    &self.base_dir
  }

  pub fn capabilities(&self) -> &CapabilitySet {
    &self.capabilities
  }

  /// Load and validate `<base>/<name>/register.yaml`.
  pub fn register_overlay(&mut self, name: &str) -> Result<Registration, OverlayError> {
    if self.is_registered(name) {
      return Err(OverlayError::AlreadyRegistered(name.to_string()));
    }

    let path = self.base_dir.join(name).join(MANIFEST_FILENAME);
    let manifest = match fs::read_to_string(&path) {
      Ok(content) if content.trim().is_empty() => OverlayManifest::default(),
      Ok(content) => serde_yaml::from_str::<OverlayManifest>(&content).map_err(|source| OverlayError::ParseManifest {
        overlay: name.to_string(),
        source,
      })?,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        debug!(overlay = name, path = %path.display(), "no overlay manifest");
        OverlayManifest::default()
      }
      Err(source) => return Err(OverlayError::ReadManifest { path, source }),
    };

    let mut functions = BTreeMap::new();
    for (fn_name, decl) in manifest.functions.unwrap_or_default() {
      let point = self
        .capabilities
        .get(&fn_name)
        .ok_or_else(|| OverlayError::UnknownFunction {
          overlay: name.to_string(),
          function: fn_name.clone(),
        })?;

      if point.discipline != decl.kind {
        return Err(OverlayError::TypeMismatch {
          overlay: name.to_string(),
          function: fn_name,
          declared: decl.kind,
          expected: point.discipline,
        });
      }

      let cmd = match (decl.kind, decl.cmd) {
        (FunctionKind::Option, cmd) => cmd.unwrap_or_default(),
        (_, Some(cmd)) if !cmd.trim().is_empty() => cmd,
        (_, _) => {
          return Err(OverlayError::MissingCommand {
            overlay: name.to_string(),
            function: fn_name,
          });
        }
      };

      functions.insert(
        fn_name.clone(),
        OverlayFunction {
          name: fn_name,
          kind: decl.kind,
          overlay: name.to_string(),
          cmd,
          args: decl.args,
          env: decl.env,
          options: decl.options,
        },
      );
    }

    let count = functions.len();
    self.overlays.push(RegisteredOverlay {
      name: name.to_string(),
      functions,
    });

    if count == 0 {
      info!(overlay = name, "overlay has nothing to register");
      Ok(Registration::NothingToRegister)
    } else {
      info!(overlay = name, functions = count, "registered overlay");
      Ok(Registration::Registered { functions: count })
    }
  }

  pub fn is_registered(&self, name: &str) -> bool {
    self.overlays.iter().any(|o| o.name == name)
  }

  /// Registered overlay names in registration order.
  pub fn overlay_names(&self) -> Vec<String> {
    self.overlays.iter().map(|o| o.name.clone()).collect()
  }

  /// The function `overlay` registered for `point`, if any.
  pub fn function(&self, overlay: &str, point: &str) -> Option<&OverlayFunction> {
    self
      .overlays
      .iter()
      .find(|o| o.name == overlay)
      .and_then(|o| o.functions.get(point))
  }

  /// Every function registered for `point`, in overlay registration order.
  pub fn functions_for(&self, point: &str) -> Vec<&OverlayFunction> {
    self.overlays.iter().filter_map(|o| o.functions.get(point)).collect()
  }

  pub fn has_functions(&self, point: &str) -> bool {
    self.overlays.iter().any(|o| o.functions.contains_key(point))
  }
}
