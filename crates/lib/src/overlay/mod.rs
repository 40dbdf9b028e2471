//! Overlay extension points.
//!
//! Overlays are directories under a base path that optionally declare
//! functions in a `register.yaml` manifest. The [`OverlayRegistry`] loads and
//! validates those manifests against a [`CapabilitySet`], and the
//! [`OverlayDispatcher`] runs the registered functions at the pipeline's
//! extension points.

mod dispatch;
mod registry;
mod types;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::exec::ExecError;
use crate::status::StatusError;

pub use dispatch::{CmdOutcome, InitrdParams, OverlayDispatcher, Target};
pub use registry::{MANIFEST_FILENAME, OverlayRegistry, Registration};
pub use types::{CapabilitySet, ExtensionPoint, FunctionKind, OverlayFunction, points};

/// Errors raised while registering or dispatching overlay functions.
#[derive(Debug, Error)]
pub enum OverlayError {
  #[error("overlay '{0}' is already registered")]
  AlreadyRegistered(String),

  #[error("overlay '{0}' is not registered")]
  UnknownOverlay(String),

  #[error("failed to read overlay manifest {path}: {source}")]
  ReadManifest {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("invalid manifest for overlay '{overlay}': {source}")]
  ParseManifest {
    overlay: String,
    #[source]
    source: serde_yaml::Error,
  },

  /// The manifest names a function outside the capability set.
  #[error("overlay '{overlay}' declares unknown function '{function}'")]
  UnknownFunction { overlay: String, function: String },

  #[error("overlay '{overlay}' declares '{function}' as {declared}, expected {expected}")]
  TypeMismatch {
    overlay: String,
    function: String,
    declared: FunctionKind,
    expected: FunctionKind,
  },

  #[error("overlay '{overlay}' function '{function}' has no cmd")]
  MissingCommand { overlay: String, function: String },

  #[error("unknown extension point '{0}'")]
  UnknownExtensionPoint(String),

  /// A dispatch call used the wrong discipline for a point.
  #[error("extension point '{point}' is {declared}, dispatched as {expected}")]
  DisciplineMismatch {
    point: String,
    expected: FunctionKind,
    declared: FunctionKind,
  },

  #[error("overlay '{overlay}' references unmapped placeholder <{key}>")]
  UnmappedPlaceholder { overlay: String, key: String },

  #[error("overlay '{overlay}' function '{point}' exited with code {code}")]
  FunctionFailed { overlay: String, point: String, code: i32 },

  #[error(transparent)]
  Exec(#[from] ExecError),

  #[error("status error: {0}")]
  Status(#[from] StatusError),
}
