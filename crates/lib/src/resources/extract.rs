//! Archive extraction.

use std::fs::{self, File};
use std::path::Path;
use std::time::Duration;

use flate2::read::GzDecoder;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::exec::{CommandSpec, ProcessRunner, SystemRunner};

use super::ResourceError;

/// Archive formats, detected from the file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
  Tar,
  TarGz,
  /// Any other compression; handed to the host `tar`.
  Other,
}

impl ArchiveKind {
  pub fn detect(path: &Path) -> Self {
    let name = path
      .file_name()
      .map(|n| n.to_string_lossy().to_lowercase())
      .unwrap_or_default();

    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
      ArchiveKind::TarGz
    } else if name.ends_with(".tar") {
      ArchiveKind::Tar
    } else {
      ArchiveKind::Other
    }
  }
}

/// Unpacks an archive into a directory.
pub trait Extractor {
  fn extract(&self, archive: &Path, dest: &Path) -> Result<(), ResourceError>;
}

/// Extracts tar archives, gzip-compressed or not, in process.
///
/// Other compressions (the vendor `.tbz2` bundles) are unpacked by the host
/// `tar -xpf`, optionally through `sudo` so root filesystem ownership is kept.
#[derive(Debug, Clone, Default)]
pub struct TarExtractor {
  sudo: bool,
  progress: bool,
}

impl TarExtractor {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_sudo(mut self, sudo: bool) -> Self {
    self.sudo = sudo;
    self
  }

  /// Show a spinner while extracting.
  pub fn with_progress(mut self, progress: bool) -> Self {
    self.progress = progress;
    self
  }

  fn spinner(&self, archive: &Path) -> Option<ProgressBar> {
    if !self.progress {
      return None;
    }
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed}] {msg}") {
      spinner.set_style(style);
    }
    spinner.set_message(format!(
      "extracting {}",
      archive.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
    ));
    spinner.enable_steady_tick(Duration::from_millis(120));
    Some(spinner)
  }

  fn unpack_in_process(&self, archive: &Path, dest: &Path, gzip: bool) -> Result<(), ResourceError> {
    let file = File::open(archive).map_err(ResourceError::io(archive))?;
    let extract_err = |e: std::io::Error| ResourceError::Extract {
      archive: archive.to_path_buf(),
      message: e.to_string(),
    };

    if gzip {
      let mut tar = tar::Archive::new(GzDecoder::new(file));
      tar.set_preserve_permissions(true);
      tar.unpack(dest).map_err(extract_err)
    } else {
      let mut tar = tar::Archive::new(file);
      tar.set_preserve_permissions(true);
      tar.unpack(dest).map_err(extract_err)
    }
  }

  fn unpack_with_host_tar(&self, archive: &Path, dest: &Path) -> Result<(), ResourceError> {
    let tar = CommandSpec::new("tar")
      .arg("-xpf")
      .arg(archive.to_string_lossy())
      .arg("-C")
      .arg(dest.to_string_lossy());
    let command = if self.sudo {
      CommandSpec::new("sudo").arg(tar.program).args(tar.args)
    } else {
      tar
    };

    let output = SystemRunner.run(&command)?;
    if output.success() {
      Ok(())
    } else {
      Err(ResourceError::Extract {
        archive: archive.to_path_buf(),
        message: format!("tar exited with code {}: {}", output.code, output.stderr),
      })
    }
  }
}

impl Extractor for TarExtractor {
  fn extract(&self, archive: &Path, dest: &Path) -> Result<(), ResourceError> {
    let kind = ArchiveKind::detect(archive);
    info!(archive = %archive.display(), dest = %dest.display(), ?kind, "extracting");

    fs::create_dir_all(dest).map_err(ResourceError::io(dest))?;

    let spinner = self.spinner(archive);
    let result = match kind {
      ArchiveKind::TarGz => self.unpack_in_process(archive, dest, true),
      ArchiveKind::Tar => self.unpack_in_process(archive, dest, false),
      ArchiveKind::Other => self.unpack_with_host_tar(archive, dest),
    };
    if let Some(spinner) = spinner {
      spinner.finish_and_clear();
    }

    result
  }
}
