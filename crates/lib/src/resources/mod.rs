//! Resource download and archive extraction.

mod download;
mod extract;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::exec::ExecError;

pub use download::{Downloader, HttpDownloader, url_to_filename};
pub use extract::{ArchiveKind, Extractor, TarExtractor};

#[derive(Debug, Error)]
pub enum ResourceError {
  #[error("download failed for {url}: {message}")]
  Download { url: String, message: String },

  #[error("I/O error on {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to extract {archive}: {message}")]
  Extract { archive: PathBuf, message: String },

  #[error(transparent)]
  Exec(#[from] ExecError),
}

impl ResourceError {
  pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> ResourceError {
    let path = path.into();
    move |source| ResourceError::Io { path, source }
  }
}
