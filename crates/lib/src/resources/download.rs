//! HTTP resource download.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::ResourceError;

/// Fetches a remote file to a local path.
pub trait Downloader {
  fn download(&self, url: &str, dest: &Path) -> Result<(), ResourceError>;
}

/// Downloads over HTTP(S) with reqwest.
///
/// Each call drives a current-thread tokio runtime to completion, so callers
/// stay synchronous. Data is streamed to `<dest>.part` and renamed into place
/// once complete, so an interrupted download never leaves a truncated `dest`.
#[derive(Debug, Clone, Default)]
pub struct HttpDownloader {
  client: reqwest::Client,
}

impl HttpDownloader {
  pub fn new() -> Self {
    Self::default()
  }

  async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, ResourceError> {
    let download_err = |message: String| ResourceError::Download {
      url: url.to_string(),
      message,
    };

    if let Some(dir) = dest.parent() {
      fs::create_dir_all(dir).await.map_err(ResourceError::io(dir))?;
    }

    let response = self
      .client
      .get(url)
      .send()
      .await
      .map_err(|e| download_err(e.to_string()))?;

    if !response.status().is_success() {
      return Err(download_err(format!("HTTP {}", response.status())));
    }

    let part = part_path(dest);
    let mut file = fs::File::create(&part).await.map_err(ResourceError::io(&part))?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
      let chunk = chunk.map_err(|e| download_err(e.to_string()))?;
      file.write_all(&chunk).await.map_err(ResourceError::io(&part))?;
      written += chunk.len() as u64;
    }
    file.flush().await.map_err(ResourceError::io(&part))?;
    drop(file);

    fs::rename(&part, dest).await.map_err(ResourceError::io(dest))?;
    Ok(written)
  }
}

impl Downloader for HttpDownloader {
  fn download(&self, url: &str, dest: &Path) -> Result<(), ResourceError> {
    info!(url = %url, dest = %dest.display(), "downloading");

    let runtime = tokio::runtime::Builder::new_current_thread()
      .enable_all()
      .build()
      .map_err(ResourceError::io(dest))?;
    let size = runtime.block_on(self.fetch(url, dest))?;

    debug!(url = %url, size, "download complete");
    Ok(())
  }
}

fn part_path(dest: &Path) -> PathBuf {
  let mut name: OsString = dest.as_os_str().to_owned();
  name.push(".part");
  PathBuf::from(name)
}

/// Convert a URL to a safe file name.
///
/// Takes the last path component without query string; characters other
/// than alphanumerics, `-`, `_` and `.` become `_`.
pub fn url_to_filename(url: &str) -> String {
  let last = url.rsplit('/').next().unwrap_or(url);
  let last = last.split('?').next().unwrap_or(last);

  let sanitized: String = last
    .chars()
    .map(|c| {
      if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
        c
      } else {
        '_'
      }
    })
    .collect();

  if sanitized.is_empty() {
    "download".to_string()
  } else {
    sanitized
  }
}
