//! Operator and hardware collaborators of the driver.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::PipelineError;

/// USB vendor id of NVIDIA devices in recovery mode.
pub const NVIDIA_USB_VENDOR: &str = "0955";

/// Detects the target device in recovery mode.
pub trait DeviceProbe {
  fn is_present(&self) -> io::Result<bool>;
}

/// Operator cancellation, polled during bounded waits.
///
/// Implementations may terminate the process outright instead of returning.
pub trait Interrupt {
  fn interrupted(&self) -> bool;
}

/// Operator confirmation of an irreversible action.
pub trait Confirm {
  /// Return true only if the operator typed `phrase` exactly.
  fn confirm_phrase(&self, action: &str, phrase: &str) -> bool;
}

/// Scans sysfs for a USB device with a recovery-mode vendor/product id.
#[derive(Debug, Clone)]
pub struct UsbRecoveryProbe {
  sysfs: PathBuf,
  /// `vendor:product` pairs; empty matches any NVIDIA device.
  ids: Vec<String>,
}

impl UsbRecoveryProbe {
  pub fn new(ids: Vec<String>) -> Self {
    Self {
      sysfs: PathBuf::from("/sys/bus/usb/devices"),
      ids,
    }
  }

  pub fn with_sysfs(mut self, sysfs: impl Into<PathBuf>) -> Self {
    self.sysfs = sysfs.into();
    self
  }

  fn matches(&self, vendor: &str, product: &str) -> bool {
    if self.ids.is_empty() {
      return vendor == NVIDIA_USB_VENDOR;
    }
    self
      .ids
      .iter()
      .filter_map(|id| id.split_once(':'))
      .any(|(v, p)| v.eq_ignore_ascii_case(vendor) && p.eq_ignore_ascii_case(product))
  }
}

fn read_id(dir: &Path, file: &str) -> Option<String> {
  fs::read_to_string(dir.join(file)).ok().map(|s| s.trim().to_string())
}

impl DeviceProbe for UsbRecoveryProbe {
  fn is_present(&self) -> io::Result<bool> {
    let entries = match fs::read_dir(&self.sysfs) {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
      Err(e) => return Err(e),
    };

    for entry in entries {
      let dir = entry?.path();
      if let (Some(vendor), Some(product)) = (read_id(&dir, "idVendor"), read_id(&dir, "idProduct"))
        && self.matches(&vendor, &product)
      {
        debug!(device = %dir.display(), %vendor, %product, "found recovery-mode device");
        return Ok(true);
      }
    }
    Ok(false)
  }
}

/// Poll `probe` every `interval` until the device shows up, the operator
/// interrupts, or `timeout` elapses.
pub fn wait_for_device(
  probe: &dyn DeviceProbe,
  interrupt: &dyn Interrupt,
  timeout: Duration,
  interval: Duration,
) -> Result<(), PipelineError> {
  info!(timeout_secs = timeout.as_secs(), "waiting for device in recovery mode");
  let started = Instant::now();

  loop {
    if probe.is_present().map_err(PipelineError::Probe)? {
      info!(elapsed_ms = started.elapsed().as_millis() as u64, "device detected");
      return Ok(());
    }
    if interrupt.interrupted() {
      return Err(PipelineError::Interrupted);
    }
    if started.elapsed() >= timeout {
      return Err(PipelineError::DeviceNotDetected { timeout });
    }
    thread::sleep(interval);
  }
}
