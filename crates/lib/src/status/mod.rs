//! Resumable pipeline status tracking.
//!
//! One JSON document per provisioning configuration records the identity of
//! the run that wrote it and the last exit code of every step, grouped by
//! pipeline phase. The pipeline consults it to decide which phases may be
//! skipped on a re-run.

mod store;
mod types;

pub use store::{GroupHandle, StatusStore};
pub use types::*;
