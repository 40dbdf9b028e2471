//! dcs-deploy-lib: provisioning pipeline for Jetson boards
//!
//! This crate provides the pieces the `dcs-deploy` CLI composes:
//! - `StatusStore`: crash-safe record of which steps of which group completed
//! - `OverlayRegistry`: overlays and the functions they attach to extension points
//! - `OverlayDispatcher`: runs overlay functions and records each call
//! - `PipelineDriver`: runs groups in order with skip, device and confirmation gates
//! - `JetsonProvisioner`: the concrete plan for one configuration database entry

pub mod config_db;
pub mod consts;
pub mod exec;
pub mod overlay;
pub mod paths;
pub mod pipeline;
pub mod placeholder;
pub mod provision;
pub mod resources;
pub mod status;
pub mod util;
