#![forbid(unsafe_code)]

//! `handoff` runs a repository's check scripts and bundles the results.
//!
//! The interesting part is [`orchestrator`]: scheduling, process
//! supervision with hang escalation, and the cancel/restart protocol.

pub mod archive;
pub mod config;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod ui;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
