//! Core foundation layer.
//!
//! Bottom layer of the task server with no internal dependencies.
//!
//! # Contents
//!
//! - [`types`]: Poses, map snapshots and paths shared with plugins
//! - [`math`]: Angle normalization and clock helpers

pub mod math;
pub mod types;
