//! DhruvaKarya - Navigation task server for VacuumTiger
//!
//! Hosts named planner and recovery plugins behind a lifecycle-managed
//! server. Requests ("plan to this pose", "wait here") are executed one at a
//! time by a worker thread that steps the selected plugin against the latest
//! environment snapshot until it succeeds, fails, times out or is cancelled.
//!
//! ## Layers
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ server      TaskServer: lifecycle, submit, result channel │
//! │             ActionWorker: per-request execution loop      │
//! ├──────────────────────────────────────────────────────────┤
//! │ lifecycle   ServerState, Transition, ResourceLedger       │
//! ├──────────────────────────────────────────────────────────┤
//! │ plugin      TaskPlugin, PluginFactory, PluginRegistry     │
//! │             builtin: StraightLinePlanner, WaitRecovery    │
//! ├──────────────────────────────────────────────────────────┤
//! │ goal        distance-based goal check                     │
//! │ environment EnvironmentHandle (latest snapshot), updater  │
//! ├──────────────────────────────────────────────────────────┤
//! │ core        Pose2D, MapSnapshot, Path, math               │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use dhruva_karya::{
//!     EnvironmentHandle, KaryaConfig, NavigationRequest, Pose2D, StampedPose, TaskServer,
//! };
//!
//! let server = TaskServer::new(KaryaConfig::default(), EnvironmentHandle::new("map"));
//! server.configure()?;
//! server.activate()?;
//!
//! let goal = StampedPose::new("map", Pose2D::new(1.0, 0.5, 0.0), 0);
//! let handle = server.submit(NavigationRequest::new("goal-1", goal));
//! if let Some(outcome) = handle.wait(Duration::from_secs(5)) {
//!     println!("{:?}", outcome.status);
//! }
//!
//! server.deactivate()?;
//! server.cleanup()?;
//! # Ok::<(), dhruva_karya::KaryaError>(())
//! ```

pub mod config;
pub mod core;
pub mod environment;
pub mod error;
pub mod goal;
pub mod lifecycle;
pub mod plugin;
pub mod server;

pub use config::{KaryaConfig, PluginSpec, ServerConfig};
pub use crate::core::types::{MapSnapshot, Path, Point2D, Pose2D, StampedPose};
pub use environment::{
    EnvironmentHandle, EnvironmentSnapshot, EnvironmentSource, EnvironmentUpdate, SimulatedWorld,
};
pub use error::{KaryaError, Result};
pub use goal::{GoalChecker, is_goal_reached};
pub use lifecycle::{Resource, ServerState, Transition};
pub use plugin::{Artifact, PluginFactory, StepContext, StepResult, TaskPlugin};
pub use server::{
    FailureKind, NavigationRequest, PublishedResult, RequestHandle, TaskEvent, TaskOutcome,
    TaskServer, TaskStatus,
};
