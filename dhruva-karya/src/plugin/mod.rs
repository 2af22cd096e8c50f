//! Plugin contract, factory and registry.
//!
//! # Architecture
//!
//! ```text
//! [[plugins]] config           ← WHICH algorithms, by name
//!     │
//!     │ PluginFactory::create(spec)   (type name → constructor)
//!     ▼
//! PluginRegistry               ← name → loaded TaskPlugin, owns lifetime
//!     │
//!     │ select(request.plugin)
//!     ▼
//! TaskPlugin::compute_step     ← one increment of work per loop iteration
//! ```
//!
//! A plugin goes through `configure → activate → (reset, compute_step*)* →
//! deactivate → cleanup`, driven by the server lifecycle. `compute_step` is
//! only called while the plugin is active.

pub mod builtin;
mod factory;
mod registry;

pub use factory::{PluginConstructor, PluginFactory};
pub use registry::{LoadedPlugin, PluginRegistry};

use crate::core::types::{Path, StampedPose};
use crate::environment::{EnvironmentHandle, EnvironmentSnapshot};
use crate::error::Result;
use crate::goal::GoalChecker;

/// Result payload produced by a plugin.
#[derive(Debug, Clone, PartialEq)]
pub enum Artifact {
    /// Planned path (planners)
    Path(Path),
    /// Time spent executing a maneuver (recoveries)
    Elapsed { secs: f32 },
}

/// Outcome of a single plugin step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepResult {
    /// Still working; optional partial artifact to report.
    Progress(Option<Artifact>),
    /// Done, with the final artifact.
    Succeeded(Artifact),
    /// This step failed but a later one may succeed (e.g. path blocked, pose unavailable).
    RecoverableFailure {
        reason: String,
        partial: Option<Artifact>,
    },
    /// The request cannot succeed (e.g. goal outside the map).
    FatalFailure(String),
}

/// Everything a plugin sees during one step.
pub struct StepContext<'a> {
    /// Request target
    pub target: &'a StampedPose,
    /// Environment snapshot taken at the start of this iteration
    pub snapshot: &'a EnvironmentSnapshot,
    /// Server goal tolerance
    pub goal: &'a GoalChecker,
    /// Zero-based iteration number within the request
    pub iteration: u32,
}

impl StepContext<'_> {
    /// Robot pose from the snapshot, if localization is available.
    pub fn current_pose(&self) -> Option<&StampedPose> {
        self.snapshot.pose.as_ref()
    }

    /// Whether the robot already sits within tolerance of the target.
    pub fn goal_reached(&self) -> bool {
        self.goal
            .is_reached(self.current_pose().map(|p| &p.pose), &self.target.pose)
    }
}

/// Capability set every algorithm plugin implements.
pub trait TaskPlugin: Send {
    /// Bind the plugin to its name and the shared environment.
    fn configure(&mut self, name: &str, environment: EnvironmentHandle) -> Result<()>;

    fn activate(&mut self) -> Result<()> {
        Ok(())
    }

    fn deactivate(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release everything acquired in `configure`.
    fn cleanup(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called before the first step of every request.
    fn reset(&mut self) {}

    /// Run one increment of work against the given snapshot.
    fn compute_step(&mut self, ctx: &StepContext<'_>) -> StepResult;

    /// Called when a request is cancelled or times out mid-execution.
    fn abort(&mut self) {}
}
