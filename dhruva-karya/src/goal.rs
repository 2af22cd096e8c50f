//! Goal satisfaction check.
//!
//! Planar distance only: heading is not compared. A missing pose (localization
//! not available yet) means "not reached", never an error, so callers keep
//! looping instead of terminating early.

use crate::core::types::{Pose2D, StampedPose};
use crate::environment::EnvironmentHandle;
use crate::error::{KaryaError, Result};

/// Default goal tolerance in meters.
pub const DEFAULT_GOAL_TOLERANCE: f32 = 0.25;

/// Returns true when `current` is within `tolerance` meters of `goal`.
///
/// `None` for `current` always yields false.
pub fn is_goal_reached(current: Option<&Pose2D>, goal: &Pose2D, tolerance: f32) -> bool {
    let Some(current) = current else {
        return false;
    };
    let dx = goal.x - current.x;
    let dy = goal.y - current.y;
    let d = (dx * dx + dy * dy).sqrt();
    d <= tolerance
}

/// Goal check with a tolerance validated at construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GoalChecker {
    tolerance: f32,
}

impl GoalChecker {
    /// Create a checker. Negative or non-finite tolerances are configuration errors.
    pub fn new(tolerance: f32) -> Result<Self> {
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(KaryaError::Config(format!(
                "goal tolerance must be a non-negative number, got {}",
                tolerance
            )));
        }
        Ok(Self { tolerance })
    }

    pub fn tolerance(&self) -> f32 {
        self.tolerance
    }

    pub fn is_reached(&self, current: Option<&Pose2D>, goal: &Pose2D) -> bool {
        is_goal_reached(current, goal, self.tolerance)
    }

    /// Check against the most recent pose held by the environment.
    pub fn is_reached_in(&self, environment: &EnvironmentHandle, goal: &StampedPose) -> bool {
        let current = environment.current_pose();
        if current.is_none() {
            tracing::debug!("Current robot pose is not available");
        }
        self.is_reached(current.as_ref().map(|p| &p.pose), &goal.pose)
    }
}

impl Default for GoalChecker {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_GOAL_TOLERANCE,
        }
    }
}
