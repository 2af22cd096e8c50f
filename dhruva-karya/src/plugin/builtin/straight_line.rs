//! Straight-line planner.
//!
//! Interpolates poses from the robot to the goal at a fixed spacing and
//! checks every pose against the map snapshot. A blocked line is a
//! recoverable failure (the map may clear); a goal outside the map or inside
//! an obstacle is fatal.

use crate::config::PluginSpec;
use crate::core::math::now_us;
use crate::core::types::{COST_LETHAL, COST_UNKNOWN, MapSnapshot, Path, Pose2D};
use crate::environment::EnvironmentHandle;
use crate::error::{KaryaError, Result};
use crate::plugin::{Artifact, StepContext, StepResult, TaskPlugin};

/// Planner producing a straight path to the goal.
#[derive(Debug)]
pub struct StraightLinePlanner {
    name: String,
    environment: Option<EnvironmentHandle>,
    /// Spacing between path poses in meters
    interpolation_resolution: f32,
    /// Whether unknown cells may be crossed
    allow_unknown: bool,
    active: bool,
}

/// Finest accepted interpolation step in meters (1 mm).
pub const MIN_INTERPOLATION_RESOLUTION: f32 = 0.001;

impl StraightLinePlanner {
    pub fn new(interpolation_resolution: f32, allow_unknown: bool) -> Self {
        Self {
            name: String::new(),
            environment: None,
            interpolation_resolution,
            allow_unknown,
            active: false,
        }
    }

    /// Build from plugin parameters `interpolation_resolution` and `allow_unknown`.
    pub fn from_spec(spec: &PluginSpec) -> Result<Self> {
        let interpolation_resolution = spec.param_f32("interpolation_resolution", 0.05)?;
        if !interpolation_resolution.is_finite()
            || interpolation_resolution < MIN_INTERPOLATION_RESOLUTION
        {
            return Err(KaryaError::PluginLoad {
                name: spec.name.clone(),
                reason: format!(
                    "interpolation_resolution must be >= {}, got {}",
                    MIN_INTERPOLATION_RESOLUTION, interpolation_resolution
                ),
            });
        }
        let allow_unknown = spec.param_bool("allow_unknown", true)?;
        Ok(Self::new(interpolation_resolution, allow_unknown))
    }

    fn is_blocked(&self, cost: u8) -> bool {
        cost == COST_LETHAL || (cost == COST_UNKNOWN && !self.allow_unknown)
    }

    /// Poses from `start` to `goal`; stops at the first blocked pose.
    ///
    /// Returns the poses collected and, if blocked, the blocking pose.
    fn interpolate(
        &self,
        map: &MapSnapshot,
        start: &Pose2D,
        goal: &Pose2D,
    ) -> (Vec<Pose2D>, Option<Pose2D>) {
        let distance = start.distance(goal);
        let heading = (goal.y - start.y).atan2(goal.x - start.x);
        let steps = (distance / self.interpolation_resolution).ceil().max(1.0) as usize;

        let mut poses = Vec::with_capacity(steps + 1);
        poses.push(Pose2D::new(start.x, start.y, heading));

        for i in 1..=steps {
            let t = i as f32 / steps as f32;
            let theta = if i == steps { goal.theta } else { heading };
            let pose = Pose2D::new(
                start.x + (goal.x - start.x) * t,
                start.y + (goal.y - start.y) * t,
                theta,
            );
            let blocked = map
                .cost_at(&pose.position())
                .is_none_or(|cost| self.is_blocked(cost));
            if blocked {
                return (poses, Some(pose));
            }
            poses.push(pose);
        }
        (poses, None)
    }
}

impl Default for StraightLinePlanner {
    fn default() -> Self {
        Self::new(0.05, true)
    }
}

impl TaskPlugin for StraightLinePlanner {
    fn configure(&mut self, name: &str, environment: EnvironmentHandle) -> Result<()> {
        tracing::info!(
            "Configuring straight-line planner '{}' (resolution {:.3}m, allow_unknown={})",
            name,
            self.interpolation_resolution,
            self.allow_unknown
        );
        self.name = name.to_string();
        self.environment = Some(environment);
        Ok(())
    }

    fn activate(&mut self) -> Result<()> {
        self.active = true;
        Ok(())
    }

    fn deactivate(&mut self) -> Result<()> {
        self.active = false;
        Ok(())
    }

    fn cleanup(&mut self) -> Result<()> {
        self.environment = None;
        Ok(())
    }

    fn compute_step(&mut self, ctx: &StepContext<'_>) -> StepResult {
        let Some(environment) = &self.environment else {
            return StepResult::FatalFailure(format!("planner '{}' is not configured", self.name));
        };
        if !self.active {
            return StepResult::FatalFailure(format!("planner '{}' is not active", self.name));
        }

        let map = &ctx.snapshot.map;
        if ctx.target.frame_id != environment.frame_id() {
            return StepResult::FatalFailure(format!(
                "goal frame '{}' does not match global frame '{}'",
                ctx.target.frame_id,
                environment.frame_id()
            ));
        }

        let Some(start) = ctx.current_pose() else {
            return StepResult::RecoverableFailure {
                reason: "robot pose unavailable".to_string(),
                partial: None,
            };
        };
        if map.is_empty() {
            return StepResult::RecoverableFailure {
                reason: "map not received yet".to_string(),
                partial: None,
            };
        }

        let goal = ctx.target.pose;
        if ctx.goal_reached() {
            tracing::debug!("Robot already within goal tolerance, returning trivial path");
            let path = Path::new(environment.frame_id(), vec![start.pose, goal], now_us());
            return StepResult::Succeeded(Artifact::Path(path));
        }

        match map.cost_at(&goal.position()) {
            None => {
                return StepResult::FatalFailure(format!(
                    "goal ({:.2}, {:.2}) is outside the map",
                    goal.x, goal.y
                ));
            }
            Some(cost) if self.is_blocked(cost) => {
                return StepResult::FatalFailure(format!(
                    "goal ({:.2}, {:.2}) is not in free space",
                    goal.x, goal.y
                ));
            }
            Some(_) => {}
        }
        if map.cost_at(&start.pose.position()).is_none() {
            return StepResult::FatalFailure(format!(
                "robot ({:.2}, {:.2}) is outside the map",
                start.pose.x, start.pose.y
            ));
        }

        let (poses, blocked_at) = self.interpolate(map, &start.pose, &goal);
        match blocked_at {
            Some(blocked) => StepResult::RecoverableFailure {
                reason: format!("path blocked at ({:.2}, {:.2})", blocked.x, blocked.y),
                partial: Some(Artifact::Path(Path::new(
                    environment.frame_id(),
                    poses,
                    now_us(),
                ))),
            },
            None => StepResult::Succeeded(Artifact::Path(Path::new(
                environment.frame_id(),
                poses,
                now_us(),
            ))),
        }
    }
}
