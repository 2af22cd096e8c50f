//! Environment sources polled by the background update loop.

use std::sync::Arc;

use crate::config::EnvironmentConfig;
use crate::core::math::now_us;
use crate::core::types::{COST_FREE, COST_LETHAL, MapSnapshot, Point2D, Pose2D, StampedPose};
use crate::error::Result;

use super::EnvironmentUpdate;

/// Producer of environment updates (localization + mapping feed).
///
/// `poll` must not block for longer than one update period; returning
/// `Ok(None)` means nothing new is available yet.
pub trait EnvironmentSource: Send {
    fn poll(&mut self) -> Result<Option<EnvironmentUpdate>>;
}

/// Static world: a fixed map with circular obstacles and a stationary robot.
///
/// Serves the map with the first update and fresh pose stamps afterwards.
pub struct SimulatedWorld {
    frame_id: String,
    pose: Pose2D,
    map: Arc<MapSnapshot>,
    warmup_polls: u32,
    polls: u64,
}

impl SimulatedWorld {
    pub fn new(frame_id: impl Into<String>, pose: Pose2D, map: MapSnapshot) -> Self {
        Self {
            frame_id: frame_id.into(),
            pose,
            map: Arc::new(map),
            warmup_polls: 0,
            polls: 0,
        }
    }

    /// Build from the `[environment]` configuration section.
    pub fn from_config(config: &EnvironmentConfig) -> Self {
        let map_config = &config.map;
        let mut map = MapSnapshot::new(
            config.frame_id.clone(),
            map_config.width,
            map_config.height,
            map_config.resolution,
            Point2D::new(map_config.origin_x, map_config.origin_y),
            COST_FREE,
        );
        for [x, y, radius] in &map_config.obstacles {
            map.fill_circle(&Point2D::new(*x, *y), *radius, COST_LETHAL);
        }

        let pose = Pose2D::new(config.start_x, config.start_y, config.start_theta);
        let mut world = Self::new(config.frame_id.clone(), pose, map);
        world.warmup_polls = config.localization_warmup_polls;
        world
    }

    /// Withhold the pose for the first `polls` polls, as when localization starts up.
    pub fn with_localization_warmup(mut self, polls: u32) -> Self {
        self.warmup_polls = polls;
        self
    }

    /// Move the simulated robot.
    pub fn set_pose(&mut self, pose: Pose2D) {
        self.pose = pose;
    }
}

impl EnvironmentSource for SimulatedWorld {
    fn poll(&mut self) -> Result<Option<EnvironmentUpdate>> {
        self.polls += 1;
        let timestamp_us = now_us();

        let pose = (self.polls > u64::from(self.warmup_polls))
            .then(|| StampedPose::new(self.frame_id.clone(), self.pose, timestamp_us));

        let map = (self.polls == 1)
            .then(|| Arc::new(MapSnapshot::clone(&self.map).with_timestamp(timestamp_us)));

        Ok(Some(EnvironmentUpdate::new(pose, map, timestamp_us)))
    }
}
