//! Planned path type.

use serde::{Deserialize, Serialize};

use super::Pose2D;

/// Sequence of poses from the robot to a target, in one frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Path {
    pub frame_id: String,
    pub poses: Vec<Pose2D>,
    /// Timestamp in microseconds since epoch
    pub timestamp_us: u64,
}

impl Path {
    pub fn new(frame_id: impl Into<String>, poses: Vec<Pose2D>, timestamp_us: u64) -> Self {
        Self {
            frame_id: frame_id.into(),
            poses,
            timestamp_us,
        }
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    /// Total length along the poses in meters.
    pub fn length(&self) -> f32 {
        self.poses.windows(2).map(|w| w[0].distance(&w[1])).sum()
    }
}
