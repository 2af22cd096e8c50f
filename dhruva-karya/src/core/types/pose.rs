//! Pose and point types.

use serde::{Deserialize, Serialize};

use crate::core::math::normalize_angle;

/// A 2D point in meters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2D {
    /// X coordinate in meters
    pub x: f32,
    /// Y coordinate in meters
    pub y: f32,
}

impl Point2D {
    /// Create a new point.
    #[inline]
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Distance to another point.
    #[inline]
    pub fn distance(&self, other: &Point2D) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Robot pose in 2D space.
///
/// Position (x, y) in meters and heading (theta) in radians, normalized to [-π, π].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose2D {
    /// X position in meters
    pub x: f32,
    /// Y position in meters
    pub y: f32,
    /// Heading in radians
    pub theta: f32,
}

impl Pose2D {
    /// Create a new pose with theta normalized to [-π, π].
    #[inline]
    pub fn new(x: f32, y: f32, theta: f32) -> Self {
        Self {
            x,
            y,
            theta: normalize_angle(theta),
        }
    }

    /// Position part of the pose.
    #[inline]
    pub fn position(&self) -> Point2D {
        Point2D::new(self.x, self.y)
    }

    /// Planar distance to another pose, ignoring heading.
    #[inline]
    pub fn distance(&self, other: &Pose2D) -> f32 {
        self.position().distance(&other.position())
    }

    /// Whether every component is a finite number.
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.theta.is_finite()
    }
}

/// A pose expressed in a named reference frame at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StampedPose {
    /// Reference frame (e.g. "map")
    pub frame_id: String,
    /// The pose itself
    pub pose: Pose2D,
    /// Timestamp in microseconds since epoch
    pub timestamp_us: u64,
}

impl StampedPose {
    pub fn new(frame_id: impl Into<String>, pose: Pose2D, timestamp_us: u64) -> Self {
        Self {
            frame_id: frame_id.into(),
            pose,
            timestamp_us,
        }
    }
}
