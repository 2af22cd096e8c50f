//! Core data types exchanged between the server, the environment and plugins.
//!
//! - [`Point2D`], [`Pose2D`]: planar geometry in meters and radians
//! - [`StampedPose`]: pose in a named frame with a timestamp
//! - [`MapSnapshot`]: immutable cost grid copied out of the obstacle map
//! - [`Path`]: planner output

mod map;
mod path;
mod pose;

pub use map::{COST_FREE, COST_LETHAL, COST_UNKNOWN, MapSnapshot};
pub use path::Path;
pub use pose::{Point2D, Pose2D, StampedPose};
