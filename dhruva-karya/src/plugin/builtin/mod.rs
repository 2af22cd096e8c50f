//! Built-in plugins.
//!
//! - [`StraightLinePlanner`]: straight segment from the robot to the goal, checked against the map
//! - [`WaitRecovery`]: stay put for a configured duration

mod straight_line;
mod wait;

pub use straight_line::StraightLinePlanner;
pub use wait::WaitRecovery;

use super::{PluginFactory, TaskPlugin};

/// Type name of [`StraightLinePlanner`].
pub const STRAIGHT_LINE_PLANNER: &str = "StraightLinePlanner";
/// Type name of [`WaitRecovery`].
pub const WAIT: &str = "Wait";

/// Register every built-in type with `factory`.
pub fn register_builtins(factory: &mut PluginFactory) {
    factory.register(STRAIGHT_LINE_PLANNER, |spec| {
        Ok(Box::new(StraightLinePlanner::from_spec(spec)?) as Box<dyn TaskPlugin>)
    });
    factory.register(WAIT, |spec| {
        Ok(Box::new(WaitRecovery::from_spec(spec)?) as Box<dyn TaskPlugin>)
    });
}
