//! Mathematical primitives and clock helpers.

use std::f32::consts::PI;
use std::time::{SystemTime, UNIX_EPOCH};

/// Normalize angle to [-π, π]
#[inline]
pub fn normalize_angle(angle: f32) -> f32 {
    let mut a = angle % (2.0 * PI);
    if a > PI {
        a -= 2.0 * PI;
    } else if a < -PI {
        a += 2.0 * PI;
    }
    a
}

/// Current wall-clock time in microseconds since epoch.
///
/// Returns 0 if the system clock is set before the epoch.
pub fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
