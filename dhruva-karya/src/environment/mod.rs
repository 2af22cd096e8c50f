//! Shared environment state: robot pose and obstacle map.
//!
//! [`EnvironmentHandle`] is a single-slot "latest value" cell. One writer (the
//! [`EnvironmentUpdater`] thread, or a test) publishes immutable
//! [`EnvironmentSnapshot`]s; any number of readers load the current snapshot
//! without blocking each other. Pose and map are swapped in together, so a
//! reader never observes a pose from one update paired with the map of another.
//!
//! Snapshot timestamps never go backwards: an update older than the current
//! snapshot is dropped.

mod source;
mod updater;

pub use source::{EnvironmentSource, SimulatedWorld};
pub use updater::EnvironmentUpdater;

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::core::types::{MapSnapshot, StampedPose};

/// Immutable point-in-time view of the environment.
#[derive(Debug, Clone)]
pub struct EnvironmentSnapshot {
    /// Latest robot pose, `None` while localization is unavailable
    pub pose: Option<StampedPose>,
    /// Latest obstacle map
    pub map: Arc<MapSnapshot>,
    /// Timestamp of the update that produced this snapshot (microseconds)
    pub timestamp_us: u64,
    /// Number of accepted updates before this one
    pub sequence: u64,
}

/// A change to publish into the environment.
#[derive(Debug, Clone)]
pub struct EnvironmentUpdate {
    /// New pose; `None` marks the pose as unavailable
    pub pose: Option<StampedPose>,
    /// New map; `None` keeps the previous map
    pub map: Option<Arc<MapSnapshot>>,
    pub timestamp_us: u64,
}

impl EnvironmentUpdate {
    pub fn new(
        pose: Option<StampedPose>,
        map: Option<Arc<MapSnapshot>>,
        timestamp_us: u64,
    ) -> Self {
        Self {
            pose,
            map,
            timestamp_us,
        }
    }

    /// Update the pose and keep the current map.
    pub fn pose_only(pose: StampedPose, timestamp_us: u64) -> Self {
        Self::new(Some(pose), None, timestamp_us)
    }
}

/// Shared, cheaply clonable handle to the latest environment snapshot.
///
/// The handle's lifetime is managed by whoever creates it; the task server
/// only binds a clone while configured.
#[derive(Clone)]
pub struct EnvironmentHandle {
    frame_id: Arc<str>,
    cell: Arc<ArcSwap<EnvironmentSnapshot>>,
    // Serializes writers only; readers never take it.
    writer: Arc<Mutex<()>>,
}

impl EnvironmentHandle {
    /// Create a handle with no pose and an empty map in `frame_id`.
    pub fn new(frame_id: impl Into<String>) -> Self {
        let frame_id: String = frame_id.into();
        let initial = EnvironmentSnapshot {
            pose: None,
            map: Arc::new(MapSnapshot::empty(frame_id.clone())),
            timestamp_us: 0,
            sequence: 0,
        };
        Self {
            frame_id: Arc::from(frame_id),
            cell: Arc::new(ArcSwap::from_pointee(initial)),
            writer: Arc::new(Mutex::new(())),
        }
    }

    /// Global frame the map and poses are expressed in.
    pub fn frame_id(&self) -> &str {
        &self.frame_id
    }

    /// Most recent robot pose, if available. Never blocks.
    pub fn current_pose(&self) -> Option<StampedPose> {
        self.cell.load().pose.clone()
    }

    /// Most recent map snapshot. Never blocks.
    pub fn current_map_snapshot(&self) -> Arc<MapSnapshot> {
        Arc::clone(&self.cell.load().map)
    }

    /// Most recent complete snapshot (pose and map from the same update).
    pub fn snapshot(&self) -> Arc<EnvironmentSnapshot> {
        self.cell.load_full()
    }

    /// Publish an update. Returns false if it is older than the current snapshot.
    pub fn publish(&self, update: EnvironmentUpdate) -> bool {
        let _guard = self.writer.lock();
        let current = self.cell.load_full();

        if update.timestamp_us < current.timestamp_us {
            tracing::trace!(
                "Dropping stale environment update ({} < {})",
                update.timestamp_us,
                current.timestamp_us
            );
            return false;
        }

        let next = EnvironmentSnapshot {
            pose: update.pose,
            map: update.map.unwrap_or_else(|| Arc::clone(&current.map)),
            timestamp_us: update.timestamp_us,
            sequence: current.sequence + 1,
        };
        self.cell.store(Arc::new(next));
        true
    }

    /// Number of updates accepted so far.
    pub fn update_count(&self) -> u64 {
        self.cell.load().sequence
    }
}

impl std::fmt::Debug for EnvironmentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.cell.load();
        f.debug_struct("EnvironmentHandle")
            .field("frame_id", &self.frame_id)
            .field("timestamp_us", &snapshot.timestamp_us)
            .field("sequence", &snapshot.sequence)
            .finish()
    }
}
