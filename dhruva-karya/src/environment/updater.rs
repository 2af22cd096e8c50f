//! Background environment update loop.
//!
//! Polls an [`EnvironmentSource`] at a fixed rate and publishes each update
//! into the shared [`EnvironmentHandle`]. This thread is the only writer of
//! the handle while the server is active.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{KaryaError, Result};

use super::{EnvironmentHandle, EnvironmentSource};

/// Handle to a running update loop.
pub struct EnvironmentUpdater {
    stop: Arc<AtomicBool>,
    published: Arc<AtomicU64>,
    handle: JoinHandle<Box<dyn EnvironmentSource>>,
}

impl EnvironmentUpdater {
    /// Spawn the loop. The source is handed back by [`EnvironmentUpdater::stop`].
    pub fn spawn(
        source: Box<dyn EnvironmentSource>,
        environment: EnvironmentHandle,
        rate_hz: f32,
    ) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let published = Arc::new(AtomicU64::new(0));
        let interval = Duration::from_secs_f32(1.0 / rate_hz.max(0.1));

        let thread_stop = Arc::clone(&stop);
        let thread_published = Arc::clone(&published);
        let handle = thread::Builder::new()
            .name("environment".into())
            .spawn(move || {
                run_update_loop(source, environment, interval, thread_stop, thread_published)
            })?;

        Ok(Self {
            stop,
            published,
            handle,
        })
    }

    /// Number of updates accepted by the environment so far.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Signal the loop to stop and wait for it; returns within one update period.
    pub fn stop(self) -> Result<Box<dyn EnvironmentSource>> {
        self.stop.store(true, Ordering::Release);
        self.handle
            .join()
            .map_err(|_| KaryaError::Environment("environment update thread panicked".to_string()))
    }
}

fn run_update_loop(
    mut source: Box<dyn EnvironmentSource>,
    environment: EnvironmentHandle,
    interval: Duration,
    stop: Arc<AtomicBool>,
    published: Arc<AtomicU64>,
) -> Box<dyn EnvironmentSource> {
    tracing::info!(
        "Environment update loop started ({}ms interval)",
        interval.as_millis()
    );

    let mut consecutive_errors = 0u32;

    while !stop.load(Ordering::Acquire) {
        let loop_start = Instant::now();

        match source.poll() {
            Ok(Some(update)) => {
                consecutive_errors = 0;
                if environment.publish(update) {
                    published.fetch_add(1, Ordering::Relaxed);
                }
            }
            Ok(None) => {}
            Err(e) => {
                consecutive_errors += 1;
                // Log the first failure and then every 50th to avoid flooding
                if consecutive_errors == 1 || consecutive_errors % 50 == 0 {
                    tracing::warn!(
                        "Environment source error ({} in a row): {}",
                        consecutive_errors,
                        e
                    );
                }
            }
        }

        let elapsed = loop_start.elapsed();
        if elapsed < interval {
            thread::sleep(interval - elapsed);
        }
    }

    tracing::info!("Environment update loop exited");
    source
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{MapSnapshot, Pose2D};
    use crate::environment::SimulatedWorld;

    #[test]
    fn test_updater_publishes_and_stops() {
        let env = EnvironmentHandle::new("map");
        let world =
            SimulatedWorld::new("map", Pose2D::new(1.0, 2.0, 0.0), MapSnapshot::empty("map"));

        let updater = EnvironmentUpdater::spawn(Box::new(world), env.clone(), 200.0).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while updater.published() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(updater.is_running());
        assert!(updater.published() > 0);

        let source = updater.stop();
        assert!(source.is_ok());

        // No writer anymore
        let count = env.update_count();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(env.update_count(), count);
        assert_eq!(env.current_pose().map(|p| p.pose.y), Some(2.0));
    }

    struct FailingSource;

    impl EnvironmentSource for FailingSource {
        fn poll(&mut self) -> Result<Option<crate::environment::EnvironmentUpdate>> {
            Err(KaryaError::Environment("sensor offline".to_string()))
        }
    }

    #[test]
    fn test_source_errors_do_not_stop_loop() {
        let env = EnvironmentHandle::new("map");
        let updater =
            EnvironmentUpdater::spawn(Box::new(FailingSource), env.clone(), 100.0).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(updater.is_running());
        assert_eq!(updater.published(), 0);
        assert!(updater.stop().is_ok());
    }
}
