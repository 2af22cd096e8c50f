//! Action worker: runs one request at a time on a dedicated thread.
//!
//! The worker owns the [`PluginRegistry`] while the server is active and
//! hands it back from [`ActionWorker::stop`]. Requests wait in a bounded
//! FIFO; a full queue rejects new requests with `ServerBusy`.
//!
//! Per request:
//! ```text
//! select plugin ─► reset ─┬─► cancelled / stopping? ──────► Cancelled (abort)
//!                         ├─► budget exhausted? ──────────► TimedOut  (abort)
//!                         ├─► compute_step(snapshot)
//!                         │     Succeeded ─► cancelled? ──► Cancelled
//!                         │               └─────────────► publish, Succeeded
//!                         │     Progress / Recoverable ─► emit progress
//!                         │     Fatal / panic ──────────► Failed    (abort)
//!                         └── wait(poll_interval) on cancel token ◄┘
//! ```
//!
//! Plugin hooks run under `catch_unwind`: a panicking plugin fails its
//! request but the worker keeps running and keeps the registry.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;

use crate::config::ServerConfig;
use crate::core::math::now_us;
use crate::environment::{EnvironmentHandle, EnvironmentSnapshot};
use crate::error::{KaryaError, Result};
use crate::goal::GoalChecker;
use crate::lifecycle::ServerState;
use crate::plugin::{PluginRegistry, StepContext, StepResult, TaskPlugin};

use super::publisher::{PublishedResult, ResultPublisher};
use super::request::{CancelToken, FailureKind, TaskOutcome, WorkItem};

/// Loop parameters taken from the server config at activation.
#[derive(Debug, Clone)]
pub struct ActionSettings {
    pub server_name: String,
    pub goal: GoalChecker,
    pub poll_interval: Duration,
    pub max_iterations: u32,
    pub max_duration: Duration,
    pub max_pending_requests: usize,
    /// Steps slower than this are logged
    pub expected_step_period: Option<Duration>,
}

impl ActionSettings {
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        Ok(Self {
            server_name: config.name.clone(),
            goal: GoalChecker::new(config.goal_tolerance)?,
            poll_interval: config.poll_interval(),
            max_iterations: config.max_iterations,
            max_duration: config.max_duration(),
            max_pending_requests: config.max_pending_requests,
            expected_step_period: config.expected_step_period(),
        })
    }
}

/// Handle to the running worker thread.
pub struct ActionWorker {
    queue: Sender<WorkItem>,
    stop: Arc<AtomicBool>,
    /// Token of the request currently executing
    current: Arc<Mutex<Option<CancelToken>>>,
    capacity: usize,
    handle: JoinHandle<PluginRegistry>,
}

impl ActionWorker {
    /// Start accepting requests. The registry's plugins must already be active.
    pub fn spawn(
        registry: PluginRegistry,
        environment: EnvironmentHandle,
        publisher: Arc<ResultPublisher>,
        settings: ActionSettings,
    ) -> Result<Self> {
        let capacity = settings.max_pending_requests;
        let (queue, requests) = crossbeam_channel::bounded(capacity);
        let stop = Arc::new(AtomicBool::new(false));
        let current = Arc::new(Mutex::new(None));

        let worker = WorkerLoop {
            registry,
            requests,
            environment,
            publisher,
            settings,
            stop: Arc::clone(&stop),
            current: Arc::clone(&current),
        };
        let handle = thread::Builder::new()
            .name("action-worker".into())
            .spawn(move || worker.run())?;

        Ok(Self {
            queue,
            stop,
            current,
            capacity,
            handle,
        })
    }

    /// Queue a request, or finish it with `ServerBusy` if the queue is full.
    pub(crate) fn enqueue(&self, item: WorkItem) {
        if !self.is_running() {
            item.reject(&worker_exited());
            return;
        }
        match self.queue.try_send(item) {
            Ok(()) => {}
            Err(TrySendError::Full(item)) => {
                item.reject(&KaryaError::ServerBusy(self.capacity));
            }
            Err(TrySendError::Disconnected(item)) => item.reject(&worker_exited()),
        }
    }

    /// Requests waiting behind the active one.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// False once the worker thread has exited, whether stopped or not.
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Cancel the active request, fail pending ones and take the registry back.
    ///
    /// Returns within one poll interval plus one plugin step.
    pub fn stop(self) -> Result<PluginRegistry> {
        self.stop.store(true, Ordering::Release);
        if let Some(token) = self.current.lock().as_ref() {
            token.cancel();
        }
        drop(self.queue);
        self.handle
            .join()
            .map_err(|_| KaryaError::Fatal("action worker thread panicked".to_string()))
    }
}

fn worker_exited() -> KaryaError {
    KaryaError::Fatal("action worker has exited".to_string())
}

/// Run a plugin hook, turning a panic into its message.
fn guard_plugin<R>(hook: impl FnOnce() -> R) -> std::result::Result<R, String> {
    panic::catch_unwind(AssertUnwindSafe(hook)).map_err(|payload| {
        payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string())
    })
}

struct WorkerLoop {
    registry: PluginRegistry,
    requests: Receiver<WorkItem>,
    environment: EnvironmentHandle,
    publisher: Arc<ResultPublisher>,
    settings: ActionSettings,
    stop: Arc<AtomicBool>,
    current: Arc<Mutex<Option<CancelToken>>>,
}

impl WorkerLoop {
    fn run(mut self) -> PluginRegistry {
        tracing::info!("[{}] Action worker started", self.settings.server_name);

        loop {
            if self.stopping() {
                break;
            }
            match self.requests.recv_timeout(self.settings.poll_interval) {
                Ok(item) => {
                    if self.stopping() {
                        item.reject(&KaryaError::ServerNotActive(ServerState::Inactive));
                        break;
                    }
                    self.execute(item);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let mut dropped = 0;
        while let Ok(item) = self.requests.try_recv() {
            item.reject(&KaryaError::ServerNotActive(ServerState::Inactive));
            dropped += 1;
        }
        if dropped > 0 {
            tracing::warn!(
                "[{}] Failed {} pending request(s) on deactivation",
                self.settings.server_name,
                dropped
            );
        }

        tracing::info!("[{}] Action worker exited", self.settings.server_name);
        self.registry
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn execute(&mut self, item: WorkItem) {
        let started = Instant::now();
        let server = self.settings.server_name.as_str();

        let loaded = match self.registry.select(&item.request.plugin) {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::error!("[{}] Request '{}': {}", server, item.request_id(), e);
                let outcome = TaskOutcome::failed(
                    item.request_id(),
                    FailureKind::from_error(&e),
                    e.to_string(),
                    0,
                    started.elapsed(),
                );
                item.finish(outcome);
                return;
            }
        };

        tracing::info!(
            "[{}] Executing request '{}' with plugin '{}' (target {:.2}, {:.2} in '{}')",
            server,
            item.request_id(),
            loaded.name(),
            item.request.target.pose.x,
            item.request.target.pose.y,
            item.request.target.frame_id
        );

        *self.current.lock() = Some(item.token.clone());
        let plugin_name = loaded.name().to_string();
        let run = TaskRun {
            item: &item,
            plugin_name: &plugin_name,
            environment: &self.environment,
            publisher: &self.publisher,
            settings: &self.settings,
            stop: &self.stop,
            started,
        };
        let outcome = run.execute(loaded.plugin_mut());
        *self.current.lock() = None;

        tracing::info!(
            "[{}] Request '{}' finished: {:?} after {} iteration(s) in {:.3}s",
            server,
            outcome.request_id,
            outcome.status,
            outcome.iterations,
            outcome.elapsed.as_secs_f32()
        );
        item.finish(outcome);
    }
}

/// Borrowed state for one request execution.
struct TaskRun<'a> {
    item: &'a WorkItem,
    plugin_name: &'a str,
    environment: &'a EnvironmentHandle,
    publisher: &'a ResultPublisher,
    settings: &'a ActionSettings,
    stop: &'a AtomicBool,
    started: Instant,
}

impl TaskRun<'_> {
    fn cancelled(&self) -> bool {
        self.item.token.is_cancelled() || self.stop.load(Ordering::Acquire)
    }

    /// Forward `abort`, logging a panic instead of propagating it.
    fn abort(&self, plugin: &mut dyn TaskPlugin) {
        if let Err(message) = guard_plugin(|| plugin.abort()) {
            tracing::error!(
                "[{}] Plugin '{}' panicked in abort: {}",
                self.settings.server_name,
                self.plugin_name,
                message
            );
        }
    }

    fn panicked(&self, hook: &str, message: String, iterations: u32) -> TaskOutcome {
        tracing::error!(
            "[{}] Plugin '{}' panicked in {} for request '{}': {}",
            self.settings.server_name,
            self.plugin_name,
            hook,
            self.item.request_id(),
            message
        );
        TaskOutcome::failed(
            self.item.request_id(),
            FailureKind::PluginFailure,
            format!("plugin '{}' panicked: {}", self.plugin_name, message),
            iterations,
            self.started.elapsed(),
        )
    }

    fn execute(&self, plugin: &mut dyn TaskPlugin) -> TaskOutcome {
        let request_id = self.item.request_id();
        let server = self.settings.server_name.as_str();
        let mut snapshot: Arc<EnvironmentSnapshot> = self.environment.snapshot();
        let mut iterations = 0u32;

        if let Err(message) = guard_plugin(|| plugin.reset()) {
            return self.panicked("reset", message, iterations);
        }

        loop {
            if self.cancelled() {
                tracing::info!("[{}] Request '{}' cancelled", server, request_id);
                self.abort(plugin);
                let elapsed = self.started.elapsed();
                return TaskOutcome::cancelled(request_id, iterations, elapsed);
            }

            if iterations >= self.settings.max_iterations
                || self.started.elapsed() >= self.settings.max_duration
            {
                tracing::warn!(
                    "[{}] Request '{}' exceeded its budget ({} iterations, {:.2}s)",
                    server,
                    request_id,
                    iterations,
                    self.started.elapsed().as_secs_f32()
                );
                self.abort(plugin);
                let elapsed = self.started.elapsed();
                return TaskOutcome::timed_out(request_id, iterations, elapsed);
            }

            let latest = self.environment.snapshot();
            if latest.timestamp_us >= snapshot.timestamp_us {
                snapshot = latest;
            } else {
                tracing::debug!(
                    "Ignoring environment snapshot older than the last one used ({} < {})",
                    latest.timestamp_us,
                    snapshot.timestamp_us
                );
            }

            let ctx = StepContext {
                target: &self.item.request.target,
                snapshot: &snapshot,
                goal: &self.settings.goal,
                iteration: iterations,
            };
            let step_start = Instant::now();
            let result = guard_plugin(|| plugin.compute_step(&ctx));
            let step_time = step_start.elapsed();
            iterations += 1;

            let result = match result {
                Ok(result) => result,
                Err(message) => {
                    self.abort(plugin);
                    return self.panicked("compute_step", message, iterations);
                }
            };

            if let Some(period) = self.settings.expected_step_period
                && step_time > period
            {
                tracing::warn!(
                    "[{}] Plugin '{}' step took {:.4}s, longer than the expected {:.4}s",
                    server,
                    self.plugin_name,
                    step_time.as_secs_f32(),
                    period.as_secs_f32()
                );
            }

            match result {
                StepResult::Succeeded(artifact) => {
                    if self.cancelled() {
                        tracing::info!(
                            "[{}] Request '{}' cancelled, discarding its result",
                            server,
                            request_id
                        );
                        let elapsed = self.started.elapsed();
                        return TaskOutcome::cancelled(request_id, iterations, elapsed);
                    }
                    self.publisher.publish(PublishedResult {
                        request_id: request_id.to_string(),
                        plugin: self.plugin_name.to_string(),
                        artifact: artifact.clone(),
                        timestamp_us: now_us(),
                    });
                    return TaskOutcome::succeeded(
                        request_id,
                        artifact,
                        iterations,
                        self.started.elapsed(),
                    );
                }
                StepResult::Progress(artifact) => {
                    tracing::trace!(
                        "[{}] Request '{}' iteration {}",
                        server,
                        request_id,
                        iterations
                    );
                    if let Some(artifact) = artifact {
                        self.item.progress(artifact);
                    }
                }
                StepResult::RecoverableFailure { reason, partial } => {
                    tracing::debug!(
                        "[{}] Request '{}' iteration {}: {}",
                        server,
                        request_id,
                        iterations,
                        reason
                    );
                    if let Some(partial) = partial {
                        self.item.progress(partial);
                    }
                }
                StepResult::FatalFailure(reason) => {
                    tracing::error!(
                        "[{}] Plugin '{}' failed request '{}': {}",
                        server,
                        self.plugin_name,
                        request_id,
                        reason
                    );
                    return TaskOutcome::failed(
                        request_id,
                        FailureKind::PluginFailure,
                        reason,
                        iterations,
                        self.started.elapsed(),
                    );
                }
            }

            self.item.token.wait(self.settings.poll_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PluginSpec;
    use crate::core::types::{Pose2D, StampedPose};
    use crate::plugin::{Artifact, PluginFactory};
    use crate::server::request::{NavigationRequest, RequestHandle, TaskStatus};

    /// Succeeds on the given iteration, progressing before that.
    struct CountdownPlugin {
        succeed_at: u32,
    }

    impl TaskPlugin for CountdownPlugin {
        fn configure(&mut self, _name: &str, _environment: EnvironmentHandle) -> Result<()> {
            Ok(())
        }

        fn compute_step(&mut self, ctx: &StepContext<'_>) -> StepResult {
            let artifact = Artifact::Elapsed {
                secs: ctx.iteration as f32,
            };
            if ctx.iteration + 1 >= self.succeed_at {
                StepResult::Succeeded(artifact)
            } else {
                StepResult::Progress(Some(artifact))
            }
        }
    }

    fn settings() -> ActionSettings {
        ActionSettings {
            server_name: "test".to_string(),
            goal: GoalChecker::default(),
            poll_interval: Duration::from_millis(1),
            max_iterations: 10,
            max_duration: Duration::from_secs(5),
            max_pending_requests: 2,
            expected_step_period: None,
        }
    }

    fn start(succeed_at: u32, publisher: Arc<ResultPublisher>) -> ActionWorker {
        start_with(succeed_at, publisher, settings())
    }

    fn start_with(
        succeed_at: u32,
        publisher: Arc<ResultPublisher>,
        settings: ActionSettings,
    ) -> ActionWorker {
        let env = EnvironmentHandle::new("map");
        let mut factory = PluginFactory::new();
        factory.register("Countdown", move |_| {
            Ok(Box::new(CountdownPlugin { succeed_at }) as Box<dyn TaskPlugin>)
        });
        let mut registry = PluginRegistry::new();
        registry
            .configure(
                &[PluginSpec::new("countdown", "Countdown")],
                &PluginSpec::new("default", "Countdown"),
                &factory,
                &env,
            )
            .unwrap();
        registry.activate_all().unwrap();
        ActionWorker::spawn(registry, env, publisher, settings).unwrap()
    }

    fn submit(worker: &ActionWorker, id: &str) -> RequestHandle {
        let request =
            NavigationRequest::new(id, StampedPose::new("map", Pose2D::new(1.0, 0.0, 0.0), 0));
        let (item, handle) = WorkItem::channel(request);
        worker.enqueue(item);
        handle
    }

    #[test]
    fn test_runs_to_success_with_progress() {
        let publisher = Arc::new(ResultPublisher::new());
        let results = publisher.subscribe();
        let worker = start(3, Arc::clone(&publisher));

        let handle = submit(&worker, "r1");
        let (progress, outcome) = handle.collect(Duration::from_secs(2));
        let outcome = outcome.unwrap();
        assert_eq!(outcome.status, TaskStatus::Succeeded);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(progress.len(), 2);

        let published = results.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(published.request_id, "r1");
        assert_eq!(published.plugin, "countdown");
        assert!(worker.is_running());

        let registry = worker.stop().unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_guard_plugin_reports_panic_message() {
        assert_eq!(guard_plugin(|| 7), Ok(7));
        assert_eq!(
            guard_plugin(|| -> u32 { panic!("static message") }),
            Err("static message".to_string())
        );
        let id = 3;
        assert_eq!(
            guard_plugin(|| -> u32 { panic!("formatted {}", id) }),
            Err("formatted 3".to_string())
        );
    }

    #[test]
    fn test_budget_exhaustion_times_out() {
        let worker = start(u32::MAX, Arc::new(ResultPublisher::new()));
        let outcome = submit(&worker, "slow").wait(Duration::from_secs(2)).unwrap();
        assert_eq!(outcome.status, TaskStatus::TimedOut);
        assert_eq!(outcome.iterations, 10);
        worker.stop().unwrap();
    }

    #[test]
    fn test_unknown_plugin_fails_without_progress() {
        let worker = start(1, Arc::new(ResultPublisher::new()));
        let request = NavigationRequest::new(
            "r2",
            StampedPose::new("map", Pose2D::new(1.0, 0.0, 0.0), 0),
        )
        .with_plugin("nonexistent");
        let (item, handle) = WorkItem::channel(request);
        worker.enqueue(item);

        let (progress, outcome) = handle.collect(Duration::from_secs(2));
        let outcome = outcome.unwrap();
        assert!(progress.is_empty());
        assert_eq!(outcome.failure_kind(), Some(FailureKind::PluginNotFound));
        assert!(outcome.failure.unwrap().detail.contains("countdown"));
        worker.stop().unwrap();
    }

    #[test]
    fn test_stop_returns_registry_and_fails_pending() {
        let settings = ActionSettings {
            max_iterations: u32::MAX,
            max_duration: Duration::from_secs(60),
            poll_interval: Duration::from_millis(5),
            ..settings()
        };
        let worker = start_with(u32::MAX, Arc::new(ResultPublisher::new()), settings);
        let active = submit(&worker, "active");
        // Let the worker pick up the first request
        std::thread::sleep(Duration::from_millis(20));
        let pending = submit(&worker, "pending");

        let registry = worker.stop().unwrap();
        assert_eq!(registry.active_count(), 1);

        let active = active.wait(Duration::from_secs(1)).unwrap();
        assert_eq!(active.status, TaskStatus::Cancelled);
        let pending = pending.wait(Duration::from_secs(1)).unwrap();
        assert_eq!(pending.failure_kind(), Some(FailureKind::ServerNotActive));
    }
}
