//! Requests, cancellation tokens and the per-request event stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::core::types::StampedPose;
use crate::error::{KaryaError, Result};
use crate::plugin::Artifact;

/// A navigation task to run on the server.
#[derive(Debug, Clone, PartialEq)]
pub struct NavigationRequest {
    /// Caller-chosen identifier, echoed in every event
    pub request_id: String,
    /// Goal pose
    pub target: StampedPose,
    /// Plugin to run; empty selects the configured default
    pub plugin: String,
}

impl NavigationRequest {
    pub fn new(request_id: impl Into<String>, target: StampedPose) -> Self {
        Self {
            request_id: request_id.into(),
            target,
            plugin: String::new(),
        }
    }

    pub fn with_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = plugin.into();
        self
    }

    /// Reject requests that no plugin could act on.
    pub fn validate(&self) -> Result<()> {
        if self.request_id.is_empty() {
            return Err(KaryaError::InvalidRequest(
                "request id is empty".to_string(),
            ));
        }
        if self.target.frame_id.is_empty() {
            return Err(KaryaError::InvalidRequest(
                "target frame id is empty".to_string(),
            ));
        }
        if !self.target.pose.is_finite() {
            return Err(KaryaError::InvalidRequest(format!(
                "target pose is not finite: ({}, {}, {})",
                self.target.pose.x, self.target.pose.y, self.target.pose.theta
            )));
        }
        Ok(())
    }
}

/// Cooperative cancellation flag with a wake-up channel.
///
/// The executing loop checks the flag once per iteration and sleeps on
/// [`CancelToken::wait`] between iterations, so a cancel lands within one
/// step.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

struct CancelInner {
    cancelled: AtomicBool,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                wake_tx,
                wake_rx,
            }),
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::AcqRel) {
            // Capacity 1: a pending wake-up is as good as a new one
            let _ = self.inner.wake_tx.try_send(());
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Sleep up to `timeout`, returning early on cancellation.
    ///
    /// Returns whether the token is cancelled.
    pub fn wait(&self, timeout: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        let _ = self.inner.wake_rx.recv_timeout(timeout);
        self.is_cancelled()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Terminal status of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
}

/// Why a request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Requested plugin is not loaded
    PluginNotFound,
    /// Server was not active when the request arrived or was dequeued
    ServerNotActive,
    /// Pending queue was full
    ServerBusy,
    /// Request failed validation
    InvalidRequest,
    /// Plugin reported a fatal failure
    PluginFailure,
}

impl FailureKind {
    /// Failure kind for a request-level error.
    pub fn from_error(error: &KaryaError) -> Self {
        match error {
            KaryaError::PluginNotFound { .. } => FailureKind::PluginNotFound,
            KaryaError::ServerNotActive(_) => FailureKind::ServerNotActive,
            KaryaError::ServerBusy(_) => FailureKind::ServerBusy,
            KaryaError::InvalidRequest(_) => FailureKind::InvalidRequest,
            _ => FailureKind::PluginFailure,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub detail: String,
}

/// Final report for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub request_id: String,
    pub status: TaskStatus,
    /// Final artifact, set only on success
    pub artifact: Option<Artifact>,
    /// Set only when `status` is `Failed`
    pub failure: Option<TaskFailure>,
    /// Plugin steps executed
    pub iterations: u32,
    /// Time from the start of execution (zero for rejected requests)
    pub elapsed: Duration,
}

impl TaskOutcome {
    pub fn succeeded(
        request_id: &str,
        artifact: Artifact,
        iterations: u32,
        elapsed: Duration,
    ) -> Self {
        Self {
            request_id: request_id.to_string(),
            status: TaskStatus::Succeeded,
            artifact: Some(artifact),
            failure: None,
            iterations,
            elapsed,
        }
    }

    pub fn failed(
        request_id: &str,
        kind: FailureKind,
        detail: impl Into<String>,
        iterations: u32,
        elapsed: Duration,
    ) -> Self {
        Self {
            request_id: request_id.to_string(),
            status: TaskStatus::Failed,
            artifact: None,
            failure: Some(TaskFailure {
                kind,
                detail: detail.into(),
            }),
            iterations,
            elapsed,
        }
    }

    pub fn cancelled(request_id: &str, iterations: u32, elapsed: Duration) -> Self {
        Self::terminal(request_id, TaskStatus::Cancelled, iterations, elapsed)
    }

    pub fn timed_out(request_id: &str, iterations: u32, elapsed: Duration) -> Self {
        Self::terminal(request_id, TaskStatus::TimedOut, iterations, elapsed)
    }

    fn terminal(request_id: &str, status: TaskStatus, iterations: u32, elapsed: Duration) -> Self {
        Self {
            request_id: request_id.to_string(),
            status,
            artifact: None,
            failure: None,
            iterations,
            elapsed,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure.as_ref().map(|f| f.kind)
    }
}

/// Event delivered on a request's channel.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    /// Intermediate artifact (partial path, elapsed time)
    Progress { request_id: String, artifact: Artifact },
    /// Always the last event of a request
    Finished(TaskOutcome),
}

/// Caller's side of a submitted request.
pub struct RequestHandle {
    request_id: String,
    token: CancelToken,
    events: Receiver<TaskEvent>,
}

impl RequestHandle {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Ask the server to stop working on this request.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.token.clone()
    }

    /// Next event, if one is already queued.
    pub fn try_next_event(&self) -> Option<TaskEvent> {
        match self.events.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Next event, waiting up to `timeout`.
    pub fn next_event(&self, timeout: Duration) -> Option<TaskEvent> {
        match self.events.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Wait for the outcome, discarding progress events.
    pub fn wait(&self, timeout: Duration) -> Option<TaskOutcome> {
        self.collect(timeout).1
    }

    /// Wait for the outcome and return it with every progress artifact seen on the way.
    pub fn collect(&self, timeout: Duration) -> (Vec<Artifact>, Option<TaskOutcome>) {
        let deadline = Instant::now() + timeout;
        let mut progress = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.next_event(remaining) {
                Some(TaskEvent::Progress { artifact, .. }) => progress.push(artifact),
                Some(TaskEvent::Finished(outcome)) => return (progress, Some(outcome)),
                None => return (progress, None),
            }
        }
    }
}

impl std::fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandle")
            .field("request_id", &self.request_id)
            .field("token", &self.token)
            .finish()
    }
}

/// Server's side of a submitted request.
///
/// Dropping an item that was never finished reports it as failed, so the
/// caller gets its `Finished` event even if the worker goes away.
pub(crate) struct WorkItem {
    pub request: NavigationRequest,
    pub token: CancelToken,
    events: Sender<TaskEvent>,
    finished: bool,
}

impl WorkItem {
    /// Create the linked work item and caller handle.
    pub fn channel(request: NavigationRequest) -> (Self, RequestHandle) {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let token = CancelToken::new();
        let handle = RequestHandle {
            request_id: request.request_id.clone(),
            token: token.clone(),
            events: events_rx,
        };
        let item = Self {
            request,
            token,
            events: events_tx,
            finished: false,
        };
        (item, handle)
    }

    pub fn request_id(&self) -> &str {
        &self.request.request_id
    }

    pub fn progress(&self, artifact: Artifact) {
        // The caller may have dropped its handle; the request still runs.
        let _ = self.events.send(TaskEvent::Progress {
            request_id: self.request.request_id.clone(),
            artifact,
        });
    }

    pub fn finish(mut self, outcome: TaskOutcome) {
        self.send_finished(outcome);
    }

    fn send_finished(&mut self, outcome: TaskOutcome) {
        if !self.finished {
            self.finished = true;
            let _ = self.events.send(TaskEvent::Finished(outcome));
        }
    }

    /// Finish without running.
    pub fn reject(self, error: &KaryaError) {
        tracing::warn!(
            "Rejecting request '{}': {}",
            self.request.request_id,
            error
        );
        let outcome = TaskOutcome::failed(
            &self.request.request_id,
            FailureKind::from_error(error),
            error.to_string(),
            0,
            Duration::ZERO,
        );
        self.finish(outcome);
    }
}

impl Drop for WorkItem {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        tracing::error!(
            "Request '{}' dropped without an outcome",
            self.request.request_id
        );
        let outcome = TaskOutcome::failed(
            &self.request.request_id,
            FailureKind::ServerNotActive,
            "request abandoned by the server",
            0,
            Duration::ZERO,
        );
        self.send_finished(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Pose2D;
    use crate::lifecycle::ServerState;

    fn request(id: &str) -> NavigationRequest {
        NavigationRequest::new(id, StampedPose::new("map", Pose2D::new(1.0, 2.0, 0.0), 0))
    }

    #[test]
    fn test_validate() {
        assert!(request("a").validate().is_ok());
        assert!(matches!(
            request("").validate(),
            Err(KaryaError::InvalidRequest(_))
        ));

        let mut bad = request("b");
        bad.target.pose.x = f32::NAN;
        assert!(bad.validate().is_err());

        let mut no_frame = request("c");
        no_frame.target.frame_id.clear();
        assert!(no_frame.validate().is_err());
    }

    #[test]
    fn test_cancel_wakes_waiter() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let thread = std::thread::spawn(move || {
            let start = Instant::now();
            let cancelled = waiter.wait(Duration::from_secs(5));
            (cancelled, start.elapsed())
        });
        std::thread::sleep(Duration::from_millis(20));
        token.cancel();
        let (cancelled, waited) = thread.join().unwrap();
        assert!(cancelled);
        assert!(waited < Duration::from_secs(1));
    }

    #[test]
    fn test_wait_times_out_uncancelled() {
        let token = CancelToken::new();
        assert!(!token.wait(Duration::from_millis(10)));
        token.cancel();
        token.cancel();
        assert!(token.wait(Duration::from_millis(10)));
    }

    #[test]
    fn test_reject_emits_single_finished() {
        let (item, handle) = WorkItem::channel(request("r1"));
        item.reject(&KaryaError::ServerNotActive(ServerState::Inactive));

        let outcome = handle.wait(Duration::from_millis(100)).unwrap();
        assert_eq!(outcome.request_id, "r1");
        assert_eq!(outcome.status, TaskStatus::Failed);
        assert_eq!(outcome.failure_kind(), Some(FailureKind::ServerNotActive));
        assert!(handle.try_next_event().is_none());
    }

    #[test]
    fn test_dropped_item_still_finishes() {
        let (item, handle) = WorkItem::channel(request("lost"));
        item.progress(Artifact::Elapsed { secs: 0.1 });
        drop(item);

        let (progress, outcome) = handle.collect(Duration::from_millis(100));
        assert_eq!(progress.len(), 1);
        let outcome = outcome.unwrap();
        assert_eq!(outcome.status, TaskStatus::Failed);
        assert_eq!(outcome.failure_kind(), Some(FailureKind::ServerNotActive));
        assert!(handle.try_next_event().is_none());
    }

    #[test]
    fn test_finished_item_sends_nothing_on_drop() {
        let (item, handle) = WorkItem::channel(request("done"));
        item.finish(TaskOutcome::cancelled("done", 2, Duration::from_millis(5)));

        let outcome = handle.wait(Duration::from_millis(100)).unwrap();
        assert_eq!(outcome.status, TaskStatus::Cancelled);
        assert!(handle.try_next_event().is_none());
    }

    #[test]
    fn test_collect_gathers_progress_in_order() {
        let (item, handle) = WorkItem::channel(request("r2"));
        item.progress(Artifact::Elapsed { secs: 0.1 });
        item.progress(Artifact::Elapsed { secs: 0.2 });
        item.finish(TaskOutcome::succeeded(
            "r2",
            Artifact::Elapsed { secs: 0.3 },
            3,
            Duration::from_millis(300),
        ));

        let (progress, outcome) = handle.collect(Duration::from_millis(100));
        assert_eq!(
            progress,
            vec![Artifact::Elapsed { secs: 0.1 }, Artifact::Elapsed { secs: 0.2 }]
        );
        assert_eq!(outcome.unwrap().status, TaskStatus::Succeeded);
    }
}
