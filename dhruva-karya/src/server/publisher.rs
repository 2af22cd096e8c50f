//! Result publishing.
//!
//! Successful artifacts are broadcast to every subscriber, the way a planner
//! server publishes each computed plan. Subscribers that dropped their
//! receiver are pruned on the next publish.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::plugin::Artifact;

/// A result broadcast after a request succeeds.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedResult {
    pub request_id: String,
    /// Name of the plugin that produced the artifact
    pub plugin: String,
    pub artifact: Artifact,
    pub timestamp_us: u64,
}

/// Fan-out channel for [`PublishedResult`]s.
#[derive(Default)]
pub struct ResultPublisher {
    subscribers: Mutex<Vec<Sender<PublishedResult>>>,
    published: AtomicU64,
}

impl ResultPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receiver for every result published from now on.
    pub fn subscribe(&self) -> Receiver<PublishedResult> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Send to every live subscriber; returns how many received it.
    pub fn publish(&self, result: PublishedResult) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(result.clone()).is_ok());
        self.published.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            "Published result of '{}' to {} subscriber(s)",
            result.request_id,
            subscribers.len()
        );
        subscribers.len()
    }

    /// Disconnect every subscriber.
    pub fn close(&self) {
        self.subscribers.lock().clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Results published since creation.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str) -> PublishedResult {
        PublishedResult {
            request_id: id.to_string(),
            plugin: "wait".to_string(),
            artifact: Artifact::Elapsed { secs: 1.0 },
            timestamp_us: 42,
        }
    }

    #[test]
    fn test_fan_out_and_prune() {
        let publisher = ResultPublisher::new();
        let a = publisher.subscribe();
        let b = publisher.subscribe();
        assert_eq!(publisher.publish(result("r1")), 2);
        assert_eq!(a.try_recv().unwrap().request_id, "r1");
        assert_eq!(b.try_recv().unwrap().request_id, "r1");

        drop(b);
        assert_eq!(publisher.publish(result("r2")), 1);
        assert_eq!(publisher.subscriber_count(), 1);
        assert_eq!(publisher.published(), 2);
    }

    #[test]
    fn test_close_disconnects() {
        let publisher = ResultPublisher::new();
        let rx = publisher.subscribe();
        publisher.close();
        assert!(rx.recv().is_err());
        assert_eq!(publisher.publish(result("r3")), 0);
    }
}
