//! Shard health counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters recorded by one shard.
#[derive(Debug, Default)]
pub struct ShardMetrics {
    /// WebSocket messages received.
    pub messages_received: AtomicU64,
    /// Dispatch events routed.
    pub events_dispatched: AtomicU64,
    /// Heartbeats sent.
    pub heartbeats_sent: AtomicU64,
    /// Reconnections performed.
    pub reconnections: AtomicU64,
    /// Successful session resumes.
    pub resumes: AtomicU64,
    /// Identifies sent.
    pub identifies: AtomicU64,
}

impl ShardMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_messages(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_events(&self) {
        self.events_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_heartbeats(&self) {
        self.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reconnections(&self) {
        self.reconnections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_resumes(&self) {
        self.resumes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_identifies(&self) {
        self.identifies.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy out all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
            reconnections: self.reconnections.load(Ordering::Relaxed),
            resumes: self.resumes.load(Ordering::Relaxed),
            identifies: self.identifies.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`ShardMetrics`].
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub messages_received: u64,
    pub events_dispatched: u64,
    pub heartbeats_sent: u64,
    pub reconnections: u64,
    pub resumes: u64,
    pub identifies: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = ShardMetrics::new();
        metrics.inc_messages();
        metrics.inc_messages();
        metrics.inc_identifies();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages_received, 2);
        assert_eq!(snapshot.identifies, 1);
        assert_eq!(snapshot.reconnections, 0);
    }
}
