//! Heartbeat liveness tracking.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Tracks heartbeat liveness for one shard.
///
/// The ack flag is true exactly when the most recent heartbeat has been
/// acknowledged, or when no heartbeat has been sent yet.
#[derive(Debug)]
pub struct Heartbeat {
    last_sent: RwLock<Option<Instant>>,
    last_received: RwLock<Option<Instant>>,
    acked: AtomicBool,
    latency_ms: AtomicU64, // u64::MAX = not yet measured
}

impl Heartbeat {
    pub fn new() -> Self {
        Self {
            last_sent: RwLock::new(None),
            last_received: RwLock::new(None),
            acked: AtomicBool::new(true),
            latency_ms: AtomicU64::new(u64::MAX),
        }
    }

    /// Record an outbound heartbeat. Scheduled beats clear the ack
    /// flag; beats answering a server request (`clear_ack = false`) do
    /// not.
    pub fn mark_sent(&self, clear_ack: bool) {
        if clear_ack {
            self.acked.store(false, Ordering::SeqCst);
        }
        *self.last_sent.write() = Some(Instant::now());
    }

    /// Record a HEARTBEAT_ACK and derive latency.
    pub fn mark_acked(&self) {
        let now = Instant::now();
        self.acked.store(true, Ordering::SeqCst);
        *self.last_received.write() = Some(now);

        if let Some(sent) = *self.last_sent.read() {
            self.latency_ms
                .store(now.duration_since(sent).as_millis() as u64, Ordering::Release);
        }
    }

    /// Force the ack flag true without a real ACK. Used when inbound
    /// traffic (member chunk bursts) proves the connection alive.
    pub fn force_ack(&self) {
        self.acked.store(true, Ordering::SeqCst);
    }

    /// Whether the last scheduled heartbeat was acknowledged.
    pub fn is_acked(&self) -> bool {
        self.acked.load(Ordering::SeqCst)
    }

    /// Round-trip latency of the last acknowledged heartbeat.
    pub fn latency(&self) -> Option<Duration> {
        match self.latency_ms.load(Ordering::Acquire) {
            u64::MAX => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// When the last heartbeat was sent.
    pub fn last_sent(&self) -> Option<Instant> {
        *self.last_sent.read()
    }

    /// When the last HEARTBEAT_ACK arrived.
    pub fn last_received(&self) -> Option<Instant> {
        *self.last_received.read()
    }

    /// Reset for a fresh connection.
    pub fn reset(&self) {
        self.acked.store(true, Ordering::SeqCst);
        *self.last_sent.write() = None;
        *self.last_received.write() = None;
        self.latency_ms.store(u64::MAX, Ordering::Release);
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_heartbeat_counts_as_acked() {
        let hb = Heartbeat::new();
        assert!(hb.is_acked());
        assert!(hb.latency().is_none());
    }

    #[test]
    fn test_scheduled_send_clears_ack() {
        let hb = Heartbeat::new();
        hb.mark_sent(true);
        assert!(!hb.is_acked());

        hb.mark_acked();
        assert!(hb.is_acked());
        assert!(hb.latency().is_some());
    }

    #[test]
    fn test_requested_send_keeps_ack() {
        let hb = Heartbeat::new();
        hb.mark_sent(false);
        assert!(hb.is_acked());
    }

    #[test]
    fn test_force_ack() {
        let hb = Heartbeat::new();
        hb.mark_sent(true);
        hb.force_ack();
        assert!(hb.is_acked());
    }

    #[test]
    fn test_reset() {
        let hb = Heartbeat::new();
        hb.mark_sent(true);
        hb.mark_acked();
        hb.reset();
        assert!(hb.is_acked());
        assert!(hb.last_sent().is_none());
        assert!(hb.latency().is_none());
    }
}
