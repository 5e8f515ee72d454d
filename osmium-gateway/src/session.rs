//! Per-shard session state.
//!
//! A session is the stateful conversation identified by `session_id`,
//! across which the dispatch sequence grows monotonically and RESUME is
//! possible. Session state survives soft disconnects; a hard reset
//! wipes it back to initial values.

use crate::payload::UpdatePresence;
use crate::ratelimit::next_reconnect_interval;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tracing::warn;

/// Initial reconnect backoff in milliseconds.
pub const INITIAL_RECONNECT_INTERVAL_MS: u64 = 1000;

/// Shard connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardStatus {
    /// Not connected, not connecting.
    Disconnected,
    /// Opening the socket.
    Connecting,
    /// Socket open, waiting for HELLO.
    Handshaking,
    /// IDENTIFY sent, waiting for READY.
    Identifying,
    /// RESUME sent, waiting for RESUMED.
    Resuming,
    /// Session established and receiving events.
    Ready,
}

impl fmt::Display for ShardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Identifying => "identifying",
            Self::Resuming => "resuming",
            Self::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Session state for one shard.
#[derive(Debug)]
pub struct SessionState {
    /// Shard index, immutable.
    shard_id: u16,
    sequence: AtomicU64,
    session_id: RwLock<Option<String>>,
    resume_url: RwLock<Option<String>>,
    status: RwLock<ShardStatus>,
    connect_attempts: AtomicU32,
    reconnect_interval: AtomicU64,
    pre_ready: AtomicBool,
    ready: AtomicBool,
    presence: RwLock<Option<UpdatePresence>>,
}

impl SessionState {
    pub fn new(shard_id: u16) -> Self {
        Self {
            shard_id,
            sequence: AtomicU64::new(0),
            session_id: RwLock::new(None),
            resume_url: RwLock::new(None),
            status: RwLock::new(ShardStatus::Disconnected),
            connect_attempts: AtomicU32::new(0),
            reconnect_interval: AtomicU64::new(INITIAL_RECONNECT_INTERVAL_MS),
            pre_ready: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            presence: RwLock::new(None),
        }
    }

    /// The shard index this session belongs to.
    pub fn shard_id(&self) -> u16 {
        self.shard_id
    }

    /// Last observed DISPATCH sequence, 0 when no session.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Track an inbound DISPATCH sequence. Gaps larger than one are
    /// logged but not fatal; the stored value never regresses.
    pub fn track_sequence(&self, seq: u64) {
        let previous = self.sequence.load(Ordering::SeqCst);
        if previous > 0 && seq > previous + 1 {
            warn!(
                shard_id = self.shard_id,
                expected = previous + 1,
                received = seq,
                "sequence gap in dispatch stream"
            );
        }
        self.sequence.fetch_max(seq, Ordering::SeqCst);
    }

    /// Restart the sequence at zero (close code 4007).
    pub fn reset_sequence(&self) {
        self.sequence.store(0, Ordering::SeqCst);
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    pub fn set_session_id(&self, id: Option<String>) {
        *self.session_id.write() = id;
    }

    /// Whether a RESUME is possible.
    pub fn resumable(&self) -> bool {
        self.session_id.read().is_some()
    }

    pub fn resume_url(&self) -> Option<String> {
        self.resume_url.read().clone()
    }

    pub fn set_resume_url(&self, url: Option<String>) {
        *self.resume_url.write() = url;
    }

    pub fn status(&self) -> ShardStatus {
        *self.status.read()
    }

    pub fn set_status(&self, status: ShardStatus) {
        *self.status.write() = status;
    }

    /// Count a `connect()` call; returns the new total.
    pub fn record_connect_attempt(&self) -> u32 {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// Called once a session is (re)established.
    pub fn mark_established(&self) {
        self.connect_attempts.store(0, Ordering::SeqCst);
        self.reconnect_interval
            .store(INITIAL_RECONNECT_INTERVAL_MS, Ordering::SeqCst);
    }

    /// The backoff to apply before the next reconnect, growing the
    /// stored interval for the one after.
    pub fn next_reconnect_delay(&self) -> Duration {
        let current = self.reconnect_interval.load(Ordering::SeqCst);
        self.reconnect_interval
            .store(next_reconnect_interval(current), Ordering::SeqCst);
        Duration::from_millis(current)
    }

    pub fn reconnect_interval_ms(&self) -> u64 {
        self.reconnect_interval.load(Ordering::SeqCst)
    }

    pub fn is_pre_ready(&self) -> bool {
        self.pre_ready.load(Ordering::SeqCst)
    }

    pub fn set_pre_ready(&self, value: bool) {
        self.pre_ready.store(value, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn set_ready(&self, value: bool) {
        self.ready.store(value, Ordering::SeqCst);
    }

    pub fn presence(&self) -> Option<UpdatePresence> {
        self.presence.read().clone()
    }

    pub fn set_presence(&self, presence: UpdatePresence) {
        *self.presence.write() = Some(presence);
    }

    /// Clear transient connection state. Keeps the session id, resume
    /// URL and sequence so the next connect can RESUME.
    pub fn reset(&self) {
        self.pre_ready.store(false, Ordering::SeqCst);
        self.ready.store(false, Ordering::SeqCst);
        *self.status.write() = ShardStatus::Disconnected;
    }

    /// Wipe everything back to initial values. The next connect must
    /// IDENTIFY.
    pub fn hard_reset(&self) {
        self.reset();
        self.sequence.store(0, Ordering::SeqCst);
        *self.session_id.write() = None;
        *self.resume_url.write() = None;
        *self.presence.write() = None;
        self.connect_attempts.store(0, Ordering::SeqCst);
        self.reconnect_interval
            .store(INITIAL_RECONNECT_INTERVAL_MS, Ordering::SeqCst);
    }
}

/// Normalize the READY-provided resume URL: strip any query, then
/// append the version and encoding parameters.
pub fn derive_resume_url(raw: &str, version: u8, encoding: &str) -> Result<String, url::ParseError> {
    let mut url = url::Url::parse(raw)?;
    url.set_query(Some(&format!("v={version}&encoding={encoding}")));
    url.set_fragment(None);
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_monotonic() {
        let session = SessionState::new(0);
        session.track_sequence(1);
        session.track_sequence(2);
        session.track_sequence(5); // gap, warned but stored
        session.track_sequence(3); // regression, ignored
        assert_eq!(session.sequence(), 5);
    }

    #[test]
    fn test_reset_keeps_session() {
        let session = SessionState::new(1);
        session.set_session_id(Some("abc".to_owned()));
        session.track_sequence(10);
        session.set_status(ShardStatus::Ready);
        session.set_ready(true);

        session.reset();
        assert_eq!(session.status(), ShardStatus::Disconnected);
        assert!(!session.is_ready());
        assert_eq!(session.session_id().as_deref(), Some("abc"));
        assert_eq!(session.sequence(), 10);
    }

    #[test]
    fn test_hard_reset_wipes_session() {
        let session = SessionState::new(1);
        session.set_session_id(Some("abc".to_owned()));
        session.set_resume_url(Some("wss://x".to_owned()));
        session.track_sequence(10);
        session.record_connect_attempt();

        session.hard_reset();
        assert!(session.session_id().is_none());
        assert!(session.resume_url().is_none());
        assert_eq!(session.sequence(), 0);
        assert_eq!(session.connect_attempts(), 0);
        assert_eq!(
            session.reconnect_interval_ms(),
            INITIAL_RECONNECT_INTERVAL_MS
        );
    }

    #[test]
    fn test_reconnect_delay_grows() {
        let session = SessionState::new(0);
        let first = session.next_reconnect_delay();
        assert_eq!(first, Duration::from_millis(INITIAL_RECONNECT_INTERVAL_MS));
        assert!(session.reconnect_interval_ms() >= INITIAL_RECONNECT_INTERVAL_MS);
        assert!(session.reconnect_interval_ms() <= 30_000);
    }

    #[test]
    fn test_derive_resume_url_strips_query() {
        let url = derive_resume_url("wss://gw/?foo=1", 10, "json").unwrap();
        assert_eq!(url, "wss://gw/?v=10&encoding=json");
    }

    #[test]
    fn test_derive_resume_url_plain() {
        let url = derive_resume_url("wss://gateway.discord.gg", 10, "etf").unwrap();
        assert_eq!(url, "wss://gateway.discord.gg/?v=10&encoding=etf");
    }
}
