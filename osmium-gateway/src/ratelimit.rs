//! Gateway rate limiting.
//!
//! Two mechanisms live here: the window-based [`Bucket`] that meters
//! outbound gateway commands (120 per 60 s globally, 5 per 20 s for
//! presence updates), and the [`IdentifyRateLimiter`] that serializes
//! IDENTIFY payloads across shards.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::warn;

/// Capacity of the global command bucket per window.
pub const GLOBAL_BUCKET_LIMIT: u32 = 120;
/// Window of the global command bucket.
pub const GLOBAL_BUCKET_INTERVAL: Duration = Duration::from_secs(60);
/// Slots of the global bucket reserved for priority sends (heartbeats).
pub const GLOBAL_BUCKET_RESERVED: u32 = 5;

/// Capacity of the presence-update bucket per window.
pub const PRESENCE_BUCKET_LIMIT: u32 = 5;
/// Window of the presence-update bucket.
pub const PRESENCE_BUCKET_INTERVAL: Duration = Duration::from_secs(20);

type Thunk = Box<dyn FnOnce() + Send + 'static>;

struct Pending {
    thunk: Thunk,
    priority: bool,
}

struct Inner {
    /// Tokens consumed in the current window.
    tokens: u32,
    /// Start of the current window.
    last_reset: Instant,
    queue: VecDeque<Pending>,
    /// Whether a drain timer is already scheduled.
    timer_armed: bool,
}

/// A rate-limited queue of deferred sends.
///
/// At most `token_limit` thunks run per `interval` window. The last
/// `reserved_tokens` slots of each window may only be consumed by
/// priority submissions; priority submissions also jump to the head of
/// the queue. Thunks are fire-and-forget.
pub struct Bucket {
    token_limit: u32,
    interval: Duration,
    reserved_tokens: u32,
    inner: Mutex<Inner>,
    this: Weak<Bucket>,
}

impl Bucket {
    /// Create a bucket with no reserved slots.
    pub fn new(token_limit: u32, interval: Duration) -> Arc<Self> {
        Self::with_reserved(token_limit, interval, 0)
    }

    /// Create a bucket reserving `reserved_tokens` slots per window for
    /// priority submissions.
    pub fn with_reserved(token_limit: u32, interval: Duration, reserved_tokens: u32) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            token_limit,
            interval,
            reserved_tokens,
            inner: Mutex::new(Inner {
                tokens: 0,
                last_reset: Instant::now(),
                queue: VecDeque::new(),
                timer_armed: false,
            }),
            this: this.clone(),
        })
    }

    /// Submit a thunk. Priority submissions are inserted at the head of
    /// the queue and may spend reserved slots.
    pub fn queue(&self, thunk: impl FnOnce() + Send + 'static, priority: bool) {
        {
            let mut inner = self.inner.lock();
            let pending = Pending {
                thunk: Box::new(thunk),
                priority,
            };
            if priority {
                inner.queue.push_front(pending);
            } else {
                inner.queue.push_back(pending);
            }
        }
        self.check();
    }

    /// Number of thunks waiting for a slot.
    pub fn pending(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Drain every queued thunk the current window still has room for,
    /// arming the refill timer when anything remains.
    fn check(&self) {
        let mut runnable: Vec<Thunk> = Vec::new();

        {
            let mut inner = self.inner.lock();
            let now = Instant::now();
            if now.duration_since(inner.last_reset) >= self.interval {
                inner.tokens = 0;
                inner.last_reset = now;
            }

            loop {
                let Some(priority) = inner.queue.front().map(|pending| pending.priority) else {
                    break;
                };
                let limit = if priority {
                    self.token_limit
                } else {
                    self.token_limit.saturating_sub(self.reserved_tokens)
                };
                if inner.tokens >= limit {
                    break;
                }
                inner.tokens += 1;
                let Some(pending) = inner.queue.pop_front() else {
                    break;
                };
                runnable.push(pending.thunk);
            }

            if !inner.queue.is_empty() && !inner.timer_armed {
                inner.timer_armed = true;
                let deadline = inner.last_reset + self.interval;
                if let Some(bucket) = self.this.upgrade() {
                    tokio::spawn(async move {
                        sleep_until(deadline).await;
                        bucket.inner.lock().timer_armed = false;
                        bucket.check();
                    });
                }
            }
        }

        // Run outside the lock; a panicking thunk must not wedge the
        // bucket or skip the ones behind it.
        for thunk in runnable {
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(thunk)).is_err() {
                warn!("queued gateway send panicked");
            }
        }
    }
}

/// Rate limiter for Gateway identify operations.
///
/// Discord allows `max_concurrency` identify operations every 5
/// seconds; the permit is held for the full bucket duration.
pub struct IdentifyRateLimiter {
    semaphore: Arc<Semaphore>,
    hold_duration: Duration,
}

impl IdentifyRateLimiter {
    /// Create a limiter allowing `max_concurrency` identifies per 5 s.
    #[must_use]
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            hold_duration: Duration::from_secs(5),
        }
    }

    /// Wait for an identify slot. The slot frees itself after the hold
    /// duration.
    pub async fn acquire(&self) -> Result<(), crate::error::GatewayError> {
        let permit = self.semaphore.clone().acquire_owned().await.map_err(|_| {
            crate::error::GatewayError::ChannelSend("identify semaphore closed".to_owned())
        })?;

        let hold_duration = self.hold_duration;
        tokio::spawn(async move {
            sleep(hold_duration).await;
            drop(permit);
        });

        Ok(())
    }

    /// Currently free identify slots.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl Default for IdentifyRateLimiter {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Cap on the reconnect backoff interval.
pub const MAX_RECONNECT_INTERVAL_MS: u64 = 30_000;

/// Grow a reconnect interval: randomized exponential-like growth,
/// capped at 30 s and never shrinking.
pub fn next_reconnect_interval(current_ms: u64) -> u64 {
    use rand::Rng;

    let factor = rand::rng().random::<f64>() * 2.0 + 1.0;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let grown = (current_ms as f64 * factor).round() as u64;
    grown.min(MAX_RECONNECT_INTERVAL_MS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_bucket_window_refill() {
        let bucket = Bucket::new(2, Duration::from_millis(100));
        let counter = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let counter = Arc::clone(&counter);
            bucket.queue(
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
                false,
            );
        }

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(bucket.pending(), 1);

        sleep(Duration::from_millis(150)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(bucket.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserved_tokens_require_priority() {
        let bucket = Bucket::with_reserved(2, Duration::from_secs(60), 1);
        let normal = Arc::new(AtomicU32::new(0));
        let urgent = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            let normal = Arc::clone(&normal);
            bucket.queue(
                move || {
                    normal.fetch_add(1, Ordering::SeqCst);
                },
                false,
            );
        }
        // Only one non-priority slot exists; the reserved slot stays free.
        assert_eq!(normal.load(Ordering::SeqCst), 1);

        let urgent_clone = Arc::clone(&urgent);
        bucket.queue(
            move || {
                urgent_clone.fetch_add(1, Ordering::SeqCst);
            },
            true,
        );
        assert_eq!(urgent.load(Ordering::SeqCst), 1);
        assert_eq!(normal.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_jumps_queue() {
        let bucket = Bucket::new(1, Duration::from_millis(100));
        let order = Arc::new(Mutex::new(Vec::new()));

        let push = |label: &'static str| {
            let order = Arc::clone(&order);
            move || order.lock().push(label)
        };

        bucket.queue(push("first"), false);
        bucket.queue(push("second"), false);
        bucket.queue(push("urgent"), true);

        sleep(Duration::from_millis(350)).await;
        assert_eq!(*order.lock(), vec!["first", "urgent", "second"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_thunk_does_not_wedge() {
        let bucket = Bucket::new(2, Duration::from_millis(100));
        let counter = Arc::new(AtomicU32::new(0));

        bucket.queue(|| panic!("boom"), false);
        let counter_clone = Arc::clone(&counter);
        bucket.queue(
            move || {
                counter_clone.fetch_add(1, Ordering::SeqCst);
            },
            false,
        );

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_identify_limiter_permits() {
        let limiter = IdentifyRateLimiter::new(3);
        assert_eq!(limiter.available_permits(), 3);

        limiter.acquire().await.unwrap();
        assert!(limiter.available_permits() <= 3);
    }

    #[test]
    fn test_reconnect_interval_growth() {
        let mut current = 1000u64;
        for _ in 0..20 {
            let next = next_reconnect_interval(current);
            assert!(next >= current.min(MAX_RECONNECT_INTERVAL_MS));
            assert!(next <= MAX_RECONNECT_INTERVAL_MS);
            current = next;
        }
    }
}
