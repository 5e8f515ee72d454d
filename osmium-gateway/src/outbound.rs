//! The outbound send path.
//!
//! Every send is deferred through the global command bucket; presence
//! updates additionally need a ticket from the presence bucket. A send
//! queued on two buckets runs on its final firing (a join barrier over
//! a shared counter), so a slot in one bucket is consumed while waiting
//! on the other.

use crate::codec::{self, GatewayEncoding};
use crate::opcode::OpCode;
use crate::ratelimit::Bucket;

use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};

/// Serializes sends through the rate-limit buckets onto the outbox
/// channel drained by the shard's write half.
pub(crate) struct OutboundSender {
    global: Arc<Bucket>,
    presence: Arc<Bucket>,
    encoding: GatewayEncoding,
    outbox: flume::Sender<Message>,
    socket_open: Arc<AtomicBool>,
    shard_id: u16,
}

impl OutboundSender {
    pub(crate) fn new(
        global: Arc<Bucket>,
        presence: Arc<Bucket>,
        encoding: GatewayEncoding,
        outbox: flume::Sender<Message>,
        socket_open: Arc<AtomicBool>,
        shard_id: u16,
    ) -> Self {
        Self {
            global,
            presence,
            encoding,
            outbox,
            socket_open,
            shard_id,
        }
    }

    /// Queue an `{op, d}` payload. Sends while the socket is closed are
    /// dropped; nothing is carried across reconnects.
    pub(crate) fn send(&self, op: OpCode, data: Value, priority: bool) {
        if !self.socket_open.load(Ordering::Acquire) {
            trace!(
                shard_id = self.shard_id,
                op = ?op,
                "socket not open, dropping outbound payload"
            );
            return;
        }

        let action = self.send_action(op, data);

        if op == OpCode::PresenceUpdate {
            let buckets = [Arc::clone(&self.global), Arc::clone(&self.presence)];
            let needed = buckets.len();
            let fired = Arc::new(AtomicUsize::new(0));
            let action: Arc<dyn Fn() + Send + Sync> = Arc::new(action);

            for bucket in buckets {
                let fired = Arc::clone(&fired);
                let action = Arc::clone(&action);
                bucket.queue(
                    move || {
                        if fired.fetch_add(1, Ordering::SeqCst) + 1 == needed {
                            action();
                        }
                    },
                    priority,
                );
            }
        } else {
            self.global.queue(action, priority);
        }
    }

    /// Build the deferred send. It re-checks the socket at fire time:
    /// a slot may only free after a disconnect.
    fn send_action(&self, op: OpCode, data: Value) -> impl Fn() + Send + Sync + 'static {
        let socket_open = Arc::clone(&self.socket_open);
        let outbox = self.outbox.clone();
        let encoding = self.encoding;
        let shard_id = self.shard_id;

        move || {
            if !socket_open.load(Ordering::Acquire) {
                trace!(shard_id, op = ?op, "socket closed before send slot, dropping");
                return;
            }

            match codec::encode_packet(encoding, op, data.clone()) {
                Ok(frame) => {
                    if tracing::enabled!(tracing::Level::DEBUG) {
                        debug!(
                            shard_id,
                            op = ?op,
                            payload = %redact_token(&data),
                            "sending gateway payload"
                        );
                    }
                    let _ = outbox.send(frame);
                }
                Err(error) => {
                    warn!(shard_id, %error, "failed to encode outbound payload");
                }
            }
        }
    }
}

/// Clone of `value` with any top-level `token` field blanked, for debug
/// logging.
fn redact_token(value: &Value) -> Value {
    match value {
        Value::Object(map) if map.contains_key("token") => {
            let mut clone = map.clone();
            clone.insert("token".to_owned(), Value::String("[REDACTED]".to_owned()));
            Value::Object(clone)
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{
        GLOBAL_BUCKET_INTERVAL, GLOBAL_BUCKET_LIMIT, GLOBAL_BUCKET_RESERVED,
        PRESENCE_BUCKET_INTERVAL, PRESENCE_BUCKET_LIMIT,
    };
    use serde_json::json;
    use std::time::Duration;

    fn sender(
        socket_open: bool,
    ) -> (
        OutboundSender,
        flume::Receiver<Message>,
        Arc<Bucket>,
        Arc<Bucket>,
    ) {
        let global = Bucket::with_reserved(
            GLOBAL_BUCKET_LIMIT,
            GLOBAL_BUCKET_INTERVAL,
            GLOBAL_BUCKET_RESERVED,
        );
        let presence = Bucket::new(PRESENCE_BUCKET_LIMIT, PRESENCE_BUCKET_INTERVAL);
        let (tx, rx) = flume::unbounded();
        let sender = OutboundSender::new(
            Arc::clone(&global),
            Arc::clone(&presence),
            GatewayEncoding::Json,
            tx,
            Arc::new(AtomicBool::new(socket_open)),
            0,
        );
        (sender, rx, global, presence)
    }

    #[tokio::test]
    async fn test_send_while_closed_is_dropped() {
        let (sender, rx, global, _) = sender(false);
        sender.send(OpCode::Heartbeat, json!(1), true);
        assert!(rx.try_recv().is_err());
        assert_eq!(global.pending(), 0);
    }

    #[tokio::test]
    async fn test_send_produces_frame() {
        let (sender, rx, _, _) = sender(true);
        sender.send(OpCode::Heartbeat, json!(42), true);

        let frame = rx.try_recv().unwrap();
        match frame {
            Message::Text(text) => assert_eq!(text.as_str(), r#"{"op":1,"d":42}"#),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_presence_waits_for_both_buckets() {
        let (sender, rx, _, presence) = sender(true);

        // Exhaust the presence bucket.
        for _ in 0..PRESENCE_BUCKET_LIMIT {
            presence.queue(|| {}, false);
        }

        sender.send(OpCode::PresenceUpdate, json!({"status": "online"}), false);
        // Global ticket fired, presence ticket still queued.
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(PRESENCE_BUCKET_INTERVAL + Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_redact_token() {
        let value = json!({"token": "secret", "intents": 1});
        let redacted = redact_token(&value);
        assert_eq!(redacted["token"], "[REDACTED]");
        assert_eq!(redacted["intents"], 1);

        let untouched = json!({"seq": 4});
        assert_eq!(redact_token(&untouched), untouched);
    }
}
