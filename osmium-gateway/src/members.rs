//! Correlation of REQUEST_GUILD_MEMBERS with GUILD_MEMBERS_CHUNK
//! replies.
//!
//! Every outbound request carries a random nonce; chunk replies echo it
//! back. Requests resolve with the accumulated members on the final
//! chunk, on timeout (partial data), or on shard reset (partial data).
//! Late chunks after a timeout are ignored.

use dashmap::DashMap;
use osmium_model::Member;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

/// Default timeout for member requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Options for a guild member request.
#[derive(Debug, Clone, Default)]
pub struct RequestMembersOptions {
    /// Maximum number of members to return; 0 requests all matching.
    pub limit: Option<u64>,
    /// Specific user IDs to fetch (max 100).
    pub user_ids: Option<Vec<osmium_model::Snowflake>>,
    /// Username prefix filter.
    pub query: Option<String>,
    /// Whether to include presences (requires GUILD_PRESENCES).
    pub presences: bool,
    /// Overrides the default request timeout.
    pub timeout: Option<Duration>,
}

struct PendingRequest {
    members: Vec<Member>,
    received: u32,
    completion: Option<oneshot::Sender<Vec<Member>>>,
    timeout: Option<JoinHandle<()>>,
}

impl PendingRequest {
    /// Resolve with whatever has accumulated, cancelling the timer.
    fn finish(mut self) {
        if let Some(timeout) = self.timeout.take() {
            timeout.abort();
        }
        if let Some(completion) = self.completion.take() {
            // The caller may have dropped the receiver; that is fine.
            let _ = completion.send(self.members);
        }
    }
}

/// Table of in-flight member requests keyed by nonce.
#[derive(Default)]
pub struct MemberRequestTable {
    inner: DashMap<String, PendingRequest>,
}

impl MemberRequestTable {
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }

    /// Install a pending request under `nonce`.
    pub fn insert(&self, nonce: String, completion: oneshot::Sender<Vec<Member>>) {
        self.inner.insert(
            nonce,
            PendingRequest {
                members: Vec::new(),
                received: 0,
                completion: Some(completion),
                timeout: None,
            },
        );
    }

    /// Attach the timeout task handle so completion can cancel it.
    pub fn attach_timeout(&self, nonce: &str, handle: JoinHandle<()>) {
        if let Some(mut entry) = self.inner.get_mut(nonce) {
            entry.timeout = Some(handle);
        } else {
            // Request already resolved before the timer was registered.
            handle.abort();
        }
    }

    /// Whether a request with this nonce is pending.
    pub fn has(&self, nonce: &str) -> bool {
        self.inner.contains_key(nonce)
    }

    /// Fold one chunk into the pending request. Resolves and removes
    /// the entry when `chunk_index` is the final chunk.
    pub fn ingest_chunk(
        &self,
        nonce: &str,
        members: &[Member],
        chunk_index: u32,
        chunk_count: u32,
    ) {
        let is_final = {
            let Some(mut entry) = self.inner.get_mut(nonce) else {
                debug!(nonce, "chunk for unknown or expired member request");
                return;
            };
            entry.members.extend_from_slice(members);
            entry.received += members.len() as u32;
            chunk_index + 1 >= chunk_count
        };

        if is_final {
            if let Some((_, entry)) = self.inner.remove(nonce) {
                entry.finish();
            }
        }
    }

    /// Resolve a request with partial data after its timeout fired.
    pub fn time_out(&self, nonce: &str) {
        if let Some((_, entry)) = self.inner.remove(nonce) {
            debug!(nonce, received = entry.received, "member request timed out");
            entry.finish();
        }
    }

    /// Resolve every outstanding request with its accumulated members.
    /// Called on shard reset.
    pub fn resolve_all(&self) {
        let nonces: Vec<String> = self.inner.iter().map(|e| e.key().clone()).collect();
        for nonce in nonces {
            if let Some((_, entry)) = self.inner.remove(&nonce) {
                entry.finish();
            }
        }
    }

    /// Number of in-flight requests.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether no requests are in flight.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Generate a 128-bit random hex nonce.
pub fn generate_nonce() -> String {
    use rand::Rng;

    let mut rng = rand::rng();
    let high: u64 = rng.random();
    let low: u64 = rng.random();
    format!("{high:016x}{low:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: u64) -> Member {
        serde_json::from_value(serde_json::json!({
            "user": {"id": id.to_string(), "username": format!("u{id}"), "discriminator": "0"},
            "roles": []
        }))
        .unwrap()
    }

    #[test]
    fn test_nonce_shape() {
        let nonce = generate_nonce();
        assert_eq!(nonce.len(), 32);
        assert!(nonce.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(nonce, generate_nonce());
    }

    #[tokio::test]
    async fn test_chunks_accumulate_until_final() {
        let table = MemberRequestTable::new();
        let (tx, rx) = oneshot::channel();
        table.insert("n1".to_owned(), tx);

        table.ingest_chunk("n1", &[member(1), member(2)], 0, 2);
        assert!(table.has("n1"));

        table.ingest_chunk("n1", &[member(3)], 1, 2);
        assert!(!table.has("n1"));

        let members = rx.await.unwrap();
        assert_eq!(members.len(), 3);
    }

    #[tokio::test]
    async fn test_timeout_resolves_partial() {
        let table = MemberRequestTable::new();
        let (tx, rx) = oneshot::channel();
        table.insert("n2".to_owned(), tx);

        table.ingest_chunk("n2", &[member(1)], 0, 5);
        table.time_out("n2");
        assert!(!table.has("n2"));

        let members = rx.await.unwrap();
        assert_eq!(members.len(), 1);

        // A late chunk after the timeout is ignored.
        table.ingest_chunk("n2", &[member(2)], 1, 5);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_all_on_reset() {
        let table = MemberRequestTable::new();
        let (tx_a, rx_a) = oneshot::channel();
        let (tx_b, rx_b) = oneshot::channel();
        table.insert("a".to_owned(), tx_a);
        table.insert("b".to_owned(), tx_b);
        table.ingest_chunk("a", &[member(1)], 0, 3);

        table.resolve_all();
        assert!(table.is_empty());
        assert_eq!(rx_a.await.unwrap().len(), 1);
        assert_eq!(rx_b.await.unwrap().len(), 0);
    }
}
