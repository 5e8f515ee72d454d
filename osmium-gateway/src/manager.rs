//! Shard management.
//!
//! The manager owns a set of shards, shares one identify rate limiter
//! between them so IDENTIFYs stay within Discord's concurrency bucket,
//! and tracks readiness signals from each shard.

use crate::client::Client;
use crate::error::GatewayError;
use crate::ratelimit::IdentifyRateLimiter;
use crate::shard::{Shard, ShardNotice};

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::ops::Range;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Spawns and supervises a range of shards.
pub struct ShardManager {
    client: Arc<Client>,
    limiter: Arc<IdentifyRateLimiter>,
    shards: DashMap<u16, Arc<Shard>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    notices_tx: flume::Sender<ShardNotice>,
    notices_rx: flume::Receiver<ShardNotice>,
}

impl ShardManager {
    /// Create a manager. `max_concurrency` comes from `/gateway/bot`.
    pub fn new(client: Arc<Client>, max_concurrency: usize) -> Self {
        let (notices_tx, notices_rx) = flume::unbounded();
        Self {
            client,
            limiter: Arc::new(IdentifyRateLimiter::new(max_concurrency)),
            shards: DashMap::new(),
            handles: Mutex::new(Vec::new()),
            notices_tx,
            notices_rx,
        }
    }

    /// Create the shards for `range` out of `total`, without
    /// connecting.
    pub fn spawn_range(&self, range: Range<u16>, total: u16) {
        for id in range {
            let mut shard = Shard::with_limiter(
                id,
                total,
                Arc::clone(&self.client),
                Arc::clone(&self.limiter),
            );
            shard.set_notifier(self.notices_tx.clone());
            self.shards.insert(id, Arc::new(shard));
        }
    }

    /// Connect every spawned shard.
    pub fn start(&self) {
        for entry in self.shards.iter() {
            let shard = Arc::clone(entry.value());
            let handle = tokio::spawn(async move {
                if let Err(error) = shard.run().await {
                    error!(shard_id = shard.shard_id(), %error, "shard terminated");
                }
            });
            self.handles.lock().push(handle);
        }
        info!(shards = self.shards.len(), "shard manager started");
    }

    /// Look up a shard by ID.
    pub fn shard(&self, id: u16) -> Option<Arc<Shard>> {
        self.shards.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of managed shards.
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    /// Whether no shards are managed.
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Block until every managed shard has reported ready at least
    /// once.
    pub async fn wait_until_ready(&self) -> Result<(), GatewayError> {
        let mut ready: HashSet<u16> = HashSet::new();
        while ready.len() < self.shards.len() {
            match self.notices_rx.recv_async().await {
                Ok(ShardNotice::Ready(id)) | Ok(ShardNotice::Resumed(id)) => {
                    ready.insert(id);
                }
                Ok(ShardNotice::Disconnected(_)) => {}
                Err(_) => {
                    return Err(GatewayError::ChannelSend(
                        "shard notice channel closed".to_owned(),
                    ))
                }
            }
        }
        info!("all shards ready");
        Ok(())
    }

    /// Stop every shard and abort their tasks once they exit.
    pub async fn shutdown(&self) {
        for entry in self.shards.iter() {
            entry.value().stop();
        }
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        info!("shard manager stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::GatewayOptions;
    use osmium_model::Intents;

    fn manager() -> ShardManager {
        let (client, _events) = Client::new(GatewayOptions::new("t", Intents::GUILDS));
        ShardManager::new(client, 1)
    }

    #[test]
    fn test_spawn_range() {
        let manager = manager();
        manager.spawn_range(0..4, 4);
        assert_eq!(manager.len(), 4);
        assert_eq!(manager.shard(2).unwrap().shard_id(), 2);
        assert_eq!(manager.shard(2).unwrap().total_shards(), 4);
        assert!(manager.shard(9).is_none());
    }

    #[tokio::test]
    async fn test_wait_until_ready_counts_each_shard_once() {
        let manager = manager();
        manager.spawn_range(0..2, 2);

        manager.notices_tx.send(ShardNotice::Ready(0)).unwrap();
        manager.notices_tx.send(ShardNotice::Ready(0)).unwrap();
        manager.notices_tx.send(ShardNotice::Disconnected(0)).unwrap();
        manager.notices_tx.send(ShardNotice::Resumed(1)).unwrap();

        manager.wait_until_ready().await.unwrap();
    }
}
