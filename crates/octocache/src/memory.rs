//! In-process [`RemoteStore`] for tests and single-node development.
//!
//! Implements the full remote contract (TTL bookkeeping, batched
//! operations, broadcast pub/sub) against process memory. Several
//! coordinators sharing one `MemoryStore` behave like nodes sharing a
//! remote tier, which is exactly what the invalidation tests need.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use octocache_core::{MessageStream, PipelineSet, RemoteHit, RemoteStore, Result};

/// Buffered broadcast messages per channel before slow subscribers lag.
const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
struct StoredEntry {
    data: Vec<u8>,
    /// `None` means the key is held without expiry.
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }

    fn remaining_ttl(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }
}

/// In-memory remote tier with broadcast pub/sub.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, StoredEntry>,
    topics: Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a key without expiry, like a remote key that was written with
    /// no TTL.
    pub fn set_persistent(&self, key: &str, data: Vec<u8>) {
        self.entries.insert(
            key.to_string(),
            StoredEntry {
                data,
                expires_at: None,
            },
        );
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Vec<u8>> {
        self.topics
            .lock()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    fn lookup(&self, key: &str) -> Option<RemoteHit> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                return Some(RemoteHit {
                    data: entry.data.clone(),
                    ttl: entry.remaining_ttl(),
                });
            }
            drop(entry);
            self.entries.remove(key);
        }
        None
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn set(&self, key: &str, data: &[u8], ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            StoredEntry {
                data: data.to_vec(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn get_with_ttl(&self, key: &str) -> Result<Option<RemoteHit>> {
        Ok(self.lookup(key))
    }

    async fn pipeline_set(&self, items: &[PipelineSet]) -> Result<()> {
        for item in items {
            self.set(&item.key, &item.data, item.ttl).await?;
        }
        Ok(())
    }

    async fn pipeline_get_with_ttl(&self, keys: &[String]) -> Result<Vec<Option<RemoteHit>>> {
        Ok(keys.iter().map(|key| self.lookup(key)).collect())
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        let mut removed = 0;
        for key in keys {
            if let Some((_, entry)) = self.entries.remove(key) {
                if !entry.is_expired() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<()> {
        // Send fails only when nobody is subscribed, which matches the
        // fire-and-forget contract.
        let _ = self.sender(channel).send(payload.to_vec());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream> {
        let rx = self.sender(channel).subscribe();
        let stream = BroadcastStream::new(rx)
            .filter_map(|msg| futures_util::future::ready(msg.ok()))
            .boxed();
        Ok(stream)
    }
}
