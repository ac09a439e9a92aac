//! Default in-process local tier.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use octocache_core::{LocalTier, Result};

/// A stored payload with its expiry deadline.
#[derive(Debug, Clone)]
struct TierEntry {
    data: Vec<u8>,
    expires_at: Instant,
}

impl TierEntry {
    fn new(data: Vec<u8>, ttl: Duration) -> Self {
        Self {
            data,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Concurrent in-memory [`LocalTier`] keyed by string.
///
/// Expired entries are dropped when probed; there is no background sweeper.
/// Capacity management beyond TTL expiry is out of scope here; swap in a
/// different `LocalTier` implementation for size-bounded eviction.
#[derive(Debug, Default)]
pub struct MemoryTier {
    entries: DashMap<String, TierEntry>,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently held, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl LocalTier for MemoryTier {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                return Ok(Some(entry.data.clone()));
            }
            drop(entry);
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, data: Vec<u8>, ttl: Duration) -> Result<()> {
        self.entries.insert(key.to_string(), TierEntry::new(data, ttl));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}
