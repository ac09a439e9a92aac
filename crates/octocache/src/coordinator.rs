//! Two-tier cache coordination.
//!
//! The coordinator orchestrates entries, the local tier, the remote tier,
//! the flight group and the batch splitter into the set/mset/get/mget/
//! delete protocols, and owns the invalidation publish path.
//!
//! ## Tier discipline
//!
//! The remote tier is the source of truth; the local tier is a best-effort
//! accelerator, never a consistency boundary. Writes go remote-first, reads
//! probe local-first, and a remote write that lands is never rolled back
//! because a local write after it failed.
//!
//! ```text
//! GET → local tier → remote tier (TTL-paired read, optionally coalesced)
//!           ↓              ↓
//!   source=Local    source=Center, local tier repopulated when the
//!                   observed TTL clears the local-cache floor
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;

use octocache_core::{
    CacheError, Codec, Entry, LocalTier, PipelineSet, RemoteHit, RemoteStore, Result, Source,
};

use crate::Monitor;
use crate::batch;
use crate::builder::CoordinatorBuilder;
use crate::flight::FlightGroup;
use crate::metrics;

#[derive(Debug, Default)]
pub(crate) struct StatsInner {
    pub(crate) local_hits: AtomicU64,
    pub(crate) center_hits: AtomicU64,
    pub(crate) misses: AtomicU64,
    pub(crate) invalidations_applied: AtomicU64,
}

/// Snapshot of a coordinator's cumulative counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub local_hits: u64,
    pub center_hits: u64,
    pub misses: u64,
    /// Invalidation messages whose deletions this node has applied.
    pub invalidations_applied: u64,
}

impl CoordinatorStats {
    /// Percentage of reads satisfied by either tier.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.local_hits + self.center_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        }
    }
}

/// Coordinates a local tier and a remote tier into one cache with
/// cross-node invalidation.
///
/// Constructed through [`Coordinator::builder`]; construction subscribes to
/// the invalidation channel and spawns the background listener. Dropping
/// the coordinator (or calling [`Coordinator::shutdown`]) stops the
/// listener.
pub struct Coordinator {
    pub(crate) store: Arc<dyn RemoteStore>,
    pub(crate) local: Arc<dyn LocalTier>,
    pub(crate) codec: Codec,
    pub(crate) channel: String,
    pub(crate) monitor: Monitor,
    pub(crate) batch_size: usize,
    pub(crate) min_local_ttl: Duration,
    pub(crate) surface_decode_errors: bool,
    pub(crate) flight: FlightGroup,
    pub(crate) stats: Arc<StatsInner>,
    pub(crate) listener: JoinHandle<()>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("channel", &self.channel)
            .field("codec", &self.codec)
            .field("batch_size", &self.batch_size)
            .field("min_local_ttl", &self.min_local_ttl)
            .field("surface_decode_errors", &self.surface_decode_errors)
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// Start building a coordinator over the given remote store.
    pub fn builder(store: Arc<dyn RemoteStore>) -> CoordinatorBuilder {
        CoordinatorBuilder::new(store)
    }

    /// The local tier handle, shared with the invalidation listener.
    pub fn local(&self) -> &Arc<dyn LocalTier> {
        &self.local
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Snapshot the cumulative counters.
    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            local_hits: self.stats.local_hits.load(Ordering::Relaxed),
            center_hits: self.stats.center_hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            invalidations_applied: self.stats.invalidations_applied.load(Ordering::Relaxed),
        }
    }

    /// Stop the invalidation listener. Idempotent.
    pub fn shutdown(&self) {
        self.listener.abort();
    }

    /// Write one entry to the remote tier, and to the local tier when the
    /// entry enables it.
    ///
    /// A remote success followed by a local failure surfaces the local
    /// error; the remote write is not rolled back.
    pub async fn set<T: Serialize>(&self, entry: &mut Entry<T>) -> Result<()> {
        let data = entry.encode(self.codec)?.to_vec();
        self.store.set(entry.key(), &data, entry.exp()).await?;
        metrics::record_round_trip("set");
        if entry.local_cache() {
            self.local.set(entry.key(), data, entry.local_exp()).await?;
        }
        tracing::debug!(key = %entry.key(), "cache set");
        Ok(())
    }

    /// Write a batch of entries, one pipelined round trip per chunk of at
    /// most the configured batch ceiling.
    ///
    /// A pipeline failure aborts before that chunk's local writes and is
    /// returned; chunks already written are not rolled back.
    pub async fn mset<T: Serialize>(&self, entries: &mut [Entry<T>]) -> Result<()> {
        for entry in entries.iter_mut() {
            entry.encode(self.codec)?;
        }
        for chunk in batch::split(entries, self.batch_size) {
            let items: Vec<PipelineSet> = chunk
                .iter()
                .map(|entry| PipelineSet {
                    key: entry.key().to_string(),
                    data: entry.data().unwrap_or_default().to_vec(),
                    ttl: entry.exp(),
                })
                .collect();
            self.store.pipeline_set(&items).await?;
            metrics::record_round_trip("mset");

            for entry in chunk {
                if entry.local_cache() {
                    self.local
                        .set(
                            entry.key(),
                            entry.data().unwrap_or_default().to_vec(),
                            entry.local_exp(),
                        )
                        .await?;
                }
            }
        }
        tracing::debug!(count = entries.len(), "cache mset");
        Ok(())
    }

    /// Read one entry through the tiers.
    ///
    /// Local tier first when the entry enables it (a miss there is a fall
    /// through, not an error), then the remote tier, coalesced with
    /// concurrent readers when the entry opts in. A hit on neither tier
    /// resets the entry and returns [`CacheError::NotFound`].
    pub async fn get<T: DeserializeOwned>(&self, entry: &mut Entry<T>) -> Result<()> {
        if entry.local_cache() {
            if let Some(data) = self.local.get(entry.key()).await? {
                match entry.decode(data, self.codec) {
                    Ok(()) => {
                        entry.set_source(Source::Local);
                        self.stats.local_hits.fetch_add(1, Ordering::Relaxed);
                        metrics::record_hit("local");
                        tracing::debug!(key = %entry.key(), "cache hit (local)");
                        return Ok(());
                    }
                    Err(err @ CacheError::InvalidDecodeTarget { .. }) => return Err(err),
                    Err(err) => {
                        // Corrupt local payload: drop it so it cannot pin
                        // the key unreadable, and fall through to the
                        // remote tier.
                        tracing::warn!(key = %entry.key(), error = %err, "dropping unreadable local payload");
                        (self.monitor)(err);
                        if let Err(del_err) = self.local.del(entry.key()).await {
                            (self.monitor)(del_err);
                        }
                    }
                }
            }
        }

        let fetched = if entry.coalescing() {
            let store = Arc::clone(&self.store);
            let key = entry.key().to_string();
            self.flight
                .run(entry.key(), async move {
                    let hit = store.get_with_ttl(&key).await?;
                    metrics::record_round_trip("get");
                    Ok(hit)
                })
                .await?
        } else {
            let hit = self.store.get_with_ttl(entry.key()).await?;
            metrics::record_round_trip("get");
            hit
        };

        match fetched {
            Some(hit) => self.apply_remote_hit(entry, hit).await,
            None => {
                entry.reset();
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                metrics::record_miss();
                tracing::debug!(key = %entry.key(), "cache miss");
                Err(CacheError::not_found(entry.key()))
            }
        }
    }

    /// Read a batch of entries through the tiers.
    ///
    /// Entries found locally leave the remote work set; the remainder is
    /// fetched in pipelined TTL-paired chunks of at most the batch ceiling,
    /// processed sequentially. Returns the indices of entries found in
    /// neither tier; each of those is left in its reset state.
    pub async fn mget<T: DeserializeOwned>(&self, entries: &mut [Entry<T>]) -> Result<Vec<usize>> {
        let mut missed = Vec::new();
        let mut base = 0usize;

        for chunk in batch::split_mut(entries, self.batch_size) {
            let mut remote_slots: Vec<usize> = Vec::new();

            for (slot, entry) in chunk.iter_mut().enumerate() {
                if !entry.local_cache() {
                    remote_slots.push(slot);
                    continue;
                }
                match self.local.get(entry.key()).await? {
                    Some(data) => match entry.decode(data, self.codec) {
                        Ok(()) => {
                            entry.set_source(Source::Local);
                            self.stats.local_hits.fetch_add(1, Ordering::Relaxed);
                            metrics::record_hit("local");
                        }
                        Err(err @ CacheError::InvalidDecodeTarget { .. }) => return Err(err),
                        Err(err) => {
                            tracing::warn!(key = %entry.key(), error = %err, "dropping unreadable local payload");
                            (self.monitor)(err);
                            if let Err(del_err) = self.local.del(entry.key()).await {
                                (self.monitor)(del_err);
                            }
                            remote_slots.push(slot);
                        }
                    },
                    None => remote_slots.push(slot),
                }
            }

            if remote_slots.is_empty() {
                base += chunk.len();
                continue;
            }

            let keys: Vec<String> = remote_slots
                .iter()
                .map(|&slot| chunk[slot].key().to_string())
                .collect();
            let hits = self.store.pipeline_get_with_ttl(&keys).await?;
            metrics::record_round_trip("mget");
            if hits.len() != keys.len() {
                return Err(CacheError::pipeline(format!(
                    "pipeline returned {} results for {} keys",
                    hits.len(),
                    keys.len()
                )));
            }

            for (&slot, hit) in remote_slots.iter().zip(hits) {
                let entry = &mut chunk[slot];
                match hit {
                    Some(hit) => match self.apply_remote_hit(entry, hit).await {
                        Ok(()) => {}
                        Err(err) if err.is_not_found() => missed.push(base + slot),
                        Err(err) => return Err(err),
                    },
                    None => {
                        entry.reset();
                        self.stats.misses.fetch_add(1, Ordering::Relaxed);
                        metrics::record_miss();
                        missed.push(base + slot);
                    }
                }
            }
            base += chunk.len();
        }

        tracing::debug!(
            count = entries.len(),
            missed = missed.len(),
            "cache mget"
        );
        Ok(missed)
    }

    /// Delete keys from both tiers and broadcast the invalidation.
    ///
    /// No-op on empty input. Local copies on this node are evicted
    /// synchronously, so a subsequent read here never sees the deleted
    /// value; other nodes converge through the broadcast, eventually.
    pub async fn delete<K: AsRef<str>>(&self, keys: &[K]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let owned: Vec<String> = keys.iter().map(|key| key.as_ref().to_string()).collect();

        let removed = self.store.del(&owned).await?;
        metrics::record_round_trip("del");

        let mut first_local_err = None;
        for key in &owned {
            if let Err(err) = self.local.del(key).await {
                tracing::warn!(key = %key, error = %err, "local delete failed");
                if first_local_err.is_none() {
                    first_local_err = Some(err);
                } else {
                    (self.monitor)(err);
                }
            }
        }

        let payload = self
            .codec
            .encode(&owned)
            .map_err(|e| CacheError::encode(self.channel.clone(), e.to_string()))?;
        self.store.publish(&self.channel, &payload).await?;
        tracing::debug!(count = owned.len(), removed, "cache delete published");

        match first_local_err {
            Some(err) => Err(err),
            None => Ok(removed),
        }
    }

    /// Decode a remote hit into the entry and opportunistically repopulate
    /// the local tier.
    async fn apply_remote_hit<T: DeserializeOwned>(
        &self,
        entry: &mut Entry<T>,
        hit: RemoteHit,
    ) -> Result<()> {
        let RemoteHit { data, ttl } = hit;
        if let Err(err) = entry.decode(data, self.codec) {
            if matches!(err, CacheError::InvalidDecodeTarget { .. }) {
                return Err(err);
            }
            // A payload this coordinator cannot read is equivalent to the
            // key being absent, unless the caller asked for the raw error.
            entry.reset();
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            metrics::record_miss();
            if self.surface_decode_errors {
                return Err(err);
            }
            tracing::debug!(key = %entry.key(), error = %err, "unreadable remote payload treated as miss");
            return Err(CacheError::not_found(entry.key()));
        }

        entry.set_source(Source::Center);
        entry.set_ttl(ttl);
        self.stats.center_hits.fetch_add(1, Ordering::Relaxed);
        metrics::record_hit("center");
        tracing::debug!(key = %entry.key(), "cache hit (center)");

        if entry.local_cache() && self.worth_caching_locally(ttl) {
            let data = entry.data().unwrap_or_default().to_vec();
            if let Err(err) = self
                .local
                .set(entry.key(), data, entry.local_exp())
                .await
            {
                tracing::warn!(key = %entry.key(), error = %err, "local repopulation failed");
                (self.monitor)(err);
            }
        }
        Ok(())
    }

    /// A key whose remote copy is about to expire is not worth caching
    /// locally: it would immediately need re-fetching and risks serving
    /// data past its nominal lifetime. A key held without remote expiry
    /// always qualifies.
    fn worth_caching_locally(&self, observed: Option<Duration>) -> bool {
        observed.is_none_or(|ttl| ttl > self.min_local_ttl)
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
