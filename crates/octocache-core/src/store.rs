//! Tier interfaces consumed by the coordinator.
//!
//! The remote tier is the shared source of truth; the local tier is a
//! per-process accelerator. Both are consumed through narrow object-safe
//! traits so the coordinator never sees a wire protocol or an eviction
//! policy. Batched remote operations are part of the contract (a pipeline
//! call is one network round trip regardless of how many keys it carries)
//! because a cross-crate command-builder object does not survive an
//! object-safe trait boundary.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::Stream;

use crate::error::Result;

/// Stream of raw broadcast payloads from the remote tier's pub/sub channel.
///
/// The stream ending means the subscription transport is gone; the consumer
/// decides whether that is recoverable.
pub type MessageStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

/// A remote read paired with the key's remaining lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteHit {
    /// Encoded payload as stored.
    pub data: Vec<u8>,
    /// Remaining TTL reported by the remote tier; `None` for a key held
    /// without expiry.
    pub ttl: Option<Duration>,
}

/// One write inside a pipelined batch.
#[derive(Debug, Clone)]
pub struct PipelineSet {
    pub key: String,
    pub data: Vec<u8>,
    pub ttl: Duration,
}

/// The shared, networked key-value store behind the cache.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Write one key with a TTL.
    async fn set(&self, key: &str, data: &[u8], ttl: Duration) -> Result<()>;

    /// Read one key together with its remaining TTL.
    /// Returns `None` when the key is absent.
    async fn get_with_ttl(&self, key: &str) -> Result<Option<RemoteHit>>;

    /// Write a batch of keys in one round trip.
    ///
    /// Not atomic across keys: a late failure fails the whole batch as one
    /// error, but earlier writes inside it are not rolled back.
    async fn pipeline_set(&self, items: &[PipelineSet]) -> Result<()>;

    /// Read a batch of keys with their TTLs in one round trip.
    ///
    /// The result is position-aligned with `keys`; absent keys yield `None`.
    async fn pipeline_get_with_ttl(&self, keys: &[String]) -> Result<Vec<Option<RemoteHit>>>;

    /// Delete keys in one batched call, returning how many existed.
    async fn del(&self, keys: &[String]) -> Result<u64>;

    /// Publish a payload on a broadcast channel. Fire-and-forget delivery:
    /// subscribers that are not listening right now never see it.
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<()>;

    /// Subscribe to a broadcast channel.
    async fn subscribe(&self, channel: &str) -> Result<MessageStream>;
}

/// The in-process cache tier.
///
/// A miss is `Ok(None)`: a distinguished sentinel, not an error. The
/// implementation owns its eviction policy and its internal locking; the
/// coordinator treats get/set/del as atomic.
#[async_trait]
pub trait LocalTier: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, data: Vec<u8>, ttl: Duration) -> Result<()>;

    async fn del(&self, key: &str) -> Result<()>;
}
