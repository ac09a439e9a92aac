//! Two-tier cache coordination with pub/sub invalidation.
//!
//! ## Architecture
//!
//! - **Local tier**: in-process, microsecond latency, per-node; always
//!   expires before the remote tier (half the jittered TTL).
//! - **Remote tier**: shared, networked key-value store; source of truth.
//! - **Invalidation**: deletions broadcast to every node over the remote
//!   tier's pub/sub channel; best-effort, eventually convergent.
//!
//! ```text
//! app → Coordinator → local tier ─miss→ remote tier ─miss→ NotFound
//!             │                              │
//!             └── delete ──► remote broadcast channel
//!                                 │ (every node)
//!                        listener → worker pool → local eviction
//! ```
//!
//! A concurrent miss stampede on one key collapses into a single remote
//! fetch for entries that opt into coalescing, and batched operations cap
//! their pipeline size so one round trip never carries an unbounded
//! command count.
//!
//! ## Example
//!
//! ```ignore
//! let store = Arc::new(RedisStore::new(&RedisConfig::default())?);
//! let cache = Coordinator::builder(store)
//!     .monitor(|err| tracing::error!(error = %err, "cache background failure"))
//!     .build()
//!     .await?;
//!
//! let mut entry = Entry::new("user:1", user, Duration::from_secs(600))?
//!     .with_local_cache(true)
//!     .with_coalescing(true);
//! cache.set(&mut entry).await?;
//! ```

use std::sync::Arc;

pub mod batch;
pub mod builder;
pub mod coordinator;
pub mod dispatch;
pub mod flight;
pub mod local;
pub mod memory;
pub mod metrics;
mod subscriber;

pub use octocache_core::{
    CacheError, Codec, CodecError, Entry, JITTER_LOWER, JITTER_UPPER, LocalTier, MessageStream,
    PipelineSet, RemoteHit, RemoteStore, Result, Source,
};

pub use batch::DEFAULT_BATCH_SIZE;
pub use builder::{CoordinatorBuilder, DEFAULT_CHANNEL, DEFAULT_MIN_LOCAL_TTL, DEFAULT_WORKERS};
pub use coordinator::{Coordinator, CoordinatorStats};
pub use dispatch::Dispatcher;
pub use flight::FlightGroup;
pub use local::MemoryTier;
pub use memory::MemoryStore;

/// Sink for failures nobody is waiting on: invalidation-path errors,
/// best-effort local writes, subscription teardown. Required at
/// construction: background errors must never fall into a void.
pub type Monitor = Arc<dyn Fn(CacheError) + Send + Sync>;
