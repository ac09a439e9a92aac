//! Coordinator construction.
//!
//! Per-instance options live here; per-key options live on
//! [`Entry`](octocache_core::Entry) (expiration, local-cache enablement,
//! coalescing). Validation happens at
//! [`CoordinatorBuilder::build`], which also subscribes to the invalidation
//! channel and spawns the listener: a coordinator that exists is already
//! receiving invalidations.

use std::sync::Arc;
use std::time::Duration;

use octocache_core::{CacheError, Codec, LocalTier, RemoteStore, Result};

use crate::Monitor;
use crate::batch::DEFAULT_BATCH_SIZE;
use crate::coordinator::{Coordinator, StatsInner};
use crate::dispatch::Dispatcher;
use crate::flight::FlightGroup;
use crate::local::MemoryTier;
use crate::subscriber::Subscriber;

/// Broadcast channel shared by coordinators pointed at one remote tier.
pub const DEFAULT_CHANNEL: &str = "octocache:invalidate";

/// Default bound on concurrently executing invalidation deletions.
pub const DEFAULT_WORKERS: usize = 8;

/// Default floor under which a remote TTL disqualifies a key from local
/// caching.
pub const DEFAULT_MIN_LOCAL_TTL: Duration = Duration::from_secs(2);

/// Builder for [`Coordinator`].
pub struct CoordinatorBuilder {
    store: Arc<dyn RemoteStore>,
    local: Option<Arc<dyn LocalTier>>,
    codec: Codec,
    channel: String,
    monitor: Option<Monitor>,
    batch_size: usize,
    workers: usize,
    min_local_ttl: Duration,
    surface_decode_errors: bool,
}

impl CoordinatorBuilder {
    pub(crate) fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            local: None,
            codec: Codec::default(),
            channel: DEFAULT_CHANNEL.to_string(),
            monitor: None,
            batch_size: DEFAULT_BATCH_SIZE,
            workers: DEFAULT_WORKERS,
            min_local_ttl: DEFAULT_MIN_LOCAL_TTL,
            surface_decode_errors: false,
        }
    }

    /// Override the invalidation channel name.
    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    /// Override the payload codec. Coordinators sharing a remote tier must
    /// agree on it.
    pub fn codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    /// Set the error sink for failures nobody is waiting on. Required.
    pub fn monitor(mut self, monitor: impl Fn(CacheError) + Send + Sync + 'static) -> Self {
        self.monitor = Some(Arc::new(monitor));
        self
    }

    /// Override the local tier; defaults to [`MemoryTier`].
    pub fn local(mut self, local: Arc<dyn LocalTier>) -> Self {
        self.local = Some(local);
        self
    }

    /// Override the per-pipeline key ceiling for mset/mget.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Override the invalidation worker bound.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Override the local-cache TTL floor.
    pub fn min_local_ttl(mut self, floor: Duration) -> Self {
        self.min_local_ttl = floor;
        self
    }

    /// Surface remote-path decode failures as raw [`CacheError::Decode`]
    /// instead of folding them into `NotFound`.
    pub fn surface_decode_errors(mut self, surface: bool) -> Self {
        self.surface_decode_errors = surface;
        self
    }

    /// Validate the configuration, subscribe to the invalidation channel
    /// and spawn the listener.
    pub async fn build(self) -> Result<Coordinator> {
        let monitor = self
            .monitor
            .ok_or_else(|| CacheError::configuration("a monitor sink is required"))?;
        if self.channel.is_empty() {
            return Err(CacheError::configuration(
                "invalidation channel must not be empty",
            ));
        }
        if self.batch_size == 0 {
            return Err(CacheError::configuration(
                "batch size must be greater than zero",
            ));
        }

        let local: Arc<dyn LocalTier> = self
            .local
            .unwrap_or_else(|| Arc::new(MemoryTier::new()));
        let dispatcher = Arc::new(Dispatcher::new(self.workers, Arc::clone(&monitor))?);
        let stats = Arc::new(StatsInner::default());

        let stream = self.store.subscribe(&self.channel).await?;
        let listener = Subscriber {
            local: Arc::clone(&local),
            dispatcher,
            codec: self.codec,
            monitor: Arc::clone(&monitor),
            channel: self.channel.clone(),
            stats: Arc::clone(&stats),
        }
        .spawn(stream);

        Ok(Coordinator {
            store: self.store,
            local,
            codec: self.codec,
            channel: self.channel,
            monitor,
            batch_size: self.batch_size,
            min_local_ttl: self.min_local_ttl,
            surface_decode_errors: self.surface_decode_errors,
            flight: FlightGroup::new(),
            stats,
            listener,
        })
    }
}
