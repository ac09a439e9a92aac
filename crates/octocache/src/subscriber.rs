//! Background invalidation listener.
//!
//! One listener task per coordinator: it blocks on the broadcast stream,
//! decodes each payload into a key list and hands one job per message to
//! the bounded dispatcher, returning to the stream immediately, so a slow
//! local deletion never stalls ingestion of subsequent messages.
//!
//! When the stream ends the listener terminates. No resubscription is
//! attempted here: restoring delivery after a transport failure is an
//! operational concern, and the local tier's own TTL (always at most half
//! the remote TTL) bounds the staleness window in the meantime.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use futures_util::StreamExt;
use tokio::task::JoinHandle;

use octocache_core::{CacheError, Codec, LocalTier, MessageStream};

use crate::Monitor;
use crate::coordinator::StatsInner;
use crate::dispatch::Dispatcher;
use crate::metrics;

pub(crate) struct Subscriber {
    pub(crate) local: Arc<dyn LocalTier>,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) codec: Codec,
    pub(crate) monitor: Monitor,
    pub(crate) channel: String,
    pub(crate) stats: Arc<StatsInner>,
}

impl Subscriber {
    pub(crate) fn spawn(self, stream: MessageStream) -> JoinHandle<()> {
        tokio::spawn(self.listen(stream))
    }

    async fn listen(self, mut stream: MessageStream) {
        tracing::debug!(channel = %self.channel, "invalidation listener started");

        while let Some(payload) = stream.next().await {
            metrics::record_invalidation_message();

            let keys: Vec<String> = match self.codec.decode(&payload) {
                Ok(keys) => keys,
                Err(err) => {
                    tracing::warn!(channel = %self.channel, error = %err, "unreadable invalidation payload");
                    (self.monitor)(CacheError::decode(self.channel.clone(), err.to_string()));
                    continue;
                }
            };

            let local = Arc::clone(&self.local);
            let monitor = Arc::clone(&self.monitor);
            let stats = Arc::clone(&self.stats);
            self.dispatcher.submit_async(async move {
                for key in keys {
                    // Best effort: a failed deletion is reported and the
                    // rest of the batch is still attempted.
                    if let Err(err) = local.del(&key).await {
                        tracing::warn!(key = %key, error = %err, "invalidation delete failed");
                        monitor(err);
                    } else {
                        tracing::debug!(key = %key, "invalidated (broadcast)");
                    }
                }
                stats.invalidations_applied.fetch_add(1, Ordering::Relaxed);
                Ok(())
            });
        }

        tracing::warn!(channel = %self.channel, "invalidation subscription closed");
        (self.monitor)(CacheError::remote(
            "subscribe",
            "invalidation subscription closed",
        ));
    }
}
