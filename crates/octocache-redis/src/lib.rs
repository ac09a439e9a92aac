//! Redis remote tier for the octocache coordinator.
//!
//! Commands run over a deadpool connection pool; pub/sub runs over a
//! dedicated client, since a subscribed connection cannot be returned to a
//! command pool. TTLs are written with millisecond precision (`SET ... PX`)
//! because jittered expirations are not whole seconds.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::AsyncCommands;
use serde::Deserialize;

use octocache_core::{
    CacheError, MessageStream, PipelineSet, RemoteHit, RemoteStore, Result,
};

/// Redis connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

/// [`RemoteStore`] over Redis.
pub struct RedisStore {
    pool: deadpool_redis::Pool,
    client: redis::Client,
}

impl RedisStore {
    /// Build the command pool and the pub/sub client from configuration.
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let mut redis_config = deadpool_redis::Config::from_url(&config.url);
        let mut pool_config = deadpool_redis::PoolConfig::new(config.pool_size);
        pool_config.timeouts.wait = Some(Duration::from_millis(config.timeout_ms));
        pool_config.timeouts.create = Some(Duration::from_millis(config.timeout_ms));
        pool_config.timeouts.recycle = Some(Duration::from_millis(config.timeout_ms));
        redis_config.pool = Some(pool_config);

        let pool = redis_config
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| CacheError::remote("connect", e.to_string()))?;
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| CacheError::remote("connect", e.to_string()))?;

        tracing::debug!(url = %config.url, pool_size = config.pool_size, "redis store configured");
        Ok(Self { pool, client })
    }

    async fn conn(&self, op: &'static str) -> Result<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::remote(op, e.to_string()))
    }
}

/// Millisecond TTL argument for `SET ... PX`. Redis rejects PX 0, so the
/// smallest representable expiration is one millisecond.
fn px(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Translate a PTTL reply: `>= 0` is remaining milliseconds, `-1` is a key
/// without expiry.
fn remaining(pttl: i64) -> Option<Duration> {
    (pttl >= 0).then(|| Duration::from_millis(pttl as u64))
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn set(&self, key: &str, data: &[u8], ttl: Duration) -> Result<()> {
        let mut conn = self.conn("set").await?;
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(data)
            .arg("PX")
            .arg(px(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::remote("set", e.to_string()))?;
        Ok(())
    }

    async fn get_with_ttl(&self, key: &str) -> Result<Option<RemoteHit>> {
        let mut conn = self.conn("get").await?;
        let (pttl, data): (i64, Option<Vec<u8>>) = redis::pipe()
            .cmd("PTTL")
            .arg(key)
            .cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::remote("get", e.to_string()))?;

        Ok(data.map(|data| RemoteHit {
            data,
            ttl: remaining(pttl),
        }))
    }

    async fn pipeline_set(&self, items: &[PipelineSet]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn("pipeline_set").await?;
        let mut pipe = redis::pipe();
        for item in items {
            pipe.cmd("SET")
                .arg(&item.key)
                .arg(item.data.as_slice())
                .arg("PX")
                .arg(px(item.ttl))
                .ignore();
        }
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::pipeline(e.to_string()))?;
        Ok(())
    }

    async fn pipeline_get_with_ttl(&self, keys: &[String]) -> Result<Vec<Option<RemoteHit>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn("pipeline_get").await?;
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("PTTL").arg(key).cmd("GET").arg(key);
        }
        let values: Vec<redis::Value> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::pipeline(e.to_string()))?;
        if values.len() != keys.len() * 2 {
            return Err(CacheError::pipeline(format!(
                "pipeline returned {} values for {} keys",
                values.len(),
                keys.len()
            )));
        }

        let mut hits = Vec::with_capacity(keys.len());
        for pair in values.chunks(2) {
            let pttl: i64 = redis::from_redis_value(&pair[0])
                .map_err(|e| CacheError::pipeline(e.to_string()))?;
            let data: Option<Vec<u8>> = redis::from_redis_value(&pair[1])
                .map_err(|e| CacheError::pipeline(e.to_string()))?;
            hits.push(data.map(|data| RemoteHit {
                data,
                ttl: remaining(pttl),
            }));
        }
        Ok(hits)
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn("del").await?;
        let removed: u64 = conn
            .del(keys)
            .await
            .map_err(|e| CacheError::remote("del", e.to_string()))?;
        Ok(removed)
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<()> {
        let mut conn = self.conn("publish").await?;
        let _: () = conn
            .publish(channel, payload)
            .await
            .map_err(|e| CacheError::remote("publish", e.to_string()))?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| CacheError::remote("subscribe", e.to_string()))?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| CacheError::remote("subscribe", e.to_string()))?;
        tracing::debug!(channel = %channel, "subscribed to invalidation channel");

        let stream = pubsub
            .into_on_message()
            .map(|msg| msg.get_payload_bytes().to_vec())
            .boxed();
        Ok(stream)
    }
}
