//! The unit of cached data.
//!
//! An [`Entry`] is constructed per logical cache operation: with a value for
//! the write path ([`Entry::new`]), or with a vacant slot for the read path
//! ([`Entry::probe`]). The coordinator fills in the encoded payload, the
//! source attribution and the observed remote TTL as the operation runs.
//!
//! ## TTL jitter
//!
//! The caller declares a nominal TTL; the expiration actually sent to the
//! remote tier is drawn once per entry from `nominal × U(0.8, 1.2)` and
//! cached for the entry's lifetime. Entries sharing a nominal TTL therefore
//! expire spread out instead of in one synchronized wave. The local tier
//! always uses half the jittered value, so a local copy can never outlive
//! its remote source; that bound is what caps staleness when an
//! invalidation message is lost.

use std::sync::OnceLock;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::codec::Codec;
use crate::error::{CacheError, Result};

/// Lower bound of the jitter factor.
pub const JITTER_LOWER: f64 = 0.8;

/// Upper bound of the jitter factor.
pub const JITTER_UPPER: f64 = 1.2;

/// Which tier satisfied the most recent read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Source {
    /// No read has completed for this entry.
    #[default]
    Unknown,
    /// Served from the in-process tier.
    Local,
    /// Served from the shared remote tier.
    Center,
}

/// A single cached key/value with its expiration and read provenance.
#[derive(Debug)]
pub struct Entry<T> {
    key: String,
    value: Option<T>,
    nominal: Duration,
    jittered: OnceLock<Duration>,
    data: Option<Vec<u8>>,
    source: Source,
    observed_ttl: Option<Duration>,
    local_cache: bool,
    single_flight: bool,
}

impl<T> Entry<T> {
    /// Create a write-path entry carrying a value.
    ///
    /// Fails with [`CacheError::InvalidKey`] on an empty key and
    /// [`CacheError::InvalidExpiration`] on a zero TTL.
    pub fn new(key: impl Into<String>, value: T, ttl: Duration) -> Result<Self> {
        let mut entry = Self::probe(key, ttl)?;
        entry.value = Some(value);
        Ok(entry)
    }

    /// Create a read-path entry with a vacant value slot for decoding into.
    pub fn probe(key: impl Into<String>, ttl: Duration) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(CacheError::InvalidKey);
        }
        if ttl.is_zero() {
            return Err(CacheError::invalid_expiration(key));
        }
        Ok(Self {
            key,
            value: None,
            nominal: ttl,
            jittered: OnceLock::new(),
            data: None,
            source: Source::Unknown,
            observed_ttl: None,
            local_cache: false,
            single_flight: false,
        })
    }

    /// Enable or bypass the local tier for this entry.
    pub fn with_local_cache(mut self, enabled: bool) -> Self {
        self.local_cache = enabled;
        self
    }

    /// Opt this entry into sharing one in-flight remote fetch with
    /// concurrent readers of the same key.
    pub fn with_coalescing(mut self, enabled: bool) -> Self {
        self.single_flight = enabled;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn local_cache(&self) -> bool {
        self.local_cache
    }

    pub fn coalescing(&self) -> bool {
        self.single_flight
    }

    /// The jittered expiration sent to the remote tier.
    ///
    /// Drawn on first access and cached, so repeated calls agree.
    pub fn exp(&self) -> Duration {
        *self.jittered.get_or_init(|| {
            let factor = rand::thread_rng().gen_range(JITTER_LOWER..JITTER_UPPER);
            self.nominal.mul_f64(factor)
        })
    }

    /// The local-tier expiration: always half of [`Entry::exp`].
    pub fn local_exp(&self) -> Duration {
        self.exp() / 2
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn take_value(&mut self) -> Option<T> {
        self.value.take()
    }

    pub fn into_value(self) -> Option<T> {
        self.value
    }

    /// The encoded payload, present once encode or decode has run.
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn set_source(&mut self, source: Source) {
        self.source = source;
    }

    pub fn source_local(&self) -> bool {
        self.source == Source::Local
    }

    pub fn source_center(&self) -> bool {
        self.source == Source::Center
    }

    /// Remaining lifetime reported by the remote tier at read time.
    ///
    /// Populated only on a Center-sourced read; `None` also covers a key
    /// the remote tier holds without expiry.
    pub fn ttl(&self) -> Option<Duration> {
        self.observed_ttl
    }

    pub fn set_ttl(&mut self, ttl: Option<Duration>) {
        self.observed_ttl = ttl;
    }

    /// Serialize the value into the payload slot.
    ///
    /// No-op if a payload is already present. Fails with
    /// [`CacheError::Encode`] carrying the key when the codec rejects the
    /// value or the entry has no value to encode.
    pub fn encode(&mut self, codec: Codec) -> Result<&[u8]>
    where
        T: Serialize,
    {
        if self.data.is_none() {
            let value = self
                .value
                .as_ref()
                .ok_or_else(|| CacheError::encode(self.key.clone(), "entry has no value"))?;
            let bytes = codec
                .encode(value)
                .map_err(|e| CacheError::encode(self.key.clone(), e.to_string()))?;
            self.data = Some(bytes);
        }
        Ok(self.data.as_deref().unwrap_or_default())
    }

    /// Deserialize `data` into the value slot and retain the bytes.
    ///
    /// The slot must be vacant; decoding into an occupied slot fails with
    /// [`CacheError::InvalidDecodeTarget`] without touching the stored
    /// bytes. A codec failure mutates neither slot nor bytes, leaving the
    /// entry ready for [`Entry::reset`] and reuse.
    pub fn decode(&mut self, data: Vec<u8>, codec: Codec) -> Result<()>
    where
        T: DeserializeOwned,
    {
        if self.value.is_some() {
            return Err(CacheError::invalid_decode_target(self.key.clone()));
        }
        let value: T = codec
            .decode(&data)
            .map_err(|e| CacheError::decode(self.key.clone(), e.to_string()))?;
        self.value = Some(value);
        self.data = Some(data);
        Ok(())
    }

    /// Return the entry to a clean miss state so it can be reused for a
    /// subsequent coordinator call. The cached jitter is deliberately kept.
    pub fn reset(&mut self) {
        self.value = None;
        self.data = None;
        self.source = Source::Unknown;
        self.observed_ttl = None;
    }
}
