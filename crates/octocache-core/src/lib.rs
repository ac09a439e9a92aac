//! Core types for the octocache two-tier cache coordinator.
//!
//! This crate holds the leaf pieces the coordinator is built from: the
//! [`Entry`] model with its jittered expirations, the [`Codec`] boundary,
//! the shared [`CacheError`] taxonomy, and the [`RemoteStore`]/[`LocalTier`]
//! tier interfaces.

pub mod codec;
pub mod entry;
pub mod error;
pub mod store;

pub use codec::{Codec, CodecError};
pub use entry::{Entry, JITTER_LOWER, JITTER_UPPER, Source};
pub use error::{CacheError, Result};
pub use store::{LocalTier, MessageStream, PipelineSet, RemoteHit, RemoteStore};
