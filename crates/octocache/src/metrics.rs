//! Cache metrics over the `metrics` facade.
//!
//! The library only emits; installing an exporter (Prometheus or otherwise)
//! is the embedding application's concern.

use metrics::counter;

/// Metric names as constants for consistency.
pub mod names {
    /// Reads satisfied by a tier, labelled `tier = local | center`.
    pub const HITS_TOTAL: &str = "octocache_hits_total";
    /// Reads satisfied by neither tier.
    pub const MISSES_TOTAL: &str = "octocache_misses_total";
    /// Remote tier round trips, labelled by operation.
    pub const REMOTE_ROUND_TRIPS_TOTAL: &str = "octocache_remote_round_trips_total";
    /// Callers that joined an in-flight fetch instead of issuing their own.
    pub const COALESCED_JOINS_TOTAL: &str = "octocache_coalesced_joins_total";
    /// Invalidation messages received on the broadcast channel.
    pub const INVALIDATION_MESSAGES_TOTAL: &str = "octocache_invalidation_messages_total";
}

pub(crate) fn record_hit(tier: &'static str) {
    counter!(names::HITS_TOTAL, "tier" => tier).increment(1);
}

pub(crate) fn record_miss() {
    counter!(names::MISSES_TOTAL).increment(1);
}

pub(crate) fn record_round_trip(op: &'static str) {
    counter!(names::REMOTE_ROUND_TRIPS_TOTAL, "op" => op).increment(1);
}

pub(crate) fn record_coalesced_join() {
    counter!(names::COALESCED_JOINS_TOTAL).increment(1);
}

pub(crate) fn record_invalidation_message() {
    counter!(names::INVALIDATION_MESSAGES_TOTAL).increment(1);
}
