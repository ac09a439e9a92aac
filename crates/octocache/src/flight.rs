//! Request coalescing for remote fetches.
//!
//! A freshly-expired hot key can draw many concurrent readers at once; left
//! alone, every one of them issues its own remote fetch. The flight group
//! collapses them: the first caller for a key becomes the leader and runs
//! the fetch, everyone else joins the flight and receives a clone of the
//! leader's result, value or error. Callers arriving after the flight
//! lands start a fresh one.

use std::collections::HashMap;
use std::future::Future;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use octocache_core::{CacheError, RemoteHit, Result};

use crate::metrics;

/// Outcome of a remote fetch, shared verbatim with every joined caller.
pub type FetchResult = Result<Option<RemoteHit>>;

enum Role {
    Leader(broadcast::Sender<FetchResult>),
    Joiner(broadcast::Receiver<FetchResult>),
}

/// Per-key registry of in-flight remote fetches.
///
/// Joiners subscribe under the registry lock and the leader deregisters the
/// flight before publishing, so a caller either joins a flight that will
/// still deliver to it or starts a new one, never a flight whose result
/// already passed.
#[derive(Default)]
pub struct FlightGroup {
    flights: Mutex<HashMap<String, broadcast::Sender<FetchResult>>>,
}

impl FlightGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fetch` for `key`, deduplicating against concurrent callers.
    ///
    /// At most one fetch per key is in flight; all concurrent callers for
    /// that key observe the same result. A leader that dies without
    /// publishing (a panicked fetch) wakes its joiners with an error rather
    /// than hanging them.
    pub async fn run<F>(&self, key: &str, fetch: F) -> FetchResult
    where
        F: Future<Output = FetchResult> + Send,
    {
        let role = {
            let mut flights = self.flights.lock();
            match flights.get(key) {
                Some(tx) => Role::Joiner(tx.subscribe()),
                None => {
                    let (tx, _rx) = broadcast::channel(1);
                    flights.insert(key.to_string(), tx.clone());
                    Role::Leader(tx)
                }
            }
        };

        match role {
            Role::Leader(tx) => {
                let guard = FlightGuard {
                    flights: &self.flights,
                    key,
                };
                let result = fetch.await;
                // Deregister before publishing: late arrivals start fresh.
                drop(guard);
                let _ = tx.send(result.clone());
                result
            }
            Role::Joiner(mut rx) => {
                metrics::record_coalesced_join();
                match rx.recv().await {
                    Ok(result) => result,
                    Err(_) => Err(CacheError::remote(
                        "get",
                        "coalesced fetch aborted before completing",
                    )),
                }
            }
        }
    }
}

/// Removes the flight from the registry even if the fetch unwinds.
struct FlightGuard<'a> {
    flights: &'a Mutex<HashMap<String, broadcast::Sender<FetchResult>>>,
    key: &'a str,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.flights.lock().remove(self.key);
    }
}
