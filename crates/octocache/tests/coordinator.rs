//! Integration tests for the two-tier coordinator.
//!
//! Everything runs against the in-process `MemoryStore`, which implements
//! the full remote contract including pub/sub, so tier protocols, batching,
//! coalescing and cross-node invalidation are all exercised without a
//! network. The Redis-backed equivalent lives in the octocache-redis crate.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_test::assert_ok;

use octocache::{
    CacheError, Codec, Coordinator, Entry, LocalTier, MemoryStore, MemoryTier, MessageStream,
    PipelineSet, RemoteHit, RemoteStore, Result, Source,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct User {
    name: String,
}

fn user(name: &str) -> User {
    User {
        name: name.to_string(),
    }
}

/// Counts remote calls, optionally slowing reads to widen race windows.
struct CountingStore {
    inner: MemoryStore,
    get_calls: AtomicUsize,
    pipeline_get_calls: AtomicUsize,
    pipeline_get_keys: AtomicUsize,
    pipeline_set_calls: AtomicUsize,
    read_delay: Duration,
}

impl CountingStore {
    fn new() -> Self {
        Self::with_read_delay(Duration::ZERO)
    }

    fn with_read_delay(read_delay: Duration) -> Self {
        Self {
            inner: MemoryStore::new(),
            get_calls: AtomicUsize::new(0),
            pipeline_get_calls: AtomicUsize::new(0),
            pipeline_get_keys: AtomicUsize::new(0),
            pipeline_set_calls: AtomicUsize::new(0),
            read_delay,
        }
    }
}

#[async_trait]
impl RemoteStore for CountingStore {
    async fn set(&self, key: &str, data: &[u8], ttl: Duration) -> Result<()> {
        self.inner.set(key, data, ttl).await
    }

    async fn get_with_ttl(&self, key: &str) -> Result<Option<RemoteHit>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }
        self.inner.get_with_ttl(key).await
    }

    async fn pipeline_set(&self, items: &[PipelineSet]) -> Result<()> {
        self.pipeline_set_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.pipeline_set(items).await
    }

    async fn pipeline_get_with_ttl(&self, keys: &[String]) -> Result<Vec<Option<RemoteHit>>> {
        self.pipeline_get_calls.fetch_add(1, Ordering::SeqCst);
        self.pipeline_get_keys.fetch_add(keys.len(), Ordering::SeqCst);
        self.inner.pipeline_get_with_ttl(keys).await
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        self.inner.del(keys).await
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<()> {
        self.inner.publish(channel, payload).await
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream> {
        self.inner.subscribe(channel).await
    }
}

type ErrorLog = Arc<Mutex<Vec<CacheError>>>;

fn capture_monitor() -> (ErrorLog, impl Fn(CacheError) + Send + Sync + 'static) {
    let log: ErrorLog = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    (log, move |err| sink.lock().push(err))
}

async fn build(store: Arc<dyn RemoteStore>) -> Coordinator {
    Coordinator::builder(store)
        .monitor(|_err| {})
        .build()
        .await
        .expect("build coordinator")
}

async fn wait_for<F: Fn() -> bool>(cond: F, what: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "timed out: {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_set_then_get_round_trips() {
    let cache = build(Arc::new(MemoryStore::new())).await;

    let mut write = Entry::new("u:1", user("a"), Duration::from_secs(10))
        .unwrap()
        .with_local_cache(true);
    cache.set(&mut write).await.unwrap();

    let mut read: Entry<User> = Entry::probe("u:1", Duration::from_secs(10))
        .unwrap()
        .with_local_cache(true);
    cache.get(&mut read).await.unwrap();

    assert_eq!(read.value(), Some(&user("a")));
    assert_eq!(read.source(), Source::Local);
    assert_eq!(cache.stats().local_hits, 1);
}

#[tokio::test]
async fn test_get_unwritten_key_is_not_found() {
    let cache = build(Arc::new(MemoryStore::new())).await;

    let mut read: Entry<User> = Entry::probe("nobody", Duration::from_secs(10))
        .unwrap()
        .with_local_cache(true);
    let err = cache.get(&mut read).await.unwrap_err();

    assert!(err.is_not_found());
    assert!(read.value().is_none());
    assert_eq!(read.source(), Source::Unknown);
    assert_eq!(cache.stats().misses, 1);
}

#[tokio::test]
async fn test_delete_then_get_is_not_found() {
    let cache = build(Arc::new(MemoryStore::new())).await;

    let mut write = Entry::new("u:1", user("a"), Duration::from_secs(10)).unwrap();
    cache.set(&mut write).await.unwrap();

    let removed = cache.delete(&["u:1"]).await.unwrap();
    assert_eq!(removed, 1);

    let mut read: Entry<User> = Entry::probe("u:1", Duration::from_secs(10)).unwrap();
    assert!(cache.get(&mut read).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_delete_empty_input_is_noop() {
    let cache = build(Arc::new(MemoryStore::new())).await;
    assert_eq!(cache.delete::<&str>(&[]).await.unwrap(), 0);
}

#[tokio::test]
async fn test_delete_counts_only_existing_keys() {
    let cache = build(Arc::new(MemoryStore::new())).await;

    let mut a = Entry::new("a", user("a"), Duration::from_secs(10)).unwrap();
    let mut b = Entry::new("b", user("b"), Duration::from_secs(10)).unwrap();
    cache.set(&mut a).await.unwrap();
    cache.set(&mut b).await.unwrap();

    assert_eq!(cache.delete(&["a", "b", "ghost"]).await.unwrap(), 2);
}

#[tokio::test]
async fn test_remote_only_entry_bypasses_local_tier() {
    let tier = Arc::new(MemoryTier::new());
    let cache = Coordinator::builder(Arc::new(MemoryStore::new()))
        .monitor(|_err| {})
        .local(tier.clone())
        .build()
        .await
        .unwrap();

    let mut write = Entry::new("u:1", user("a"), Duration::from_secs(10)).unwrap();
    cache.set(&mut write).await.unwrap();
    assert!(tier.is_empty());

    let mut read: Entry<User> = Entry::probe("u:1", Duration::from_secs(10)).unwrap();
    cache.get(&mut read).await.unwrap();
    assert_eq!(read.source(), Source::Center);
    assert!(read.ttl().is_some());
    assert!(tier.is_empty());
}

#[tokio::test]
async fn test_local_eviction_falls_back_to_center_and_repopulates() {
    let tier = Arc::new(MemoryTier::new());
    let cache = Coordinator::builder(Arc::new(MemoryStore::new()))
        .monitor(|_err| {})
        .local(tier.clone())
        .build()
        .await
        .unwrap();

    let mut write = Entry::new("u:1", user("a"), Duration::from_secs(10))
        .unwrap()
        .with_local_cache(true);
    cache.set(&mut write).await.unwrap();

    // Warm read comes from the local tier.
    let mut first: Entry<User> = Entry::probe("u:1", Duration::from_secs(10))
        .unwrap()
        .with_local_cache(true);
    cache.get(&mut first).await.unwrap();
    assert_eq!(first.source(), Source::Local);

    // Evict only the local copy; the next read must fall through to the
    // remote tier and, with ~10s of remote TTL left, repopulate locally.
    tier.del("u:1").await.unwrap();
    let mut second: Entry<User> = Entry::probe("u:1", Duration::from_secs(10))
        .unwrap()
        .with_local_cache(true);
    cache.get(&mut second).await.unwrap();
    assert_eq!(second.source(), Source::Center);
    assert_eq!(second.value(), Some(&user("a")));
    assert!(second.ttl().unwrap() > Duration::from_secs(2));
    assert_eq!(tier.len(), 1);

    let mut third: Entry<User> = Entry::probe("u:1", Duration::from_secs(10))
        .unwrap()
        .with_local_cache(true);
    cache.get(&mut third).await.unwrap();
    assert_eq!(third.source(), Source::Local);
}

#[tokio::test]
async fn test_nearly_expired_remote_key_is_not_cached_locally() {
    let store = Arc::new(MemoryStore::new());
    let tier = Arc::new(MemoryTier::new());
    let cache = Coordinator::builder(store.clone())
        .monitor(|_err| {})
        .local(tier.clone())
        .build()
        .await
        .unwrap();

    // A remote key with less remaining TTL than the local-cache floor.
    let payload = Codec::MessagePack.encode(&user("a")).unwrap();
    store
        .set("u:1", &payload, Duration::from_millis(1500))
        .await
        .unwrap();

    let mut read: Entry<User> = Entry::probe("u:1", Duration::from_secs(10))
        .unwrap()
        .with_local_cache(true);
    cache.get(&mut read).await.unwrap();
    assert_eq!(read.source(), Source::Center);
    assert!(tier.is_empty(), "short-lived key must not enter the local tier");
}

#[tokio::test]
async fn test_persistent_remote_key_is_cached_locally() {
    let store = Arc::new(MemoryStore::new());
    let tier = Arc::new(MemoryTier::new());
    let cache = Coordinator::builder(store.clone())
        .monitor(|_err| {})
        .local(tier.clone())
        .build()
        .await
        .unwrap();

    let payload = Codec::MessagePack.encode(&user("a")).unwrap();
    store.set_persistent("config", payload);

    let mut read: Entry<User> = Entry::probe("config", Duration::from_secs(60))
        .unwrap()
        .with_local_cache(true);
    cache.get(&mut read).await.unwrap();
    assert_eq!(read.source(), Source::Center);
    assert_eq!(read.ttl(), None);
    assert_eq!(tier.len(), 1);
}

#[tokio::test]
async fn test_mset_and_mget_batch_round_trips() {
    let store = Arc::new(CountingStore::new());
    let cache = Coordinator::builder(store.clone())
        .monitor(|_err| {})
        .batch_size(3)
        .build()
        .await
        .unwrap();

    let mut entries: Vec<Entry<User>> = (0..7)
        .map(|i| Entry::new(format!("u:{i}"), user(&format!("n{i}")), Duration::from_secs(60)).unwrap())
        .collect();
    tokio_test::assert_ok!(cache.mset(&mut entries).await);
    assert_eq!(store.pipeline_set_calls.load(Ordering::SeqCst), 3);

    // Nothing was cached locally, so every key goes to the remote tier:
    // ceil(7 / 3) = 3 pipelines carrying 7 keys total.
    let mut probes: Vec<Entry<User>> = (0..7)
        .map(|i| Entry::probe(format!("u:{i}"), Duration::from_secs(60)).unwrap())
        .collect();
    let missed = cache.mget(&mut probes).await.unwrap();
    assert!(missed.is_empty());
    assert_eq!(store.pipeline_get_calls.load(Ordering::SeqCst), 3);
    assert_eq!(store.pipeline_get_keys.load(Ordering::SeqCst), 7);
    for (i, probe) in probes.iter().enumerate() {
        assert_eq!(probe.source(), Source::Center);
        assert_eq!(probe.value(), Some(&user(&format!("n{i}"))));
    }
}

#[tokio::test]
async fn test_mget_local_hits_issue_no_remote_commands() {
    let store = Arc::new(CountingStore::new());
    let cache = Coordinator::builder(store.clone())
        .monitor(|_err| {})
        .batch_size(3)
        .build()
        .await
        .unwrap();

    let mut entries: Vec<Entry<User>> = (0..7)
        .map(|i| {
            Entry::new(format!("u:{i}"), user(&format!("n{i}")), Duration::from_secs(60))
                .unwrap()
                .with_local_cache(true)
        })
        .collect();
    cache.mset(&mut entries).await.unwrap();

    let mut probes: Vec<Entry<User>> = (0..7)
        .map(|i| {
            Entry::probe(format!("u:{i}"), Duration::from_secs(60))
                .unwrap()
                .with_local_cache(true)
        })
        .collect();
    let missed = cache.mget(&mut probes).await.unwrap();
    assert!(missed.is_empty());
    assert!(probes.iter().all(|probe| probe.source() == Source::Local));
    assert_eq!(store.pipeline_get_calls.load(Ordering::SeqCst), 0);
    assert_eq!(store.pipeline_get_keys.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_mget_returns_indices_of_two_tier_misses() {
    let cache = build(Arc::new(MemoryStore::new())).await;

    for key in ["a", "c"] {
        let mut entry = Entry::new(key, user(key), Duration::from_secs(60)).unwrap();
        cache.set(&mut entry).await.unwrap();
    }

    let mut probes: Vec<Entry<User>> = ["a", "b", "c", "d"]
        .iter()
        .map(|key| Entry::probe(*key, Duration::from_secs(60)).unwrap())
        .collect();
    let missed = cache.mget(&mut probes).await.unwrap();

    assert_eq!(missed, vec![1, 3]);
    assert_eq!(probes[0].value(), Some(&user("a")));
    assert_eq!(probes[2].value(), Some(&user("c")));
    for &slot in &missed {
        assert!(probes[slot].value().is_none());
        assert_eq!(probes[slot].source(), Source::Unknown);
    }
}

#[tokio::test]
async fn test_coalesced_gets_share_one_remote_fetch() {
    let store = Arc::new(CountingStore::with_read_delay(Duration::from_millis(50)));
    let payload = Codec::MessagePack.encode(&user("hot")).unwrap();
    store
        .inner
        .set("hot", &payload, Duration::from_secs(60))
        .await
        .unwrap();

    let cache = Arc::new(build(store.clone()).await);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = Arc::clone(&cache);
        handles.push(tokio::spawn(async move {
            let mut probe: Entry<User> = Entry::probe("hot", Duration::from_secs(60))
                .unwrap()
                .with_coalescing(true);
            cache.get(&mut probe).await.unwrap();
            probe.into_value().unwrap()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), user("hot"));
    }

    assert_eq!(store.get_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_non_coalescing_gets_fetch_directly() {
    let store = Arc::new(CountingStore::with_read_delay(Duration::from_millis(50)));
    let payload = Codec::MessagePack.encode(&user("hot")).unwrap();
    store
        .inner
        .set("hot", &payload, Duration::from_secs(60))
        .await
        .unwrap();

    let cache = Arc::new(build(store.clone()).await);

    let mut handles = Vec::new();
    for _ in 0..4 {
        let cache = Arc::clone(&cache);
        handles.push(tokio::spawn(async move {
            let mut probe: Entry<User> = Entry::probe("hot", Duration::from_secs(60)).unwrap();
            cache.get(&mut probe).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(store.get_calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_corrupt_remote_payload_reads_as_absent() {
    let store = Arc::new(MemoryStore::new());
    store
        .set("broken", &[0xc1, 0xff, 0x00], Duration::from_secs(60))
        .await
        .unwrap();

    let cache = build(store.clone()).await;
    let mut probe: Entry<User> = Entry::probe("broken", Duration::from_secs(60)).unwrap();
    let err = cache.get(&mut probe).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(probe.value().is_none());
    assert_eq!(probe.source(), Source::Unknown);
}

#[tokio::test]
async fn test_corrupt_remote_payload_surfaced_when_configured() {
    let store = Arc::new(MemoryStore::new());
    store
        .set("broken", &[0xc1, 0xff, 0x00], Duration::from_secs(60))
        .await
        .unwrap();

    let cache = Coordinator::builder(store)
        .monitor(|_err| {})
        .surface_decode_errors(true)
        .build()
        .await
        .unwrap();

    let mut probe: Entry<User> = Entry::probe("broken", Duration::from_secs(60)).unwrap();
    let err = cache.get(&mut probe).await.unwrap_err();
    assert!(matches!(err, CacheError::Decode { .. }));
}

#[tokio::test]
async fn test_corrupt_local_payload_falls_through_to_center() {
    let tier = Arc::new(MemoryTier::new());
    let (errors, monitor) = capture_monitor();
    let cache = Coordinator::builder(Arc::new(MemoryStore::new()))
        .monitor(monitor)
        .local(tier.clone())
        .build()
        .await
        .unwrap();

    let mut write = Entry::new("u:1", user("a"), Duration::from_secs(60)).unwrap();
    cache.set(&mut write).await.unwrap();

    // Poison only the local copy.
    tier.set("u:1", vec![0xc1, 0xff], Duration::from_secs(60))
        .await
        .unwrap();

    let mut read: Entry<User> = Entry::probe("u:1", Duration::from_secs(60))
        .unwrap()
        .with_local_cache(true);
    cache.get(&mut read).await.unwrap();
    assert_eq!(read.source(), Source::Center);
    assert_eq!(read.value(), Some(&user("a")));
    assert!(
        errors.lock().iter().any(|err| matches!(err, CacheError::Decode { .. })),
        "poisoned local payload must reach the monitor"
    );
}

#[tokio::test]
async fn test_write_entry_reused_for_get_is_caller_misuse() {
    let cache = build(Arc::new(MemoryStore::new())).await;

    let mut entry = Entry::new("u:1", user("a"), Duration::from_secs(60)).unwrap();
    cache.set(&mut entry).await.unwrap();

    // The value slot is still occupied; a read needs a vacant slot.
    let err = cache.get(&mut entry).await.unwrap_err();
    assert!(matches!(err, CacheError::InvalidDecodeTarget { .. }));

    entry.reset();
    cache.get(&mut entry).await.unwrap();
    assert_eq!(entry.value(), Some(&user("a")));
}

#[tokio::test]
async fn test_invalidation_converges_across_nodes() {
    let store = Arc::new(MemoryStore::new());

    let tier_a = Arc::new(MemoryTier::new());
    let tier_b = Arc::new(MemoryTier::new());
    let node_a = Coordinator::builder(store.clone())
        .monitor(|_err| {})
        .local(tier_a.clone())
        .build()
        .await
        .unwrap();
    let node_b = Coordinator::builder(store.clone())
        .monitor(|_err| {})
        .local(tier_b.clone())
        .build()
        .await
        .unwrap();

    // Long TTL so local expiry cannot mask the broadcast eviction.
    for key in ["k1", "k2"] {
        let mut entry = Entry::new(key, user(key), Duration::from_secs(600))
            .unwrap()
            .with_local_cache(true);
        node_a.set(&mut entry).await.unwrap();
    }

    // Warm node B's local tier through reads.
    for key in ["k1", "k2"] {
        let mut probe: Entry<User> = Entry::probe(key, Duration::from_secs(600))
            .unwrap()
            .with_local_cache(true);
        node_b.get(&mut probe).await.unwrap();
        assert_eq!(probe.source(), Source::Center);
    }
    assert_eq!(tier_b.len(), 2);

    node_a.delete(&["k1", "k2"]).await.unwrap();

    // Node A evicted synchronously; node B converges via the broadcast.
    assert!(tier_a.is_empty());
    let tier = Arc::clone(&tier_b);
    wait_for(|| tier.is_empty(), "node B local eviction").await;

    let mut probe: Entry<User> = Entry::probe("k1", Duration::from_secs(600))
        .unwrap()
        .with_local_cache(true);
    assert!(node_b.get(&mut probe).await.unwrap_err().is_not_found());

    let stats = node_b.stats();
    assert!(stats.invalidations_applied >= 1);
    node_a.shutdown();
    node_b.shutdown();
}
