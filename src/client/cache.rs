//! Client-side cache of query results keyed by entity path
//!
//! # Matching
//!
//! [`ClientCache::invalidate`] marks stale every entry whose key is related
//! to the notice path: the key equals it, lies under it (a `["sensors"]`
//! notice reaches every sensor query), or is an ancestor of it. Keys for
//! sibling entities never match.
//!
//! # Reads
//!
//! [`ClientCache::read`] suspends until fresh: a `Fresh` entry is returned
//! immediately, a `Stale` or missing one is refetched first. Every entry
//! carries a generation drawn from a cache-wide counter, and each
//! invalidation draws a new one. A fetch that started before an
//! invalidation still stores its value, but the entry stays `Stale`, so a
//! slow response can never hide a newer notice. A fetch whose entry was
//! evicted meanwhile stores nothing.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::fetch::Fetcher;
use crate::types::{EntityPath, SyncError, SyncResult};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    Fresh,
    Stale,
}

/// Copy of one cached result
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: EntityPath,
    pub value: Value,
    pub staleness: Staleness,
}

#[derive(Debug)]
struct Slot {
    /// None while the first fetch for the key is in flight
    value: Option<Value>,
    staleness: Staleness,
    generation: u64,
}

enum Lookup {
    Hit(Value),
    Miss { generation: u64 },
}

pub struct ClientCache {
    entries: RwLock<BTreeMap<EntityPath, Slot>>,
    fetcher: Arc<dyn Fetcher>,
    events: broadcast::Sender<EntityPath>,
    generations: AtomicU64,
}

impl ClientCache {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entries: RwLock::new(BTreeMap::new()),
            fetcher,
            events,
            generations: AtomicU64::new(0),
        }
    }

    /// Store the result of a completed fetch as fresh
    pub fn write(&self, key: EntityPath, value: Value) {
        let mut entries = self.entries.write();
        match entries.get_mut(&key) {
            Some(slot) => {
                slot.value = Some(value);
                slot.staleness = Staleness::Fresh;
            }
            None => {
                entries.insert(
                    key,
                    Slot {
                        value: Some(value),
                        staleness: Staleness::Fresh,
                        generation: self.next_generation(),
                    },
                );
            }
        }
    }

    /// Mark every related entry stale and return the keys that matched
    pub fn invalidate(&self, path: &EntityPath) -> Vec<EntityPath> {
        let matched: Vec<EntityPath> = {
            let mut entries = self.entries.write();
            entries
                .iter_mut()
                .filter(|(key, _)| key.is_related(path))
                .map(|(key, slot)| {
                    slot.staleness = Staleness::Stale;
                    slot.generation = self.next_generation();
                    key.clone()
                })
                .collect()
        };

        debug!(%path, matched = matched.len(), "cache invalidated");
        for key in &matched {
            // No receivers is fine
            let _ = self.events.send(key.clone());
        }
        matched
    }

    /// Return a fresh value for `key`, fetching it first if needed
    pub async fn read(&self, key: &EntityPath) -> SyncResult<Value> {
        match self.lookup(key) {
            Lookup::Hit(value) => Ok(value),
            Lookup::Miss { generation } => self.fetch_into(key, generation).await,
        }
    }

    /// Refetch `keys` concurrently. Returns how many now hold a fresh value.
    pub async fn refresh(&self, keys: Vec<EntityPath>) -> usize {
        let fetches = keys.into_iter().filter_map(|key| {
            let generation = self.entries.read().get(&key)?.generation;
            Some(async move { self.fetch_into(&key, generation).await })
        });

        join_all(fetches)
            .await
            .into_iter()
            .filter(|result| result.is_ok())
            .count()
    }

    /// Refetch every stale entry
    pub async fn refresh_stale(&self) -> usize {
        self.refresh(self.stale_keys()).await
    }

    pub fn peek(&self, key: &EntityPath) -> Option<CacheEntry> {
        let entries = self.entries.read();
        let slot = entries.get(key)?;
        Some(CacheEntry {
            key: key.clone(),
            value: slot.value.clone()?,
            staleness: slot.staleness,
        })
    }

    pub fn staleness(&self, key: &EntityPath) -> Option<Staleness> {
        self.entries.read().get(key).map(|slot| slot.staleness)
    }

    pub fn stale_keys(&self) -> Vec<EntityPath> {
        self.entries
            .read()
            .iter()
            .filter(|(_, slot)| slot.staleness == Staleness::Stale)
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn keys(&self) -> Vec<EntityPath> {
        self.entries.read().keys().cloned().collect()
    }

    /// Evict one entry
    pub fn remove(&self, key: &EntityPath) -> Option<Value> {
        self.entries.write().remove(key).and_then(|slot| slot.value)
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Stream of keys as they become stale
    pub fn subscribe(&self) -> broadcast::Receiver<EntityPath> {
        self.events.subscribe()
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn lookup(&self, key: &EntityPath) -> Lookup {
        let mut entries = self.entries.write();
        let slot = entries.entry(key.clone()).or_insert_with(|| Slot {
            value: None,
            staleness: Staleness::Stale,
            generation: self.next_generation(),
        });

        match (&slot.value, slot.staleness) {
            (Some(value), Staleness::Fresh) => Lookup::Hit(value.clone()),
            _ => Lookup::Miss {
                generation: slot.generation,
            },
        }
    }

    async fn fetch_into(&self, key: &EntityPath, generation: u64) -> SyncResult<Value> {
        match self.fetcher.fetch(key).await {
            Ok(value) => {
                self.complete(key, generation, value.clone());
                Ok(value)
            }
            Err(e) => {
                self.abandon(key);
                match &e {
                    SyncError::NotFound { .. } => debug!(%key, "refetch target not found"),
                    _ => warn!(%key, error = %e, "refetch failed"),
                }
                Err(e)
            }
        }
    }

    fn complete(&self, key: &EntityPath, generation: u64, value: Value) {
        let mut entries = self.entries.write();
        let Some(slot) = entries.get_mut(key) else {
            debug!(%key, "entry evicted while fetching, result discarded");
            return;
        };

        slot.value = Some(value);
        if slot.generation == generation {
            slot.staleness = Staleness::Fresh;
        } else {
            debug!(%key, "fetch overtaken by a newer invalidation, entry stays stale");
        }
    }

    /// Drop a placeholder whose first fetch failed
    fn abandon(&self, key: &EntityPath) {
        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(|slot| slot.value.is_none()) {
            entries.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// Serves values from a map and counts calls
    #[derive(Default)]
    struct MapFetcher {
        values: Mutex<HashMap<EntityPath, Value>>,
        calls: AtomicUsize,
        gate: Option<Arc<Notify>>,
    }

    impl MapFetcher {
        fn set(&self, key: EntityPath, value: Value) {
            self.values.lock().insert(key, value);
        }
    }

    impl Fetcher for MapFetcher {
        fn fetch<'a>(&'a self, key: &'a EntityPath) -> BoxFuture<'a, SyncResult<Value>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                // Snapshot before waiting so a gated fetch returns old data
                let value = self.values.lock().get(key).cloned();
                if let Some(gate) = &self.gate {
                    gate.notified().await;
                }
                value.ok_or_else(|| SyncError::not_found(key.to_string()))
            })
        }
    }

    fn details(id: &str) -> EntityPath {
        EntityPath::details("sensors", id)
    }

    #[test]
    fn test_targeted_invalidation() {
        let cache = ClientCache::new(Arc::new(MapFetcher::default()));
        cache.write(details("e"), json!({"id": "e"}));
        for i in 0..20 {
            let id = format!("other-{i}");
            cache.write(details(&id), json!({ "id": id }));
        }
        cache.write(EntityPath::list("sensors"), json!({"result": []}));

        let matched = cache.invalidate(&details("e"));

        assert_eq!(matched, vec![details("e")]);
        assert_eq!(cache.stale_keys(), vec![details("e")]);
        for i in 0..20 {
            assert_eq!(
                cache.staleness(&details(&format!("other-{i}"))),
                Some(Staleness::Fresh)
            );
        }
        assert_eq!(
            cache.staleness(&EntityPath::list("sensors")),
            Some(Staleness::Fresh)
        );
    }

    #[test]
    fn test_entity_notice_reaches_ancestor_keys() {
        let cache = ClientCache::new(Arc::new(MapFetcher::default()));
        cache.write(EntityPath::collection("sensors"), json!([]));
        cache.write(details("e"), json!({}));
        cache.write(details("f"), json!({}));

        let mut matched = cache.invalidate(&details("e"));
        matched.sort();
        assert_eq!(matched, vec![EntityPath::collection("sensors"), details("e")]);
        assert_eq!(cache.staleness(&details("f")), Some(Staleness::Fresh));
    }

    #[test]
    fn test_collection_notice_invalidates_everything_under_it() {
        let cache = ClientCache::new(Arc::new(MapFetcher::default()));
        cache.write(EntityPath::list("sensors"), json!({}));
        cache.write(details("a"), json!({}));
        cache.write(details("b"), json!({}));
        cache.write(EntityPath::details("gateways", "g"), json!({}));

        let matched = cache.invalidate(&EntityPath::collection("sensors"));
        assert_eq!(matched.len(), 3);
        assert_eq!(
            cache.staleness(&EntityPath::details("gateways", "g")),
            Some(Staleness::Fresh)
        );
    }

    #[test]
    fn test_new_entity_invalidates_cached_list() {
        let store = crate::store::EntityStore::new("sensors");
        store.insert(crate::types::Entity::new("a"));
        let cache = ClientCache::new(Arc::new(MapFetcher::default()));
        cache.write(EntityPath::list("sensors"), json!({"result": [{"id": "a"}]}));
        cache.write(details("a"), json!({"id": "a"}));

        let mut changes = store.subscribe();
        store.insert(crate::types::Entity::new("b"));
        while let Ok(change) = changes.try_recv() {
            cache.invalidate(&change.path);
        }

        assert_eq!(cache.stale_keys(), vec![EntityPath::list("sensors")]);
        assert_eq!(cache.staleness(&details("a")), Some(Staleness::Fresh));
    }

    #[tokio::test]
    async fn test_read_fetches_once_then_serves_fresh() {
        let fetcher = Arc::new(MapFetcher::default());
        fetcher.set(details("a"), json!({"name": "A"}));
        let cache = ClientCache::new(fetcher.clone());

        assert_eq!(cache.read(&details("a")).await.unwrap()["name"], "A");
        assert_eq!(cache.read(&details("a")).await.unwrap()["name"], "A");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.staleness(&details("a")), Some(Staleness::Fresh));
    }

    #[tokio::test]
    async fn test_stale_read_refetches() {
        let fetcher = Arc::new(MapFetcher::default());
        fetcher.set(details("a"), json!({"name": "old"}));
        let cache = ClientCache::new(fetcher.clone());
        cache.read(&details("a")).await.unwrap();

        fetcher.set(details("a"), json!({"name": "new"}));
        cache.invalidate(&details("a"));

        assert_eq!(cache.read(&details("a")).await.unwrap()["name"], "new");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_first_fetch_leaves_no_entry() {
        let cache = ClientCache::new(Arc::new(MapFetcher::default()));
        let result = cache.read(&details("missing")).await;
        assert!(matches!(result, Err(SyncError::NotFound { .. })));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_stale_restores_freshness() {
        let fetcher = Arc::new(MapFetcher::default());
        let cache = ClientCache::new(fetcher.clone());
        for id in ["a", "b", "c"] {
            fetcher.set(details(id), json!({ "id": id, "v": 1 }));
            cache.read(&details(id)).await.unwrap();
        }
        for id in ["a", "b"] {
            fetcher.set(details(id), json!({ "id": id, "v": 2 }));
        }

        cache.invalidate(&EntityPath::collection("sensors"));
        assert_eq!(cache.refresh_stale().await, 3);

        assert!(cache.stale_keys().is_empty());
        assert_eq!(cache.peek(&details("a")).unwrap().value["v"], 2);
        assert_eq!(cache.peek(&details("c")).unwrap().value["v"], 1);
    }

    #[tokio::test]
    async fn test_invalidation_during_fetch_keeps_entry_stale() {
        let gate = Arc::new(Notify::new());
        let fetcher = Arc::new(MapFetcher {
            gate: Some(Arc::clone(&gate)),
            ..Default::default()
        });
        fetcher.set(details("a"), json!({"v": 1}));
        let cache = Arc::new(ClientCache::new(fetcher.clone()));

        let reader = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.read(&details("a")).await })
        };

        // Let the fetch start and snapshot v=1, then invalidate underneath it
        while fetcher.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        fetcher.set(details("a"), json!({"v": 2}));
        cache.invalidate(&details("a"));
        gate.notify_one();

        assert_eq!(reader.await.unwrap().unwrap()["v"], 1);
        assert_eq!(cache.staleness(&details("a")), Some(Staleness::Stale));

        // The next read goes back to the source
        gate.notify_one();
        assert_eq!(cache.read(&details("a")).await.unwrap()["v"], 2);
    }

    #[tokio::test]
    async fn test_fetch_after_eviction_stores_nothing() {
        let gate = Arc::new(Notify::new());
        let fetcher = Arc::new(MapFetcher {
            gate: Some(Arc::clone(&gate)),
            ..Default::default()
        });
        fetcher.set(details("a"), json!({"v": 1}));
        let cache = Arc::new(ClientCache::new(fetcher.clone()));

        let reader = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.read(&details("a")).await })
        };
        while fetcher.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        cache.clear();
        gate.notify_one();

        assert_eq!(reader.await.unwrap().unwrap()["v"], 1);
        assert!(cache.peek(&details("a")).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_stale_fetch_cannot_freshen_recreated_entry() {
        let gate = Arc::new(Notify::new());
        let fetcher = Arc::new(MapFetcher {
            gate: Some(Arc::clone(&gate)),
            ..Default::default()
        });
        fetcher.set(details("a"), json!({"v": 1}));
        let cache = Arc::new(ClientCache::new(fetcher.clone()));

        let first = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.read(&details("a")).await })
        };
        while fetcher.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        // Evict and start over; the new placeholder gets its own generation
        cache.remove(&details("a"));
        assert!(matches!(cache.lookup(&details("a")), Lookup::Miss { .. }));
        gate.notify_one();
        first.await.unwrap().unwrap();

        assert_eq!(cache.staleness(&details("a")), Some(Staleness::Stale));
    }

    #[tokio::test]
    async fn test_subscribe_reports_invalidated_keys() {
        let cache = ClientCache::new(Arc::new(MapFetcher::default()));
        cache.write(details("a"), json!({}));
        let mut events = cache.subscribe();

        cache.invalidate(&details("a"));
        assert_eq!(events.recv().await.unwrap(), details("a"));
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = ClientCache::new(Arc::new(MapFetcher::default()));
        cache.write(details("a"), json!(1));
        cache.write(details("b"), json!(2));

        assert_eq!(cache.remove(&details("a")), Some(json!(1)));
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
