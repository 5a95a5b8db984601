//! Entity Store - owned, thread-safe entity state
//!
//! The store is the only place entities live. Readers get clones; the only
//! write path for an existing entity is [`EntityStore::update`]. Every
//! successful write publishes an [`EntityChange`] on a broadcast channel so
//! the invalidation bus can announce it without each mutation site having to
//! remember to.
//!
//! Each entity sits behind its own mutex, so read-modify-write on one entity
//! is serialized while different entities never contend on a write lock.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::debug;

use crate::types::{Entity, EntityPath, SyncError, SyncResult};

/// Default buffer for change events before a slow subscriber lags
const CHANGE_CAPACITY: usize = 1024;

/// Published after every successful insert or update
#[derive(Debug, Clone)]
pub struct EntityChange {
    /// Path naming what changed: `[collection, "details", id]`, or
    /// `[collection, "list"]` when an insert adds a new id
    pub path: EntityPath,
    /// Snapshot taken while the entity lock was held
    pub entity: Entity,
}

/// In-memory store for one collection of entities
pub struct EntityStore {
    collection: String,
    entities: RwLock<BTreeMap<String, Arc<Mutex<Entity>>>>,
    changes: broadcast::Sender<EntityChange>,
}

impl EntityStore {
    /// Create an empty store for `collection`
    pub fn new(collection: impl Into<String>) -> Self {
        Self::with_capacity(collection, CHANGE_CAPACITY)
    }

    /// Create an empty store with a custom change-event buffer
    pub fn with_capacity(collection: impl Into<String>, capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self {
            collection: collection.into(),
            entities: RwLock::new(BTreeMap::new()),
            changes,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Path announced when entity `id` changes
    pub fn path_for(&self, id: &str) -> EntityPath {
        EntityPath::details(self.collection.as_str(), id)
    }

    /// Add an entity, or replace the attributes of an existing one.
    ///
    /// A new entity also changes the collection's list, so its path is
    /// published after the entity's own.
    pub fn insert(&self, entity: Entity) -> Entity {
        let (slot, created) = {
            let mut entities = self.entities.write();
            match entities.get(&entity.id) {
                Some(slot) => (Arc::clone(slot), false),
                None => {
                    let slot = Arc::new(Mutex::new(Entity::new(entity.id.clone())));
                    entities.insert(entity.id.clone(), Arc::clone(&slot));
                    (slot, true)
                }
            }
        };

        let mut guard = slot.lock();
        guard.attributes = entity.attributes;
        guard.attributes.remove("id");
        let snapshot = guard.clone();
        self.publish(&snapshot);
        if created {
            self.publish_at(EntityPath::list(self.collection.as_str()), &snapshot);
        }
        snapshot
    }

    /// Get a copy of one entity
    pub fn get(&self, id: &str) -> SyncResult<Entity> {
        let slot = self.slot(id)?;
        let entity = slot.lock().clone();
        Ok(entity)
    }

    /// Copies of all entities, ordered by id
    pub fn list(&self) -> Vec<Entity> {
        let slots: Vec<Arc<Mutex<Entity>>> = self.entities.read().values().cloned().collect();
        slots.iter().map(|slot| slot.lock().clone()).collect()
    }

    /// All entity ids, ordered
    pub fn ids(&self) -> Vec<String> {
        self.entities.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entities.read().contains_key(id)
    }

    /// Apply `mutator` to the entity's attributes in place and return the
    /// new snapshot. The change event is published before the entity lock is
    /// released, so events for one entity leave in write order.
    pub fn update<F>(&self, id: &str, mutator: F) -> SyncResult<Entity>
    where
        F: FnOnce(&mut Map<String, Value>),
    {
        let slot = self.slot(id)?;
        let mut guard = slot.lock();
        mutator(&mut guard.attributes);
        guard.attributes.remove("id");
        let snapshot = guard.clone();
        self.publish(&snapshot);
        Ok(snapshot)
    }

    /// Subscribe to change events
    pub fn subscribe(&self) -> broadcast::Receiver<EntityChange> {
        self.changes.subscribe()
    }

    fn slot(&self, id: &str) -> SyncResult<Arc<Mutex<Entity>>> {
        self.entities
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::not_found(id))
    }

    fn publish(&self, entity: &Entity) {
        self.publish_at(self.path_for(&entity.id), entity);
    }

    fn publish_at(&self, path: EntityPath, entity: &Entity) {
        let change = EntityChange {
            path,
            entity: entity.clone(),
        };
        debug!(path = %change.path, "entity changed");
        // No receivers just means no bus is attached yet
        let _ = self.changes.send(change);
    }
}
