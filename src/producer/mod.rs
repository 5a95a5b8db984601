//! Change Producer - periodic per-entity updates
//!
//! Runs one independent task per entity. Task `i` ticks every
//! `base_interval + i * interval_step`, which keeps the broadcast bursts of
//! different entities apart. Each tick moves the sensor to a random point
//! around the configured center and writes it through
//! [`EntityStore::update`]; the store then announces the change.
//!
//! There is no retry. A failed tick is logged and the next one corrects it.
//! Every task can be stopped on its own, and [`ChangeProducer::tick`] runs a
//! single tick synchronously so tests never depend on wall-clock timing.

pub mod geo;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::store::EntityStore;
use crate::types::{Entity, SyncError, SyncResult};
use crate::utils::current_timestamp_ms;

pub use geo::{random_coordinate, GeoPoint};

/// Timing and placement for producer ticks
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Interval of the first entity's task
    pub base_interval: Duration,
    /// Added per entity index to desynchronize ticks
    pub interval_step: Duration,
    /// Center the sensors wander around
    pub center: GeoPoint,
    /// Maximum distance from the center
    pub radius_km: f64,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(1000),
            interval_step: Duration::from_millis(250),
            center: GeoPoint::new(52.52, 13.405),
            radius_km: 5.0,
        }
    }
}

/// Owns the periodic update tasks
pub struct ChangeProducer {
    store: Arc<EntityStore>,
    config: ProducerConfig,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl ChangeProducer {
    pub fn new(store: Arc<EntityStore>, config: ProducerConfig) -> Self {
        Self {
            store,
            config,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    /// Tick interval for the entity at `index`
    pub fn interval_for(&self, index: usize) -> Duration {
        let factor = u32::try_from(index).unwrap_or(u32::MAX);
        self.config
            .base_interval
            .saturating_add(self.config.interval_step.saturating_mul(factor))
    }

    /// Start a task for every entity currently in the store.
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> usize {
        let started = self
            .store
            .ids()
            .iter()
            .enumerate()
            .filter(|(index, id)| self.start_entity(id, *index))
            .count();
        info!(started, "producer tasks started");
        started
    }

    /// Start the task for one entity. Returns false if it is already running.
    pub fn start_entity(&self, id: &str, index: usize) -> bool {
        let mut tasks = self.tasks.lock();
        if tasks.get(id).is_some_and(|handle| !handle.is_finished()) {
            return false;
        }

        let period = self.interval_for(index);
        let store = Arc::clone(&self.store);
        let center = self.config.center;
        let radius_km = self.config.radius_km;
        let entity_id = id.to_string();

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                let result = {
                    let mut rng = rand::thread_rng();
                    tick_entity(&store, &entity_id, center, radius_km, &mut rng)
                };

                match result {
                    Ok(entity) => debug!(id = %entity.id, "producer tick"),
                    Err(SyncError::NotFound { id }) => {
                        warn!(%id, "entity no longer in store, stopping its producer");
                        break;
                    }
                    Err(e) => warn!(id = %entity_id, error = %e, "producer tick failed"),
                }
            }
        });

        debug!(%id, ?period, "producer task spawned");
        tasks.insert(id.to_string(), handle);
        true
    }

    /// Run one tick for `id` right now
    pub fn tick(&self, id: &str) -> SyncResult<Entity> {
        let mut rng = rand::thread_rng();
        tick_entity(
            &self.store,
            id,
            self.config.center,
            self.config.radius_km,
            &mut rng,
        )
    }

    /// Stop the task for one entity. Returns true if a task was running.
    pub fn stop(&self, id: &str) -> bool {
        match self.tasks.lock().remove(id) {
            Some(handle) => {
                let was_running = !handle.is_finished();
                handle.abort();
                was_running
            }
            None => false,
        }
    }

    /// Stop every task
    pub fn shutdown(&self) {
        let tasks: Vec<(String, JoinHandle<()>)> = self.tasks.lock().drain().collect();
        if !tasks.is_empty() {
            info!(count = tasks.len(), "stopping producer tasks");
        }
        for (_, handle) in tasks {
            handle.abort();
        }
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.tasks
            .lock()
            .get(id)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Number of live tasks
    pub fn running(&self) -> usize {
        self.tasks
            .lock()
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }
}

impl Drop for ChangeProducer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Move entity `id` to a new random position and stamp it
pub fn tick_entity<R: Rng + ?Sized>(
    store: &EntityStore,
    id: &str,
    center: GeoPoint,
    radius_km: f64,
    rng: &mut R,
) -> SyncResult<Entity> {
    let point = random_coordinate(center, radius_km, rng);
    store.update(id, |attrs| {
        attrs.insert("latitude".into(), json!(point.latitude));
        attrs.insert("longitude".into(), json!(point.longitude));
        attrs.insert("updatedAt".into(), json!(current_timestamp_ms()));
    })
}

/// Populate `store` with `sensor-1..=sensor-count`
pub fn seed_sensors<R: Rng + ?Sized>(
    store: &EntityStore,
    count: usize,
    center: GeoPoint,
    radius_km: f64,
    rng: &mut R,
) -> Vec<Entity> {
    (1..=count)
        .map(|n| {
            let point = random_coordinate(center, radius_km, rng);
            store.insert(
                Entity::new(format!("sensor-{n}"))
                    .with_attribute("name", format!("Sensor {n}"))
                    .with_attribute("latitude", point.latitude)
                    .with_attribute("longitude", point.longitude)
                    .with_attribute("updatedAt", current_timestamp_ms()),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityPath;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn seeded_store(count: usize) -> Arc<EntityStore> {
        let store = Arc::new(EntityStore::new("sensors"));
        let mut rng = StdRng::seed_from_u64(42);
        seed_sensors(&store, count, GeoPoint::new(52.52, 13.405), 5.0, &mut rng);
        store
    }

    fn fast_config() -> ProducerConfig {
        ProducerConfig {
            base_interval: Duration::from_millis(10),
            interval_step: Duration::from_millis(5),
            ..Default::default()
        }
    }

    #[test]
    fn test_seed_sensors() {
        let store = seeded_store(5);
        assert_eq!(store.len(), 5);
        let sensor = store.get("sensor-3").unwrap();
        assert_eq!(sensor.name(), Some("Sensor 3"));
        assert!(sensor.get("latitude").is_some());
        assert!(sensor.get("longitude").is_some());
    }

    #[test]
    fn test_interval_spreads_by_index() {
        let producer = ChangeProducer::new(seeded_store(1), ProducerConfig::default());
        assert_eq!(producer.interval_for(0), Duration::from_millis(1000));
        assert_eq!(producer.interval_for(4), Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn test_tick_updates_and_publishes() {
        let store = seeded_store(3);
        let mut rx = store.subscribe();
        let producer = ChangeProducer::new(Arc::clone(&store), ProducerConfig::default());

        let updated = producer.tick("sensor-2").unwrap();
        let lat = updated.get("latitude").and_then(|v| v.as_f64()).unwrap();
        let lon = updated.get("longitude").and_then(|v| v.as_f64()).unwrap();
        let center = producer.config().center;
        assert!(center.distance_km(&GeoPoint::new(lat, lon)) <= 5.0 + 1e-6);

        let change = rx.recv().await.unwrap();
        assert_eq!(change.path, EntityPath::details("sensors", "sensor-2"));
    }

    #[test]
    fn test_tick_unknown_entity() {
        let producer = ChangeProducer::new(seeded_store(1), ProducerConfig::default());
        assert!(matches!(
            producer.tick("sensor-99"),
            Err(SyncError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_started_tasks_emit_changes() {
        let store = seeded_store(3);
        let mut rx = store.subscribe();
        let producer = ChangeProducer::new(Arc::clone(&store), fast_config());

        assert_eq!(producer.start(), 3);
        assert_eq!(producer.running(), 3);

        let change = time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("a tick within two seconds")
            .unwrap();
        assert_eq!(change.path.root(), "sensors");

        producer.shutdown();
        assert_eq!(producer.running(), 0);
    }

    #[tokio::test]
    async fn test_stop_single_task() {
        let store = seeded_store(3);
        let producer = ChangeProducer::new(Arc::clone(&store), fast_config());
        producer.start();

        assert!(producer.stop("sensor-1"));
        assert!(!producer.is_running("sensor-1"));
        assert!(producer.is_running("sensor-2"));
        assert!(!producer.stop("sensor-1"));

        // Restart is allowed after a stop, but not a double start
        assert!(producer.start_entity("sensor-1", 0));
        assert!(!producer.start_entity("sensor-1", 0));
    }
}
