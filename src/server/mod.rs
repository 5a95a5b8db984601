//! Sensor sync server
//!
//! Wires the owned pieces together: one [`EntityStore`], one
//! [`InvalidationBus`] attached to it, the [`ChangeProducer`] tasks, and the
//! Axum router. Nothing here is global; every component gets its handles
//! explicitly.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;

use crate::api::http::create_router;
use crate::api::websocket::{AppState, InvalidationBus};
use crate::config::Config;
use crate::producer::{seed_sensors, ChangeProducer};
use crate::store::EntityStore;
use crate::types::{SyncError, SyncResult, SENSORS};

/// Running server components
pub struct SyncServer {
    config: Config,
    state: Arc<AppState>,
    producer: ChangeProducer,
    forwarder: JoinHandle<()>,
}

impl SyncServer {
    /// Seed the store and attach the bus. Must run inside a Tokio runtime.
    pub fn new(config: Config) -> Self {
        let store = Arc::new(EntityStore::new(SENSORS));
        {
            let mut rng = rand::thread_rng();
            seed_sensors(
                &store,
                config.sensor_count,
                config.center,
                config.radius_km,
                &mut rng,
            );
        }

        let bus = Arc::new(InvalidationBus::new(config.session_queue_capacity));
        let forwarder = bus.attach(&store);
        let producer = ChangeProducer::new(Arc::clone(&store), config.producer_config());
        let state = Arc::new(AppState::new(store, bus));

        info!(sensors = config.sensor_count, "server state initialized");
        Self {
            config,
            state,
            producer,
            forwarder,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.state.store
    }

    pub fn bus(&self) -> &Arc<InvalidationBus> {
        &self.state.bus
    }

    pub fn producer(&self) -> &ChangeProducer {
        &self.producer
    }

    pub fn router(&self) -> Router {
        create_router(Arc::clone(&self.state))
    }

    /// Bind the configured address
    pub async fn bind(&self) -> SyncResult<TcpListener> {
        TcpListener::bind(self.config.addr)
            .await
            .map_err(SyncError::transport)
    }

    /// Start the producers and serve until `shutdown` resolves
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> SyncResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: Option<SocketAddr> = listener.local_addr().ok();
        self.producer.start();
        info!(?addr, "server listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(SyncError::transport)?;

        self.producer.shutdown();
        self.forwarder.abort();
        info!("server stopped");
        Ok(())
    }
}
