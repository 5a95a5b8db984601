//! Sensor Sync Server - Binary Entry Point

use sensor_sync::{Config, SyncResult, SyncServer};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> SyncResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sensor_sync=info")),
        )
        .init();

    let config = Config::from_env();
    let server = SyncServer::new(config);
    let listener = server.bind().await?;

    server
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutdown requested");
        })
        .await
}
