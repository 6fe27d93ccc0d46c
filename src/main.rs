//! graphrep - request-reply graph server
//!
//! Serves a transactional in-memory graph over a framed TCP protocol.

use graphrep_server::config::CONFIG_ENV;
use graphrep_server::metrics::run_metrics_server;
use graphrep_server::{Config, Metrics, Server, ServerConfig, WorkerPool};
use graphrep_store::MemoryGraph;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if GRAPHREP_CONFIG is set, then env overrides)
    let config = match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var(CONFIG_ENV) {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };

    tracing::info!("Starting graphrep server");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Workers: {}", config.workers.thread_count());
    tracing::info!("  Lock timeout: {:?}", config.workers.lock_timeout());

    let metrics = if config.metrics.enabled {
        tracing::info!("  Metrics: enabled on {}", config.metrics.bind_addr);
        Some(Arc::new(Metrics::new()?))
    } else {
        tracing::info!("  Metrics: disabled");
        None
    };

    let store = Arc::new(MemoryGraph::with_lock_timeout(config.workers.lock_timeout()));
    let pool = WorkerPool::start(store, config.workers.thread_count(), metrics.clone())?;

    let mut server_config = ServerConfig::from_config(&config);
    if let Some(ref metrics) = metrics {
        server_config = server_config.with_metrics(metrics.clone());
    }
    let server = Server::new(server_config, pool.queue()?);

    let (metrics_shutdown, _) = broadcast::channel(1);
    let metrics_handle = metrics.map(|metrics| {
        let addr = config.metrics.bind_addr;
        let shutdown = metrics_shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(addr, metrics, shutdown).await {
                tracing::error!("Metrics server failed: {}", e);
            }
        })
    });

    let result = tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping server...");
            server.shutdown();
            Ok(())
        }
    };

    let _ = metrics_shutdown.send(());
    if let Some(handle) = metrics_handle {
        let _ = handle.await;
    }

    // Workers exit once the server's queue handle is gone and the queue drains.
    drop(server);
    tokio::task::spawn_blocking(move || pool.join()).await?;

    tracing::info!("Server stopped");
    result.map_err(Into::into)
}
