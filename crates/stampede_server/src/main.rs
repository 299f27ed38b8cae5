// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Runs the stampede demonstration server.
//!
//! ```bash
//! stampede-server --port 8080 --redis-addr localhost:6379
//! ```
//!
//! Without `--redis-addr` (or `REDIS_ADDR`) the cache lives in process memory.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use stampede_server::{AppState, Config, logging, router};
use stampede_store::{CacheStore, InMemoryStore, RedisStore};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    logging::init(&config.log_filter).context("failed to initialize logging")?;

    match config.redis_addr.as_deref() {
        Some(address) => {
            let store = RedisStore::connect(address)
                .await
                .with_context(|| format!("failed to connect to Redis at {address}"))?;
            tracing::info!(address = store.address(), "connected to Redis");
            serve(&config, store).await
        }
        None => {
            tracing::info!("REDIS_ADDR not set; caching in process memory");
            serve(&config, InMemoryStore::new()).await
        }
    }
}

async fn serve<S>(config: &Config, store: S) -> anyhow::Result<()>
where
    S: CacheStore + 'static,
{
    let state = AppState::new(store, config.cache_key.clone(), config.cache_ttl(), config.backend_latency())
        .context("failed to register metrics")?;
    let app = router(Arc::new(state));

    let addr = config.listen_addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(
        %addr,
        cache.key = %config.cache_key,
        cache.ttl = ?config.cache_ttl(),
        backend.latency = ?config.backend_latency(),
        "listening"
    );
    tracing::info!("  GET  /api/naive          (alias /api/without-coalescing)");
    tracing::info!("  GET  /api/coalescing     (alias /api/with-coalescing)");
    tracing::info!("  POST /api/clear-cache");
    tracing::info!("  GET  /health");
    tracing::info!("  GET  /metrics");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server failed")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
