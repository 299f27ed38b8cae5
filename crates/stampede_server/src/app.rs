// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Routes and handlers.

use std::{sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use stampede::{
    AccessError, AccessStrategy, CacheKey, CacheStatus, Coalescing, Deps, Naive, PrometheusMetrics, Served,
    SimulatedBackend,
};
use stampede_store::CacheStore;

/// Reports where the body came from: `HIT`, `MISS` or `SHARED`.
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// On the coalescing path, `true` when the body came from another request's fetch.
pub const X_COALESCED_SHARED: HeaderName = HeaderName::from_static("x-coalesced-shared");

/// Everything the handlers share.
#[derive(Debug)]
pub struct AppState<S> {
    key: CacheKey,
    naive: Naive<S, SimulatedBackend>,
    coalescing: Coalescing<S, SimulatedBackend>,
    metrics: Arc<PrometheusMetrics>,
}

impl<S: CacheStore> AppState<S> {
    /// Builds both read paths over one store, one backend and one metrics registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be registered.
    pub fn new(store: S, key: CacheKey, ttl: Duration, backend_latency: Duration) -> prometheus::Result<Self> {
        let metrics = Arc::new(PrometheusMetrics::new()?);
        let deps = Deps::new(
            Arc::new(store),
            Arc::new(SimulatedBackend::new(backend_latency)),
            Arc::<PrometheusMetrics>::clone(&metrics),
            ttl,
        );

        Ok(Self {
            key,
            naive: Naive::new(deps.clone()),
            coalescing: Coalescing::new(deps),
            metrics,
        })
    }

    /// Returns the hot key.
    #[must_use]
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Returns the backend both read paths fetch from.
    #[must_use]
    pub fn backend(&self) -> &SimulatedBackend {
        self.naive.deps().backend()
    }

    /// Returns the store both read paths read through.
    #[must_use]
    pub fn store(&self) -> &S {
        self.naive.deps().store()
    }

    /// Returns the metrics both read paths report to.
    #[must_use]
    pub fn metrics(&self) -> &PrometheusMetrics {
        &self.metrics
    }
}

/// Builds the router.
///
/// | Route | Handler |
/// |---|---|
/// | `GET /api/naive`, `GET /api/without-coalescing`, `GET /api/without-singleflight` | naive read of the hot key |
/// | `GET /api/coalescing`, `GET /api/with-coalescing`, `GET /api/with-singleflight` | coalescing read of the hot key |
/// | `GET`/`POST /api/clear-cache` | deletes the hot key from the cache |
/// | `GET /health` | liveness |
/// | `GET /metrics` | Prometheus exposition |
pub fn router<S>(state: Arc<AppState<S>>) -> Router
where
    S: CacheStore + 'static,
{
    Router::new()
        .route("/api/naive", get(naive::<S>))
        .route("/api/without-coalescing", get(naive::<S>))
        .route("/api/without-singleflight", get(naive::<S>))
        .route("/api/coalescing", get(coalescing::<S>))
        .route("/api/with-coalescing", get(coalescing::<S>))
        .route("/api/with-singleflight", get(coalescing::<S>))
        .route("/api/clear-cache", get(clear_cache::<S>).post(clear_cache::<S>))
        .route("/health", get(health))
        .route("/metrics", get(metrics::<S>))
        .with_state(state)
}

async fn naive<S: CacheStore>(State(state): State<Arc<AppState<S>>>) -> Response {
    match state.naive.read(&state.key).await {
        Ok(served) => served_response(served, false),
        Err(e) => access_failed(&e),
    }
}

async fn coalescing<S: CacheStore + 'static>(State(state): State<Arc<AppState<S>>>) -> Response {
    match state.coalescing.read(&state.key).await {
        Ok(served) => served_response(served, true),
        Err(e) => access_failed(&e),
    }
}

async fn clear_cache<S: CacheStore>(State(state): State<Arc<AppState<S>>>) -> Response {
    match state.store().delete(state.key.as_str()).await {
        Ok(()) => {
            tracing::info!(cache.key = %state.key, "cache cleared");
            (StatusCode::OK, "cache cleared").into_response()
        }
        Err(e) => {
            tracing::error!(cache.key = %state.key, error = %e, "failed to clear cache");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("failed to clear cache: {e}")).into_response()
        }
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn metrics<S: CacheStore>(State(state): State<Arc<AppState<S>>>) -> Response {
    match state.metrics.render() {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

fn served_response(served: Served, report_sharing: bool) -> Response {
    let status = served.status();
    let mut response = Json(served.into_product()).into_response();

    let headers = response.headers_mut();
    headers.insert(X_CACHE, HeaderValue::from_static(status.as_header_value()));
    if report_sharing {
        let shared = if status == CacheStatus::Shared { "true" } else { "false" };
        headers.insert(X_COALESCED_SHARED, HeaderValue::from_static(shared));
    }

    response
}

fn access_failed(error: &AccessError) -> Response {
    tracing::error!(error = %error, "read failed");
    (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()).into_response()
}
