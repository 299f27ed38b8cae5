// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::{fmt, sync::Arc};

use stampede_flight::Coalescer;
use stampede_store::CacheStore;

use super::{AccessError, AccessStrategy, CacheStatus, Deps, Served, StrategyKind};
use crate::{Backend, BackendError, CacheKey, Product, RequestGuard};

/// Reads through the cache and collapses concurrent misses for a key into one fetch.
///
/// A caller that misses joins the wave for its key. The wave's leader looks at the
/// cache once more, since a previous wave may have filled it in the meantime, and
/// fetches from the backend only if it is still empty. Everyone else in the wave
/// receives the leader's result, or the leader's error.
///
/// The wave's work runs on its own Tokio task. A leader whose caller goes away, such as
/// an HTTP client that disconnects, leaves the fetch running and the rest of the wave
/// still receives the product.
///
/// # Examples
///
/// ```
/// use std::{sync::Arc, time::Duration};
///
/// use stampede::{AccessStrategy, CacheKey, CacheStatus, Coalescing, Deps, NoopMetrics, SimulatedBackend};
/// use stampede_store::InMemoryStore;
/// # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
///
/// let backend = Arc::new(SimulatedBackend::new(Duration::from_millis(5)));
/// let deps = Deps::new(
///     Arc::new(InMemoryStore::new()),
///     Arc::clone(&backend),
///     Arc::new(NoopMetrics),
///     Duration::from_secs(5),
/// );
/// let strategy = Coalescing::new(deps);
/// let key = CacheKey::new("product:popular")?;
///
/// let (a, b) = tokio::join!(strategy.read(&key), strategy.read(&key));
/// let statuses = [a?.status(), b?.status()];
///
/// assert!(statuses.contains(&CacheStatus::Miss));
/// assert!(statuses.contains(&CacheStatus::Shared));
/// assert_eq!(backend.calls(), 1);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # }).unwrap();
/// ```
pub struct Coalescing<S, B> {
    deps: Deps<S, B>,
    waves: Coalescer<CacheKey, Result<Product, BackendError>>,
}

impl<S, B> fmt::Debug for Coalescing<S, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coalescing")
            .field("ttl", &self.deps.ttl)
            .field("waves", &self.waves)
            .finish_non_exhaustive()
    }
}

impl<S, B> Coalescing<S, B>
where
    S: CacheStore,
    B: Backend,
{
    /// Creates the strategy over `deps` with an empty wave registry.
    #[must_use]
    pub fn new(deps: Deps<S, B>) -> Self {
        Self {
            deps,
            waves: Coalescer::new(),
        }
    }

    /// Returns the collaborators this strategy reads through.
    #[must_use]
    pub fn deps(&self) -> &Deps<S, B> {
        &self.deps
    }

    /// Returns the number of keys with a wave currently in flight.
    #[must_use]
    pub fn waves_in_flight(&self) -> usize {
        self.waves.in_flight()
    }
}

async fn load<S, B>(deps: Deps<S, B>, key: CacheKey) -> Result<Product, BackendError>
where
    S: CacheStore,
    B: Backend,
{
    if let Some(product) = deps.cached(&key).await {
        tracing::debug!(cache.key = %key, "cache filled by an earlier wave");
        return Ok(product);
    }

    deps.fetch_and_store(StrategyKind::Coalescing, &key).await
}

impl<S, B> AccessStrategy for Coalescing<S, B>
where
    S: CacheStore + 'static,
    B: Backend + 'static,
{
    fn kind(&self) -> StrategyKind {
        StrategyKind::Coalescing
    }

    async fn read(&self, key: &CacheKey) -> Result<Served, AccessError> {
        let kind = self.kind();
        let _request = RequestGuard::start(Arc::clone(self.deps.metrics()), kind);

        if let Some(product) = self.deps.cached(key).await {
            self.deps.metrics().cache_hit(kind);
            tracing::debug!(strategy = %kind, cache.key = %key, "cache hit");
            return Ok(Served::new(product, CacheStatus::Hit));
        }

        self.deps.metrics().cache_miss(kind);
        let deps = self.deps.clone();
        let flight = self
            .waves
            .coalesce_detached(key.clone(), || load(deps, key.clone()))
            .await?;
        let shared = flight.is_shared();
        let product = flight.into_value()?;

        let status = if shared {
            self.deps.metrics().shared_response(kind);
            CacheStatus::Shared
        } else {
            CacheStatus::Miss
        };
        tracing::debug!(
            strategy = %kind,
            cache.key = %key,
            cache.status = %status,
            sequence = product.request_sequence,
            "served after miss"
        );

        Ok(Served::new(product, status))
    }
}
