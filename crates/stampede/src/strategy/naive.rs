// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use stampede_store::CacheStore;

use super::{AccessError, AccessStrategy, CacheStatus, Deps, Served, StrategyKind};
use crate::{Backend, CacheKey, RequestGuard};

/// Reads through the cache with no coordination between callers.
///
/// Every caller that misses fetches from the backend itself, so `N` concurrent misses
/// cost `N` fetches. This is the stampede the coalescing strategy exists to prevent.
#[derive(Debug)]
pub struct Naive<S, B> {
    deps: Deps<S, B>,
}

impl<S, B> Naive<S, B>
where
    S: CacheStore,
    B: Backend,
{
    /// Creates the strategy over `deps`.
    #[must_use]
    pub fn new(deps: Deps<S, B>) -> Self {
        Self { deps }
    }

    /// Returns the collaborators this strategy reads through.
    #[must_use]
    pub fn deps(&self) -> &Deps<S, B> {
        &self.deps
    }
}

impl<S, B> AccessStrategy for Naive<S, B>
where
    S: CacheStore,
    B: Backend,
{
    fn kind(&self) -> StrategyKind {
        StrategyKind::Naive
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
        let product = self.deps.fetch_and_store(kind, key).await?;
        tracing::debug!(strategy = %kind, cache.key = %key, sequence = product.request_sequence, "served from backend");

        Ok(Served::new(product, CacheStatus::Miss))
    }
}
