// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Ways of reading a key through the cache.
//!
//! Both strategies read the cache first and fall back to the backend on a miss. They
//! differ in what happens when many callers miss at once: [`Naive`] lets every caller
//! fetch, [`Coalescing`] lets one caller fetch per wave and hands its result to the
//! rest.

mod coalescing;
mod naive;

use std::{fmt, sync::Arc, time::Duration};

pub use coalescing::Coalescing;
pub use naive::Naive;
use stampede_flight::Abandoned;
use stampede_store::CacheStore;

use crate::{Backend, BackendError, CacheKey, Metrics, Product};

/// Identifies an access strategy in logs and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    /// Every caller that misses fetches on its own.
    Naive,
    /// Concurrent misses for a key share one fetch.
    Coalescing,
}

impl StrategyKind {
    /// Returns the label value used for this strategy.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Naive => "naive",
            Self::Coalescing => "coalescing",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the value handed to a caller came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheStatus {
    /// Read from the cache.
    Hit,
    /// Missed the cache; this caller produced the value, from the backend or from a
    /// cache entry written since its first look.
    Miss,
    /// Produced by another caller of the same wave.
    Shared,
}

impl CacheStatus {
    /// Returns the status as reported in the `x-cache` response header.
    #[must_use]
    pub fn as_header_value(self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
            Self::Shared => "SHARED",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_header_value())
    }
}

/// A value handed to a caller together with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Served {
    product: Product,
    status: CacheStatus,
}

impl Served {
    pub(crate) fn new(product: Product, status: CacheStatus) -> Self {
        Self { product, status }
    }

    /// Returns the served record.
    #[must_use]
    pub fn product(&self) -> &Product {
        &self.product
    }

    /// Consumes the value and returns the record.
    #[must_use]
    pub fn into_product(self) -> Product {
        self.product
    }

    /// Returns where the record came from.
    #[must_use]
    pub fn status(&self) -> CacheStatus {
        self.status
    }

    /// Returns `true` if the record came from another caller's fetch.
    #[must_use]
    pub fn is_shared(&self) -> bool {
        self.status == CacheStatus::Shared
    }
}

/// A read could not produce a value.
///
/// Cache failures never surface here; they degrade to a miss.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum AccessError {
    /// The backend fetch failed. Every caller sharing that fetch sees the same error.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The caller waited on a fetch whose owner stopped before finishing.
    #[error(transparent)]
    Abandoned(#[from] Abandoned),
}

/// Reads a key through the cache, falling back to the backend.
pub trait AccessStrategy: Send + Sync {
    /// Returns which strategy this is.
    fn kind(&self) -> StrategyKind;

    /// Returns the current value for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError`] if no value could be produced.
    fn read(&self, key: &CacheKey) -> impl Future<Output = Result<Served, AccessError>> + Send;
}

/// The collaborators a strategy reads through.
///
/// Both strategies of one application are built from clones of the same `Deps`, so
/// they share the store, the backend and the metrics.
#[derive(Debug)]
pub struct Deps<S, B> {
    store: Arc<S>,
    backend: Arc<B>,
    metrics: Arc<dyn Metrics>,
    ttl: Duration,
}

impl<S, B> Clone for Deps<S, B> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            backend: Arc::clone(&self.backend),
            metrics: Arc::clone(&self.metrics),
            ttl: self.ttl,
        }
    }
}

impl<S, B> Deps<S, B>
where
    S: CacheStore,
    B: Backend,
{
    /// Bundles the collaborators; values are cached for `ttl`.
    #[must_use]
    pub fn new(store: Arc<S>, backend: Arc<B>, metrics: Arc<dyn Metrics>, ttl: Duration) -> Self {
        Self {
            store,
            backend,
            metrics,
            ttl,
        }
    }

    /// Returns the store.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns the backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Returns the metrics sink.
    #[must_use]
    pub fn metrics(&self) -> &Arc<dyn Metrics> {
        &self.metrics
    }

    /// Returns the TTL applied to written values.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Reads `key` from the cache. Store errors and undecodable payloads count as a miss.
    async fn cached(&self, key: &CacheKey) -> Option<Product> {
        let payload = match self.store.get(key.as_str()).await {
            Ok(payload) => payload?,
            Err(e) => {
                tracing::warn!(cache.key = %key, error = %e, "cache read failed; treating as miss");
                return None;
            }
        };

        match Product::decode(&payload) {
            Ok(product) => Some(product),
            Err(e) => {
                tracing::warn!(cache.key = %key, error = %e, "cached payload is malformed; treating as miss");
                None
            }
        }
    }

    /// Fetches `key` from the backend and writes the result to the cache.
    ///
    /// A failed cache write is logged; the fetched value is still returned.
    async fn fetch_and_store(&self, strategy: StrategyKind, key: &CacheKey) -> Result<Product, BackendError> {
        self.metrics.backend_fetch(strategy);
        let product = self.backend.fetch(key).await?;

        match product.encode() {
            Ok(payload) => {
                if let Err(e) = self.store.set(key.as_str(), payload, self.ttl).await {
                    tracing::warn!(cache.key = %key, error = %e, "cache write failed");
                }
            }
            Err(e) => tracing::warn!(cache.key = %key, error = %e, "could not encode fetched value"),
        }

        Ok(product)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_and_header_values() {
        assert_eq!(StrategyKind::Naive.to_string(), "naive");
        assert_eq!(StrategyKind::Coalescing.to_string(), "coalescing");
        assert_eq!(CacheStatus::Hit.to_string(), "HIT");
        assert_eq!(CacheStatus::Miss.as_header_value(), "MISS");
        assert_eq!(CacheStatus::Shared.as_header_value(), "SHARED");
    }

    #[test]
    fn abandoned_keeps_its_message() {
        let error = AccessError::from(Abandoned);
        assert_eq!(error.to_string(), Abandoned.to_string());
    }
}
