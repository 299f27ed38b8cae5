// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The slow source of truth behind the cache.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use jiff::Timestamp;

use crate::{CacheKey, Product};

/// The backend failed to produce a record.
///
/// The error is cloned to every caller sharing the failed fetch, so it carries its
/// cause as text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("backend fetch for '{key}' failed: {reason}")]
pub struct BackendError {
    key: CacheKey,
    reason: Arc<str>,
}

impl BackendError {
    /// Creates an error for `key` with a human-readable `reason`.
    #[must_use]
    pub fn new(key: CacheKey, reason: impl Into<Arc<str>>) -> Self {
        Self {
            key,
            reason: reason.into(),
        }
    }

    /// Returns the key whose fetch failed.
    #[must_use]
    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

/// A source of truth that can produce the record for a key.
pub trait Backend: Send + Sync {
    /// Fetches the current record for `key`.
    fn fetch(&self, key: &CacheKey) -> impl Future<Output = Result<Product, BackendError>> + Send;
}

impl<B: Backend> Backend for Arc<B> {
    fn fetch(&self, key: &CacheKey) -> impl Future<Output = Result<Product, BackendError>> + Send {
        (**self).fetch(key)
    }
}

/// A backend that sleeps for a fixed latency and then returns a fresh record.
///
/// Every call takes the next value of a sequence starting at 1 and stamps it into the
/// record, so callers can tell which fetch produced what they received.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use stampede::{Backend, CacheKey, SimulatedBackend};
/// # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
///
/// let backend = SimulatedBackend::new(Duration::from_millis(1));
/// let key = CacheKey::new("product:popular")?;
///
/// let first = backend.fetch(&key).await?;
/// let second = backend.fetch(&key).await?;
/// assert_eq!((first.request_sequence, second.request_sequence), (1, 2));
/// assert_eq!(backend.calls(), 2);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # }).unwrap();
/// ```
#[derive(Debug)]
pub struct SimulatedBackend {
    latency: Duration,
    sequence: AtomicU64,
    calls: AtomicU64,
    failing: AtomicBool,
}

impl SimulatedBackend {
    /// Creates a backend that answers after `latency`.
    #[must_use]
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            sequence: AtomicU64::new(0),
            calls: AtomicU64::new(0),
            failing: AtomicBool::new(false),
        }
    }

    /// Returns the configured latency.
    #[must_use]
    pub fn latency(&self) -> Duration {
        self.latency
    }

    /// Returns how many fetches have started.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Acquire)
    }

    /// Makes subsequent fetches fail after the configured latency.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }
}

impl Backend for SimulatedBackend {
    async fn fetch(&self, key: &CacheKey) -> Result<Product, BackendError> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        tracing::debug!(cache.key = %key, latency = ?self.latency, "fetching from backend");

        tokio::time::sleep(self.latency).await;

        if self.failing.load(Ordering::Acquire) {
            return Err(BackendError::new(key.clone(), "backend unavailable"));
        }

        let request_sequence = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        Ok(Product {
            id: 1,
            name: "Popular Product".to_string(),
            price: 9800,
            fetched_at: Timestamp::now(),
            request_sequence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> CacheKey {
        CacheKey::new("product:popular").unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_takes_the_configured_latency() {
        let backend = SimulatedBackend::new(Duration::from_millis(200));
        let started = tokio::time::Instant::now();

        let product = backend.fetch(&key()).await.unwrap();

        assert_eq!(started.elapsed(), Duration::from_millis(200));
        assert_eq!(product.id, 1);
        assert_eq!(product.request_sequence, 1);
    }

    #[tokio::test]
    async fn failing_backend_reports_the_key() {
        let backend = SimulatedBackend::new(Duration::ZERO);
        backend.set_failing(true);

        let error = backend.fetch(&key()).await.unwrap_err();
        assert_eq!(error.key(), &key());
        assert_eq!(
            error.to_string(),
            "backend fetch for 'product:popular' failed: backend unavailable"
        );
        assert_eq!(backend.calls(), 1);

        backend.set_failing(false);
        assert_eq!(backend.fetch(&key()).await.unwrap().request_sequence, 1);
    }

    #[tokio::test]
    async fn arc_backend_delegates() {
        let backend = Arc::new(SimulatedBackend::new(Duration::ZERO));
        Backend::fetch(&Arc::clone(&backend), &key()).await.unwrap();
        assert_eq!(backend.calls(), 1);
    }
}
