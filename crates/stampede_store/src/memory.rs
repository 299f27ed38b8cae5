// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! In-memory cache store backed by moka.

use std::time::{Duration, Instant as StdInstant};

use bytes::Bytes;
use moka::{Expiry, future::Cache};
use tokio::time::Instant;

use crate::{CacheStore, StoreError};

#[derive(Debug, Clone)]
struct StoredValue {
    value: Bytes,
    ttl: Duration,
    expires_at: Instant,
}

impl StoredValue {
    fn new(value: Bytes, ttl: Duration) -> Self {
        Self {
            value,
            ttl,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Lets moka reclaim entries once their own TTL passes.
///
/// Reads never rely on this alone: moka runs on its own clock, so every read also checks
/// `expires_at` against the tokio clock.
struct PerEntryTtl;

impl Expiry<String, StoredValue> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &StoredValue, _created_at: StdInstant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredValue,
        _updated_at: StdInstant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// A process-local cache store.
///
/// Entries carry their own TTL. Expiry is measured with [`tokio::time::Instant`], so tests
/// running with a paused tokio clock can step past a TTL deterministically.
///
/// Cloning the store is cheap and clones share the same entries.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use bytes::Bytes;
/// use stampede_store::{CacheStore, InMemoryStore};
/// # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
///
/// let store = InMemoryStore::builder().max_capacity(1_000).name("products").build();
///
/// store.set("key", Bytes::from_static(b"value"), Duration::from_secs(5)).await?;
/// assert!(store.get("key").await?.is_some());
///
/// store.delete("key").await?;
/// assert!(store.get("key").await?.is_none());
/// # Ok::<(), stampede_store::StoreError>(())
/// # }).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    inner: Cache<String, StoredValue>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Creates an unbounded in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates a builder for configuring an in-memory store.
    #[must_use]
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::new()
    }

    /// Returns the approximate number of stored entries, including entries that have
    /// expired but not yet been reclaimed.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }

    fn from_builder(builder: &InMemoryStoreBuilder) -> Self {
        let mut moka_builder = Cache::builder().expire_after(PerEntryTtl);

        if let Some(capacity) = builder.max_capacity {
            moka_builder = moka_builder.max_capacity(capacity);
        }

        if let Some(capacity) = builder.initial_capacity {
            moka_builder = moka_builder.initial_capacity(capacity);
        }

        if let Some(name) = builder.name.as_deref() {
            moka_builder = moka_builder.name(name);
        }

        Self {
            inner: moka_builder.build(),
        }
    }
}

impl CacheStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        Ok(self
            .inner
            .get(key)
            .await
            .filter(|stored| !stored.is_expired())
            .map(|stored| stored.value))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), StoreError> {
        if ttl.is_zero() {
            return Err(StoreError::InvalidTtl);
        }

        self.inner.insert(key.to_owned(), StoredValue::new(value, ttl)).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.inner.invalidate(key).await;
        Ok(())
    }
}

/// Builder for an [`InMemoryStore`].
#[derive(Debug, Default)]
pub struct InMemoryStoreBuilder {
    max_capacity: Option<u64>,
    initial_capacity: Option<usize>,
    name: Option<String>,
}

impl InMemoryStoreBuilder {
    /// Creates a builder for an unbounded, unnamed store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the number of entries; moka evicts beyond this.
    #[must_use]
    pub fn max_capacity(mut self, capacity: u64) -> Self {
        self.max_capacity = Some(capacity);
        self
    }

    /// Pre-sizes the underlying table.
    #[must_use]
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = Some(capacity);
        self
    }

    /// Names the store for diagnostics.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Builds the store.
    #[must_use]
    pub fn build(self) -> InMemoryStore {
        InMemoryStore::from_builder(&self)
    }
}
