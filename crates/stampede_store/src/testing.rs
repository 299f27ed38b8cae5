// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Mock cache store for testing.
//!
//! [`MockStore`] keeps values in memory, records every operation and can be told to
//! fail operations on demand, which makes the degraded-cache paths of callers testable.

use std::{collections::HashMap, sync::Arc, time::Duration};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::{CacheStore, StoreError, StoreOperation};

/// A recorded store operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// `get` was called with this key.
    Get(String),
    /// `set` was called.
    Set {
        /// The key written.
        key: String,
        /// The value written.
        value: Bytes,
        /// The TTL requested.
        ttl: Duration,
    },
    /// `delete` was called with this key.
    Delete(String),
}

impl StoreOp {
    /// Returns the kind of operation.
    #[must_use]
    pub fn operation(&self) -> StoreOperation {
        match self {
            Self::Get(_) => StoreOperation::Get,
            Self::Set { .. } => StoreOperation::Set,
            Self::Delete(_) => StoreOperation::Delete,
        }
    }
}

type FailPredicate = Box<dyn Fn(&StoreOp) -> bool + Send + Sync>;

/// A configurable in-memory store for tests.
///
/// TTLs are honored against the tokio clock, like
/// [`InMemoryStore`](crate::InMemoryStore). Clones share data, the operation log and
/// the failure predicate.
///
/// # Examples
///
/// ```
/// use stampede_store::{CacheStore, testing::{MockStore, StoreOp}};
/// # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
///
/// let store = MockStore::new();
/// store.fail_when(|op| matches!(op, StoreOp::Get(_)));
///
/// assert!(store.get("key").await.is_err());
/// assert_eq!(store.operations(), vec![StoreOp::Get("key".to_string())]);
/// # });
/// ```
#[derive(Clone, Default)]
pub struct MockStore {
    data: Arc<Mutex<HashMap<String, (Bytes, Instant)>>>,
    operations: Arc<Mutex<Vec<StoreOp>>>,
    fail_when: Arc<Mutex<Option<FailPredicate>>>,
}

impl std::fmt::Debug for MockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockStore")
            .field("entries", &self.data.lock().len())
            .field("operations", &self.operations.lock().len())
            .field("fail_when", &self.fail_when.lock().is_some())
            .finish()
    }
}

impl MockStore {
    /// Creates an empty mock store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores raw bytes directly, bypassing the operation log and failure injection.
    ///
    /// Useful for planting payloads a real writer would never produce.
    pub fn seed(&self, key: impl Into<String>, value: impl Into<Bytes>, ttl: Duration) {
        self.data.lock().insert(key.into(), (value.into(), Instant::now() + ttl));
    }

    /// Sets a predicate deciding which operations fail with [`StoreError::Unavailable`].
    pub fn fail_when<F>(&self, predicate: F)
    where
        F: Fn(&StoreOp) -> bool + Send + Sync + 'static,
    {
        *self.fail_when.lock() = Some(Box::new(predicate));
    }

    /// Removes the failure predicate.
    pub fn clear_failures(&self) {
        *self.fail_when.lock() = None;
    }

    /// Returns all recorded operations in call order.
    #[must_use]
    pub fn operations(&self) -> Vec<StoreOp> {
        self.operations.lock().clone()
    }

    /// Returns how many recorded operations match `operation`.
    #[must_use]
    pub fn count(&self, operation: StoreOperation) -> usize {
        self.operations.lock().iter().filter(|op| op.operation() == operation).count()
    }

    /// Returns true if a live entry exists for `key`.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.lock().get(key).is_some_and(|(_, expires_at)| Instant::now() < *expires_at)
    }

    fn record(&self, op: StoreOp) -> Result<(), StoreError> {
        let operation = op.operation();
        let should_fail = self.fail_when.lock().as_ref().is_some_and(|predicate| predicate(&op));
        self.operations.lock().push(op);

        if should_fail {
            Err(StoreError::unavailable(operation, "injected failure"))
        } else {
            Ok(())
        }
    }
}

impl CacheStore for MockStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        self.record(StoreOp::Get(key.to_owned()))?;
        let data = self.data.lock();
        Ok(data
            .get(key)
            .filter(|(_, expires_at)| Instant::now() < *expires_at)
            .map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), StoreError> {
        self.record(StoreOp::Set {
            key: key.to_owned(),
            value: value.clone(),
            ttl,
        })?;
        if ttl.is_zero() {
            return Err(StoreError::InvalidTtl);
        }
        self.data.lock().insert(key.to_owned(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.record(StoreOp::Delete(key.to_owned()))?;
        self.data.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_operations_in_order() {
        let store = MockStore::new();
        store.set("k", Bytes::from_static(b"v"), Duration::from_secs(1)).await.unwrap();
        store.get("k").await.unwrap();
        store.delete("k").await.unwrap();

        assert_eq!(
            store.operations(),
            vec![
                StoreOp::Set {
                    key: "k".to_string(),
                    value: Bytes::from_static(b"v"),
                    ttl: Duration::from_secs(1),
                },
                StoreOp::Get("k".to_string()),
                StoreOp::Delete("k".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn injected_failures_are_selective_and_clearable() {
        let store = MockStore::new();
        store.fail_when(|op| matches!(op, StoreOp::Set { .. }));

        let error = store
            .set("k", Bytes::from_static(b"v"), Duration::from_secs(1))
            .await
            .expect_err("set should fail");
        assert_eq!(error.operation(), Some(StoreOperation::Set));
        assert!(store.get("k").await.unwrap().is_none());

        store.clear_failures();
        store.set("k", Bytes::from_static(b"v"), Duration::from_secs(1)).await.unwrap();
        assert!(store.contains_key("k"));
        assert_eq!(store.count(StoreOperation::Set), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn seeded_values_expire() {
        let store = MockStore::new();
        store.seed("k", &b"raw"[..], Duration::from_millis(10));
        assert!(store.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_millis(10)).await;
        assert!(store.get("k").await.unwrap().is_none());
        assert!(store.operations().iter().all(|op| matches!(op, StoreOp::Get(_))));
    }
}
