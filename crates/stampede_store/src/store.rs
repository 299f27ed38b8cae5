// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The contract every cache store satisfies.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;

use crate::StoreError;

/// A shared key-value cache with per-entry time-to-live.
///
/// Implementations must be safe for concurrent callers. The returned futures are
/// `Send` so generic code can drive them from a multi-threaded runtime.
///
/// Semantics shared by all implementations:
///
/// - `get` returns `Ok(None)` for absent keys and for entries whose TTL has elapsed.
/// - `set` replaces any existing value and restarts the TTL. The last writer wins.
/// - `set` with a zero TTL fails with [`StoreError::InvalidTtl`].
/// - `delete` of an absent key succeeds.
pub trait CacheStore: Send + Sync {
    /// Reads the value stored under `key`.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Bytes>, StoreError>> + Send;

    /// Stores `value` under `key` for `ttl`.
    fn set(&self, key: &str, value: Bytes, ttl: Duration) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Removes the value stored under `key`.
    fn delete(&self, key: &str) -> impl Future<Output = Result<(), StoreError>> + Send;
}

impl<S> CacheStore for Arc<S>
where
    S: CacheStore,
{
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Bytes>, StoreError>> + Send {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: Bytes, ttl: Duration) -> impl Future<Output = Result<(), StoreError>> + Send {
        (**self).set(key, value, ttl)
    }

    fn delete(&self, key: &str) -> impl Future<Output = Result<(), StoreError>> + Send {
        (**self).delete(key)
    }
}
