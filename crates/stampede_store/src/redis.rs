// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Redis-backed cache store.

use std::time::Duration;

use bytes::Bytes;
use redis::{AsyncCommands, Client, aio::ConnectionManager};

use crate::{CacheStore, StoreError, StoreOperation};

/// A cache store shared by every process pointing at the same Redis server.
///
/// Values are written with `PSETEX`, so the TTL has millisecond resolution and expiry
/// is enforced by Redis itself. The connection manager reconnects transparently; a
/// command issued while the server is unreachable fails with
/// [`StoreError::Unavailable`].
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    address: String,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").field("address", &self.address).finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connects to the Redis server at `address`.
    ///
    /// `address` is either a full `redis://` URL or a bare `host:port` pair.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the address is malformed or the server
    /// cannot be reached.
    pub async fn connect(address: &str) -> Result<Self, StoreError> {
        let url = normalize_address(address);
        let client = Client::open(url.as_str()).map_err(|e| StoreError::unavailable(StoreOperation::Connect, e))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::unavailable(StoreOperation::Connect, e))?;

        Ok(Self { connection, address: url })
    }

    /// Returns the URL this store is connected to.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let mut connection = self.connection.clone();
        let value: Option<Vec<u8>> = connection
            .get(key)
            .await
            .map_err(|e| StoreError::unavailable(StoreOperation::Get, e))?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), StoreError> {
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        if millis == 0 {
            return Err(StoreError::InvalidTtl);
        }

        let mut connection = self.connection.clone();
        connection
            .pset_ex::<_, _, ()>(key, value.as_ref(), millis)
            .await
            .map_err(|e| StoreError::unavailable(StoreOperation::Set, e))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        connection
            .del::<_, ()>(key)
            .await
            .map_err(|e| StoreError::unavailable(StoreOperation::Delete, e))
    }
}

fn normalize_address(address: &str) -> String {
    if address.contains("://") {
        address.to_owned()
    } else {
        format!("redis://{address}")
    }
}
