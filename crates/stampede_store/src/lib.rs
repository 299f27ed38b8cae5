// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Key-value cache stores with per-entry time-to-live.
//!
//! This crate defines the [`CacheStore`] trait, the narrow contract the access
//! strategies in `stampede` need from a shared cache: `get`, `set` with a TTL and
//! `delete`. Values are opaque bytes; decoding them into domain records is the
//! caller's business.
//!
//! Two stores are provided:
//!
//! - [`InMemoryStore`] (feature `memory`): a process-local store backed by moka.
//! - [`RedisStore`] (feature `redis`): a store shared across processes.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use bytes::Bytes;
//! use stampede_store::{CacheStore, InMemoryStore};
//! # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
//!
//! let store = InMemoryStore::new();
//! store.set("product:popular", Bytes::from_static(b"{}"), Duration::from_secs(5)).await?;
//!
//! let value = store.get("product:popular").await?;
//! assert_eq!(value.as_deref(), Some(&b"{}"[..]));
//! # Ok::<(), stampede_store::StoreError>(())
//! # }).unwrap();
//! ```
//!
//! # Guarantees
//!
//! Every store is safe for concurrent callers. A `get` issued after an entry's TTL has
//! elapsed reports the entry as absent. Concurrent `set` calls race at the storage
//! layer and the last one wins.

mod error;
#[cfg(feature = "memory")]
mod memory;
#[cfg(feature = "redis")]
mod redis;
mod store;
#[cfg(any(feature = "test-util", test))]
pub mod testing;

#[doc(inline)]
pub use error::{Result, StoreError, StoreOperation};
#[cfg(feature = "memory")]
#[doc(inline)]
pub use memory::{InMemoryStore, InMemoryStoreBuilder};
#[cfg(feature = "redis")]
#[doc(inline)]
pub use redis::RedisStore;
#[doc(inline)]
pub use store::CacheStore;
