// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Cache access strategies that contrast and prevent cache stampedes.
//!
//! When a hot cached key expires, every concurrent reader misses at the same moment. A
//! naive read path sends all of them to the backend: a **cache stampede**. This crate
//! provides two strategies over the same collaborators so the effect can be observed
//! and measured:
//!
//! - [`Naive`] lets every missing caller fetch on its own.
//! - [`Coalescing`] groups concurrent misses for a key into a **wave**. One caller of
//!   the wave fetches and writes the cache; the rest receive its result.
//!
//! Both read through a [`CacheStore`](stampede_store::CacheStore), fetch from a
//! [`Backend`] and report to [`Metrics`].
//!
//! # Example
//!
//! ```
//! use std::{sync::Arc, time::Duration};
//!
//! use stampede::{AccessStrategy, CacheKey, CacheStatus, Deps, Naive, PrometheusMetrics, SimulatedBackend, StrategyKind};
//! use stampede_store::InMemoryStore;
//! # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
//!
//! let metrics = Arc::new(PrometheusMetrics::new()?);
//! let deps = Deps::new(
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(SimulatedBackend::new(Duration::from_millis(1))),
//!     Arc::<PrometheusMetrics>::clone(&metrics),
//!     Duration::from_secs(5),
//! );
//! let naive = Naive::new(deps);
//! let key = CacheKey::new("product:popular")?;
//!
//! assert_eq!(naive.read(&key).await?.status(), CacheStatus::Miss);
//! assert_eq!(naive.read(&key).await?.status(), CacheStatus::Hit);
//! assert_eq!(metrics.backend_fetches(StrategyKind::Naive), 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # }).unwrap();
//! ```
//!
//! # Failure handling
//!
//! The cache is an optimization. A store that fails or returns a payload that does not
//! decode is logged and treated as a miss. Backend failures are returned to the caller
//! as [`AccessError::Backend`] and, on the coalescing path, to every caller of the
//! failed wave. Failures are never cached.

mod backend;
mod key;
mod metrics;
mod product;
mod strategy;

pub use backend::{Backend, BackendError, SimulatedBackend};
pub use key::{CacheKey, InvalidKey};
pub use metrics::{Metrics, NoopMetrics, PrometheusMetrics, RequestGuard};
pub use product::{CodecError, Product};
pub use strategy::{AccessError, AccessStrategy, CacheStatus, Coalescing, Deps, Naive, Served, StrategyKind};
