// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! HTTP service that serves one hot key through two cache read paths.
//!
//! `/api/naive` reads through [`stampede::Naive`], `/api/coalescing` through
//! [`stampede::Coalescing`]. Both share one store, one simulated backend and one
//! Prometheus registry, so a load test against each endpoint shows the stampede and its
//! prevention in `/metrics`.
//!
//! The binary is configured by [`Config`]; the router is available on its own for
//! embedding and testing:
//!
//! ```
//! use std::{sync::Arc, time::Duration};
//!
//! use stampede::CacheKey;
//! use stampede_server::{AppState, router};
//! use stampede_store::InMemoryStore;
//!
//! let state = AppState::new(
//!     InMemoryStore::new(),
//!     CacheKey::new("product:popular")?,
//!     Duration::from_secs(5),
//!     Duration::from_millis(200),
//! )?;
//! let _app: axum::Router = router(Arc::new(state));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod app;
mod config;
pub mod logging;

pub use app::{AppState, X_CACHE, X_COALESCED_SHARED, router};
pub use config::Config;
