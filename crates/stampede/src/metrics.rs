// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Counters, gauges and histograms describing how requests were served.
//!
//! Every series carries a `strategy` label so the naive and coalescing paths can be
//! compared side by side.

use std::{fmt, sync::Arc, time::Duration};

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use tokio::time::Instant;

use crate::StrategyKind;

const STRATEGY_LABEL: &str = "strategy";

/// Receives observations from the access strategies.
pub trait Metrics: Send + Sync + fmt::Debug {
    /// A read was served from the cache.
    fn cache_hit(&self, strategy: StrategyKind);

    /// A read found nothing usable in the cache.
    fn cache_miss(&self, strategy: StrategyKind);

    /// A backend fetch started.
    fn backend_fetch(&self, strategy: StrategyKind);

    /// A caller received a result produced by another caller's fetch.
    fn shared_response(&self, strategy: StrategyKind);

    /// A request started.
    fn request_started(&self, strategy: StrategyKind);

    /// A request finished after `elapsed`.
    fn request_finished(&self, strategy: StrategyKind, elapsed: Duration);
}

/// Discards every observation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn cache_hit(&self, _strategy: StrategyKind) {}
    fn cache_miss(&self, _strategy: StrategyKind) {}
    fn backend_fetch(&self, _strategy: StrategyKind) {}
    fn shared_response(&self, _strategy: StrategyKind) {}
    fn request_started(&self, _strategy: StrategyKind) {}
    fn request_finished(&self, _strategy: StrategyKind, _elapsed: Duration) {}
}

/// Tracks one request from start to finish.
///
/// Created by [`RequestGuard::start`]; the request counts as finished when the guard is
/// dropped, whether the request completed, failed or was cancelled.
#[derive(Debug)]
#[must_use = "the request is reported finished as soon as the guard is dropped"]
pub struct RequestGuard {
    metrics: Arc<dyn Metrics>,
    strategy: StrategyKind,
    started: Instant,
}

impl RequestGuard {
    /// Reports a started request and returns the guard that will report its end.
    pub fn start(metrics: Arc<dyn Metrics>, strategy: StrategyKind) -> Self {
        metrics.request_started(strategy);
        Self {
            metrics,
            strategy,
            started: Instant::now(),
        }
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.metrics.request_finished(self.strategy, self.started.elapsed());
    }
}

/// Records observations into a Prometheus [`Registry`].
///
/// | Series | Kind |
/// |---|---|
/// | `cache_hits_total` | counter |
/// | `cache_misses_total` | counter |
/// | `backend_fetches_total` | counter |
/// | `coalesced_shared_total` | counter |
/// | `inflight_requests` | gauge |
/// | `request_duration_seconds` | histogram |
///
/// # Examples
///
/// ```
/// use stampede::{Metrics, PrometheusMetrics, StrategyKind};
///
/// let metrics = PrometheusMetrics::new()?;
/// metrics.backend_fetch(StrategyKind::Naive);
///
/// assert_eq!(metrics.backend_fetches(StrategyKind::Naive), 1);
/// assert!(metrics.render()?.contains(r#"backend_fetches_total{strategy="naive"} 1"#));
/// # Ok::<(), prometheus::Error>(())
/// ```
#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    cache_hits: IntCounterVec,
    cache_misses: IntCounterVec,
    backend_fetches: IntCounterVec,
    shared_responses: IntCounterVec,
    inflight: IntGaugeVec,
    duration: HistogramVec,
}

impl fmt::Debug for PrometheusMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrometheusMetrics").finish_non_exhaustive()
    }
}

impl PrometheusMetrics {
    /// Creates the metrics in a fresh registry.
    ///
    /// # Errors
    ///
    /// Returns an error if a series cannot be registered.
    pub fn new() -> prometheus::Result<Self> {
        Self::with_registry(Registry::new())
    }

    /// Creates the metrics in `registry`.
    ///
    /// # Errors
    ///
    /// Returns an error if a series with the same name is already registered.
    pub fn with_registry(registry: Registry) -> prometheus::Result<Self> {
        let cache_hits = counter(&registry, "cache_hits_total", "Total number of cache hits")?;
        let cache_misses = counter(&registry, "cache_misses_total", "Total number of cache misses")?;
        let backend_fetches = counter(&registry, "backend_fetches_total", "Total number of backend fetches")?;
        let shared_responses = counter(
            &registry,
            "coalesced_shared_total",
            "Total number of responses shared from another caller's fetch",
        )?;

        let inflight = IntGaugeVec::new(
            Opts::new("inflight_requests", "Number of requests currently being served"),
            &[STRATEGY_LABEL],
        )?;
        registry.register(Box::new(inflight.clone()))?;

        let duration = HistogramVec::new(
            HistogramOpts::new("request_duration_seconds", "Request latency in seconds"),
            &[STRATEGY_LABEL],
        )?;
        registry.register(Box::new(duration.clone()))?;

        Ok(Self {
            registry,
            cache_hits,
            cache_misses,
            backend_fetches,
            shared_responses,
            inflight,
            duration,
        })
    }

    /// Returns the registry the metrics live in.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Renders every series of the registry in the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    /// Returns the number of cache hits recorded for `strategy`.
    #[must_use]
    pub fn cache_hits(&self, strategy: StrategyKind) -> u64 {
        self.cache_hits.with_label_values(&[strategy.as_str()]).get()
    }

    /// Returns the number of cache misses recorded for `strategy`.
    #[must_use]
    pub fn cache_misses(&self, strategy: StrategyKind) -> u64 {
        self.cache_misses.with_label_values(&[strategy.as_str()]).get()
    }

    /// Returns the number of backend fetches recorded for `strategy`.
    #[must_use]
    pub fn backend_fetches(&self, strategy: StrategyKind) -> u64 {
        self.backend_fetches.with_label_values(&[strategy.as_str()]).get()
    }

    /// Returns the number of shared responses recorded for `strategy`.
    #[must_use]
    pub fn shared_responses(&self, strategy: StrategyKind) -> u64 {
        self.shared_responses.with_label_values(&[strategy.as_str()]).get()
    }

    /// Returns the number of requests of `strategy` currently in flight.
    #[must_use]
    pub fn inflight(&self, strategy: StrategyKind) -> i64 {
        self.inflight.with_label_values(&[strategy.as_str()]).get()
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounterVec> {
    let counter = IntCounterVec::new(Opts::new(name, help), &[STRATEGY_LABEL])?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl Metrics for PrometheusMetrics {
    fn cache_hit(&self, strategy: StrategyKind) {
        self.cache_hits.with_label_values(&[strategy.as_str()]).inc();
    }

    fn cache_miss(&self, strategy: StrategyKind) {
        self.cache_misses.with_label_values(&[strategy.as_str()]).inc();
    }

    fn backend_fetch(&self, strategy: StrategyKind) {
        self.backend_fetches.with_label_values(&[strategy.as_str()]).inc();
    }

    fn shared_response(&self, strategy: StrategyKind) {
        self.shared_responses.with_label_values(&[strategy.as_str()]).inc();
    }

    fn request_started(&self, strategy: StrategyKind) {
        self.inflight.with_label_values(&[strategy.as_str()]).inc();
    }

    fn request_finished(&self, strategy: StrategyKind, elapsed: Duration) {
        self.inflight.with_label_values(&[strategy.as_str()]).dec();
        self.duration
            .with_label_values(&[strategy.as_str()])
            .observe(elapsed.as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_labelled_by_strategy() {
        let metrics = PrometheusMetrics::new().unwrap();
        metrics.cache_hit(StrategyKind::Naive);
        metrics.cache_miss(StrategyKind::Coalescing);
        metrics.cache_miss(StrategyKind::Coalescing);
        metrics.shared_response(StrategyKind::Coalescing);

        assert_eq!(metrics.cache_hits(StrategyKind::Naive), 1);
        assert_eq!(metrics.cache_hits(StrategyKind::Coalescing), 0);
        assert_eq!(metrics.cache_misses(StrategyKind::Coalescing), 2);
        assert_eq!(metrics.shared_responses(StrategyKind::Coalescing), 1);
    }

    #[tokio::test]
    async fn request_guard_balances_the_inflight_gauge() {
        let metrics = Arc::new(PrometheusMetrics::new().unwrap());

        let guard = RequestGuard::start(Arc::clone(&metrics) as Arc<dyn Metrics>, StrategyKind::Coalescing);
        assert_eq!(metrics.inflight(StrategyKind::Coalescing), 1);

        drop(guard);
        assert_eq!(metrics.inflight(StrategyKind::Coalescing), 0);

        let rendered = metrics.render().unwrap();
        assert!(rendered.contains(r#"request_duration_seconds_count{strategy="coalescing"} 1"#));
    }

    #[test]
    fn render_lists_every_series_name() {
        let metrics = PrometheusMetrics::new().unwrap();
        for strategy in [StrategyKind::Naive, StrategyKind::Coalescing] {
            metrics.cache_hit(strategy);
            metrics.cache_miss(strategy);
            metrics.backend_fetch(strategy);
            metrics.shared_response(strategy);
            metrics.request_finished(strategy, Duration::from_millis(5));
        }

        let rendered = metrics.render().unwrap();
        for name in [
            "cache_hits_total",
            "cache_misses_total",
            "backend_fetches_total",
            "coalesced_shared_total",
            "inflight_requests",
            "request_duration_seconds",
        ] {
            assert!(rendered.contains(name), "missing {name} in:\n{rendered}");
        }
    }

    #[test]
    fn shared_registry_rejects_duplicate_registration() {
        let registry = Registry::new();
        let _first = PrometheusMetrics::with_registry(registry.clone()).unwrap();
        assert!(PrometheusMetrics::with_registry(registry).is_err());
    }
}
