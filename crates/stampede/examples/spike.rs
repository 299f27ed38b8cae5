// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Fires a burst of concurrent reads at an empty cache through both strategies and
//! compares how many backend fetches each one needed.
//!
//! Run with `cargo run -p stampede --example spike -- 500` to change the burst size.

use std::{sync::Arc, time::Duration};

use stampede::{AccessStrategy, CacheKey, CacheStatus, Coalescing, Deps, Naive, PrometheusMetrics, SimulatedBackend};
use stampede_store::InMemoryStore;

const DEFAULT_BURST: usize = 100;

async fn spike<A>(strategy: Arc<A>, key: &CacheKey, burst: usize) -> Vec<CacheStatus>
where
    A: AccessStrategy + 'static,
{
    let handles: Vec<_> = (0..burst)
        .map(|_| {
            let strategy = Arc::clone(&strategy);
            let key = key.clone();
            tokio::spawn(async move { strategy.read(&key).await })
        })
        .collect();

    let mut statuses = Vec::with_capacity(burst);
    for handle in handles {
        match handle.await.expect("read task panicked") {
            Ok(served) => statuses.push(served.status()),
            Err(e) => println!("  read failed: {e}"),
        }
    }
    statuses
}

fn summarize(label: &str, statuses: &[CacheStatus], fetches: u64, elapsed: Duration) {
    let count = |wanted: CacheStatus| statuses.iter().filter(|&&status| status == wanted).count();
    println!(
        "{label:<11} {:>5} reads  {:>5} backend fetches  ({} miss, {} shared, {} hit)  in {elapsed:?}",
        statuses.len(),
        fetches,
        count(CacheStatus::Miss),
        count(CacheStatus::Shared),
        count(CacheStatus::Hit),
    );
}

#[tokio::main]
async fn main() {
    let burst = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(DEFAULT_BURST);
    let key = CacheKey::new("product:popular").expect("key is not empty");
    let metrics = Arc::new(PrometheusMetrics::new().expect("fresh registry"));

    println!("Sending {burst} concurrent reads to an empty cache (backend latency 200ms)...\n");

    for coalesce in [false, true] {
        let backend = Arc::new(SimulatedBackend::new(Duration::from_millis(200)));
        let deps = Deps::new(
            Arc::new(InMemoryStore::new()),
            Arc::clone(&backend),
            Arc::<PrometheusMetrics>::clone(&metrics),
            Duration::from_secs(5),
        );

        let started = tokio::time::Instant::now();
        let (label, statuses) = if coalesce {
            ("coalescing", spike(Arc::new(Coalescing::new(deps)), &key, burst).await)
        } else {
            ("naive", spike(Arc::new(Naive::new(deps)), &key, burst).await)
        };
        summarize(label, &statuses, backend.calls(), started.elapsed());
    }
}
