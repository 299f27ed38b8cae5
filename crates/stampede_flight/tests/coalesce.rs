// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for `Coalescer::coalesce()`.

use std::{
    sync::{
        Arc,
        atomic::{
            AtomicU64, AtomicUsize,
            Ordering::{AcqRel, Acquire},
        },
    },
    time::Duration,
};

use futures_util::{StreamExt, stream::FuturesUnordered};
use stampede_flight::{Abandoned, Coalescer, Role};
use tokio::sync::Barrier;

fn unreachable_future() -> std::future::Pending<String> {
    std::future::pending()
}

#[tokio::test]
async fn direct_call() {
    let group = Coalescer::new();
    let flight = group
        .coalesce("key", || async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            "Result".to_string()
        })
        .await
        .unwrap();

    assert_eq!(flight.value(), "Result");
    assert_eq!(flight.role(), Role::Leader);
}

#[tokio::test]
async fn parallel_calls_share_one_execution() {
    let call_counter = AtomicUsize::default();

    let group = Coalescer::new();
    let futures = FuturesUnordered::new();
    for _ in 0..10 {
        futures.push(group.coalesce("key", || async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            call_counter.fetch_add(1, AcqRel);
            "Result".to_string()
        }));
    }

    let flights: Vec<_> = futures.map(Result::unwrap).collect().await;
    assert_eq!(call_counter.load(Acquire), 1);
    assert!(flights.iter().all(|flight| flight.value() == "Result"));
    assert_eq!(flights.iter().filter(|flight| flight.is_shared()).count(), 9);
    assert_eq!(group.in_flight(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_tasks_on_worker_threads_share_one_execution() {
    const CALLERS: usize = 10;

    let group: Arc<Coalescer<String, u64>> = Arc::new(Coalescer::new());
    let sequence = Arc::new(AtomicU64::new(0));
    let executions = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(CALLERS));

    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let group = Arc::clone(&group);
            let sequence = Arc::clone(&sequence);
            let executions = Arc::clone(&executions);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                group
                    .coalesce("product:popular".to_string(), || async move {
                        executions.fetch_add(1, AcqRel);
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        sequence.fetch_add(1, AcqRel) + 1
                    })
                    .await
            })
        })
        .collect();

    let mut sequences = Vec::new();
    let mut shared = 0;
    for handle in handles {
        let flight = handle.await.unwrap().unwrap();
        shared += usize::from(flight.is_shared());
        sequences.push(flight.into_value());
    }

    assert_eq!(executions.load(Acquire), 1);
    assert_eq!(shared, CALLERS - 1);
    assert!(sequences.iter().all(|&seq| seq == 1), "all callers see the same sequence: {sequences:?}");
}

#[tokio::test]
async fn disjoint_waves_execute_separately() {
    let sequence = AtomicU64::new(0);
    let group = Coalescer::new();

    let sequence = &sequence;
    let fetch = move || async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        sequence.fetch_add(1, AcqRel) + 1
    };

    let first = group.coalesce("key", fetch).await.unwrap();
    let second = group.coalesce("key", fetch).await.unwrap();

    assert_eq!(*first.value(), 1);
    assert_eq!(*second.value(), 2);
    assert_eq!(second.role(), Role::Leader);
}

#[tokio::test]
async fn late_caller_after_publication_starts_new_wave() {
    let group = Coalescer::new();
    let early = group
        .coalesce("key".to_string(), || async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            "Result".to_string()
        })
        .await
        .unwrap();

    let late = group
        .coalesce("key".to_string(), || async { "Fresh".to_string() })
        .await
        .unwrap();

    assert_eq!(early.value(), "Result");
    assert_eq!(late.value(), "Fresh");
    assert!(!late.is_shared());
}

#[tokio::test]
async fn error_is_fanned_out_to_every_follower() {
    let call_counter = AtomicUsize::default();
    let group: Coalescer<&str, Result<u32, String>> = Coalescer::new();

    let futures = FuturesUnordered::new();
    for _ in 0..5 {
        futures.push(group.coalesce("key", || async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            call_counter.fetch_add(1, AcqRel);
            Err("backend down".to_string())
        }));
    }

    let flights: Vec<_> = futures.map(Result::unwrap).collect().await;
    assert_eq!(call_counter.load(Acquire), 1);
    assert!(
        flights
            .iter()
            .all(|flight| flight.value() == &Err("backend down".to_string()))
    );

    // The failed wave left nothing behind, so the next caller leads a retry.
    let retry = group.coalesce("key", || async { Ok(7) }).await.unwrap();
    assert_eq!(retry.role(), Role::Leader);
    assert_eq!(retry.into_value(), Ok(7));
}

#[tokio::test]
async fn cancelled_leader_releases_followers() {
    let group = Coalescer::new();

    let leader = group.coalesce("key".to_string(), unreachable_future);
    let follower = group.coalesce("key".to_string(), unreachable_future);

    let cancel_leader = async {
        let _ = tokio::time::timeout(Duration::from_millis(10), leader).await;
    };
    let ((), follower) = tokio::join!(cancel_leader, follower);
    assert_eq!(follower, Err(Abandoned));

    let next = group
        .coalesce("key".to_string(), || async { "Result2".to_string() })
        .await
        .unwrap();
    assert_eq!(next.value(), "Result2");
    assert_eq!(next.role(), Role::Leader);
}

#[tokio::test]
async fn leader_panic_in_spawned_task_releases_followers() {
    let group: Arc<Coalescer<String, String>> = Arc::new(Coalescer::new());

    let group_clone = Arc::clone(&group);
    let handle = tokio::spawn(async move {
        group_clone
            .coalesce("key".to_string(), || async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                panic!("leader panicked in spawned task");
                #[expect(unreachable_code, reason = "Required to satisfy return type after panic")]
                "never".to_string()
            })
            .await
    });

    // Give the spawned task time to register as leader.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(group.in_flight(), 1);

    let follower = group.coalesce("key".to_string(), unreachable_future).await;
    assert_eq!(follower, Err(Abandoned));
    assert!(handle.await.is_err());
    assert_eq!(group.in_flight(), 0);
}

#[tokio::test]
async fn distinct_keys_do_not_wait_for_each_other() {
    let group = Coalescer::new();

    let stuck = group.coalesce("stuck".to_string(), unreachable_future);
    let free = group.coalesce("free".to_string(), || async { "free".to_string() });

    let outcome = tokio::time::timeout(Duration::from_millis(100), async {
        tokio::select! {
            _ = stuck => unreachable!("the stuck key never completes"),
            flight = free => flight,
        }
    })
    .await
    .expect("free key must not wait on the stuck key");

    assert_eq!(outcome.unwrap().value(), "free");
}

#[tokio::test]
async fn detached_wave_survives_a_cancelled_leader() {
    let call_counter = AtomicUsize::default();
    let group: Coalescer<String, String> = Coalescer::new();

    let counter = &call_counter;
    let work = move || {
        counter.fetch_add(1, AcqRel);
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            "Result".to_string()
        }
    };

    let leader = tokio::time::timeout(Duration::from_millis(10), group.coalesce_detached("key".to_string(), work));
    let followers: FuturesUnordered<_> = (0..4)
        .map(|_| group.coalesce_detached("key".to_string(), work))
        .collect();

    let (leader, flights) = tokio::join!(leader, followers.collect::<Vec<_>>());
    assert!(leader.is_err(), "the leader gave up before the work finished");
    assert_eq!(call_counter.load(Acquire), 1);
    assert_eq!(flights.len(), 4);
    for flight in flights {
        let flight = flight.unwrap();
        assert!(flight.is_shared());
        assert_eq!(flight.value(), "Result");
    }
    assert_eq!(group.in_flight(), 0);
}

#[tokio::test]
async fn detached_panic_releases_the_whole_wave() {
    let group: Coalescer<String, String> = Coalescer::new();

    let leader = group.coalesce_detached("key".to_string(), || async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        panic!("work panicked on its task");
        #[expect(unreachable_code, reason = "Required to satisfy return type after panic")]
        "never".to_string()
    });
    let follower = group.coalesce_detached("key".to_string(), unreachable_future);

    let (leader, follower) = tokio::join!(leader, follower);
    assert_eq!(leader, Err(Abandoned));
    assert_eq!(follower, Err(Abandoned));
    assert_eq!(group.in_flight(), 0);
}
