// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Coalesces concurrent work for the same key into a single execution.
//!
//! [`Coalescer`] keeps a registry of in-flight groups, one per key. The first caller to
//! ask for a key that has no group becomes the **leader**: it runs the work closure.
//! Every caller that asks for the same key while the leader is still running becomes a
//! **follower**: it parks until the leader publishes and then receives a clone of the
//! leader's result. The leader's group is removed in the same critical section that
//! publishes the result, so the next caller after that starts a fresh **wave**.
//!
//! # Example
//!
//! ```
//! use stampede_flight::Coalescer;
//!
//! # async fn example() {
//! let coalescer: Coalescer<String, u64> = Coalescer::new();
//!
//! let flight = coalescer
//!     .coalesce("product:popular".to_string(), || async {
//!         // Runs at most once per wave, no matter how many callers are waiting.
//!         42
//!     })
//!     .await
//!     .expect("the leader published");
//!
//! assert_eq!(*flight.value(), 42);
//! assert!(!flight.is_shared());
//! # }
//! ```
//!
//! # Errors are values
//!
//! The registry does not interpret the result. Use `T = Result<V, E>` with a `Clone`
//! error to fan a failure out to every follower of the wave: nobody retries on their own,
//! and the next wave starts clean.
//!
//! # Leader cancellation and panics
//!
//! [`Coalescer::coalesce`] runs the work inside the leader's own future. If that future
//! is dropped, or the work panics, before a result is published, the group is removed
//! and every follower of the wave receives [`Abandoned`]. Callers arriving afterwards
//! start a new wave.
//!
//! [`Coalescer::coalesce_detached`] runs the work on a spawned Tokio task that publishes
//! the result itself. The leader only waits for it, so a leader that gives up does not
//! take the wave down with it: the work still runs once and every follower still gets
//! the result. Only a panic in the work releases the wave with [`Abandoned`].
//!
//! # Limitations
//!
//! Followers wait without a timeout. Work that never completes stalls every follower of
//! its key; wrap the call in a deadline if the caller needs one.

use std::{
    collections::HashMap,
    fmt,
    hash::Hash,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use parking_lot::Mutex;
use tokio::sync::watch;

/// The leader of a wave stopped before publishing a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("the leader of this coalescing wave stopped before publishing a result")]
pub struct Abandoned;

/// How a caller took part in a wave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Ran the work.
    Leader,
    /// Waited for the leader and received a copy of its result.
    Follower,
}

/// The result of [`Coalescer::coalesce`] together with the caller's role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flight<T> {
    value: T,
    role: Role,
}

impl<T> Flight<T> {
    /// Returns the result of the wave.
    #[must_use]
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Consumes the flight and returns the result of the wave.
    #[must_use]
    pub fn into_value(self) -> T {
        self.value
    }

    /// Returns the caller's role in the wave.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns `true` if the caller reused another caller's result.
    #[must_use]
    pub fn is_shared(&self) -> bool {
        self.role == Role::Follower
    }
}

struct Group<T> {
    outcome: watch::Receiver<Option<T>>,
    followers: AtomicUsize,
}

type Groups<K, T> = Arc<Mutex<HashMap<K, Arc<Group<T>>>>>;

/// Registry of in-flight coalescing groups keyed by `K`.
///
/// One mutex covers looking up, creating, publishing and removing groups. It is never
/// held while work runs or while followers wait, so unrelated keys do not block each
/// other.
pub struct Coalescer<K, T> {
    groups: Groups<K, T>,
}

impl<K, T> Default for Coalescer<K, T> {
    fn default() -> Self {
        Self {
            groups: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, T> fmt::Debug for Coalescer<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coalescer")
            .field("in_flight", &self.groups.lock().len())
            .finish()
    }
}

enum Join<K: Hash + Eq, T> {
    Lead(LeaderGuard<K, T>),
    Follow(Follower<T>),
}

impl<K, T> Coalescer<K, T>
where
    K: Hash + Eq + Clone,
{
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `work` for `key` unless a wave for `key` is already in flight, in which case
    /// the caller waits for that wave's result instead.
    ///
    /// Within one wave `work` executes exactly once; followers drop their closure
    /// without calling it.
    ///
    /// # Errors
    ///
    /// Returns [`Abandoned`] to followers whose leader was dropped or panicked before
    /// publishing. The leader itself never observes this error.
    pub async fn coalesce<F, Fut>(&self, key: K, work: F) -> Result<Flight<T>, Abandoned>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
        T: Clone,
    {
        match self.join(key) {
            Join::Lead(guard) => {
                let value = work().await;
                guard.publish(value.clone());
                Ok(Flight { value, role: Role::Leader })
            }
            Join::Follow(follower) => {
                drop(work);
                follower.wait().await
            }
        }
    }

    /// Like [`coalesce`](Self::coalesce), but the leader's work runs on a spawned Tokio
    /// task that publishes the result.
    ///
    /// Dropping the leader's future only stops the leader from waiting. The work keeps
    /// running and its result still reaches every follower of the wave. Must be called
    /// from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Abandoned`] to every caller of the wave, the leader included, if the
    /// work panics or its task is cancelled by runtime shutdown.
    pub async fn coalesce_detached<F, Fut>(&self, key: K, work: F) -> Result<Flight<T>, Abandoned>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        K: Send + Sync + 'static,
        T: Clone + Send + Sync + 'static,
    {
        match self.join(key) {
            Join::Lead(guard) => {
                let mut outcome = guard.group.outcome.clone();
                let task = work();
                tokio::spawn(async move {
                    let value = task.await;
                    guard.publish(value);
                });

                let value = published(&mut outcome).await?;
                Ok(Flight { value, role: Role::Leader })
            }
            Join::Follow(follower) => {
                drop(work);
                follower.wait().await
            }
        }
    }

    /// Returns the number of keys with a wave in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.groups.lock().len()
    }

    /// Returns how many followers are parked on the wave for `key`, or `None` if no
    /// wave is in flight for it.
    ///
    /// Followers whose future was dropped are no longer counted.
    #[must_use]
    pub fn waiting(&self, key: &K) -> Option<usize> {
        self.groups
            .lock()
            .get(key)
            .map(|group| group.followers.load(Ordering::Acquire))
    }

    fn join(&self, key: K) -> Join<K, T> {
        let mut groups = self.groups.lock();

        if let Some(group) = groups.get(&key) {
            group.followers.fetch_add(1, Ordering::AcqRel);
            return Join::Follow(Follower {
                outcome: group.outcome.clone(),
                group: Arc::clone(group),
            });
        }

        let (sender, outcome) = watch::channel(None);
        let group = Arc::new(Group {
            outcome,
            followers: AtomicUsize::new(0),
        });
        groups.insert(key.clone(), Arc::clone(&group));

        Join::Lead(LeaderGuard {
            groups: Arc::clone(&self.groups),
            key,
            group,
            sender: Some(sender),
        })
    }
}

/// Owns the leader's side of a group until the result is published.
///
/// Dropping the guard unpublished closes the channel, which releases the followers with
/// [`Abandoned`].
struct LeaderGuard<K: Hash + Eq, T> {
    groups: Groups<K, T>,
    key: K,
    group: Arc<Group<T>>,
    sender: Option<watch::Sender<Option<T>>>,
}

impl<K: Hash + Eq, T> LeaderGuard<K, T> {
    fn publish(mut self, value: T) {
        let mut groups = self.groups.lock();
        let followers = self.group.followers.load(Ordering::Acquire);
        if let Some(sender) = self.sender.take() {
            sender.send_replace(Some(value));
        }
        self.remove_own_group(&mut groups);
        drop(groups);

        tracing::debug!(coalesce.followers = followers, "coalescing wave completed");
    }

    fn remove_own_group(&self, groups: &mut HashMap<K, Arc<Group<T>>>) {
        if groups.get(&self.key).is_some_and(|current| Arc::ptr_eq(current, &self.group)) {
            groups.remove(&self.key);
        }
    }
}

impl<K: Hash + Eq, T> Drop for LeaderGuard<K, T> {
    fn drop(&mut self) {
        let Some(sender) = self.sender.take() else {
            return;
        };

        let mut groups = self.groups.lock();
        self.remove_own_group(&mut groups);
        drop(groups);
        drop(sender);

        tracing::warn!(
            coalesce.followers = self.group.followers.load(Ordering::Acquire),
            "coalescing leader stopped before publishing; releasing followers"
        );
    }
}

/// A caller parked on another caller's wave. Counted in its group's `followers` for as
/// long as it exists.
struct Follower<T> {
    outcome: watch::Receiver<Option<T>>,
    group: Arc<Group<T>>,
}

impl<T: Clone> Follower<T> {
    async fn wait(mut self) -> Result<Flight<T>, Abandoned> {
        let value = published(&mut self.outcome).await?;
        Ok(Flight {
            value,
            role: Role::Follower,
        })
    }
}

impl<T> Drop for Follower<T> {
    fn drop(&mut self) {
        self.group.followers.fetch_sub(1, Ordering::AcqRel);
    }
}

async fn published<T: Clone>(outcome: &mut watch::Receiver<Option<T>>) -> Result<T, Abandoned> {
    let published = outcome.wait_for(Option::is_some).await.map_err(|_closed| Abandoned)?;
    Option::clone(&published).ok_or(Abandoned)
}
