use std::hash::Hash;
use std::pin::pin;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use tokio::sync::Notify;

/// Coalesce concurrent jobs for the same key into a single in-flight resolution.
///
/// The first caller to [`FlightMap::register`] a key owns the job; everyone else joins via
/// [`FlightMap::wait`] and observes the identical terminal value. Successes are memoized for
/// the lifetime of the map. Failures are broadcast to the waiters that had already joined,
/// but are *not* memoized: the next `register` for that key claims ownership again and starts
/// a fresh resolution.
///
/// Values and errors are cloned out of the map on every read, so both are typically wrapped
/// in an `Arc`.
pub struct FlightMap<K, V, E> {
    items: DashMap<K, Flight<V, E>>,
}

enum Flight<V, E> {
    /// A job has been claimed but has not produced a value yet.
    Pending(Arc<Broadcast<V, E>>),
    /// The job succeeded; the value is memoized permanently.
    Done(V),
    /// The job failed. Visible to late waiters, replaced by the next `register`.
    Failed(E),
}

/// The terminal value of one flight, delivered to the waiters that joined it.
///
/// Waiters hold an `Arc` to the broadcast of the flight they joined, so a key reclaimed by a
/// new `register` cannot change which outcome they observe.
struct Broadcast<V, E> {
    notify: Notify,
    outcome: OnceLock<Result<V, E>>,
}

impl<V, E> Broadcast<V, E> {
    fn new() -> Self {
        Self {
            notify: Notify::new(),
            outcome: OnceLock::new(),
        }
    }
}

impl<K: Eq + Hash, V: Clone, E: Clone> FlightMap<K, V, E> {
    /// Claim the job for `key`.
    ///
    /// Returns `true` if the caller now owns the resolution and must eventually call
    /// [`FlightMap::done`] or [`FlightMap::failed`], or other tasks will hang. Returns `false`
    /// if the job is already in flight or has already succeeded; use [`FlightMap::wait`] to
    /// observe its outcome. A previously failed entry counts as vacant.
    pub fn register(&self, key: K) -> bool {
        match self.items.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => match entry.get() {
                Flight::Pending(_) | Flight::Done(_) => false,
                Flight::Failed(_) => {
                    entry.insert(Flight::Pending(Arc::new(Broadcast::new())));
                    true
                }
            },
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Flight::Pending(Arc::new(Broadcast::new())));
                true
            }
        }
    }

    /// Submit the successful result of a job claimed via [`FlightMap::register`].
    pub fn done(&self, key: K, value: V) {
        if let Some(Flight::Pending(broadcast)) =
            self.items.insert(key, Flight::Done(value.clone()))
        {
            let _ = broadcast.outcome.set(Ok(value));
            broadcast.notify.notify_waiters();
        }
    }

    /// Submit the failure of a job claimed via [`FlightMap::register`].
    ///
    /// Waiters currently joined on the key observe the error; the key itself becomes
    /// claimable again.
    pub fn failed(&self, key: K, err: E) {
        if let Some(Flight::Pending(broadcast)) =
            self.items.insert(key, Flight::Failed(err.clone()))
        {
            let _ = broadcast.outcome.set(Err(err));
            broadcast.notify.notify_waiters();
        }
    }

    /// Wait for the terminal value of the job for `key`.
    ///
    /// Returns `None` if no job was ever registered for the key. Hangs if the owner never
    /// submits an outcome.
    pub async fn wait(&self, key: &K) -> Option<Result<V, E>> {
        let broadcast = {
            let entry = self.items.get(key)?;
            match entry.value() {
                Flight::Done(value) => return Some(Ok(value.clone())),
                Flight::Failed(err) => return Some(Err(err.clone())),
                Flight::Pending(broadcast) => Arc::clone(broadcast),
            }
        };

        // Register the waiter for calls to `notify_waiters`.
        let notification = pin!(broadcast.notify.notified());

        // The outcome may have landed between the lookup above and registering the waiter.
        if let Some(outcome) = broadcast.outcome.get() {
            return Some(outcome.clone());
        }

        notification.await;

        // The outcome is read from the flight this waiter joined, not from the map: the key
        // may already have been reclaimed by a new `register` for a fresh attempt.
        Some(
            broadcast
                .outcome
                .get()
                .expect("flight notified without an outcome")
                .clone(),
        )
    }

    /// Return the memoized success for `key`, if any.
    pub fn get(&self, key: &K) -> Option<V> {
        let entry = self.items.get(key)?;
        match entry.value() {
            Flight::Done(value) => Some(value.clone()),
            Flight::Pending(_) | Flight::Failed(_) => None,
        }
    }

    /// Returns `true` if a job for `key` is currently in flight.
    pub fn is_pending(&self, key: &K) -> bool {
        self.items
            .get(key)
            .is_some_and(|entry| matches!(entry.value(), Flight::Pending(_)))
    }
}

impl<K: Eq + Hash, V, E> Default for FlightMap<K, V, E> {
    fn default() -> Self {
        Self {
            items: DashMap::new(),
        }
    }
}
