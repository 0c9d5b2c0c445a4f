use std::sync::atomic::{AtomicU64, Ordering};

/// Progress counters for metadata retrieval: requests waiting on a queue slot, transfers in
/// flight, and resolutions completed.
#[derive(Debug, Default)]
pub struct FetchCounters {
    waiting: AtomicU64,
    in_transit: AtomicU64,
    done: AtomicU64,
}

impl FetchCounters {
    pub(crate) fn queued(&self) {
        self.waiting.fetch_add(1, Ordering::Relaxed);
    }

    /// A request left the waiting state without a network transfer (cache hit, policy denial,
    /// queue rejection).
    pub(crate) fn abandoned(&self) {
        self.waiting.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn started(&self) {
        self.waiting.fetch_sub(1, Ordering::Relaxed);
        self.in_transit.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn finished(&self) {
        self.in_transit.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn completed(&self) {
        self.done.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            waiting: self.waiting.load(Ordering::Relaxed),
            in_transit: self.in_transit.load(Ordering::Relaxed),
            done: self.done.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`FetchCounters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub waiting: u64,
    pub in_transit: u64,
    pub done: u64,
}
