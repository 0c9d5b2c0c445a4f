use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{Semaphore, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::Error;

/// How often the watcher scans for stuck fetches (and how old a fetch must be to be
/// reported).
const WATCH_INTERVAL: Duration = Duration::from_secs(5);

/// A fetch taking longer than this is reported as anomalous once it completes.
const LONG_FETCH: Duration = Duration::from_secs(20);

struct PendingFetch {
    label: String,
    queued_at: Instant,
    started: AtomicBool,
}

/// A bounded-concurrency queue for network retrievals.
///
/// Jobs run on their own tasks, but only `concurrency` of them hold a dispatch permit at a
/// time. The first failure flips the queue into an aborted state: jobs that have not started
/// yet are rejected with [`Error::QueueAborted`] instead of being dispatched, so one broken
/// fetch does not leave dozens of doomed transfers running. A watcher task periodically
/// reports jobs stuck waiting or in flight; the report is advisory, nothing is cancelled.
pub(crate) struct FetchQueue {
    permits: Arc<Semaphore>,
    aborted: Arc<AtomicBool>,
    pending: Arc<DashMap<u64, PendingFetch>>,
    next_id: AtomicU64,
    watcher: JoinHandle<()>,
}

impl FetchQueue {
    /// Create a queue. Spawns the watcher task, so this must run inside a runtime.
    pub(crate) fn new(concurrency: usize) -> Self {
        let pending: Arc<DashMap<u64, PendingFetch>> = Arc::default();
        let watcher = tokio::spawn(watch(Arc::clone(&pending)));
        Self {
            permits: Arc::new(Semaphore::new(concurrency)),
            aborted: Arc::new(AtomicBool::new(false)),
            pending,
            next_id: AtomicU64::new(0),
            watcher,
        }
    }

    /// Whether an earlier failure has put the queue into the rejecting state.
    pub(crate) fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Submit a job and wait for it to run (or be rejected).
    pub(crate) async fn enqueue<T, F>(&self, label: String, job: F) -> Result<T, Error>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, Error>> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.pending.insert(
            id,
            PendingFetch {
                label: label.clone(),
                queued_at: Instant::now(),
                started: AtomicBool::new(false),
            },
        );

        let permits = Arc::clone(&self.permits);
        let aborted = Arc::clone(&self.aborted);
        let pending = Arc::clone(&self.pending);
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let result = async {
                let _permit = permits
                    .acquire()
                    .await
                    .expect("fetch queue semaphore closed");
                if aborted.load(Ordering::SeqCst) {
                    return Err(Error::QueueAborted);
                }
                if let Some(item) = pending.get(&id) {
                    item.started.store(true, Ordering::Relaxed);
                }

                let started_at = Instant::now();
                let result = job.await;
                let elapsed = started_at.elapsed();
                if elapsed > LONG_FETCH {
                    info!("Fetch of {label} took {}s", elapsed.as_secs());
                }
                if result.is_err() && !aborted.swap(true, Ordering::SeqCst) {
                    error!("Fetch of {label} failed; rejecting queued fetches");
                }
                result
            }
            .await;
            pending.remove(&id);
            // The caller may have gone away; a dropped receiver is fine.
            let _ = tx.send(result);
        });

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::QueueAborted),
        }
    }
}

impl Drop for FetchQueue {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

async fn watch(pending: Arc<DashMap<u64, PendingFetch>>) {
    let mut interval = tokio::time::interval(WATCH_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        for item in pending.iter() {
            let elapsed = item.queued_at.elapsed();
            if elapsed < WATCH_INTERVAL {
                continue;
            }
            let state = if item.started.load(Ordering::Relaxed) {
                "in flight"
            } else {
                "waiting"
            };
            warn!("Fetch of {} still {state} after {}s", item.label, elapsed.as_secs());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::error::Error;

    use super::FetchQueue;

    #[tokio::test]
    async fn jobs_run_and_return_their_values() {
        let queue = FetchQueue::new(4);
        let value = queue
            .enqueue("ok".to_string(), async { Ok::<_, Error>(42) })
            .await
            .unwrap();
        assert_eq!(value, 42);
        assert!(!queue.is_aborted());
    }

    #[tokio::test]
    async fn dispatch_is_bounded_by_the_permit_budget() {
        let queue = Arc::new(FetchQueue::new(2));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles = (0..8)
            .map(|index| {
                let queue = Arc::clone(&queue);
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    queue
                        .enqueue(format!("job-{index}"), async move {
                            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            active.fetch_sub(1, Ordering::SeqCst);
                            Ok::<_, Error>(index)
                        })
                        .await
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn failure_mid_flight_spares_running_jobs_and_rejects_queued_ones() {
        let queue = Arc::new(FetchQueue::new(2));

        // Two jobs take the dispatch permits: one slow success, one early failure.
        let slow = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                queue
                    .enqueue("item-1".to_string(), async {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok::<_, Error>(1)
                    })
                    .await
            })
        };
        let failing = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                queue
                    .enqueue("item-2".to_string(), async {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Err::<usize, _>(Error::NotFound("item-2".to_string()))
                    })
                    .await
            })
        };
        // Let both occupy the permits before the rest line up behind them.
        tokio::time::sleep(Duration::from_millis(10)).await;

        let ran = Arc::new(AtomicBool::new(false));
        let queued = (3..=5)
            .map(|index| {
                let queue = Arc::clone(&queue);
                let flag = Arc::clone(&ran);
                tokio::spawn(async move {
                    queue
                        .enqueue(format!("item-{index}"), async move {
                            flag.store(true, Ordering::SeqCst);
                            Ok::<_, Error>(index)
                        })
                        .await
                })
            })
            .collect::<Vec<_>>();

        // The already-dispatched job runs to completion; the failure surfaces to its caller.
        assert_eq!(slow.await.unwrap().unwrap(), 1);
        assert!(matches!(
            failing.await.unwrap(),
            Err(Error::NotFound(_))
        ));
        // Everything still waiting for a permit is rejected without running.
        for handle in queued {
            assert!(matches!(
                handle.await.unwrap(),
                Err(Error::QueueAborted)
            ));
        }
        assert!(!ran.load(Ordering::SeqCst));
        assert!(queue.is_aborted());
    }

    #[tokio::test]
    async fn first_failure_rejects_later_jobs_before_they_run() {
        let queue = FetchQueue::new(2);

        let failed = queue
            .enqueue("bad".to_string(), async {
                Err::<(), _>(Error::NotFound("bad".to_string()))
            })
            .await;
        assert!(matches!(failed, Err(Error::NotFound(_))));
        assert!(queue.is_aborted());

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let rejected = queue
            .enqueue("late".to_string(), async move {
                flag.store(true, Ordering::SeqCst);
                Ok::<_, Error>(())
            })
            .await;
        assert!(matches!(rejected, Err(Error::QueueAborted)));
        assert!(!ran.load(Ordering::SeqCst));
    }
}
