//! Worker Pool with per-step throttling
//!
//! The pool owns a fixed number of execution slots shared by every step the orchestrator
//! runs. Each dispatch additionally takes a throttle limit: at most that many of its units
//! hold a slot at once, the rest queue. A unit keeps its slots until it reaches a terminal
//! state, and a panic in one unit is contained to that unit.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Stop signal for dispatching new work; in-flight units run to completion
#[derive(Debug, Clone, Default)]
pub struct CancellationHandle {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            info!("Cancellation requested, no further work will be dispatched");
        }
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Live gauges for the pool
#[derive(Debug, Default)]
pub struct PoolStats {
    active: AtomicUsize,
    max_active: AtomicUsize,
    dispatched: AtomicUsize,
    completed: AtomicUsize,
    panicked: AtomicUsize,
}

impl PoolStats {
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Highest number of simultaneously active units observed
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::Acquire)
    }

    pub fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::Acquire)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    pub fn panicked(&self) -> usize {
        self.panicked.load(Ordering::Acquire)
    }

    fn enter(self: &Arc<Self>) -> ActiveGuard {
        let now_active = self.active.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_active.fetch_max(now_active, Ordering::AcqRel);
        ActiveGuard {
            stats: Arc::clone(self),
        }
    }
}

struct ActiveGuard {
    stats: Arc<PoolStats>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.stats.active.fetch_sub(1, Ordering::AcqRel);
        self.stats.completed.fetch_add(1, Ordering::AcqRel);
    }
}

/// Terminal outcome of one dispatched unit
#[derive(Debug)]
pub enum WorkOutcome<R> {
    Completed(R),
    /// The unit panicked; siblings were unaffected
    Panicked(String),
    /// Cancellation arrived before the unit got a slot
    NotDispatched,
}

impl<R> WorkOutcome<R> {
    pub fn completed(self) -> Option<R> {
        match self {
            Self::Completed(result) => Some(result),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    slots: Arc<Semaphore>,
    pool_size: usize,
    stats: Arc<PoolStats>,
}

impl WorkerPool {
    pub fn new(pool_size: usize) -> Self {
        let pool_size = pool_size.max(1);
        Self {
            slots: Arc::new(Semaphore::new(pool_size)),
            pool_size,
            stats: Arc::new(PoolStats::default()),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Run every unit to a terminal state, at most `throttle_limit` at a time.
    ///
    /// Outcomes are returned in input order. Returns only after every dispatched unit has
    /// finished.
    pub async fn dispatch<K, Fut>(
        &self,
        throttle_limit: usize,
        units: Vec<(K, Fut)>,
        cancellation: &CancellationHandle,
    ) -> Vec<(K, WorkOutcome<Fut::Output>)>
    where
        K: Send + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let throttle = Arc::new(Semaphore::new(throttle_limit.max(1)));
        let mut keys = Vec::with_capacity(units.len());
        let mut outcomes: Vec<Option<WorkOutcome<Fut::Output>>> = Vec::with_capacity(units.len());
        let mut join_set = JoinSet::new();

        debug!(
            units = units.len(),
            throttle_limit = throttle_limit,
            pool_size = self.pool_size,
            "Dispatching work units"
        );

        for (index, (key, unit)) in units.into_iter().enumerate() {
            keys.push(key);
            outcomes.push(None);

            let permits = if cancellation.is_cancelled() {
                None
            } else {
                tokio::select! {
                    biased;
                    _ = cancellation.cancelled() => None,
                    permits = self.acquire(&throttle) => permits,
                }
            };

            let Some(permits) = permits else {
                outcomes[index] = Some(WorkOutcome::NotDispatched);
                continue;
            };

            self.stats.dispatched.fetch_add(1, Ordering::AcqRel);
            let stats = Arc::clone(&self.stats);
            join_set.spawn(async move {
                let _permits = permits;
                let _active = stats.enter();
                let result = AssertUnwindSafe(unit).catch_unwind().await;
                (index, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, Ok(result))) => outcomes[index] = Some(WorkOutcome::Completed(result)),
                Ok((index, Err(panic))) => {
                    let message = panic_message(panic.as_ref());
                    self.stats.panicked.fetch_add(1, Ordering::AcqRel);
                    error!(unit = index, panic = %message, "Work unit panicked");
                    outcomes[index] = Some(WorkOutcome::Panicked(message));
                }
                Err(join_error) => {
                    // Units are never aborted, so this only happens on runtime shutdown.
                    warn!(error = %join_error, "Work unit did not complete");
                }
            }
        }

        keys.into_iter()
            .zip(outcomes)
            .map(|(key, outcome)| {
                let outcome = outcome.unwrap_or_else(|| {
                    WorkOutcome::Panicked("work unit terminated without a result".to_string())
                });
                (key, outcome)
            })
            .collect()
    }

    /// Throttle slot first, then a pool slot; `None` if a semaphore was closed
    async fn acquire(
        &self,
        throttle: &Arc<Semaphore>,
    ) -> Option<(OwnedSemaphorePermit, OwnedSemaphorePermit)> {
        let throttle_permit = Arc::clone(throttle).acquire_owned().await.ok()?;
        let pool_permit = Arc::clone(&self.slots).acquire_owned().await.ok()?;
        Some((throttle_permit, pool_permit))
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
