//! Bounded concurrent execution of partitions and chunk workers.

pub mod worker_pool;

pub use worker_pool::{CancellationHandle, PoolStats, WorkOutcome, WorkerPool};
