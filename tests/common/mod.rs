//! Shared fixtures for integration and property tests.

#![allow(dead_code)]

pub mod strategies;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use batch_core::config::BatchConfig;
use batch_core::models::{Grade, JobParameters, User, UserQuery};
use batch_core::store::{BatchSink, InMemoryUserStore, PagedSource, StoreError};

/// Reference `nowDate` for every run
pub fn now_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

/// Well past the default 12-month threshold
pub fn stale_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2022, 1, 15, 8, 30, 0).unwrap()
}

/// Inside the 12-month threshold
pub fn recent_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap()
}

pub fn job_parameters() -> JobParameters {
    JobParameters::new().add_date("nowDate", now_date())
}

/// Stale active users with consecutive ids starting at `first_id`
pub fn stale_users(first_id: i64, grade: Grade, count: usize) -> Vec<User> {
    (first_id..first_id + count as i64)
        .map(|id| User::new(id, format!("user{id}@example.com"), grade, stale_date()))
        .collect()
}

/// Stale users per grade, with grades interleaved across the id space
pub fn interleaved_users(counts: &[(Grade, usize)]) -> Vec<User> {
    let mut remaining: Vec<(Grade, usize)> = counts.to_vec();
    let mut users = Vec::new();
    let mut id = 1;

    while remaining.iter().any(|(_, left)| *left > 0) {
        for (grade, left) in remaining.iter_mut().filter(|(_, left)| *left > 0) {
            users.push(User::new(id, format!("user{id}@example.com"), *grade, stale_date()));
            id += 1;
            *left -= 1;
        }
    }
    users
}

/// The 32-record scenario: 12 VIP, 12 GOLD, 8 SILVER
pub fn scenario_store() -> InMemoryUserStore {
    InMemoryUserStore::with_users(interleaved_users(&[
        (Grade::Vip, 12),
        (Grade::Gold, 12),
        (Grade::Silver, 8),
    ]))
}

pub fn batch_config(chunk_size: usize, throttle_limit: usize, pool_size: usize) -> BatchConfig {
    let mut config = BatchConfig::default();
    config.step.chunk_size = chunk_size;
    config.pool.throttle_limit = throttle_limit;
    config.pool.pool_size = pool_size;
    config
}

/// Predicate the job selects on at run start
pub fn candidate_query() -> UserQuery {
    UserQuery::stale_active(
        batch_core::jobs::cutoff_date(now_date(), 12).expect("cutoff in range"),
    )
}

/// Store wrapper that injects faults and latency around an [`InMemoryUserStore`]
#[derive(Debug, Default)]
pub struct FaultyStore {
    pub inner: InMemoryUserStore,
    /// Fail any batch containing one of these ids
    pub poison_ids: HashSet<i64>,
    /// Fail every read once this many page fetches succeeded
    pub fail_reads_after: Option<usize>,
    /// Fail `fetch_page` outright (unreachable store)
    pub unavailable: bool,
    pub write_delay: Option<Duration>,
    /// Reject this many write calls before accepting any
    pub failing_writes: usize,
    page_fetches: AtomicUsize,
    write_calls: AtomicUsize,
    rejected_batches: AtomicUsize,
}

impl FaultyStore {
    pub fn new(inner: InMemoryUserStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    pub fn with_poison(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.poison_ids.extend(ids);
        self
    }

    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    pub fn failing_reads_after(mut self, fetches: usize) -> Self {
        self.fail_reads_after = Some(fetches);
        self
    }

    pub fn failing_first_writes(mut self, calls: usize) -> Self {
        self.failing_writes = calls;
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    pub fn rejected_batches(&self) -> usize {
        self.rejected_batches.load(Ordering::Acquire)
    }
}

#[async_trait]
impl PagedSource for FaultyStore {
    type Record = User;
    type Query = UserQuery;

    async fn fetch_page(
        &self,
        query: &UserQuery,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<User>, StoreError> {
        if self.unavailable {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        let fetched = self.page_fetches.fetch_add(1, Ordering::AcqRel);
        if self.fail_reads_after.is_some_and(|limit| fetched >= limit) {
            return Err(StoreError::Unavailable("connection reset".to_string()));
        }
        self.inner.fetch_page(query, offset, limit).await
    }

    async fn fetch_ids(&self, query: &UserQuery) -> Result<Vec<i64>, StoreError> {
        if self.unavailable {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        self.inner.fetch_ids(query).await
    }

    async fn fetch_by_ids(&self, ids: &[i64]) -> Result<Vec<User>, StoreError> {
        self.inner.fetch_by_ids(ids).await
    }
}

#[async_trait]
impl BatchSink for FaultyStore {
    type Record = User;

    async fn write_batch(&self, records: &[User]) -> Result<(), StoreError> {
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        if self.write_calls.fetch_add(1, Ordering::AcqRel) < self.failing_writes {
            self.rejected_batches.fetch_add(1, Ordering::AcqRel);
            return Err(StoreError::Unavailable("serialization failure".to_string()));
        }
        if let Some(poison) = records.iter().find(|user| self.poison_ids.contains(&user.id)) {
            self.rejected_batches.fetch_add(1, Ordering::AcqRel);
            return Err(StoreError::Database(format!(
                "constraint violation on user {}",
                poison.id
            )));
        }
        self.inner.write_batch(records).await
    }
}
