//! # Record Store Contracts
//!
//! The engine is store-agnostic. A backing store only has to provide:
//!
//! - [`PagedSource`]: a predicate-filtered read returning records in a consistent id order,
//!   either by offset page or by an id snapshot
//! - [`BatchSink`]: a batch-atomic write (all records durable together or none)
//!
//! [`InMemoryUserStore`] backs tests and local runs; `PgUserStore` (feature `postgres`)
//! backs production runs.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use std::fmt::Debug;
use std::hash::Hash;
use thiserror::Error;

use crate::models::User;

pub use memory::{InMemoryUserStore, StoreStats};
#[cfg(feature = "postgres")]
pub use postgres::PgUserStore;

/// A unit of work with a stable identity
pub trait Record: Clone + Debug + Send + Sync + 'static {
    type Id: Clone + Ord + Eq + Hash + Debug + Send + Sync + 'static;

    fn id(&self) -> Self::Id;
}

impl Record for User {
    type Id = i64;

    fn id(&self) -> i64 {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Record {0} not found")]
    NotFound(String),
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            }
            other => StoreError::Database(other.to_string()),
        }
    }
}

/// Predicate-filtered, consistently ordered read access
#[async_trait]
pub trait PagedSource: Send + Sync {
    type Record: Record;
    type Query: Clone + Debug + Send + Sync;

    /// Records matching `query` in ascending id order, skipping `offset`, at most `limit`
    async fn fetch_page(
        &self,
        query: &Self::Query,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Self::Record>, StoreError>;

    /// Ids of every record matching `query`, ascending
    async fn fetch_ids(
        &self,
        query: &Self::Query,
    ) -> Result<Vec<<Self::Record as Record>::Id>, StoreError>;

    /// Current state of the given records in ascending id order; unknown ids are omitted
    async fn fetch_by_ids(
        &self,
        ids: &[<Self::Record as Record>::Id],
    ) -> Result<Vec<Self::Record>, StoreError>;
}

/// Batch-atomic write access
#[async_trait]
pub trait BatchSink: Send + Sync {
    type Record: Record;

    /// Persist every record or none of them
    async fn write_batch(&self, records: &[Self::Record]) -> Result<(), StoreError>;
}
