//! In-memory user store.
//!
//! Writes apply under a single write lock after every record has been validated, so a
//! batch is visible all at once or not at all.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{BatchSink, PagedSource, StoreError};
use crate::models::{User, UserQuery};

/// Operation counters, shared between clones of the store
#[derive(Debug, Default)]
pub struct StoreStats {
    page_fetches: AtomicUsize,
    id_snapshots: AtomicUsize,
    write_batches: AtomicUsize,
    records_written: AtomicUsize,
}

impl StoreStats {
    pub fn page_fetches(&self) -> usize {
        self.page_fetches.load(Ordering::Acquire)
    }

    pub fn id_snapshots(&self) -> usize {
        self.id_snapshots.load(Ordering::Acquire)
    }

    pub fn write_batches(&self) -> usize {
        self.write_batches.load(Ordering::Acquire)
    }

    pub fn records_written(&self) -> usize {
        self.records_written.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryUserStore {
    users: Arc<RwLock<BTreeMap<i64, User>>>,
    write_log: Arc<Mutex<Vec<Vec<i64>>>>,
    stats: Arc<StoreStats>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        let store = Self::new();
        store.insert_all(users);
        store
    }

    pub fn insert(&self, user: User) {
        self.users.write().insert(user.id, user);
    }

    pub fn insert_all(&self, users: impl IntoIterator<Item = User>) {
        let mut guard = self.users.write();
        for user in users {
            guard.insert(user.id, user);
        }
    }

    pub fn get(&self, id: i64) -> Option<User> {
        self.users.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }

    /// Every user currently matching `query`, ascending by id
    pub fn find_matching(&self, query: &UserQuery) -> Vec<User> {
        self.users
            .read()
            .values()
            .filter(|user| query.matches(user))
            .cloned()
            .collect()
    }

    /// Ids of each committed batch in commit order
    pub fn write_log(&self) -> Vec<Vec<i64>> {
        self.write_log.lock().clone()
    }

    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }
}

#[async_trait]
impl PagedSource for InMemoryUserStore {
    type Record = User;
    type Query = UserQuery;

    async fn fetch_page(
        &self,
        query: &UserQuery,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<User>, StoreError> {
        self.stats.page_fetches.fetch_add(1, Ordering::AcqRel);
        Ok(self
            .users
            .read()
            .values()
            .filter(|user| query.matches(user))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn fetch_ids(&self, query: &UserQuery) -> Result<Vec<i64>, StoreError> {
        self.stats.id_snapshots.fetch_add(1, Ordering::AcqRel);
        Ok(self
            .users
            .read()
            .values()
            .filter(|user| query.matches(user))
            .map(|user| user.id)
            .collect())
    }

    async fn fetch_by_ids(&self, ids: &[i64]) -> Result<Vec<User>, StoreError> {
        let guard = self.users.read();
        let mut users: Vec<User> = ids.iter().filter_map(|id| guard.get(id).cloned()).collect();
        users.sort_by_key(|user| user.id);
        Ok(users)
    }
}

#[async_trait]
impl BatchSink for InMemoryUserStore {
    type Record = User;

    async fn write_batch(&self, records: &[User]) -> Result<(), StoreError> {
        let mut guard = self.users.write();

        if let Some(missing) = records.iter().find(|user| !guard.contains_key(&user.id)) {
            return Err(StoreError::NotFound(format!("user {}", missing.id)));
        }

        for user in records {
            guard.insert(user.id, user.clone());
        }
        drop(guard);

        self.write_log
            .lock()
            .push(records.iter().map(|user| user.id).collect());
        self.stats.write_batches.fetch_add(1, Ordering::AcqRel);
        self.stats
            .records_written
            .fetch_add(records.len(), Ordering::AcqRel);
        Ok(())
    }
}
