//! Item readers.
//!
//! [`PagingItemReader`] pages over a [`PagedSource`] whose filtered record set shrinks as
//! chunks commit. Incrementing the page offset after each page would skip the records that
//! shift into the vacated range, so the reader implements one of two explicit strategies:
//!
//! - [`ReadStrategy::FrozenOffset`]: every fetch starts at offset 0. Records already handed
//!   out (skipped by the processor, or buffered in a chunk not yet committed) still match the
//!   filter, so they are dropped by id. The window starts past the delivered records seen on
//!   the previous fetch and is widened, never shifted, when it holds nothing new. Delivered
//!   ids that drop out of the window are forgotten.
//! - [`ReadStrategy::SnapshotIdRange`]: the matching ids are captured on the first read and
//!   the reader pages through slices of that snapshot, fetching current state by id.

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::config::ReadStrategy;
use crate::error::ReaderError;
use crate::store::{PagedSource, Record};

/// Pull-based source of items for a chunk runner
#[async_trait]
pub trait ItemReader<T: Send + 'static>: Send {
    /// Next item, or `None` once the source is exhausted
    async fn read(&mut self) -> Result<Option<T>, ReaderError>;
}

/// Positional state of a paging reader
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderCursor {
    /// Store round trips issued so far
    pub fetches: usize,
    pub page_size: usize,
    /// Items handed to the caller so far
    pub delivered: usize,
    pub exhausted: bool,
}

#[derive(Debug)]
enum CursorState<Id> {
    Frozen {
        /// Delivered ids not yet seen to leave the filtered set
        delivered_ids: HashSet<Id>,
        /// Delivered records inside the window on the last fetch
        lingering: usize,
    },
    Snapshot {
        ids: Option<Vec<Id>>,
        position: usize,
    },
}

pub struct PagingItemReader<S: PagedSource> {
    source: Arc<S>,
    query: S::Query,
    buffer: VecDeque<S::Record>,
    state: CursorState<<S::Record as Record>::Id>,
    cursor: ReaderCursor,
}

impl<S: PagedSource> std::fmt::Debug for PagingItemReader<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagingItemReader")
            .field("query", &self.query)
            .field("buffered", &self.buffer.len())
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl<S: PagedSource> PagingItemReader<S> {
    pub fn new(source: Arc<S>, query: S::Query, page_size: usize, strategy: ReadStrategy) -> Self {
        let state = match strategy {
            ReadStrategy::FrozenOffset => CursorState::Frozen {
                delivered_ids: HashSet::new(),
                lingering: 0,
            },
            ReadStrategy::SnapshotIdRange => CursorState::Snapshot {
                ids: None,
                position: 0,
            },
        };

        Self {
            source,
            query,
            buffer: VecDeque::new(),
            state,
            cursor: ReaderCursor {
                page_size: page_size.max(1),
                ..ReaderCursor::default()
            },
        }
    }

    pub fn strategy(&self) -> ReadStrategy {
        match self.state {
            CursorState::Frozen { .. } => ReadStrategy::FrozenOffset,
            CursorState::Snapshot { .. } => ReadStrategy::SnapshotIdRange,
        }
    }

    pub fn cursor(&self) -> ReaderCursor {
        self.cursor
    }

    async fn fill(&mut self) -> Result<(), ReaderError> {
        let page_size = self.cursor.page_size;

        match &mut self.state {
            CursorState::Frozen {
                delivered_ids,
                lingering,
            } => {
                // Start past the delivered records that still matched on the previous fetch.
                let mut limit = *lingering + page_size;
                loop {
                    let page = self.source.fetch_page(&self.query, 0, limit).await?;
                    self.cursor.fetches += 1;

                    let window_full = page.len() == limit;
                    let boundary = page.last().map(|record| record.id());
                    let (seen, fresh): (Vec<S::Record>, Vec<S::Record>) = page
                        .into_iter()
                        .partition(|record| delivered_ids.contains(&record.id()));

                    // A delivered id inside the window that is absent no longer matches.
                    let still_matching: HashSet<_> =
                        seen.iter().map(|record| record.id()).collect();
                    delivered_ids.retain(|id| {
                        still_matching.contains(id)
                            || (window_full && boundary.as_ref().is_some_and(|last| id > last))
                    });

                    if !window_full {
                        self.cursor.exhausted = true;
                    }

                    if !fresh.is_empty() {
                        let truncated = fresh.len() > page_size;
                        let taken: Vec<S::Record> = fresh.into_iter().take(page_size).collect();
                        delivered_ids.extend(taken.iter().map(|record| record.id()));
                        *lingering = seen.len() + taken.len();
                        trace!(fresh = taken.len(), limit, "Frozen-offset page fetched");
                        // Records past the taken ones are fetched again by the next fill.
                        if truncated {
                            self.cursor.exhausted = false;
                        }
                        self.buffer.extend(taken);
                        return Ok(());
                    }

                    *lingering = seen.len();
                    if self.cursor.exhausted {
                        return Ok(());
                    }

                    // Every record in the window was already delivered; look further.
                    limit += page_size;
                    debug!(limit, "Widening frozen-offset window past delivered records");
                }
            }
            CursorState::Snapshot { ids, position } => {
                if ids.is_none() {
                    let snapshot = self.source.fetch_ids(&self.query).await?;
                    self.cursor.fetches += 1;
                    debug!(snapshot_size = snapshot.len(), "Captured id snapshot");
                    *ids = Some(snapshot);
                }
                let all_ids = ids.as_deref().unwrap_or_default();

                while self.buffer.is_empty() {
                    if *position >= all_ids.len() {
                        self.cursor.exhausted = true;
                        return Ok(());
                    }

                    let end = (*position + page_size).min(all_ids.len());
                    let page = self.source.fetch_by_ids(&all_ids[*position..end]).await?;
                    self.cursor.fetches += 1;
                    *position = end;
                    self.buffer.extend(page);
                }
                Ok(())
            }
        }
    }
}

#[async_trait]
impl<S> ItemReader<S::Record> for PagingItemReader<S>
where
    S: PagedSource + 'static,
{
    async fn read(&mut self) -> Result<Option<S::Record>, ReaderError> {
        if self.buffer.is_empty() && !self.cursor.exhausted {
            self.fill().await?;
        }

        let next = self.buffer.pop_front();
        if next.is_some() {
            self.cursor.delivered += 1;
        }
        Ok(next)
    }
}

/// Reader over a pre-loaded list
#[derive(Debug, Clone, Default)]
pub struct ListItemReader<T> {
    items: VecDeque<T>,
}

impl<T> ListItemReader<T> {
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            items: items.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.items.len()
    }
}

#[async_trait]
impl<T: Send + 'static> ItemReader<T> for ListItemReader<T> {
    async fn read(&mut self) -> Result<Option<T>, ReaderError> {
        Ok(self.items.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Grade, User, UserQuery};
    use crate::store::{BatchSink, InMemoryUserStore};
    use chrono::{DateTime, TimeZone, Utc};

    fn stale() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn store_with(count: i64) -> Arc<InMemoryUserStore> {
        Arc::new(InMemoryUserStore::with_users((1..=count).map(|id| {
            User::new(id, format!("u{id}@example.com"), Grade::Silver, stale())
        })))
    }

    fn query() -> UserQuery {
        UserQuery::stale_active(Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap())
    }

    /// Read `chunk` items, commit them as inactive, repeat
    async fn drain_committing<S>(
        reader: &mut PagingItemReader<S>,
        store: &InMemoryUserStore,
        chunk: usize,
    ) -> Vec<i64>
    where
        S: PagedSource<Record = User> + 'static,
    {
        let mut seen = Vec::new();
        loop {
            let mut batch = Vec::new();
            while batch.len() < chunk {
                match reader.read().await.unwrap() {
                    Some(user) => batch.push(user.set_inactive(now())),
                    None => break,
                }
            }
            if batch.is_empty() {
                return seen;
            }
            seen.extend(batch.iter().map(|u| u.id));
            store.write_batch(&batch).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_frozen_offset_reads_every_record_while_committing() {
        let store = store_with(32);
        let mut reader =
            PagingItemReader::new(store.clone(), query(), 10, ReadStrategy::FrozenOffset);

        let seen = drain_committing(&mut reader, &store, 10).await;
        assert_eq!(seen, (1..=32).collect::<Vec<_>>());
        assert!(store.find_matching(&query()).is_empty());
        assert!(reader.cursor().exhausted);
    }

    #[tokio::test]
    async fn test_snapshot_reads_every_record_while_committing() {
        let store = store_with(25);
        let mut reader =
            PagingItemReader::new(store.clone(), query(), 7, ReadStrategy::SnapshotIdRange);

        let seen = drain_committing(&mut reader, &store, 5).await;
        assert_eq!(seen, (1..=25).collect::<Vec<_>>());
        assert_eq!(store.stats().id_snapshots(), 1);
    }

    #[tokio::test]
    async fn test_frozen_offset_skips_delivered_but_uncommitted_records() {
        // Nothing is committed, so every fetch returns the same front of the set.
        let store = store_with(9);
        let mut reader =
            PagingItemReader::new(store.clone(), query(), 4, ReadStrategy::FrozenOffset);

        let mut ids = Vec::new();
        while let Some(user) = reader.read().await.unwrap() {
            ids.push(user.id);
        }
        assert_eq!(ids, (1..=9).collect::<Vec<_>>());
        assert_eq!(reader.cursor().delivered, 9);
    }

    #[tokio::test]
    async fn test_frozen_offset_fetches_stay_linear_when_nothing_commits() {
        // Uncommitted and skipped records keep matching, so every window starts after them.
        let store = store_with(500);
        let mut reader =
            PagingItemReader::new(store.clone(), query(), 10, ReadStrategy::FrozenOffset);

        let mut count = 0;
        while reader.read().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 500);
        assert!(
            reader.cursor().fetches <= 500 / 10 + 2,
            "{} fetches for 50 pages",
            reader.cursor().fetches
        );
    }

    #[tokio::test]
    async fn test_frozen_offset_forgets_committed_ids() {
        let store = store_with(40);
        let mut reader =
            PagingItemReader::new(store.clone(), query(), 10, ReadStrategy::FrozenOffset);

        let seen = drain_committing(&mut reader, &store, 10).await;
        assert_eq!(seen.len(), 40);
        match &reader.state {
            // Only the last page, committed after its fetch, is still remembered.
            CursorState::Frozen { delivered_ids, .. } => assert!(delivered_ids.len() <= 10),
            CursorState::Snapshot { .. } => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_empty_source_is_immediately_exhausted() {
        let store = Arc::new(InMemoryUserStore::new());
        let mut reader = PagingItemReader::new(store, query(), 10, ReadStrategy::FrozenOffset);
        assert!(reader.read().await.unwrap().is_none());
        assert!(reader.read().await.unwrap().is_none());
        assert_eq!(reader.cursor().fetches, 1);
    }

    #[tokio::test]
    async fn test_list_reader_drains_in_order() {
        let mut reader = ListItemReader::new(vec!["a", "b"]);
        assert_eq!(reader.read().await.unwrap(), Some("a"));
        assert_eq!(reader.remaining(), 1);
        assert_eq!(reader.read().await.unwrap(), Some("b"));
        assert_eq!(reader.read().await.unwrap(), None);
    }
}
