//! PostgreSQL user store.
//!
//! Reads are ordered by primary key so offset pages and id snapshots agree across calls.
//! A batch write runs in one transaction and only touches the classification columns
//! (`status`, `updated_date`). A fault before COMMIT rolls the whole batch back.

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Row};

use super::{BatchSink, PagedSource, StoreError};
use crate::config::DatabaseConfig;
use crate::models::{User, UserQuery};

const USER_COLUMNS: &str = "id, email, grade, status, created_date, updated_date";

#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl std::fmt::Debug for PgUserStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgUserStore").field("pool", &"PgPool").finish()
    }
}

impl<'r> FromRow<'r, PgRow> for User {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let grade: String = row.try_get("grade")?;
        let status: String = row.try_get("status")?;

        Ok(User {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            grade: grade.parse().map_err(|e: String| sqlx::Error::ColumnDecode {
                index: "grade".to_string(),
                source: e.into(),
            })?,
            status: status.parse().map_err(|e: String| sqlx::Error::ColumnDecode {
                index: "status".to_string(),
                source: e.into(),
            })?,
            created_date: row.try_get("created_date")?,
            updated_date: row.try_get("updated_date")?,
        })
    }
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using the database section of the batch configuration
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let url = config
            .database_url()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&url)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn create_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id BIGINT PRIMARY KEY,
                email TEXT NOT NULL,
                grade TEXT NOT NULL,
                status TEXT NOT NULL,
                created_date TIMESTAMPTZ NOT NULL,
                updated_date TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_users_status_updated ON users (status, updated_date, id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn insert_users(&self, users: &[User]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for user in users {
            sqlx::query(
                r#"
                INSERT INTO users (id, email, grade, status, created_date, updated_date)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(user.id)
            .bind(&user.email)
            .bind(user.grade.as_str())
            .bind(user.status.as_str())
            .bind(user.created_date)
            .bind(user.updated_date)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl PagedSource for PgUserStore {
    type Record = User;
    type Query = UserQuery;

    async fn fetch_page(
        &self,
        query: &UserQuery,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<User>, StoreError> {
        let sql = format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE updated_date < $1
              AND status = $2
              AND ($3::TEXT IS NULL OR grade = $3)
            ORDER BY id
            LIMIT $4 OFFSET $5
            "#
        );

        let users = sqlx::query_as::<_, User>(&sql)
            .bind(query.updated_before)
            .bind(query.status.as_str())
            .bind(query.grade.map(|grade| grade.as_str()))
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await?;

        Ok(users)
    }

    async fn fetch_ids(&self, query: &UserQuery) -> Result<Vec<i64>, StoreError> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT id
            FROM users
            WHERE updated_date < $1
              AND status = $2
              AND ($3::TEXT IS NULL OR grade = $3)
            ORDER BY id
            "#,
        )
        .bind(query.updated_before)
        .bind(query.status.as_str())
        .bind(query.grade.map(|grade| grade.as_str()))
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn fetch_by_ids(&self, ids: &[i64]) -> Result<Vec<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ANY($1) ORDER BY id");

        let users = sqlx::query_as::<_, User>(&sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;

        Ok(users)
    }
}

#[async_trait]
impl BatchSink for PgUserStore {
    type Record = User;

    async fn write_batch(&self, records: &[User]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        for user in records {
            let result = sqlx::query(
                r#"
                UPDATE users
                SET status = $2, updated_date = $3
                WHERE id = $1
                "#,
            )
            .bind(user.id)
            .bind(user.status.as_str())
            .bind(user.updated_date)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() != 1 {
                // tx is dropped here, rolling back earlier updates of this batch
                return Err(StoreError::NotFound(format!("user {}", user.id)));
            }
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReadStrategy;
    use crate::item::{ItemReader, PagingItemReader};
    use crate::models::{Grade, UserStatus};
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::Arc;

    fn stale() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 1, 15, 0, 0, 0).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn query() -> UserQuery {
        UserQuery::stale_active(Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap())
    }

    async fn seeded(pool: PgPool, count: i64) -> PgUserStore {
        let store = PgUserStore::new(pool);
        store.create_schema().await.expect("schema");
        let users: Vec<User> = (1..=count)
            .map(|id| {
                let grade = Grade::ALL[(id as usize) % Grade::ALL.len()];
                User::new(id, format!("user{id}@example.com"), grade, stale())
            })
            .collect();
        store.insert_users(&users).await.expect("seed users");
        store
    }

    #[sqlx::test(migrations = false)]
    async fn test_frozen_offset_reader_covers_every_row_while_committing(pool: PgPool) {
        let store = Arc::new(seeded(pool, 23).await);
        let mut reader =
            PagingItemReader::new(Arc::clone(&store), query(), 5, ReadStrategy::FrozenOffset);

        let mut seen = Vec::new();
        loop {
            let mut chunk = Vec::new();
            while chunk.len() < 4 {
                match reader.read().await.unwrap() {
                    Some(user) => chunk.push(user.set_inactive(now())),
                    None => break,
                }
            }
            if chunk.is_empty() {
                break;
            }
            seen.extend(chunk.iter().map(|user| user.id));
            store.write_batch(&chunk).await.unwrap();
        }

        assert_eq!(seen, (1..=23).collect::<Vec<_>>());
        assert!(store.fetch_ids(&query()).await.unwrap().is_empty());
    }

    #[sqlx::test(migrations = false)]
    async fn test_grade_filter_and_fetch_by_ids(pool: PgPool) {
        let store = seeded(pool, 9).await;

        let vip = store
            .fetch_ids(&query().with_grade(Grade::Vip))
            .await
            .unwrap();
        assert_eq!(vip, vec![3, 6, 9]);

        let users = store.fetch_by_ids(&[9, 2, 404]).await.unwrap();
        assert_eq!(users.iter().map(|user| user.id).collect::<Vec<_>>(), vec![2, 9]);

        let page = store.fetch_page(&query(), 0, 4).await.unwrap();
        assert_eq!(page.iter().map(|user| user.id).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    }

    #[sqlx::test(migrations = false)]
    async fn test_write_batch_is_all_or_nothing(pool: PgPool) {
        let store = seeded(pool, 5).await;
        let mut batch: Vec<User> = store
            .fetch_by_ids(&[1, 2])
            .await
            .unwrap()
            .into_iter()
            .map(|user| user.set_inactive(now()))
            .collect();
        batch.push(User::new(404, "ghost@example.com", Grade::Gold, stale()).set_inactive(now()));

        let error = store.write_batch(&batch).await.unwrap_err();
        assert_eq!(error, StoreError::NotFound("user 404".to_string()));

        let users = store.fetch_by_ids(&[1, 2]).await.unwrap();
        assert!(users.iter().all(|user| user.status == UserStatus::Active));
        assert_eq!(store.fetch_ids(&query()).await.unwrap().len(), 5);
    }

    #[sqlx::test(migrations = false)]
    async fn test_write_batch_keeps_concurrent_edits_to_other_columns(pool: PgPool) {
        let store = seeded(pool, 1).await;
        let read = store.fetch_by_ids(&[1]).await.unwrap();

        sqlx::query("UPDATE users SET email = 'moved@example.com', grade = 'VIP' WHERE id = 1")
            .execute(store.pool())
            .await
            .unwrap();

        let batch: Vec<User> = read.into_iter().map(|user| user.set_inactive(now())).collect();
        store.write_batch(&batch).await.unwrap();

        let user = store.fetch_by_ids(&[1]).await.unwrap().remove(0);
        assert_eq!(user.status, UserStatus::Inactive);
        assert_eq!(user.updated_date, now());
        assert_eq!(user.email, "moved@example.com");
        assert_eq!(user.grade, Grade::Vip);
    }
}
