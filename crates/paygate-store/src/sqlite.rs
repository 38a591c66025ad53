//! SQLite document store
//!
//! Documents are stored as JSON text keyed by their full path. A single-row
//! `store_meta` table holds the global revision; every transaction bumps it
//! first, which takes the SQLite write lock up front and gives all writes of
//! the transaction the same revision.
//!
//! Subscriptions poll (default every 250 ms) so several processes sharing
//! one database file see each other's commits. Commits made through this
//! handle wake local subscriptions immediately.
//!
//! ```no_run
//! use paygate_store::SqliteStore;
//!
//! # async fn example() -> paygate_core::StoreResult<()> {
//! // Default location: ~/.paygate/access.db
//! let store = SqliteStore::new_default().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::Utc;
use paygate_core::store::{check_expected, merge_fields, DEFAULT_BUFFER};
use paygate_core::{
    AccessStore, CollectionPath, Document, DocumentPath, StoreError, StoreResult, Subscription,
    Write,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::feed;

/// Default subscription poll interval in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

fn db_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(err.to_string())
        }
        other => StoreError::Database(other.to_string()),
    }
}

fn parse_body(body: &str) -> StoreResult<Document> {
    Ok(serde_json::from_str(body)?)
}

/// Persistent `AccessStore` on a SQLite file
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    commits: Arc<watch::Sender<u64>>,
    poll_interval: Duration,
}

impl SqliteStore {
    /// Open (or create) the database at `path`
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened or migrated.
    pub async fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::with_options(path, Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)).await
    }

    /// Open with a custom subscription poll interval
    pub async fn with_options(path: impl AsRef<Path>, poll_interval: Duration) -> StoreResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!("failed to create database directory: {}", e))
            })?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| StoreError::Database(format!("invalid SQLite path: {}", e)))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(db_error)?;

        let (commits, _) = watch::channel(0);
        let store = Self {
            pool,
            commits: Arc::new(commits),
            poll_interval,
        };
        store.migrate().await?;

        info!(
            path = %path.display(),
            poll_ms = poll_interval.as_millis() as u64,
            "SQLite access store initialized"
        );
        Ok(store)
    }

    /// Open the store at the default location (~/.paygate/access.db)
    pub async fn new_default() -> StoreResult<Self> {
        let path = Self::default_path()?;
        Self::new(&path).await
    }

    /// Default database path
    pub fn default_path() -> StoreResult<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| {
            StoreError::Unavailable("could not determine home directory".to_string())
        })?;
        Ok(home.join(".paygate").join("access.db"))
    }

    async fn migrate(&self) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                path TEXT PRIMARY KEY,
                collection TEXT NOT NULL,
                body TEXT NOT NULL,
                revision INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection)")
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS store_meta (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                revision INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        sqlx::query("INSERT OR IGNORE INTO store_meta (id, revision) VALUES (1, 0)")
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        debug!("SQLite access schema initialized");
        Ok(())
    }

    /// Global revision of the last commit
    pub async fn revision(&self) -> StoreResult<u64> {
        let (revision,): (i64,) = sqlx::query_as("SELECT revision FROM store_meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(revision as u64)
    }

    /// Check database health
    pub async fn health_check(&self) -> StoreResult<bool> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(true)
    }
}

async fn read_document(pool: &SqlitePool, key: &str) -> StoreResult<(u64, Option<Document>)> {
    let row: Option<(String, i64)> =
        sqlx::query_as("SELECT body, revision FROM documents WHERE path = ?")
            .bind(key)
            .fetch_optional(pool)
            .await
            .map_err(db_error)?;

    match row {
        Some((body, revision)) => Ok((revision as u64, Some(parse_body(&body)?))),
        None => Ok((0, None)),
    }
}

async fn read_collection(pool: &SqlitePool, collection: &str) -> StoreResult<(u64, Vec<Document>)> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT body, revision FROM documents WHERE collection = ? ORDER BY path")
            .bind(collection)
            .fetch_all(pool)
            .await
            .map_err(db_error)?;

    let version = rows.iter().map(|(_, rev)| *rev as u64).max().unwrap_or(0);
    let documents = rows
        .iter()
        .map(|(body, _)| parse_body(body))
        .collect::<StoreResult<Vec<_>>>()?;
    Ok((version, documents))
}

#[async_trait]
impl AccessStore for SqliteStore {
    async fn get(&self, path: &DocumentPath) -> StoreResult<Option<Document>> {
        let (_, document) = read_document(&self.pool, &path.to_string()).await?;
        Ok(document)
    }

    async fn set(&self, path: &DocumentPath, value: Document) -> StoreResult<()> {
        self.transact(vec![Write::Set {
            path: path.clone(),
            value,
        }])
        .await
    }

    async fn update(&self, path: &DocumentPath, fields: Document) -> StoreResult<()> {
        self.transact(vec![Write::Update {
            path: path.clone(),
            fields,
        }])
        .await
    }

    async fn transact(&self, writes: Vec<Write>) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        sqlx::query("UPDATE store_meta SET revision = revision + 1 WHERE id = 1")
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        let (revision,): (i64,) = sqlx::query_as("SELECT revision FROM store_meta WHERE id = 1")
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error)?;

        let now = Utc::now().to_rfc3339();
        let count = writes.len();

        for write in writes {
            let key = write.path().to_string();
            let collection = write.path().collection().to_string();

            let existing: Option<(String,)> =
                sqlx::query_as("SELECT body FROM documents WHERE path = ?")
                    .bind(&key)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(db_error)?;
            let current = existing.map(|(body,)| parse_body(&body)).transpose()?;

            // an early return drops `tx`, which rolls everything back
            let body = match write {
                Write::Expect { fields, .. } => {
                    check_expected(&key, current.as_ref(), &fields)?;
                    continue;
                }
                Write::Set { value, .. } => value,
                Write::Update { fields, .. } => {
                    let mut body = current.ok_or_else(|| StoreError::NotFound(key.clone()))?;
                    merge_fields(&mut body, fields);
                    body
                }
                Write::Merge { fields, .. } => {
                    let mut body = current.unwrap_or_default();
                    merge_fields(&mut body, fields);
                    body
                }
            };
            let body = serde_json::to_string(&body)?;

            sqlx::query(
                r#"
                INSERT INTO documents (path, collection, body, revision, updated_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(path) DO UPDATE SET
                    body = excluded.body,
                    revision = excluded.revision,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&key)
            .bind(&collection)
            .bind(&body)
            .bind(revision)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        tx.commit().await.map_err(db_error)?;
        self.commits.send_replace(revision as u64);
        debug!(revision, documents = count, "SQLite transaction committed");
        Ok(())
    }

    async fn subscribe(&self, path: &DocumentPath) -> StoreResult<Subscription<Option<Document>>> {
        let key = path.to_string();
        let pool = self.pool.clone();
        let commits = self.commits.subscribe();
        let poll = Some(self.poll_interval);

        Ok(Subscription::spawn(key.clone(), DEFAULT_BUFFER, move |sink| {
            feed::drive(key.clone(), sink, commits, poll, move || {
                let pool = pool.clone();
                let key = key.clone();
                async move { read_document(&pool, &key).await }
            })
        }))
    }

    async fn subscribe_collection(
        &self,
        path: &CollectionPath,
    ) -> StoreResult<Subscription<Vec<Document>>> {
        let collection = path.to_string();
        let pool = self.pool.clone();
        let commits = self.commits.subscribe();
        let poll = Some(self.poll_interval);

        Ok(Subscription::spawn(collection.clone(), DEFAULT_BUFFER, move |sink| {
            feed::drive(collection.clone(), sink, commits, poll, move || {
                let pool = pool.clone();
                let collection = collection.clone();
                async move { read_collection(&pool, &collection).await }
            })
        }))
    }
}
