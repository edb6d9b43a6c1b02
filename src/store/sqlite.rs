// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite-backed entity store.
//!
//! Entities survive process restarts, so a run interrupted halfway picks up
//! the writes it already made: the next run sees those entities and only
//! updates what drifted.
//!
//! Uniqueness is enforced by the schema. A `UNIQUE` violation on insert or
//! update becomes [`ReplicaError::Conflict`].
//!
//! # SQLite Busy Handling
//!
//! SQLite can return SQLITE_BUSY/SQLITE_LOCKED when the database is
//! contended (e.g. the job engine applying distribution jobs while the
//! reconciler writes). Every statement is retried with exponential backoff.

use super::EntityStore;
use crate::config::StoreConfig;
use crate::error::{ReplicaError, Result};
use crate::jobs::BoxFuture;
use crate::model::{Distribution, EntityId, Fields, Remote, Repository};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Configuration for SQLite busy retry behavior
const SQLITE_RETRY_MAX_ATTEMPTS: u32 = 5;
const SQLITE_RETRY_BASE_DELAY_MS: u64 = 10;
const SQLITE_RETRY_MAX_DELAY_MS: u64 = 500;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS remotes (
        id TEXT PRIMARY KEY,
        backend TEXT NOT NULL,
        name TEXT NOT NULL,
        url TEXT NOT NULL,
        fields TEXT NOT NULL,
        updated_at INTEGER NOT NULL,
        UNIQUE (backend, name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS repositories (
        id TEXT PRIMARY KEY,
        backend TEXT NOT NULL,
        name TEXT NOT NULL,
        remote TEXT,
        fields TEXT NOT NULL,
        updated_at INTEGER NOT NULL,
        UNIQUE (backend, name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS distributions (
        id TEXT PRIMARY KEY,
        backend TEXT NOT NULL,
        name TEXT NOT NULL UNIQUE,
        base_path TEXT NOT NULL UNIQUE,
        repository TEXT,
        publication TEXT,
        updated_at INTEGER NOT NULL
    )
    "#,
];

/// Check if an error is a retryable SQLite busy/locked error
fn is_sqlite_busy_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => {
            // SQLite error codes: SQLITE_BUSY = 5, SQLITE_LOCKED = 6
            if let Some(code) = db_err.code() {
                return code == "5" || code == "6";
            }
            let msg = db_err.message().to_lowercase();
            msg.contains("database is locked") || msg.contains("database is busy")
        }
        _ => false,
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => {
            db_err.is_unique_violation() || db_err.message().contains("UNIQUE constraint failed")
        }
        _ => false,
    }
}

/// Execute a database operation with retry on SQLITE_BUSY/SQLITE_LOCKED
async fn execute_with_retry<F, Fut, T>(operation_name: &str, mut f: F) -> std::result::Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut attempts = 0;
    let mut delay_ms = SQLITE_RETRY_BASE_DELAY_MS;

    loop {
        attempts += 1;
        match f().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(operation = operation_name, attempts, "SQLite operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if is_sqlite_busy_error(&e) && attempts < SQLITE_RETRY_MAX_ATTEMPTS => {
                warn!(
                    operation = operation_name,
                    attempts,
                    max_attempts = SQLITE_RETRY_MAX_ATTEMPTS,
                    delay_ms,
                    "SQLite busy, retrying"
                );
                crate::metrics::record_store_retry(operation_name);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * 2).min(SQLITE_RETRY_MAX_DELAY_MS);
            }
            Err(e) => {
                if is_sqlite_busy_error(&e) {
                    warn!(operation = operation_name, attempts, "SQLite busy, max retries exceeded");
                }
                return Err(e);
            }
        }
    }
}

/// Map a write error, turning uniqueness violations into conflicts.
fn write_error(e: sqlx::Error, kind: &str, name: &str) -> ReplicaError {
    if is_unique_violation(&e) {
        ReplicaError::conflict(kind, name)
    } else {
        ReplicaError::Store(e)
    }
}

fn parse_id(raw: &str) -> Result<EntityId> {
    Uuid::parse_str(raw).map_err(|e| ReplicaError::Internal(format!("corrupt entity id '{}': {}", raw, e)))
}

fn parse_opt_id(raw: Option<String>) -> Result<Option<EntityId>> {
    raw.as_deref().map(parse_id).transpose()
}

fn parse_fields(raw: &str) -> Result<Fields> {
    Ok(serde_json::from_str(raw)?)
}

type RemoteRow = (String, String, String, String, String);
type RepositoryRow = (String, String, String, Option<String>, String);
type DistributionRow = (String, String, String, String, Option<String>, Option<String>);

fn remote_from_row((id, backend, name, url, fields): RemoteRow) -> Result<Remote> {
    Ok(Remote {
        id: parse_id(&id)?,
        backend,
        name,
        url,
        fields: parse_fields(&fields)?,
    })
}

fn repository_from_row((id, backend, name, remote, fields): RepositoryRow) -> Result<Repository> {
    Ok(Repository {
        id: parse_id(&id)?,
        backend,
        name,
        remote: parse_opt_id(remote)?,
        fields: parse_fields(&fields)?,
    })
}

fn distribution_from_row(
    (id, backend, name, base_path, repository, publication): DistributionRow,
) -> Result<Distribution> {
    Ok(Distribution {
        id: parse_id(&id)?,
        backend,
        name,
        base_path,
        repository: parse_opt_id(repository)?,
        publication: parse_opt_id(publication)?,
    })
}

/// Durable entity store.
pub struct SqliteStore {
    pool: SqlitePool,
    path: String,
}

impl SqliteStore {
    /// Open (creating if missing) the store described by `config`.
    pub async fn new(config: &StoreConfig) -> Result<Self> {
        let path = config.sqlite_path.clone();
        info!(path = %path, "Initializing entity store");

        let in_memory = path == ":memory:";
        let url = if in_memory {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{}?mode=rwc", path)
        };

        let journal_mode = if config.wal_mode && !in_memory {
            SqliteJournalMode::Wal
        } else {
            SqliteJournalMode::Delete
        };

        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| ReplicaError::Config(format!("Invalid SQLite path: {}", e)))?
            .journal_mode(journal_mode)
            .synchronous(SqliteSynchronous::Normal)
            .create_if_missing(true);

        // Each in-memory connection is its own database; keep exactly one alive.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };
        let pool = pool_options.connect_with(options).await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }

        Ok(Self { pool, path })
    }

    /// Open a file-backed store in WAL mode.
    pub async fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Self::new(&StoreConfig {
            sqlite_path: path.as_ref().to_string_lossy().to_string(),
            wal_mode: true,
        })
        .await
    }

    /// Get database path (for diagnostics).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Force flush WAL to main database (for clean shutdown).
    pub async fn checkpoint(&self) -> Result<()> {
        let pool = &self.pool;
        execute_with_retry("store_checkpoint", || async {
            sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)").execute(pool).await
        })
        .await?;
        debug!("WAL checkpoint complete");
        Ok(())
    }

    /// Checkpoint and close the pool.
    pub async fn close(&self) {
        if let Err(e) = self.checkpoint().await {
            warn!(error = %e, "Failed to checkpoint WAL on close");
        }
        self.pool.close().await;
        info!("Entity store closed");
    }

    async fn fetch_remote(&self, backend: &str, name: &str) -> Result<Option<Remote>> {
        let pool = &self.pool;
        let row: Option<RemoteRow> = execute_with_retry("remote_get", || async {
            sqlx::query_as("SELECT id, backend, name, url, fields FROM remotes WHERE backend = ? AND name = ?")
                .bind(backend)
                .bind(name)
                .fetch_optional(pool)
                .await
        })
        .await?;
        row.map(remote_from_row).transpose()
    }

    async fn insert_remote(&self, remote: &Remote) -> Result<()> {
        let pool = &self.pool;
        let id = remote.id.to_string();
        let fields = serde_json::to_string(&remote.fields)?;
        let now = chrono::Utc::now().timestamp_millis();

        execute_with_retry("remote_insert", || async {
            sqlx::query(
                "INSERT INTO remotes (id, backend, name, url, fields, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(&remote.backend)
            .bind(&remote.name)
            .bind(&remote.url)
            .bind(&fields)
            .bind(now)
            .execute(pool)
            .await
        })
        .await
        .map_err(|e| write_error(e, "remote", &remote.name))?;
        Ok(())
    }

    async fn replace_remote(&self, remote: &Remote) -> Result<()> {
        let pool = &self.pool;
        let id = remote.id.to_string();
        let fields = serde_json::to_string(&remote.fields)?;
        let now = chrono::Utc::now().timestamp_millis();

        let result = execute_with_retry("remote_update", || async {
            sqlx::query("UPDATE remotes SET backend = ?, name = ?, url = ?, fields = ?, updated_at = ? WHERE id = ?")
                .bind(&remote.backend)
                .bind(&remote.name)
                .bind(&remote.url)
                .bind(&fields)
                .bind(now)
                .bind(&id)
                .execute(pool)
                .await
        })
        .await
        .map_err(|e| write_error(e, "remote", &remote.name))?;

        if result.rows_affected() == 0 {
            return Err(ReplicaError::not_found("remote", &remote.name));
        }
        Ok(())
    }

    async fn fetch_repository(&self, backend: &str, name: &str) -> Result<Option<Repository>> {
        let pool = &self.pool;
        let row: Option<RepositoryRow> = execute_with_retry("repository_get", || async {
            sqlx::query_as(
                "SELECT id, backend, name, remote, fields FROM repositories WHERE backend = ? AND name = ?",
            )
            .bind(backend)
            .bind(name)
            .fetch_optional(pool)
            .await
        })
        .await?;
        row.map(repository_from_row).transpose()
    }

    async fn insert_repository(&self, repository: &Repository) -> Result<()> {
        let pool = &self.pool;
        let id = repository.id.to_string();
        let remote = repository.remote.map(|r| r.to_string());
        let fields = serde_json::to_string(&repository.fields)?;
        let now = chrono::Utc::now().timestamp_millis();

        execute_with_retry("repository_insert", || async {
            sqlx::query(
                "INSERT INTO repositories (id, backend, name, remote, fields, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(&repository.backend)
            .bind(&repository.name)
            .bind(&remote)
            .bind(&fields)
            .bind(now)
            .execute(pool)
            .await
        })
        .await
        .map_err(|e| write_error(e, "repository", &repository.name))?;
        Ok(())
    }

    async fn replace_repository(&self, repository: &Repository) -> Result<()> {
        let pool = &self.pool;
        let id = repository.id.to_string();
        let remote = repository.remote.map(|r| r.to_string());
        let fields = serde_json::to_string(&repository.fields)?;
        let now = chrono::Utc::now().timestamp_millis();

        let result = execute_with_retry("repository_update", || async {
            sqlx::query(
                "UPDATE repositories SET backend = ?, name = ?, remote = ?, fields = ?, updated_at = ? WHERE id = ?",
            )
            .bind(&repository.backend)
            .bind(&repository.name)
            .bind(&remote)
            .bind(&fields)
            .bind(now)
            .bind(&id)
            .execute(pool)
            .await
        })
        .await
        .map_err(|e| write_error(e, "repository", &repository.name))?;

        if result.rows_affected() == 0 {
            return Err(ReplicaError::not_found("repository", &repository.name));
        }
        Ok(())
    }

    async fn fetch_distribution(&self, backend: &str, name: &str) -> Result<Option<Distribution>> {
        let pool = &self.pool;
        let row: Option<DistributionRow> = execute_with_retry("distribution_get", || async {
            sqlx::query_as(
                "SELECT id, backend, name, base_path, repository, publication FROM distributions \
                 WHERE backend = ? AND name = ?",
            )
            .bind(backend)
            .bind(name)
            .fetch_optional(pool)
            .await
        })
        .await?;
        row.map(distribution_from_row).transpose()
    }

    async fn fetch_distribution_named(&self, name: &str) -> Result<Option<Distribution>> {
        let pool = &self.pool;
        let row: Option<DistributionRow> = execute_with_retry("distribution_get_by_name", || async {
            sqlx::query_as(
                "SELECT id, backend, name, base_path, repository, publication FROM distributions WHERE name = ?",
            )
            .bind(name)
            .fetch_optional(pool)
            .await
        })
        .await?;
        row.map(distribution_from_row).transpose()
    }

    async fn fetch_distribution_by_id(&self, id: EntityId) -> Result<Option<Distribution>> {
        let pool = &self.pool;
        let id = id.to_string();
        let row: Option<DistributionRow> = execute_with_retry("distribution_get_by_id", || async {
            sqlx::query_as(
                "SELECT id, backend, name, base_path, repository, publication FROM distributions WHERE id = ?",
            )
            .bind(&id)
            .fetch_optional(pool)
            .await
        })
        .await?;
        row.map(distribution_from_row).transpose()
    }

    async fn insert_distribution(&self, distribution: &Distribution) -> Result<()> {
        let pool = &self.pool;
        let id = distribution.id.to_string();
        let repository = distribution.repository.map(|r| r.to_string());
        let publication = distribution.publication.map(|p| p.to_string());
        let now = chrono::Utc::now().timestamp_millis();

        execute_with_retry("distribution_insert", || async {
            sqlx::query(
                "INSERT INTO distributions (id, backend, name, base_path, repository, publication, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(&distribution.backend)
            .bind(&distribution.name)
            .bind(&distribution.base_path)
            .bind(&repository)
            .bind(&publication)
            .bind(now)
            .execute(pool)
            .await
        })
        .await
        .map_err(|e| write_error(e, "distribution", &distribution.name))?;
        Ok(())
    }

    async fn replace_distribution(&self, distribution: &Distribution) -> Result<()> {
        let pool = &self.pool;
        let id = distribution.id.to_string();
        let repository = distribution.repository.map(|r| r.to_string());
        let publication = distribution.publication.map(|p| p.to_string());
        let now = chrono::Utc::now().timestamp_millis();

        let result = execute_with_retry("distribution_update", || async {
            sqlx::query(
                "UPDATE distributions SET backend = ?, name = ?, base_path = ?, repository = ?, \
                 publication = ?, updated_at = ? WHERE id = ?",
            )
            .bind(&distribution.backend)
            .bind(&distribution.name)
            .bind(&distribution.base_path)
            .bind(&repository)
            .bind(&publication)
            .bind(now)
            .bind(&id)
            .execute(pool)
            .await
        })
        .await
        .map_err(|e| write_error(e, "distribution", &distribution.name))?;

        if result.rows_affected() == 0 {
            return Err(ReplicaError::not_found("distribution", &distribution.name));
        }
        Ok(())
    }
}

impl EntityStore for SqliteStore {
    fn get_remote<'a>(&'a self, backend: &'a str, name: &'a str) -> BoxFuture<'a, Option<Remote>> {
        Box::pin(self.fetch_remote(backend, name))
    }

    fn create_remote(&self, remote: Remote) -> BoxFuture<'_, Remote> {
        Box::pin(async move {
            self.insert_remote(&remote).await?;
            Ok(remote)
        })
    }

    fn update_remote(&self, remote: Remote) -> BoxFuture<'_, Remote> {
        Box::pin(async move {
            self.replace_remote(&remote).await?;
            Ok(remote)
        })
    }

    fn get_repository<'a>(&'a self, backend: &'a str, name: &'a str) -> BoxFuture<'a, Option<Repository>> {
        Box::pin(self.fetch_repository(backend, name))
    }

    fn create_repository(&self, repository: Repository) -> BoxFuture<'_, Repository> {
        Box::pin(async move {
            self.insert_repository(&repository).await?;
            Ok(repository)
        })
    }

    fn update_repository(&self, repository: Repository) -> BoxFuture<'_, Repository> {
        Box::pin(async move {
            self.replace_repository(&repository).await?;
            Ok(repository)
        })
    }

    fn get_distribution<'a>(&'a self, backend: &'a str, name: &'a str) -> BoxFuture<'a, Option<Distribution>> {
        Box::pin(self.fetch_distribution(backend, name))
    }

    fn get_distribution_by_id(&self, id: EntityId) -> BoxFuture<'_, Option<Distribution>> {
        Box::pin(self.fetch_distribution_by_id(id))
    }

    fn find_distribution_named<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Option<Distribution>> {
        Box::pin(self.fetch_distribution_named(name))
    }

    fn create_distribution(&self, distribution: Distribution) -> BoxFuture<'_, Distribution> {
        Box::pin(async move {
            self.insert_distribution(&distribution).await?;
            Ok(distribution)
        })
    }

    fn update_distribution(&self, distribution: Distribution) -> BoxFuture<'_, Distribution> {
        Box::pin(async move {
            self.replace_distribution(&distribution).await?;
            Ok(distribution)
        })
    }
}
