//! Split reader/writer SQLite pool.
//!
//! SQLite serializes writers, so the store keeps a single-connection pool
//! for writes and a wider read-only pool for concurrent reads. WAL mode
//! lets readers proceed while a write is in flight. The atomic
//! `load_and_delete` checkpoint primitive relies on the writer pool having
//! exactly one connection.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

const READER_CONNECTIONS: u32 = 8;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared connection pools for the session and checkpoint stores.
#[derive(Clone)]
pub struct DatabasePool {
    /// Read-only pool for SELECT queries.
    pub reader: SqlitePool,
    /// Single connection; every INSERT/UPDATE/DELETE goes through it.
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Open both pools and apply pending migrations on the writer.
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options(database_url)?)
            .await?;

        // Migrations must land before the read-only pool opens.
        sqlx::migrate!("../../migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(READER_CONNECTIONS)
            .connect_with(connect_options(database_url)?.read_only(true))
            .await?;

        Ok(Self { reader, writer })
    }
}

fn connect_options(database_url: &str) -> Result<SqliteConnectOptions, sqlx::Error> {
    Ok(SqliteConnectOptions::from_str(database_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT)
        .create_if_missing(true))
}

/// Database URL from `COLLOQUY_DATA_DIR`, falling back to
/// `~/.colloquy/colloquy.db`.
pub fn default_database_url() -> String {
    let data_dir = std::env::var("COLLOQUY_DATA_DIR").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{home}/.colloquy")
    });
    format!("sqlite://{data_dir}/colloquy.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_pool(name: &str) -> (tempfile::TempDir, DatabasePool) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join(name).display());
        let pool = DatabasePool::new(&url).await.unwrap();
        (dir, pool)
    }

    #[tokio::test]
    async fn test_migrations_create_schema() {
        let (_dir, pool) = open_pool("schema.db").await;

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name != '_sqlx_migrations' ORDER BY name",
        )
        .fetch_all(&pool.reader)
        .await
        .unwrap();

        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert_eq!(names, vec!["checkpoints", "messages", "sessions"]);
    }

    #[tokio::test]
    async fn test_wal_mode_and_busy_timeout() {
        let (_dir, pool) = open_pool("wal.db").await;

        let journal: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool.writer)
            .await
            .unwrap();
        assert_eq!(journal.0.to_lowercase(), "wal");

        let timeout: (i64,) = sqlx::query_as("PRAGMA busy_timeout")
            .fetch_one(&pool.writer)
            .await
            .unwrap();
        assert_eq!(timeout.0, 5_000);
    }

    #[tokio::test]
    async fn test_orphan_message_is_rejected() {
        let (_dir, pool) = open_pool("fk.db").await;

        // messages.session_id references sessions; the pool must enforce it.
        let result = sqlx::query(
            "INSERT INTO messages (id, session_id, tenant_id, role, content, created_at)
             VALUES ('m1', 'no-such-session', 't1', 'user', 'hi', '2026-01-01T00:00:00Z')",
        )
        .execute(&pool.writer)
        .await;

        let err = result.unwrap_err().to_string();
        assert!(err.to_lowercase().contains("foreign key"), "got: {err}");
    }

    #[tokio::test]
    async fn test_reader_pool_is_read_only() {
        let (_dir, pool) = open_pool("ro.db").await;

        let result = sqlx::query(
            "INSERT INTO sessions (id, tenant_id, user_id, status, created_at, updated_at)
             VALUES ('s1', 't1', 'u1', 'active', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
        )
        .execute(&pool.reader)
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_default_database_url() {
        let url = default_database_url();
        assert!(url.starts_with("sqlite://"));
        assert!(url.ends_with("colloquy.db"));
    }
}
