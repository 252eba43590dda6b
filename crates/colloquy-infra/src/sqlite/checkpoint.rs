//! SQLite checkpoint store implementation.
//!
//! Implements `CheckpointStore` from `colloquy-core`. `load_and_delete` is a
//! single `DELETE ... RETURNING` statement on the writer pool, so concurrent
//! resumes of the same checkpoint have exactly one winner.

use colloquy_core::checkpoint::CheckpointStore;
use colloquy_types::checkpoint::{Checkpoint, InterruptKind};
use colloquy_types::error::RepositoryError;
use colloquy_types::message::{Message, ToolCall};
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `CheckpointStore`.
pub struct SqliteCheckpointStore {
    pool: DatabasePool,
}

impl SqliteCheckpointStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Private Row type for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct CheckpointRow {
    id: String,
    tenant_id: String,
    session_id: String,
    thread_id: String,
    agent_name: String,
    messages: String,
    pending_tools: String,
    interrupt_kind: String,
    interrupt_data: String,
    provider_response_id: Option<String>,
    created_at: String,
}

impl CheckpointRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            session_id: row.try_get("session_id")?,
            thread_id: row.try_get("thread_id")?,
            agent_name: row.try_get("agent_name")?,
            messages: row.try_get("messages")?,
            pending_tools: row.try_get("pending_tools")?,
            interrupt_kind: row.try_get("interrupt_kind")?,
            interrupt_data: row.try_get("interrupt_data")?,
            provider_response_id: row.try_get("provider_response_id")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_checkpoint(self) -> Result<Checkpoint, RepositoryError> {
        let id = parse_uuid(&self.id, "checkpoint id")?;
        let tenant_id = parse_uuid(&self.tenant_id, "tenant_id")?;
        let session_id = parse_uuid(&self.session_id, "session_id")?;
        let thread_id = parse_uuid(&self.thread_id, "thread_id")?;
        let interrupt_kind: InterruptKind = self
            .interrupt_kind
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;
        let messages: Vec<Message> = parse_json(&self.messages, "messages")?;
        let pending_tools: Vec<ToolCall> = parse_json(&self.pending_tools, "pending_tools")?;
        let interrupt_data: serde_json::Value = parse_json(&self.interrupt_data, "interrupt_data")?;
        let created_at = parse_datetime(&self.created_at)?;

        Ok(Checkpoint {
            id,
            tenant_id,
            session_id,
            thread_id,
            agent_name: self.agent_name,
            messages,
            pending_tools,
            interrupt_kind,
            interrupt_data,
            provider_response_id: self.provider_response_id,
            created_at,
        })
    }
}

fn parse_uuid(s: &str, field: &str) -> Result<Uuid, RepositoryError> {
    Uuid::parse_str(s).map_err(|e| RepositoryError::Query(format!("invalid {field}: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn parse_json<T: serde::de::DeserializeOwned>(s: &str, field: &str) -> Result<T, RepositoryError> {
    serde_json::from_str(s)
        .map_err(|e| RepositoryError::Serialization(format!("invalid {field}: {e}")))
}

fn to_json<T: serde::Serialize>(value: &T, field: &str) -> Result<String, RepositoryError> {
    serde_json::to_string(value)
        .map_err(|e| RepositoryError::Serialization(format!("invalid {field}: {e}")))
}

// ---------------------------------------------------------------------------
// CheckpointStore implementation
// ---------------------------------------------------------------------------

impl CheckpointStore for SqliteCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<Uuid, RepositoryError> {
        let result = sqlx::query(
            r#"INSERT INTO checkpoints (id, tenant_id, session_id, thread_id, agent_name, messages, pending_tools, interrupt_kind, interrupt_data, provider_response_id, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(checkpoint.id.to_string())
        .bind(checkpoint.tenant_id.to_string())
        .bind(checkpoint.session_id.to_string())
        .bind(checkpoint.thread_id.to_string())
        .bind(&checkpoint.agent_name)
        .bind(to_json(&checkpoint.messages, "messages")?)
        .bind(to_json(&checkpoint.pending_tools, "pending_tools")?)
        .bind(checkpoint.interrupt_kind.to_string())
        .bind(to_json(&checkpoint.interrupt_data, "interrupt_data")?)
        .bind(&checkpoint.provider_response_id)
        .bind(checkpoint.created_at.to_rfc3339())
        .execute(&self.pool.writer)
        .await;

        match result {
            Ok(_) => Ok(checkpoint.id),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(
                RepositoryError::Conflict(format!("checkpoint {} already exists", checkpoint.id)),
            ),
            Err(e) => Err(RepositoryError::Query(e.to_string())),
        }
    }

    async fn load(&self, tenant_id: Uuid, id: Uuid) -> Result<Checkpoint, RepositoryError> {
        let row = sqlx::query("SELECT * FROM checkpoints WHERE id = ? AND tenant_id = ?")
            .bind(id.to_string())
            .bind(tenant_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?
            .ok_or(RepositoryError::NotFound)?;

        CheckpointRow::from_row(&row)
            .map_err(|e| RepositoryError::Query(e.to_string()))?
            .into_checkpoint()
    }

    async fn load_by_thread(
        &self,
        tenant_id: Uuid,
        thread_id: Uuid,
    ) -> Result<Checkpoint, RepositoryError> {
        let row = sqlx::query(
            r#"SELECT * FROM checkpoints
               WHERE tenant_id = ? AND thread_id = ?
               ORDER BY created_at DESC
               LIMIT 1"#,
        )
        .bind(tenant_id.to_string())
        .bind(thread_id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?
        .ok_or(RepositoryError::NotFound)?;

        CheckpointRow::from_row(&row)
            .map_err(|e| RepositoryError::Query(e.to_string()))?
            .into_checkpoint()
    }

    async fn delete(&self, tenant_id: Uuid, id: Uuid) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM checkpoints WHERE id = ? AND tenant_id = ?")
            .bind(id.to_string())
            .bind(tenant_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }

    async fn load_and_delete(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Checkpoint, RepositoryError> {
        // One statement on the single-connection writer pool: whichever
        // caller's DELETE lands first gets the row back, the rest get
        // nothing.
        let row = sqlx::query("DELETE FROM checkpoints WHERE id = ? AND tenant_id = ? RETURNING *")
            .bind(id.to_string())
            .bind(tenant_id.to_string())
            .fetch_optional(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?
            .ok_or(RepositoryError::NotFound)?;

        CheckpointRow::from_row(&row)
            .map_err(|e| RepositoryError::Query(e.to_string()))?
            .into_checkpoint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_types::checkpoint::InterruptKind;
    use std::sync::Arc;

    async fn test_pool() -> (DatabasePool, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        (DatabasePool::new(&url).await.unwrap(), dir)
    }

    fn checkpoint(tenant_id: Uuid, thread_id: Uuid) -> Checkpoint {
        let session_id = Uuid::now_v7();
        Checkpoint::new(
            tenant_id,
            session_id,
            thread_id,
            "concierge",
            vec![Message::user(session_id, "hello")],
            vec![ToolCall {
                id: "ask_1".to_string(),
                name: "ask_user".to_string(),
                arguments: serde_json::json!({"questions": [{"text": "Which city?"}]}),
            }],
            InterruptKind::Question,
            serde_json::json!({"questions": [{"id": "q1", "text": "Which city?"}]}),
            Some("resp_7".to_string()),
        )
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let (pool, _dir) = test_pool().await;
        let store = SqliteCheckpointStore::new(pool);

        let tenant_id = Uuid::now_v7();
        let cp = checkpoint(tenant_id, Uuid::now_v7());
        let id = store.save(&cp).await.unwrap();
        assert_eq!(id, cp.id);

        let loaded = store.load(tenant_id, cp.id).await.unwrap();
        assert_eq!(loaded.agent_name, "concierge");
        assert_eq!(loaded.messages.len(), 1);
        assert_eq!(loaded.pending_tools[0].id, "ask_1");
        assert_eq!(loaded.interrupt_kind, InterruptKind::Question);
        assert_eq!(loaded.provider_response_id.as_deref(), Some("resp_7"));
    }

    #[tokio::test]
    async fn test_duplicate_save_conflicts() {
        let (pool, _dir) = test_pool().await;
        let store = SqliteCheckpointStore::new(pool);

        let cp = checkpoint(Uuid::now_v7(), Uuid::now_v7());
        store.save(&cp).await.unwrap();
        let err = store.save(&cp).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_load_is_tenant_scoped() {
        let (pool, _dir) = test_pool().await;
        let store = SqliteCheckpointStore::new(pool);

        let cp = checkpoint(Uuid::now_v7(), Uuid::now_v7());
        store.save(&cp).await.unwrap();

        let err = store.load(Uuid::now_v7(), cp.id).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_load_by_thread_returns_most_recent() {
        let (pool, _dir) = test_pool().await;
        let store = SqliteCheckpointStore::new(pool);

        let tenant_id = Uuid::now_v7();
        let thread_id = Uuid::now_v7();
        let older = checkpoint(tenant_id, thread_id);
        store.save(&older).await.unwrap();

        let mut newer = checkpoint(tenant_id, thread_id);
        newer.created_at = older.created_at + chrono::Duration::seconds(5);
        store.save(&newer).await.unwrap();

        let loaded = store.load_by_thread(tenant_id, thread_id).await.unwrap();
        assert_eq!(loaded.id, newer.id);
    }

    #[tokio::test]
    async fn test_load_and_delete_consumes() {
        let (pool, _dir) = test_pool().await;
        let store = SqliteCheckpointStore::new(pool);

        let tenant_id = Uuid::now_v7();
        let cp = checkpoint(tenant_id, Uuid::now_v7());
        store.save(&cp).await.unwrap();

        let consumed = store.load_and_delete(tenant_id, cp.id).await.unwrap();
        assert_eq!(consumed.id, cp.id);

        let err = store.load(tenant_id, cp.id).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_concurrent_load_and_delete_has_one_winner() {
        let (pool, _dir) = test_pool().await;
        let store = Arc::new(SqliteCheckpointStore::new(pool));

        let tenant_id = Uuid::now_v7();
        let cp = checkpoint(tenant_id, Uuid::now_v7());
        store.save(&cp).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.load_and_delete(tenant_id, cp.id).await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
