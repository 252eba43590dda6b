//! SQLite session repository implementation.
//!
//! Implements `SessionRepository` from `colloquy-core` using sqlx with split
//! read/write pools: raw queries, private Row structs, reads on the reader
//! pool and writes on the single-connection writer pool.

use colloquy_core::repository::SessionRepository;
use colloquy_types::error::RepositoryError;
use colloquy_types::message::{Message, MessageRole};
use colloquy_types::session::{Session, SessionStatus};
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `SessionRepository`.
pub struct SqliteSessionRepository {
    pool: DatabasePool,
}

impl SqliteSessionRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct SessionRow {
    id: String,
    tenant_id: String,
    user_id: String,
    title: Option<String>,
    status: String,
    pinned: i64,
    parent_session_id: Option<String>,
    pending_question_agent: Option<String>,
    provider_response_id: Option<String>,
    created_at: String,
    updated_at: String,
}

impl SessionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            user_id: row.try_get("user_id")?,
            title: row.try_get("title")?,
            status: row.try_get("status")?,
            pinned: row.try_get("pinned")?,
            parent_session_id: row.try_get("parent_session_id")?,
            pending_question_agent: row.try_get("pending_question_agent")?,
            provider_response_id: row.try_get("provider_response_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_session(self) -> Result<Session, RepositoryError> {
        let id = parse_uuid(&self.id, "session id")?;
        let tenant_id = parse_uuid(&self.tenant_id, "tenant_id")?;
        let user_id = parse_uuid(&self.user_id, "user_id")?;
        let parent_session_id = self
            .parent_session_id
            .as_deref()
            .map(|s| parse_uuid(s, "parent_session_id"))
            .transpose()?;
        let status: SessionStatus = self
            .status
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;
        let created_at = parse_datetime(&self.created_at)?;
        let updated_at = parse_datetime(&self.updated_at)?;

        Ok(Session {
            id,
            tenant_id,
            user_id,
            title: self.title,
            status,
            pinned: self.pinned != 0,
            parent_session_id,
            pending_question_agent: self.pending_question_agent,
            provider_response_id: self.provider_response_id,
            created_at,
            updated_at,
        })
    }
}

struct MessageRow {
    id: String,
    session_id: String,
    role: String,
    content: String,
    tool_calls: String,
    tool_call_id: Option<String>,
    citations: String,
    file_outputs: String,
    created_at: String,
}

impl MessageRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            session_id: row.try_get("session_id")?,
            role: row.try_get("role")?,
            content: row.try_get("content")?,
            tool_calls: row.try_get("tool_calls")?,
            tool_call_id: row.try_get("tool_call_id")?,
            citations: row.try_get("citations")?,
            file_outputs: row.try_get("file_outputs")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_message(self) -> Result<Message, RepositoryError> {
        let id = parse_uuid(&self.id, "message id")?;
        let session_id = parse_uuid(&self.session_id, "session_id")?;
        let role: MessageRole = self
            .role
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;
        let created_at = parse_datetime(&self.created_at)?;

        Ok(Message {
            id,
            session_id,
            role,
            content: self.content,
            tool_calls: parse_json(&self.tool_calls, "tool_calls")?,
            tool_call_id: self.tool_call_id,
            citations: parse_json(&self.citations, "citations")?,
            file_outputs: parse_json(&self.file_outputs, "file_outputs")?,
            created_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str, field: &str) -> Result<Uuid, RepositoryError> {
    Uuid::parse_str(s).map_err(|e| RepositoryError::Query(format!("invalid {field}: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
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
// SessionRepository implementation
// ---------------------------------------------------------------------------

impl SessionRepository for SqliteSessionRepository {
    async fn create_session(&self, session: &Session) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO sessions (id, tenant_id, user_id, title, status, pinned, parent_session_id, pending_question_agent, provider_response_id, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(session.id.to_string())
        .bind(session.tenant_id.to_string())
        .bind(session.user_id.to_string())
        .bind(&session.title)
        .bind(session.status.to_string())
        .bind(session.pinned as i64)
        .bind(session.parent_session_id.map(|id| id.to_string()))
        .bind(&session.pending_question_agent)
        .bind(&session.provider_response_id)
        .bind(format_datetime(&session.created_at))
        .bind(format_datetime(&session.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn get_session(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ? AND tenant_id = ?")
            .bind(id.to_string())
            .bind(tenant_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let session_row =
                    SessionRow::from_row(&row).map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(session_row.into_session()?))
            }
            None => Ok(None),
        }
    }

    async fn update_session(&self, session: &Session) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE sessions
               SET title = ?, status = ?, pinned = ?, pending_question_agent = ?,
                   provider_response_id = ?, updated_at = ?
               WHERE id = ? AND tenant_id = ?"#,
        )
        .bind(&session.title)
        .bind(session.status.to_string())
        .bind(session.pinned as i64)
        .bind(&session.pending_question_agent)
        .bind(&session.provider_response_id)
        .bind(format_datetime(&session.updated_at))
        .bind(session.id.to_string())
        .bind(session.tenant_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }

    async fn save_message(
        &self,
        tenant_id: Uuid,
        message: &Message,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO messages (id, session_id, tenant_id, role, content, tool_calls, tool_call_id, citations, file_outputs, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(message.id.to_string())
        .bind(message.session_id.to_string())
        .bind(tenant_id.to_string())
        .bind(message.role.to_string())
        .bind(&message.content)
        .bind(to_json(&message.tool_calls, "tool_calls")?)
        .bind(&message.tool_call_id)
        .bind(to_json(&message.citations, "citations")?)
        .bind(to_json(&message.file_outputs, "file_outputs")?)
        .bind(format_datetime(&message.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn get_session_messages(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<Vec<Message>, RepositoryError> {
        // rowid breaks ties between messages saved within the same instant.
        let rows = sqlx::query(
            r#"SELECT * FROM messages
               WHERE session_id = ? AND tenant_id = ?
               ORDER BY created_at ASC, rowid ASC"#,
        )
        .bind(session_id.to_string())
        .bind(tenant_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in &rows {
            let message_row =
                MessageRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            messages.push(message_row.into_message()?);
        }

        Ok(messages)
    }
}
