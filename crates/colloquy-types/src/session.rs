//! Session types.
//!
//! A session is a tenant-scoped conversation. It tracks lifecycle status,
//! the agent waiting on a pending question (if any), and the provider-side
//! response cursor for conversation-state reuse across turns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a session.
///
/// Maps to the CHECK constraint in the SQLite schema:
/// `CHECK (status IN ('active', 'archived'))`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Archived,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Archived => write!(f, "archived"),
        }
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(SessionStatus::Active),
            "archived" => Ok(SessionStatus::Archived),
            other => Err(format!("invalid session status: '{other}'")),
        }
    }
}

impl Default for SessionStatus {
    fn default() -> Self {
        SessionStatus::Active
    }
}

/// A conversation session owned by a user within a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub title: Option<String>,
    pub status: SessionStatus,
    pub pinned: bool,
    /// Set when this session was spawned from another session.
    pub parent_session_id: Option<Uuid>,
    /// Name of the agent that raised the currently pending question, if any.
    pub pending_question_agent: Option<String>,
    /// Provider-side response id of the latest model call, used to resume
    /// provider conversation state instead of resending full history.
    pub provider_response_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: Uuid, tenant_id: Uuid, user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            tenant_id,
            user_id,
            title: None,
            status: SessionStatus::Active,
            pinned: false,
            parent_session_id: None,
            pending_question_agent: None,
            provider_response_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_pending_question(&self) -> bool {
        self.pending_question_agent.is_some()
    }
}
