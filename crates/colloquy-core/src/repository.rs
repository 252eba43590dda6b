//! Session repository trait and the in-memory reference implementation.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use colloquy_types::error::RepositoryError;
use colloquy_types::message::Message;
use colloquy_types::session::Session;
use uuid::Uuid;

/// Durable storage for sessions and their messages. All reads are
/// tenant-scoped.
pub trait SessionRepository: Send + Sync {
    fn create_session(
        &self,
        session: &Session,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn get_session(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<Session>, RepositoryError>> + Send;

    fn update_session(
        &self,
        session: &Session,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn save_message(
        &self,
        tenant_id: Uuid,
        message: &Message,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// All messages of a session in conversation order.
    fn get_session_messages(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> impl Future<Output = Result<Vec<Message>, RepositoryError>> + Send;
}

#[derive(Debug, Default)]
struct InMemoryState {
    sessions: HashMap<Uuid, Session>,
    // Insertion order doubles as conversation order.
    messages: Vec<(Uuid, Message)>,
}

/// In-memory session repository for tests and embedded use.
#[derive(Debug, Default)]
pub struct InMemorySessionRepository {
    state: Mutex<InMemoryState>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InMemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SessionRepository for InMemorySessionRepository {
    async fn create_session(&self, session: &Session) -> Result<(), RepositoryError> {
        let mut state = self.lock();
        if state.sessions.contains_key(&session.id) {
            return Err(RepositoryError::Conflict(format!(
                "session {} already exists",
                session.id
            )));
        }
        state.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get_session(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Session>, RepositoryError> {
        Ok(self
            .lock()
            .sessions
            .get(&id)
            .filter(|s| s.tenant_id == tenant_id)
            .cloned())
    }

    async fn update_session(&self, session: &Session) -> Result<(), RepositoryError> {
        let mut state = self.lock();
        match state.sessions.get_mut(&session.id) {
            Some(existing) if existing.tenant_id == session.tenant_id => {
                *existing = session.clone();
                Ok(())
            }
            _ => Err(RepositoryError::NotFound),
        }
    }

    async fn save_message(
        &self,
        tenant_id: Uuid,
        message: &Message,
    ) -> Result<(), RepositoryError> {
        self.lock().messages.push((tenant_id, message.clone()));
        Ok(())
    }

    async fn get_session_messages(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<Vec<Message>, RepositoryError> {
        Ok(self
            .lock()
            .messages
            .iter()
            .filter(|(t, m)| *t == tenant_id && m.session_id == session_id)
            .map(|(_, m)| m.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_round_trip() {
        let repo = InMemorySessionRepository::new();
        let tenant_id = Uuid::now_v7();
        let mut session = Session::new(Uuid::now_v7(), tenant_id, Uuid::now_v7());

        repo.create_session(&session).await.unwrap();
        assert!(matches!(
            repo.create_session(&session).await,
            Err(RepositoryError::Conflict(_))
        ));

        session.pending_question_agent = Some("triage".to_string());
        repo.update_session(&session).await.unwrap();

        let loaded = repo.get_session(tenant_id, session.id).await.unwrap().unwrap();
        assert_eq!(loaded.pending_question_agent.as_deref(), Some("triage"));

        // Invisible to another tenant.
        let other = repo.get_session(Uuid::now_v7(), session.id).await.unwrap();
        assert!(other.is_none());
    }

    #[tokio::test]
    async fn test_messages_keep_insertion_order() {
        let repo = InMemorySessionRepository::new();
        let tenant_id = Uuid::now_v7();
        let session_id = Uuid::now_v7();

        for i in 0..3 {
            repo.save_message(tenant_id, &Message::user(session_id, format!("m{i}")))
                .await
                .unwrap();
        }
        repo.save_message(tenant_id, &Message::user(Uuid::now_v7(), "other session"))
            .await
            .unwrap();

        let messages = repo.get_session_messages(tenant_id, session_id).await.unwrap();
        let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m0", "m1", "m2"]);
    }
}
