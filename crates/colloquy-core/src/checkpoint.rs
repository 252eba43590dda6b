//! Checkpoint store trait and the in-memory reference implementation.
//!
//! A checkpoint holds a suspended turn. `load_and_delete` is the resume
//! primitive: it must be atomic so concurrent resumes of the same
//! checkpoint produce exactly one winner.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use colloquy_types::checkpoint::Checkpoint;
use colloquy_types::error::RepositoryError;
use uuid::Uuid;

/// Durable storage for suspended turns. All operations are tenant-scoped:
/// a checkpoint is invisible to every tenant but its own.
pub trait CheckpointStore: Send + Sync {
    fn save(
        &self,
        checkpoint: &Checkpoint,
    ) -> impl Future<Output = Result<Uuid, RepositoryError>> + Send;

    fn load(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> impl Future<Output = Result<Checkpoint, RepositoryError>> + Send;

    /// The most recent checkpoint for a thread, if any.
    fn load_by_thread(
        &self,
        tenant_id: Uuid,
        thread_id: Uuid,
    ) -> impl Future<Output = Result<Checkpoint, RepositoryError>> + Send;

    fn delete(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Atomically consume a checkpoint: load it and delete it in one step.
    /// Exactly one of any set of concurrent callers gets the checkpoint;
    /// the rest get `RepositoryError::NotFound`.
    fn load_and_delete(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> impl Future<Output = Result<Checkpoint, RepositoryError>> + Send;
}

/// In-memory checkpoint store backed by a mutex-guarded map.
///
/// Atomicity of `load_and_delete` falls out of holding the lock across
/// the lookup and removal.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    inner: Mutex<HashMap<Uuid, Checkpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Checkpoint>> {
        // A poisoned lock means a panic mid-operation; the map itself is
        // still structurally sound.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<Uuid, RepositoryError> {
        let mut map = self.lock();
        if map.contains_key(&checkpoint.id) {
            return Err(RepositoryError::Conflict(format!(
                "checkpoint {} already exists",
                checkpoint.id
            )));
        }
        map.insert(checkpoint.id, checkpoint.clone());
        Ok(checkpoint.id)
    }

    async fn load(&self, tenant_id: Uuid, id: Uuid) -> Result<Checkpoint, RepositoryError> {
        self.lock()
            .get(&id)
            .filter(|c| c.tenant_id == tenant_id)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    async fn load_by_thread(
        &self,
        tenant_id: Uuid,
        thread_id: Uuid,
    ) -> Result<Checkpoint, RepositoryError> {
        self.lock()
            .values()
            .filter(|c| c.tenant_id == tenant_id && c.thread_id == thread_id)
            .max_by_key(|c| c.created_at)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    async fn delete(&self, tenant_id: Uuid, id: Uuid) -> Result<(), RepositoryError> {
        let mut map = self.lock();
        match map.get(&id) {
            Some(c) if c.tenant_id == tenant_id => {
                map.remove(&id);
                Ok(())
            }
            _ => Err(RepositoryError::NotFound),
        }
    }

    async fn load_and_delete(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Checkpoint, RepositoryError> {
        let mut map = self.lock();
        match map.get(&id) {
            Some(c) if c.tenant_id == tenant_id => Ok(map
                .remove(&id)
                .ok_or(RepositoryError::NotFound)?),
            _ => Err(RepositoryError::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_types::checkpoint::InterruptKind;
    use colloquy_types::message::Message;
    use std::sync::Arc;

    fn checkpoint(tenant_id: Uuid, thread_id: Uuid) -> Checkpoint {
        let session_id = Uuid::now_v7();
        Checkpoint::new(
            tenant_id,
            session_id,
            thread_id,
            "triage",
            vec![Message::user(session_id, "hello")],
            Vec::new(),
            InterruptKind::Question,
            serde_json::json!({"questions": []}),
            None,
        )
    }

    #[tokio::test]
    async fn test_save_load_delete() {
        let store = InMemoryCheckpointStore::new();
        let tenant_id = Uuid::now_v7();
        let cp = checkpoint(tenant_id, Uuid::now_v7());

        let id = store.save(&cp).await.unwrap();
        assert_eq!(id, cp.id);

        let loaded = store.load(tenant_id, id).await.unwrap();
        assert_eq!(loaded.agent_name, "triage");

        store.delete(tenant_id, id).await.unwrap();
        assert!(matches!(
            store.load(tenant_id, id).await,
            Err(RepositoryError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_duplicate_save_conflicts() {
        let store = InMemoryCheckpointStore::new();
        let cp = checkpoint(Uuid::now_v7(), Uuid::now_v7());
        store.save(&cp).await.unwrap();
        assert!(matches!(
            store.save(&cp).await,
            Err(RepositoryError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_tenant_scoping() {
        let store = InMemoryCheckpointStore::new();
        let tenant_id = Uuid::now_v7();
        let other_tenant = Uuid::now_v7();
        let cp = checkpoint(tenant_id, Uuid::now_v7());
        store.save(&cp).await.unwrap();

        assert!(matches!(
            store.load(other_tenant, cp.id).await,
            Err(RepositoryError::NotFound)
        ));
        assert!(matches!(
            store.load_and_delete(other_tenant, cp.id).await,
            Err(RepositoryError::NotFound)
        ));
        // Still there for the owning tenant.
        store.load(tenant_id, cp.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_load_by_thread_returns_most_recent() {
        let store = InMemoryCheckpointStore::new();
        let tenant_id = Uuid::now_v7();
        let thread_id = Uuid::now_v7();

        let mut first = checkpoint(tenant_id, thread_id);
        first.created_at = chrono::Utc::now() - chrono::Duration::minutes(5);
        let second = checkpoint(tenant_id, thread_id);
        store.save(&first).await.unwrap();
        store.save(&second).await.unwrap();

        let loaded = store.load_by_thread(tenant_id, thread_id).await.unwrap();
        assert_eq!(loaded.id, second.id);
    }

    #[tokio::test]
    async fn test_concurrent_load_and_delete_has_one_winner() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let tenant_id = Uuid::now_v7();
        let cp = checkpoint(tenant_id, Uuid::now_v7());
        store.save(&cp).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            let id = cp.id;
            handles.push(tokio::spawn(async move {
                store.load_and_delete(tenant_id, id).await
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
