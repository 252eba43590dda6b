//! Per-session turn locks.
//!
//! At most one turn may run per session at a time. The lock is advisory
//! and in-process: acquiring it inserts the session id into a shared map,
//! and the guard removes it on drop (including on panic or cancellation).

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use crate::errors::EngineError;

/// Registry of sessions with a turn in flight.
#[derive(Debug, Clone, Default)]
pub struct SessionLocks {
    inner: Arc<DashMap<Uuid, ()>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to claim the session. Fails with `SessionLocked` when a turn
    /// is already running; never blocks.
    pub fn acquire(&self, session_id: Uuid) -> Result<SessionGuard, EngineError> {
        match self.inner.entry(session_id) {
            Entry::Occupied(_) => Err(EngineError::SessionLocked),
            Entry::Vacant(entry) => {
                entry.insert(());
                Ok(SessionGuard {
                    map: Arc::clone(&self.inner),
                    session_id,
                })
            }
        }
    }

    pub fn is_locked(&self, session_id: Uuid) -> bool {
        self.inner.contains_key(&session_id)
    }
}

/// Releases the session lock on drop.
#[derive(Debug)]
pub struct SessionGuard {
    map: Arc<DashMap<Uuid, ()>>,
    session_id: Uuid,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.map.remove(&self.session_id);
    }
}
