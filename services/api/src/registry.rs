//! Live Session Registry
//!
//! Sessions live only in memory. Each driver sits behind its own async mutex so
//! turns on one session are serialized while different sessions run in parallel.

use chrono::{DateTime, Utc};
use healthbot_core::driver::SessionDriver;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::info;
use uuid::Uuid;

pub struct SessionEntry {
    pub driver: Mutex<SessionDriver>,
    pub created_at: DateTime<Utc>,
}

pub type SharedSession = Arc<SessionEntry>;

#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<Uuid, SharedSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new session and returns its id.
    pub async fn insert(&self, driver: SessionDriver) -> (Uuid, SharedSession) {
        let id = Uuid::new_v4();
        let entry = Arc::new(SessionEntry {
            driver: Mutex::new(driver),
            created_at: Utc::now(),
        });
        self.sessions.write().await.insert(id, entry.clone());
        info!(session_id = %id, "Session registered");
        (id, entry)
    }

    pub async fn get(&self, id: &Uuid) -> Option<SharedSession> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Drops a session. Returns whether it existed.
    pub async fn remove(&self, id: &Uuid) -> bool {
        let removed = self.sessions.write().await.remove(id).is_some();
        if removed {
            info!(session_id = %id, "Session removed");
        }
        removed
    }

    /// Every live session, oldest first.
    pub async fn list(&self) -> Vec<(Uuid, SharedSession)> {
        let mut sessions: Vec<_> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, entry)| (*id, entry.clone()))
            .collect();
        sessions.sort_by_key(|(_, entry)| entry.created_at);
        sessions
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
