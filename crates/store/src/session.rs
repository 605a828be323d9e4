//! In-memory sessions and turns.

use async_trait::async_trait;
use lorekeep_core::error::StoreError;
use lorekeep_core::session::{Session, Turn};
use lorekeep_core::store::SessionRepository;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct InMemorySessionRepository {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    turns: Arc<RwLock<HashMap<String, Vec<Turn>>>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            turns: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemorySessionRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn create(&self, session: Session) -> Result<Session, StoreError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(StoreError::Conflict(format!("session {} exists", session.id)));
        }
        sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn get(&self, id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn update(&self, session: Session) -> Result<Session, StoreError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&session.id) {
            Some(slot) => {
                *slot = session.clone();
                Ok(session)
            }
            None => Err(StoreError::QueryFailed(format!("session {} not found", session.id))),
        }
    }

    async fn add_turn(&self, turn: Turn) -> Result<Turn, StoreError> {
        let mut turns = self.turns.write().await;
        let list = turns.entry(turn.session_id.clone()).or_default();
        if list.iter().any(|t| t.turn_number == turn.turn_number) {
            return Err(StoreError::Conflict(format!(
                "turn {} already recorded for session {}",
                turn.turn_number, turn.session_id
            )));
        }
        list.push(turn.clone());
        Ok(turn)
    }

    async fn turns(&self, session_id: &str) -> Result<Vec<Turn>, StoreError> {
        let mut list = self
            .turns
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default();
        list.sort_by_key(|t| t.turn_number);
        Ok(list)
    }
}
