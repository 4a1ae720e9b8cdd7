use chrono::{DateTime, Utc};
use std::sync::Arc;

use storage::repository::{InMemoryRepository, SessionRepository};
use studio_core::model::{Session, SessionId, SessionStatus};

use crate::error::SessionError;

/// Presentation-agnostic row for a finished session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionHistoryItem {
    pub id: SessionId,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub epochs: u32,
    pub sensors: Vec<String>,
}

impl SessionHistoryItem {
    #[must_use]
    pub fn from_session(session: &Session) -> Self {
        Self {
            id: session.id(),
            status: session.status(),
            started_at: session.started_at(),
            ended_at: session.ended_at(),
            epochs: session.config().training.epochs,
            sensors: session.config().data_collection.sensors.clone(),
        }
    }

    /// Wall-clock length of the session, once it ended.
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.ended_at.map(|end| end - self.started_at)
    }
}

/// Read access to persisted sessions.
#[derive(Clone)]
pub struct SessionHistoryService {
    sessions: Arc<dyn SessionRepository>,
}

impl SessionHistoryService {
    #[must_use]
    pub fn new(sessions: Arc<dyn SessionRepository>) -> Self {
        Self { sessions }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryRepository::new()))
    }

    /// Most recently started sessions first.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Storage` on repository failures.
    pub async fn list_recent(&self, limit: u32) -> Result<Vec<SessionHistoryItem>, SessionError> {
        let sessions = self.sessions.list_sessions(limit).await?;
        Ok(sessions.iter().map(SessionHistoryItem::from_session).collect())
    }

    /// # Errors
    ///
    /// Returns `SessionError::Storage` when the session is missing or the repository fails.
    pub async fn get(&self, id: SessionId) -> Result<Session, SessionError> {
        Ok(self.sessions.get_session(id).await?)
    }
}
