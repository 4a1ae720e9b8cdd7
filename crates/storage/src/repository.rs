use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use studio_core::model::{Session, SessionId};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Repository contract for finished training sessions.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Persist a session record, replacing any earlier record with the same id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the session cannot be stored.
    async fn persist_session(&self, session: &Session) -> Result<(), StorageError>;

    /// Fetch a session by ID.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_session(&self, id: SessionId) -> Result<Session, StorageError>;

    /// List sessions, most recently started first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn list_sessions(&self, limit: u32) -> Result<Vec<Session>, StorageError>;
}

/// Key-value settings store.
#[async_trait]
pub trait SettingsRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn get_value(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the value cannot be stored.
    async fn set_value(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    sessions: Arc<Mutex<HashMap<SessionId, Session>>>,
    settings: Arc<Mutex<HashMap<String, String>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for InMemoryRepository {
    async fn persist_session(&self, session: &Session) -> Result<(), StorageError> {
        let mut guard = self
            .sessions
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(session.id(), session.clone());
        Ok(())
    }

    async fn get_session(&self, id: SessionId) -> Result<Session, StorageError> {
        let guard = self
            .sessions
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn list_sessions(&self, limit: u32) -> Result<Vec<Session>, StorageError> {
        let guard = self
            .sessions
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let mut sessions: Vec<Session> = guard.values().cloned().collect();
        sessions.sort_by(|a, b| {
            b.started_at()
                .cmp(&a.started_at())
                .then_with(|| b.id().cmp(&a.id()))
        });
        sessions.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(sessions)
    }
}

#[async_trait]
impl SettingsRepository for InMemoryRepository {
    async fn get_value(&self, key: &str) -> Result<Option<String>, StorageError> {
        let guard = self
            .settings
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(key).cloned())
    }

    async fn set_value(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut guard = self
            .settings
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Aggregates repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub sessions: Arc<dyn SessionRepository>,
    pub settings: Arc<dyn SettingsRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        let sessions: Arc<dyn SessionRepository> = Arc::new(repo.clone());
        let settings: Arc<dyn SettingsRepository> = Arc::new(repo);
        Self { sessions, settings }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use studio_core::model::TrainingConfig;
    use studio_core::time::fixed_now;

    fn finished_session(offset_secs: i64) -> Session {
        let started = fixed_now() + Duration::seconds(offset_secs);
        let mut session = Session::begin(SessionId::generate(), TrainingConfig::default(), started);
        session.mark_training().unwrap();
        session.complete(started + Duration::seconds(30)).unwrap();
        session
    }

    #[tokio::test]
    async fn persists_and_fetches_sessions() {
        let repo = InMemoryRepository::new();
        let session = finished_session(0);
        repo.persist_session(&session).await.unwrap();

        let fetched = repo.get_session(session.id()).await.unwrap();
        assert_eq!(fetched, session);

        let missing = repo.get_session(SessionId::generate()).await;
        assert!(matches!(missing, Err(StorageError::NotFound)));
    }

    #[tokio::test]
    async fn lists_newest_first_with_limit() {
        let repo = InMemoryRepository::new();
        let old = finished_session(0);
        let mid = finished_session(60);
        let new = finished_session(120);
        for s in [&mid, &old, &new] {
            repo.persist_session(s).await.unwrap();
        }

        let listed = repo.list_sessions(2).await.unwrap();
        let ids: Vec<_> = listed.iter().map(Session::id).collect();
        assert_eq!(ids, vec![new.id(), mid.id()]);
    }

    #[tokio::test]
    async fn settings_store_overwrites_values() {
        let storage = Storage::in_memory();
        assert_eq!(storage.settings.get_value("k").await.unwrap(), None);

        storage.settings.set_value("k", "1").await.unwrap();
        storage.settings.set_value("k", "2").await.unwrap();
        assert_eq!(
            storage.settings.get_value("k").await.unwrap().as_deref(),
            Some("2")
        );
    }
}
