use studio_core::model::{Session, SessionId};

use super::SqliteRepository;
use super::mapping::{config_to_json, map_session_row};
use crate::repository::{SessionRepository, StorageError};

#[async_trait::async_trait]
impl SessionRepository for SqliteRepository {
    async fn persist_session(&self, session: &Session) -> Result<(), StorageError> {
        let config_json = config_to_json(session.config())?;

        sqlx::query(
            r"
                INSERT INTO training_sessions (id, started_at, ended_at, status, config_json)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(id) DO UPDATE SET
                    started_at = excluded.started_at,
                    ended_at = excluded.ended_at,
                    status = excluded.status,
                    config_json = excluded.config_json
            ",
        )
        .bind(session.id().to_string())
        .bind(session.started_at())
        .bind(session.ended_at())
        .bind(session.status().as_str())
        .bind(config_json)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        Ok(())
    }

    async fn get_session(&self, id: SessionId) -> Result<Session, StorageError> {
        let row = sqlx::query(
            r"
                SELECT id, started_at, ended_at, status, config_json
                FROM training_sessions
                WHERE id = ?1
            ",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?
        .ok_or(StorageError::NotFound)?;

        map_session_row(&row)
    }

    async fn list_sessions(&self, limit: u32) -> Result<Vec<Session>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT id, started_at, ended_at, status, config_json
                FROM training_sessions
                ORDER BY started_at DESC, id DESC
                LIMIT ?1
            ",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(map_session_row(&row)?);
        }
        Ok(out)
    }
}
