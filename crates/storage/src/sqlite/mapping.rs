use studio_core::model::{Session, SessionId, SessionStatus, TrainingConfig};
use sqlx::Row;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn config_to_json(config: &TrainingConfig) -> Result<String, StorageError> {
    serde_json::to_string(config).map_err(ser)
}

pub(crate) fn map_session_row(row: &sqlx::sqlite::SqliteRow) -> Result<Session, StorageError> {
    let id: SessionId = row.try_get::<String, _>("id").map_err(ser)?.parse().map_err(ser)?;
    let started_at = row.try_get("started_at").map_err(ser)?;
    let ended_at = row.try_get("ended_at").map_err(ser)?;
    let status: SessionStatus = row
        .try_get::<String, _>("status")
        .map_err(ser)?
        .parse()
        .map_err(ser)?;
    let config_json: String = row.try_get("config_json").map_err(ser)?;
    let config: TrainingConfig = serde_json::from_str(&config_json).map_err(ser)?;

    Session::from_persisted(id, started_at, ended_at, config, status).map_err(ser)
}
