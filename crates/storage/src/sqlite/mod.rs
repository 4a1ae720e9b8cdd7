//! `SQLite` backend for the session history and the key-value settings store.
//!
//! Both repositories share one pool; the schema is created by versioned
//! migrations tracked in `schema_migrations`.

use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use crate::repository::{SessionRepository, SettingsRepository, Storage};

mod mapping;
mod migrate;
mod session_repo;
mod settings_repo;

/// Writes are rare (one row per finished session or saved config), so a
/// small pool is enough.
const MAX_CONNECTIONS: u32 = 4;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SqliteInitError {
    #[error("invalid training database url: {0}")]
    InvalidUrl(#[source] sqlx::Error),
    #[error("could not open training database: {0}")]
    Connect(#[source] sqlx::Error),
    #[error("could not prepare session and settings tables: {0}")]
    Migrate(#[source] sqlx::Error),
}

/// Session history and saved settings in one `SQLite` database.
#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// Open the training database at `database_url` in WAL mode.
    ///
    /// The file is not created here; see the binary for that.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError::InvalidUrl` for an unparsable URL and
    /// `SqliteInitError::Connect` if the database cannot be opened.
    pub async fn connect(database_url: &str) -> Result<Self, SqliteInitError> {
        let options = database_url
            .parse::<SqliteConnectOptions>()
            .map_err(SqliteInitError::InvalidUrl)?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(BUSY_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(SqliteInitError::Connect)?;
        Ok(Self { pool })
    }

    /// Bring `training_sessions` and `settings` up to the latest schema.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError::Migrate` if a migration step fails.
    pub async fn migrate(&self) -> Result<(), SqliteInitError> {
        migrate::run_migrations(&self.pool)
            .await
            .map_err(SqliteInitError::Migrate)
    }

    /// Highest applied migration, `0` before [`migrate`](Self::migrate).
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError::Migrate` if the version table cannot be read.
    pub async fn schema_version(&self) -> Result<i64, SqliteInitError> {
        let exists = sqlx::query(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_migrations'",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(SqliteInitError::Migrate)?;
        if exists.is_none() {
            return Ok(0);
        }

        let row = sqlx::query("SELECT COALESCE(MAX(version), 0) AS version FROM schema_migrations")
            .fetch_one(&self.pool)
            .await
            .map_err(SqliteInitError::Migrate)?;
        row.try_get("version").map_err(SqliteInitError::Migrate)
    }
}

impl Storage {
    /// Session history and settings backed by one migrated `SQLite` database.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` if the database cannot be opened or migrated.
    pub async fn sqlite(database_url: &str) -> Result<Self, SqliteInitError> {
        let repo = SqliteRepository::connect(database_url).await?;
        repo.migrate().await?;
        let sessions: Arc<dyn SessionRepository> = Arc::new(repo.clone());
        let settings: Arc<dyn SettingsRepository> = Arc::new(repo);
        Ok(Self { sessions, settings })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_version_tracks_migrations() {
        let url = "sqlite:file:memdb_schema_version?mode=memory&cache=shared";
        let repo = SqliteRepository::connect(url).await.unwrap();
        assert_eq!(repo.schema_version().await.unwrap(), 0);

        repo.migrate().await.unwrap();
        assert_eq!(repo.schema_version().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn malformed_url_is_rejected_before_connecting() {
        let err = SqliteRepository::connect("sqlite://studio.db?mode=bogus").await.err();
        assert!(matches!(err, Some(SqliteInitError::InvalidUrl(_))));
    }
}
