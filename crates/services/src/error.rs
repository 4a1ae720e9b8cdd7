//! Shared error types for the services crate.

use std::fmt;

use thiserror::Error;

use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;
use studio_core::model::{ConfigError, SessionId, SessionRecordError};

/// Collaborator step a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    DataCollection,
    Training,
    Persistence,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::DataCollection => "data collection",
            Stage::Training => "training",
            Stage::Persistence => "persistence",
        })
    }
}

/// Failure reported by a collaborator capability.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CollaboratorError {
    #[error("{capability} is unavailable: {reason}")]
    Unavailable {
        capability: &'static str,
        reason: String,
    },
    #[error("{0}")]
    Rejected(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by session services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("training session {session_id} is already active")]
    AlreadyActive { session_id: SessionId },
    #[error("failed to initialize {stage}: {source}")]
    Initialization {
        stage: Stage,
        #[source]
        source: CollaboratorError,
    },
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
    #[error(transparent)]
    Transition(#[from] SessionRecordError),
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A collaborator failed while a session was being torn down.
///
/// Never returned as an `Err`; the stop still completes and the warning is
/// logged and handed back to the caller.
#[derive(Debug, Error)]
#[error("{stage} teardown failed: {source}")]
pub struct TeardownWarning {
    pub stage: Stage,
    #[source]
    pub source: CollaboratorError,
}

impl TeardownWarning {
    #[must_use]
    pub fn new(stage: Stage, source: CollaboratorError) -> Self {
        Self { stage, source }
    }
}

/// Errors emitted by `TrainingSettingsService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SettingsServiceError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("saved configuration is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}

/// Errors emitted while assembling a `TrainingStudio`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StudioError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
