use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::{SessionId, TrainingConfig};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionRecordError {
    #[error("ended_at is before started_at")]
    InvalidTimeRange,

    #[error("cannot move session from {from} to {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },
}

/// Lifecycle status of a training session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Idle,
    Initializing,
    Training,
    Completed,
    Failed,
}

impl SessionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Initializing => "initializing",
            SessionStatus::Training => "training",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    /// `Initializing` and `Training` sessions block a new start.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, SessionStatus::Initializing | SessionStatus::Training)
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }

    fn can_move_to(self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (SessionStatus::Initializing, SessionStatus::Training)
                | (SessionStatus::Initializing | SessionStatus::Training, SessionStatus::Failed)
                | (SessionStatus::Training, SessionStatus::Completed)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown session status: {raw}")]
pub struct SessionStatusParseError {
    pub raw: String,
}

impl FromStr for SessionStatus {
    type Err = SessionStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(SessionStatus::Idle),
            "initializing" => Ok(SessionStatus::Initializing),
            "training" => Ok(SessionStatus::Training),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            other => Err(SessionStatusParseError {
                raw: other.to_string(),
            }),
        }
    }
}

/// One end-to-end training attempt.
///
/// The configuration is frozen when the session is created; only the status
/// and end time move afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    id: SessionId,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    config: TrainingConfig,
    status: SessionStatus,
}

impl Session {
    /// Creates a session in the `Initializing` state.
    #[must_use]
    pub fn begin(id: SessionId, config: TrainingConfig, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            started_at,
            ended_at: None,
            config,
            status: SessionStatus::Initializing,
        }
    }

    /// Rehydrate a session from persisted storage.
    ///
    /// # Errors
    ///
    /// Returns `SessionRecordError::InvalidTimeRange` if `ended_at` precedes `started_at`.
    pub fn from_persisted(
        id: SessionId,
        started_at: DateTime<Utc>,
        ended_at: Option<DateTime<Utc>>,
        config: TrainingConfig,
        status: SessionStatus,
    ) -> Result<Self, SessionRecordError> {
        if ended_at.is_some_and(|end| end < started_at) {
            return Err(SessionRecordError::InvalidTimeRange);
        }
        Ok(Self {
            id,
            started_at,
            ended_at,
            config,
            status,
        })
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    #[must_use]
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Collaborators are up; the session is now training.
    ///
    /// # Errors
    ///
    /// Returns `SessionRecordError::InvalidTransition` unless the session is initializing.
    pub fn mark_training(&mut self) -> Result<(), SessionRecordError> {
        self.transition(SessionStatus::Training, None)
    }

    /// # Errors
    ///
    /// Returns `SessionRecordError::InvalidTransition` unless the session is training.
    pub fn complete(&mut self, at: DateTime<Utc>) -> Result<(), SessionRecordError> {
        self.transition(SessionStatus::Completed, Some(at))
    }

    /// # Errors
    ///
    /// Returns `SessionRecordError::InvalidTransition` if the session is already terminal.
    pub fn fail(&mut self, at: DateTime<Utc>) -> Result<(), SessionRecordError> {
        self.transition(SessionStatus::Failed, Some(at))
    }

    fn transition(
        &mut self,
        to: SessionStatus,
        ended_at: Option<DateTime<Utc>>,
    ) -> Result<(), SessionRecordError> {
        if !self.status.can_move_to(to) {
            return Err(SessionRecordError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        if let Some(end) = ended_at {
            // a clock that runs behind the start still yields a valid range
            self.ended_at = Some(end.max(self.started_at));
        }
        self.status = to;
        Ok(())
    }
}
