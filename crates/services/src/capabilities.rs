//! Capability traits the session coordinator delegates to.
//!
//! The coordinator only sees these seams; sensor capture, model fitting and
//! deployment live behind them (see `crate::simulated` for stand-ins).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use studio_core::model::{
    DeploymentConfig, Session, TrainingConfig, TrainingParams, ValidationConfig,
};

use crate::error::CollaboratorError;

#[async_trait]
pub trait DataCollection: Send + Sync {
    /// # Errors
    ///
    /// Returns `CollaboratorError` if capture cannot start; this aborts the session start.
    async fn begin_data_collection(&self, config: &TrainingConfig)
    -> Result<(), CollaboratorError>;

    /// # Errors
    ///
    /// Returns `CollaboratorError` if capture cannot be stopped cleanly.
    async fn end_data_collection(&self) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait Training: Send + Sync {
    /// # Errors
    ///
    /// Returns `CollaboratorError` if training cannot start; this aborts the session start.
    async fn begin_training(&self, session: &Session) -> Result<(), CollaboratorError>;

    /// # Errors
    ///
    /// Returns `CollaboratorError` if training cannot be stopped cleanly.
    async fn end_training(&self) -> Result<(), CollaboratorError>;

    /// Train a single named model outside of a session.
    ///
    /// # Errors
    ///
    /// Returns `CollaboratorError` if the model cannot be trained.
    async fn train_model(
        &self,
        request: &ModelRequest,
        params: &TrainingParams,
    ) -> Result<TrainedModel, CollaboratorError>;
}

#[async_trait]
pub trait Validation: Send + Sync {
    /// # Errors
    ///
    /// Returns `CollaboratorError` if evaluation itself fails (not if the model is rejected).
    async fn validate_model(
        &self,
        model: &TrainedModel,
        thresholds: &ValidationConfig,
    ) -> Result<ValidationReport, CollaboratorError>;
}

#[async_trait]
pub trait Deployment: Send + Sync {
    /// # Errors
    ///
    /// Returns `CollaboratorError` if the model cannot be deployed.
    async fn deploy_model(
        &self,
        model: &TrainedModel,
        options: &DeploymentConfig,
    ) -> Result<DeployedModel, CollaboratorError>;

    /// # Errors
    ///
    /// Returns `CollaboratorError` if the deployment registry cannot be read.
    async fn deployed_models(&self) -> Result<Vec<DeployedModel>, CollaboratorError>;
}

/// Which model to train, e.g. `gesture` / `wave`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRequest {
    pub model_type: String,
    pub name: String,
}

impl ModelRequest {
    #[must_use]
    pub fn new(model_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            model_type: model_type.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainedModel {
    pub model_type: String,
    pub name: String,
    pub accuracy: f64,
    pub confidence: f64,
    pub trained_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub accuracy: f64,
    pub confidence: f64,
    pub errors: Vec<String>,
}

impl ValidationReport {
    /// Compare measured scores against the configured thresholds.
    #[must_use]
    pub fn evaluate(accuracy: f64, confidence: f64, thresholds: &ValidationConfig) -> Self {
        let mut errors = Vec::new();
        if accuracy < thresholds.accuracy_threshold {
            errors.push(format!(
                "accuracy {accuracy:.3} below threshold {:.3}",
                thresholds.accuracy_threshold
            ));
        }
        if confidence < thresholds.confidence_threshold {
            errors.push(format!(
                "confidence {confidence:.3} below threshold {:.3}",
                thresholds.confidence_threshold
            ));
        }
        Self {
            is_valid: errors.is_empty(),
            accuracy,
            confidence,
            errors,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeployedModel {
    pub model_id: String,
    pub model_type: String,
    pub name: String,
    pub version: u32,
    pub accuracy: f64,
    pub deployed_at: DateTime<Utc>,
}
