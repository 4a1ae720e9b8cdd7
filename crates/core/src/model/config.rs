use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("sample rate must be > 0")]
    InvalidSampleRate,

    #[error("collection duration must be > 0")]
    InvalidDuration,

    #[error("quality threshold must be in [0, 1], got {0}")]
    InvalidQualityThreshold(f64),

    #[error("epochs must be > 0")]
    InvalidEpochs,

    #[error("batch size must be > 0")]
    InvalidBatchSize,

    #[error("learning rate must be > 0, got {0}")]
    InvalidLearningRate(f64),

    #[error("validation split must be in [0, 1), got {0}")]
    InvalidValidationSplit(f64),

    #[error("accuracy threshold must be in [0, 1], got {0}")]
    InvalidAccuracyThreshold(f64),

    #[error("confidence threshold must be in [0, 1], got {0}")]
    InvalidConfidenceThreshold(f64),
}

//
// ─── GROUPS ────────────────────────────────────────────────────────────────────
//

/// Sensor capture settings handed to the data collection collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataCollectionConfig {
    /// Samples per second.
    pub sample_rate: u32,
    /// Capture window in seconds.
    pub duration: u32,
    pub sensors: Vec<String>,
    pub quality_threshold: f64,
}

impl Default for DataCollectionConfig {
    fn default() -> Self {
        Self {
            sample_rate: 30,
            duration: 60,
            sensors: ["camera", "imu", "eyeTracking", "handTracking"]
                .into_iter()
                .map(String::from)
                .collect(),
            quality_threshold: 0.8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrainingParams {
    pub epochs: u32,
    pub batch_size: u32,
    pub learning_rate: f64,
    pub validation_split: f64,
    pub early_stopping: bool,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            epochs: 50,
            batch_size: 32,
            learning_rate: 0.001,
            validation_split: 0.2,
            early_stopping: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidationConfig {
    pub accuracy_threshold: f64,
    pub confidence_threshold: f64,
    pub cross_validation: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            accuracy_threshold: 0.85,
            confidence_threshold: 0.8,
            cross_validation: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[allow(clippy::struct_excessive_bools)]
pub struct DeploymentConfig {
    pub auto_deploy: bool,
    pub version_control: bool,
    pub rollback_on_failure: bool,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            auto_deploy: true,
            version_control: true,
            rollback_on_failure: true,
        }
    }
}

//
// ─── CONFIG ────────────────────────────────────────────────────────────────────
//

/// Full configuration of a training session.
///
/// Top-level keys other than the four recognised groups are kept in `extra`
/// so they survive a load/save cycle, but nothing reads them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingConfig {
    #[serde(default)]
    pub data_collection: DataCollectionConfig,
    #[serde(default)]
    pub training: TrainingParams,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub deployment: DeploymentConfig,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Caller overrides for a [`TrainingConfig`].
///
/// Each group present here replaces the whole group of the base config;
/// absent groups keep the base values. Fields missing inside a supplied
/// group fall back to that group's defaults during deserialization.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrainingConfigPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_collection: Option<DataCollectionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub training: Option<TrainingParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentConfig>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TrainingConfigPatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_data_collection(mut self, group: DataCollectionConfig) -> Self {
        self.data_collection = Some(group);
        self
    }

    #[must_use]
    pub fn with_training(mut self, group: TrainingParams) -> Self {
        self.training = Some(group);
        self
    }

    #[must_use]
    pub fn with_validation(mut self, group: ValidationConfig) -> Self {
        self.validation = Some(group);
        self
    }

    #[must_use]
    pub fn with_deployment(mut self, group: DeploymentConfig) -> Self {
        self.deployment = Some(group);
        self
    }

    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data_collection.is_none()
            && self.training.is_none()
            && self.validation.is_none()
            && self.deployment.is_none()
            && self.extra.is_empty()
    }
}

impl From<TrainingConfig> for TrainingConfigPatch {
    fn from(config: TrainingConfig) -> Self {
        Self {
            data_collection: Some(config.data_collection),
            training: Some(config.training),
            validation: Some(config.validation),
            deployment: Some(config.deployment),
            extra: config.extra,
        }
    }
}

impl TrainingConfig {
    /// Returns a copy of `self` with `patch` applied on top.
    #[must_use]
    pub fn merged(&self, patch: &TrainingConfigPatch) -> Self {
        let mut merged = self.clone();
        merged.apply(patch);
        merged
    }

    /// Applies `patch` in place, one top-level key at a time.
    pub fn apply(&mut self, patch: &TrainingConfigPatch) {
        if let Some(group) = &patch.data_collection {
            self.data_collection = group.clone();
        }
        if let Some(group) = &patch.training {
            self.training = group.clone();
        }
        if let Some(group) = &patch.validation {
            self.validation = group.clone();
        }
        if let Some(group) = &patch.deployment {
            self.deployment = group.clone();
        }
        for (key, value) in &patch.extra {
            self.extra.insert(key.clone(), value.clone());
        }
    }

    /// Check numeric ranges of every recognised group.
    ///
    /// # Errors
    ///
    /// Returns the first `ConfigError` found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let dc = &self.data_collection;
        if dc.sample_rate == 0 {
            return Err(ConfigError::InvalidSampleRate);
        }
        if dc.duration == 0 {
            return Err(ConfigError::InvalidDuration);
        }
        if !unit_range(dc.quality_threshold) {
            return Err(ConfigError::InvalidQualityThreshold(dc.quality_threshold));
        }

        let tr = &self.training;
        if tr.epochs == 0 {
            return Err(ConfigError::InvalidEpochs);
        }
        if tr.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }
        if !(tr.learning_rate.is_finite() && tr.learning_rate > 0.0) {
            return Err(ConfigError::InvalidLearningRate(tr.learning_rate));
        }
        if !(0.0..1.0).contains(&tr.validation_split) {
            return Err(ConfigError::InvalidValidationSplit(tr.validation_split));
        }

        let va = &self.validation;
        if !unit_range(va.accuracy_threshold) {
            return Err(ConfigError::InvalidAccuracyThreshold(va.accuracy_threshold));
        }
        if !unit_range(va.confidence_threshold) {
            return Err(ConfigError::InvalidConfidenceThreshold(
                va.confidence_threshold,
            ));
        }

        Ok(())
    }
}

fn unit_range(value: f64) -> bool {
    (0.0..=1.0).contains(&value)
}
