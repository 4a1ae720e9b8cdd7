//! In-process stand-ins for the training collaborators.
//!
//! Nothing here touches sensors or fits a model: calls sleep for a
//! configurable delay, keep just enough state to refuse overlapping runs, and
//! can be told to fail for tests and demos.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use studio_core::model::{
    DeploymentConfig, Session, SessionId, TrainingConfig, TrainingParams, ValidationConfig,
};

use crate::Clock;
use crate::capabilities::{
    DataCollection, DeployedModel, Deployment, ModelRequest, TrainedModel, Training, Validation,
    ValidationReport,
};
use crate::error::CollaboratorError;

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

fn injected(slot: &Mutex<Option<String>>) -> Result<(), CollaboratorError> {
    match slot.lock().clone() {
        Some(reason) => Err(CollaboratorError::Rejected(reason)),
        None => Ok(()),
    }
}

//
// ─── DATA COLLECTION ───────────────────────────────────────────────────────────
//

#[derive(Default)]
pub struct SimulatedDataCollector {
    delay: Duration,
    collecting: Mutex<Option<TrainingConfig>>,
    runs: Mutex<u32>,
    fail_begin: Mutex<Option<String>>,
    fail_end: Mutex<Option<String>>,
}

impl SimulatedDataCollector {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn instant() -> Self {
        Self::default()
    }

    /// Make every following `begin_data_collection` fail with `reason`.
    pub fn fail_begin(&self, reason: impl Into<String>) {
        *self.fail_begin.lock() = Some(reason.into());
    }

    pub fn fail_end(&self, reason: impl Into<String>) {
        *self.fail_end.lock() = Some(reason.into());
    }

    pub fn clear_failures(&self) {
        *self.fail_begin.lock() = None;
        *self.fail_end.lock() = None;
    }

    #[must_use]
    pub fn is_collecting(&self) -> bool {
        self.collecting.lock().is_some()
    }

    /// How many collections were actually started.
    #[must_use]
    pub fn runs(&self) -> u32 {
        *self.runs.lock()
    }
}

#[async_trait]
impl DataCollection for SimulatedDataCollector {
    async fn begin_data_collection(
        &self,
        config: &TrainingConfig,
    ) -> Result<(), CollaboratorError> {
        pause(self.delay).await;
        injected(&self.fail_begin)?;

        let mut collecting = self.collecting.lock();
        if collecting.is_some() {
            warn!("data collection already in progress");
            return Ok(());
        }
        *collecting = Some(config.clone());
        *self.runs.lock() += 1;
        info!(
            "collecting {} at {} Hz for {} s",
            config.data_collection.sensors.join(", "),
            config.data_collection.sample_rate,
            config.data_collection.duration
        );
        Ok(())
    }

    async fn end_data_collection(&self) -> Result<(), CollaboratorError> {
        injected(&self.fail_end)?;
        if self.collecting.lock().take().is_some() {
            debug!("data collection stopped");
        }
        Ok(())
    }
}

//
// ─── TRAINING ──────────────────────────────────────────────────────────────────
//

/// Trainer whose model scores are drawn from a seeded generator.
///
/// Scores fall in `accuracy_range` and `confidence_range`, which by default
/// clear the default validation thresholds.
pub struct SimulatedTrainer {
    clock: Clock,
    delay: Duration,
    rng: Mutex<StdRng>,
    accuracy_range: (f64, f64),
    confidence_range: (f64, f64),
    active: Mutex<Option<SessionId>>,
    fail_begin: Mutex<Option<String>>,
    fail_end: Mutex<Option<String>>,
    fail_train: Mutex<Option<String>>,
}

impl SimulatedTrainer {
    #[must_use]
    pub fn new(clock: Clock, delay: Duration, seed: u64) -> Self {
        Self {
            clock,
            delay,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            accuracy_range: (0.86, 0.99),
            confidence_range: (0.82, 0.97),
            active: Mutex::new(None),
            fail_begin: Mutex::new(None),
            fail_end: Mutex::new(None),
            fail_train: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn instant(seed: u64) -> Self {
        Self::new(Clock::default(), Duration::ZERO, seed)
    }

    /// Draw scores from the given `[low, high]` ranges instead.
    #[must_use]
    pub fn with_scores(mut self, accuracy: (f64, f64), confidence: (f64, f64)) -> Self {
        self.accuracy_range = accuracy;
        self.confidence_range = confidence;
        self
    }

    pub fn fail_begin(&self, reason: impl Into<String>) {
        *self.fail_begin.lock() = Some(reason.into());
    }

    pub fn fail_end(&self, reason: impl Into<String>) {
        *self.fail_end.lock() = Some(reason.into());
    }

    pub fn fail_train(&self, reason: impl Into<String>) {
        *self.fail_train.lock() = Some(reason.into());
    }

    #[must_use]
    pub fn active_session(&self) -> Option<SessionId> {
        *self.active.lock()
    }

    fn draw(&self, (low, high): (f64, f64)) -> f64 {
        if high > low {
            self.rng.lock().random_range(low..=high)
        } else {
            low
        }
    }
}

#[async_trait]
impl Training for SimulatedTrainer {
    async fn begin_training(&self, session: &Session) -> Result<(), CollaboratorError> {
        pause(self.delay).await;
        injected(&self.fail_begin)?;

        let mut active = self.active.lock();
        if let Some(running) = *active {
            return Err(CollaboratorError::Rejected(format!(
                "training already in progress for session {running}"
            )));
        }
        *active = Some(session.id());
        info!(
            "training for session {} ({} epochs)",
            session.id(),
            session.config().training.epochs
        );
        Ok(())
    }

    async fn end_training(&self) -> Result<(), CollaboratorError> {
        injected(&self.fail_end)?;
        if let Some(session) = self.active.lock().take() {
            debug!("training stopped for session {session}");
        }
        Ok(())
    }

    async fn train_model(
        &self,
        request: &ModelRequest,
        params: &TrainingParams,
    ) -> Result<TrainedModel, CollaboratorError> {
        pause(self.delay).await;
        injected(&self.fail_train)?;

        debug!(
            "training {} model {} for {} epochs (batch {}, lr {})",
            request.model_type, request.name, params.epochs, params.batch_size, params.learning_rate
        );
        Ok(TrainedModel {
            model_type: request.model_type.clone(),
            name: request.name.clone(),
            accuracy: self.draw(self.accuracy_range),
            confidence: self.draw(self.confidence_range),
            trained_at: self.clock.now(),
        })
    }
}

//
// ─── VALIDATION ────────────────────────────────────────────────────────────────
//

/// Checks the trainer's reported scores against the thresholds.
#[derive(Debug, Default)]
pub struct LocalValidator;

impl LocalValidator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Validation for LocalValidator {
    async fn validate_model(
        &self,
        model: &TrainedModel,
        thresholds: &ValidationConfig,
    ) -> Result<ValidationReport, CollaboratorError> {
        Ok(ValidationReport::evaluate(
            model.accuracy,
            model.confidence,
            thresholds,
        ))
    }
}

//
// ─── DEPLOYMENT ────────────────────────────────────────────────────────────────
//

/// Keeps deployed models in memory, versioned per model type and name.
pub struct LocalDeployer {
    clock: Clock,
    deployed: Mutex<Vec<DeployedModel>>,
    versions: Mutex<HashMap<(String, String), u32>>,
}

impl LocalDeployer {
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            deployed: Mutex::new(Vec::new()),
            versions: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Deployment for LocalDeployer {
    async fn deploy_model(
        &self,
        model: &TrainedModel,
        options: &DeploymentConfig,
    ) -> Result<DeployedModel, CollaboratorError> {
        let deployed_at = self.clock.now();
        let version = {
            let mut versions = self.versions.lock();
            let version = versions
                .entry((model.model_type.clone(), model.name.clone()))
                .or_insert(0);
            *version += 1;
            *version
        };

        let deployed = DeployedModel {
            model_id: format!(
                "{}_{}_{}",
                model.model_type,
                model.name,
                deployed_at.timestamp_millis()
            ),
            model_type: model.model_type.clone(),
            name: model.name.clone(),
            version,
            accuracy: model.accuracy,
            deployed_at,
        };

        let mut registry = self.deployed.lock();
        if !options.version_control {
            registry.retain(|d| !(d.model_type == model.model_type && d.name == model.name));
        }
        registry.push(deployed.clone());
        info!("deployed {} v{}", deployed.model_id, deployed.version);
        Ok(deployed)
    }

    async fn deployed_models(&self) -> Result<Vec<DeployedModel>, CollaboratorError> {
        Ok(self.deployed.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use studio_core::time::{fixed_clock, fixed_now};

    #[tokio::test]
    async fn collector_ignores_a_second_start() {
        let collector = SimulatedDataCollector::instant();
        let config = TrainingConfig::default();
        collector.begin_data_collection(&config).await.unwrap();
        collector.begin_data_collection(&config).await.unwrap();
        assert_eq!(collector.runs(), 1);

        collector.end_data_collection().await.unwrap();
        collector.end_data_collection().await.unwrap();
        assert!(!collector.is_collecting());
    }

    #[tokio::test]
    async fn trainer_refuses_overlapping_sessions() {
        let trainer = SimulatedTrainer::instant(1);
        let first = Session::begin(SessionId::generate(), TrainingConfig::default(), fixed_now());
        let second = Session::begin(SessionId::generate(), TrainingConfig::default(), fixed_now());

        trainer.begin_training(&first).await.unwrap();
        let err = trainer.begin_training(&second).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Rejected(_)));
        assert_eq!(trainer.active_session(), Some(first.id()));
    }

    #[tokio::test]
    async fn injected_failures_surface_as_rejections() {
        let collector = SimulatedDataCollector::instant();
        collector.fail_begin("camera offline");
        let err = collector
            .begin_data_collection(&TrainingConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "camera offline");

        collector.clear_failures();
        collector
            .begin_data_collection(&TrainingConfig::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn seeded_trainer_is_reproducible() {
        let request = ModelRequest::new("gesture", "wave");
        let params = TrainingParams::default();
        let a = SimulatedTrainer::new(fixed_clock(), Duration::ZERO, 9)
            .train_model(&request, &params)
            .await
            .unwrap();
        let b = SimulatedTrainer::new(fixed_clock(), Duration::ZERO, 9)
            .train_model(&request, &params)
            .await
            .unwrap();
        assert_eq!(a, b);
        assert!((0.86..=0.99).contains(&a.accuracy));
    }

    #[tokio::test]
    async fn deployer_versions_per_model() {
        let deployer = LocalDeployer::new(fixed_clock());
        let trainer = SimulatedTrainer::new(fixed_clock(), Duration::ZERO, 2);
        let model = trainer
            .train_model(&ModelRequest::new("gesture", "wave"), &TrainingParams::default())
            .await
            .unwrap();

        let options = DeploymentConfig::default();
        deployer.deploy_model(&model, &options).await.unwrap();
        let second = deployer.deploy_model(&model, &options).await.unwrap();
        assert_eq!(second.version, 2);
        assert_eq!(deployer.deployed_models().await.unwrap().len(), 2);

        let replace = DeploymentConfig {
            version_control: false,
            ..DeploymentConfig::default()
        };
        let third = deployer.deploy_model(&model, &replace).await.unwrap();
        assert_eq!(third.version, 3);
        assert_eq!(deployer.deployed_models().await.unwrap().len(), 1);
    }
}
