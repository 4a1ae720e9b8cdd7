use std::sync::Arc;
use std::time::Duration;

use log::warn;

use storage::repository::Storage;
use studio_core::model::{ConfigError, TrainingConfig, TrainingConfigPatch};

use crate::Clock;
use crate::error::StudioError;
use crate::progress::{ProgressAggregator, ProgressSettings, RandomIncrements};
use crate::sessions::{
    DEFAULT_MODEL_TYPES, SessionCollaborators, SessionCoordinator, SessionHistoryService,
};
use crate::settings_service::TrainingSettingsService;
use crate::simulated::{LocalDeployer, LocalValidator, SimulatedDataCollector, SimulatedTrainer};

/// Knobs for a studio built around the simulated collaborators.
#[derive(Debug, Clone)]
pub struct StudioOptions {
    pub progress: ProgressSettings,
    /// Seeds both progress increments and simulated model scores; `None` draws from the OS.
    pub seed: Option<u64>,
    pub model_types: Vec<String>,
    /// Pause applied by every simulated collaborator call.
    pub simulated_delay: Duration,
}

impl Default for StudioOptions {
    fn default() -> Self {
        Self {
            progress: ProgressSettings::default(),
            seed: None,
            model_types: DEFAULT_MODEL_TYPES.iter().map(|s| (*s).to_string()).collect(),
            simulated_delay: Duration::from_millis(250),
        }
    }
}

impl StudioOptions {
    fn aggregator(&self) -> ProgressAggregator {
        match self.seed {
            Some(seed) => ProgressAggregator::new(self.progress, RandomIncrements::seeded(seed)),
            None => ProgressAggregator::new(self.progress, RandomIncrements::from_entropy()),
        }
    }
}

/// Assembles the coordinator, aggregator, history and settings services.
#[derive(Clone)]
pub struct TrainingStudio {
    coordinator: Arc<SessionCoordinator>,
    progress: Arc<ProgressAggregator>,
    history: Arc<SessionHistoryService>,
    settings: Arc<TrainingSettingsService>,
}

impl TrainingStudio {
    /// Build a studio backed by `SQLite` storage and simulated collaborators.
    ///
    /// # Errors
    ///
    /// Returns `StudioError` if storage initialization fails.
    pub async fn new_sqlite(
        db_url: &str,
        clock: Clock,
        options: &StudioOptions,
    ) -> Result<Self, StudioError> {
        let storage = Storage::sqlite(db_url).await?;
        Ok(Self::simulated(&storage, clock, options).await)
    }

    /// In-memory storage with simulated collaborators.
    pub async fn in_memory(clock: Clock, options: &StudioOptions) -> Self {
        Self::simulated(&Storage::in_memory(), clock, options).await
    }

    async fn simulated(storage: &Storage, clock: Clock, options: &StudioOptions) -> Self {
        let seed = options.seed.unwrap_or_else(rand::random);
        let collaborators =
            simulated_collaborators(storage, clock, options.simulated_delay, seed);
        Self::assemble(
            storage,
            clock,
            collaborators,
            options.aggregator(),
            &options.model_types,
        )
        .await
    }

    /// Wire caller-provided collaborators and aggregator over `storage`.
    ///
    /// The saved default configuration is loaded from the settings store; if
    /// it cannot be read the built-in defaults are used.
    pub async fn assemble(
        storage: &Storage,
        clock: Clock,
        collaborators: SessionCollaborators,
        progress: ProgressAggregator,
        model_types: &[String],
    ) -> Self {
        let settings = Arc::new(TrainingSettingsService::new(Arc::clone(&storage.settings)));
        let defaults = settings.load().await.unwrap_or_else(|err| {
            warn!("ignoring saved training configuration: {err}");
            TrainingConfig::default()
        });

        let progress = Arc::new(progress);
        let coordinator = Arc::new(
            SessionCoordinator::new(clock, collaborators, Arc::clone(&progress))
                .with_model_types(model_types.iter().cloned())
                .with_default_config(defaults),
        );
        let history = Arc::new(SessionHistoryService::new(Arc::clone(&storage.sessions)));

        Self {
            coordinator,
            progress,
            history,
            settings,
        }
    }

    #[must_use]
    pub fn coordinator(&self) -> Arc<SessionCoordinator> {
        Arc::clone(&self.coordinator)
    }

    #[must_use]
    pub fn progress(&self) -> Arc<ProgressAggregator> {
        Arc::clone(&self.progress)
    }

    #[must_use]
    pub fn history(&self) -> Arc<SessionHistoryService> {
        Arc::clone(&self.history)
    }

    #[must_use]
    pub fn settings(&self) -> Arc<TrainingSettingsService> {
        Arc::clone(&self.settings)
    }

    /// Merge `patch` into the defaults and save them.
    ///
    /// Saving is best-effort: a storage failure is logged and the in-memory
    /// defaults stay updated.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the merged configuration is invalid.
    pub async fn update_training_config(
        &self,
        patch: &TrainingConfigPatch,
    ) -> Result<TrainingConfig, ConfigError> {
        let config = self.coordinator.update_config(patch)?;
        if let Err(err) = self.settings.save(&config).await {
            warn!("could not save training configuration: {err}");
        }
        Ok(config)
    }
}

fn simulated_collaborators(
    storage: &Storage,
    clock: Clock,
    delay: Duration,
    seed: u64,
) -> SessionCollaborators {
    SessionCollaborators {
        data_collection: Arc::new(SimulatedDataCollector::new(delay)),
        training: Arc::new(SimulatedTrainer::new(clock, delay, seed)),
        validation: Arc::new(LocalValidator::new()),
        deployment: Arc::new(LocalDeployer::new(clock)),
        sessions: Arc::clone(&storage.sessions),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::FixedIncrements;
    use crate::settings_service::TRAINING_CONFIG_KEY;
    use studio_core::model::TrainingParams;
    use studio_core::time::fixed_clock;

    #[tokio::test]
    async fn saved_config_becomes_the_coordinator_default() {
        let storage = Storage::in_memory();
        storage
            .settings
            .set_value(TRAINING_CONFIG_KEY, r#"{ "training": { "epochs": 3 } }"#)
            .await
            .unwrap();

        let collaborators = simulated_collaborators(&storage, fixed_clock(), Duration::ZERO, 1);
        let studio = TrainingStudio::assemble(
            &storage,
            fixed_clock(),
            collaborators,
            ProgressAggregator::new(ProgressSettings::external(5.0), FixedIncrements(5.0)),
            &["gesture".to_string()],
        )
        .await;

        assert_eq!(studio.coordinator().default_config().training.epochs, 3);
        assert_eq!(studio.coordinator().model_types(), ["gesture".to_string()]);
    }

    #[tokio::test]
    async fn broken_saved_config_falls_back_to_defaults() {
        let storage = Storage::in_memory();
        storage
            .settings
            .set_value(TRAINING_CONFIG_KEY, "{not json")
            .await
            .unwrap();

        let collaborators = simulated_collaborators(&storage, fixed_clock(), Duration::ZERO, 1);
        let studio = TrainingStudio::assemble(
            &storage,
            fixed_clock(),
            collaborators,
            ProgressAggregator::new(ProgressSettings::external(5.0), FixedIncrements(5.0)),
            &["gesture".to_string()],
        )
        .await;

        assert_eq!(studio.coordinator().default_config(), TrainingConfig::default());
    }

    #[tokio::test]
    async fn update_training_config_persists() {
        let options = StudioOptions {
            progress: ProgressSettings::external(5.0),
            seed: Some(1),
            ..StudioOptions::default()
        };
        let studio = TrainingStudio::in_memory(fixed_clock(), &options).await;
        let patch = TrainingConfigPatch::new().with_training(TrainingParams {
            batch_size: 8,
            ..TrainingParams::default()
        });

        studio.update_training_config(&patch).await.unwrap();

        let saved = studio.settings().load().await.unwrap();
        assert_eq!(saved.training.batch_size, 8);
        assert_eq!(studio.coordinator().default_config(), saved);
    }
}
