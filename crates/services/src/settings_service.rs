use std::sync::Arc;

use storage::repository::SettingsRepository;
use studio_core::model::{TrainingConfig, TrainingConfigPatch};

use crate::error::SettingsServiceError;

/// Settings key holding the saved training configuration as JSON.
pub const TRAINING_CONFIG_KEY: &str = "ai_training_config";

/// Loads and saves the default training configuration.
#[derive(Clone)]
pub struct TrainingSettingsService {
    repo: Arc<dyn SettingsRepository>,
}

impl TrainingSettingsService {
    #[must_use]
    pub fn new(repo: Arc<dyn SettingsRepository>) -> Self {
        Self { repo }
    }

    /// Saved configuration merged over the built-in defaults.
    ///
    /// Nothing saved yet yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns `SettingsServiceError` on storage failures, malformed JSON, or
    /// a saved configuration that no longer validates.
    pub async fn load(&self) -> Result<TrainingConfig, SettingsServiceError> {
        let Some(raw) = self.repo.get_value(TRAINING_CONFIG_KEY).await? else {
            return Ok(TrainingConfig::default());
        };
        let patch: TrainingConfigPatch = serde_json::from_str(&raw)?;
        let config = TrainingConfig::default().merged(&patch);
        config.validate()?;
        Ok(config)
    }

    /// Validate and persist `config` as the new defaults.
    ///
    /// # Errors
    ///
    /// Returns `SettingsServiceError` if validation, serialization or persistence fails.
    pub async fn save(&self, config: &TrainingConfig) -> Result<(), SettingsServiceError> {
        config.validate()?;
        let raw = serde_json::to_string(config)?;
        self.repo.set_value(TRAINING_CONFIG_KEY, &raw).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::repository::InMemoryRepository;
    use studio_core::model::TrainingParams;

    fn service() -> (TrainingSettingsService, Arc<InMemoryRepository>) {
        let repo = Arc::new(InMemoryRepository::new());
        (TrainingSettingsService::new(repo.clone()), repo)
    }

    #[tokio::test]
    async fn missing_settings_load_defaults() {
        let (service, _) = service();
        assert_eq!(service.load().await.unwrap(), TrainingConfig::default());
    }

    #[tokio::test]
    async fn partial_saved_config_keeps_other_defaults() {
        let (service, repo) = service();
        repo.set_value(
            TRAINING_CONFIG_KEY,
            r#"{ "training": { "epochs": 5 }, "theme": "dark" }"#,
        )
        .await
        .unwrap();

        let config = service.load().await.unwrap();
        assert_eq!(config.training.epochs, 5);
        assert_eq!(config.training.batch_size, 32);
        assert_eq!(config.validation, TrainingConfig::default().validation);
        assert_eq!(config.extra.get("theme"), Some(&serde_json::json!("dark")));
    }

    #[tokio::test]
    async fn save_then_load_returns_the_same_config() {
        let (service, _) = service();
        let config = TrainingConfig::default().merged(&TrainingConfigPatch::new().with_training(
            TrainingParams {
                epochs: 12,
                ..TrainingParams::default()
            },
        ));

        service.save(&config).await.unwrap();
        assert_eq!(service.load().await.unwrap(), config);
    }

    #[tokio::test]
    async fn malformed_json_is_reported() {
        let (service, repo) = service();
        repo.set_value(TRAINING_CONFIG_KEY, "{not json").await.unwrap();
        assert!(matches!(
            service.load().await,
            Err(SettingsServiceError::Malformed(_))
        ));
    }
}
