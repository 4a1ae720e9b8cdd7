#![forbid(unsafe_code)]

pub mod capabilities;
pub mod error;
pub mod progress;
pub mod sessions;
pub mod settings_service;
pub mod simulated;
pub mod studio;

pub use studio_core::Clock;

pub use capabilities::{
    DataCollection, DeployedModel, Deployment, ModelRequest, TrainedModel, Training, Validation,
    ValidationReport,
};
pub use error::{
    CollaboratorError, SessionError, SettingsServiceError, Stage, StudioError, TeardownWarning,
};
pub use progress::{
    FixedIncrements, IncrementSource, ProgressAggregator, ProgressCallback, ProgressSettings,
    RandomIncrements, ScriptedIncrements, TickDriver,
};
pub use sessions::{
    CustomModelOutcome, DEFAULT_MODEL_TYPES, SessionCollaborators, SessionCoordinator,
    SessionHistoryItem, SessionHistoryService, StopOutcome,
};
pub use settings_service::{TRAINING_CONFIG_KEY, TrainingSettingsService};
pub use studio::{StudioOptions, TrainingStudio};
