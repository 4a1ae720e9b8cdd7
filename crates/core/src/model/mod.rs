mod config;
mod ids;
mod progress;
mod session;

pub use config::{
    ConfigError, DataCollectionConfig, DeploymentConfig, TrainingConfig, TrainingConfigPatch,
    TrainingParams, ValidationConfig,
};
pub use ids::{SessionId, SessionIdParseError};
pub use progress::{
    AggregateProgress, MAX_PERCENTAGE, ModelProgress, ProgressEvent, ProgressSnapshot,
    ProgressStatus,
};
pub use session::{Session, SessionRecordError, SessionStatus, SessionStatusParseError};
