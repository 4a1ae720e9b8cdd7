use std::sync::Arc;

use log::{error, info, warn};
use parking_lot::Mutex;
use tokio::runtime::Handle;

use storage::repository::SessionRepository;
use studio_core::model::{
    ConfigError, ProgressEvent, ProgressStatus, Session, SessionId, SessionStatus, TrainingConfig,
    TrainingConfigPatch,
};

use crate::Clock;
use crate::capabilities::{
    DataCollection, DeployedModel, Deployment, ModelRequest, TrainedModel, Training, Validation,
    ValidationReport,
};
use crate::error::{CollaboratorError, SessionError, Stage, TeardownWarning};
use crate::progress::ProgressAggregator;

/// Sub-models tracked for every session unless overridden.
pub const DEFAULT_MODEL_TYPES: [&str; 3] = ["gesture", "objectDetection", "voiceRecognition"];

const COMPLETED_MESSAGE: &str = "Training session completed";

/// Capabilities the coordinator delegates to.
#[derive(Clone)]
pub struct SessionCollaborators {
    pub data_collection: Arc<dyn DataCollection>,
    pub training: Arc<dyn Training>,
    pub validation: Arc<dyn Validation>,
    pub deployment: Arc<dyn Deployment>,
    pub sessions: Arc<dyn SessionRepository>,
}

/// Result of [`SessionCoordinator::stop`].
///
/// `session` is `None` when nothing was active. Teardown failures never turn
/// a stop into an error; they are collected here instead.
#[derive(Debug, Default)]
pub struct StopOutcome {
    pub session: Option<Session>,
    pub warnings: Vec<TeardownWarning>,
}

impl StopOutcome {
    #[must_use]
    pub fn stopped_nothing(&self) -> bool {
        self.session.is_none()
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    /// The session was still initializing; `start` finishes the teardown.
    #[must_use]
    pub fn is_deferred(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.status() == SessionStatus::Initializing)
    }
}

/// Result of training one named model outside a session.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomModelOutcome {
    pub model: TrainedModel,
    pub report: ValidationReport,
    /// Set when the model passed validation and auto-deploy is enabled.
    pub deployment: Option<DeployedModel>,
}

struct CoordinatorState {
    defaults: TrainingConfig,
    current: Option<Session>,
    /// Set by `stop`: a teardown is running, or requested for an initializing session.
    stopping: bool,
}

/// Owns the lifecycle of the one training session that may be active.
///
/// State transitions happen under a short synchronous lock; collaborator
/// calls are awaited with the lock released.
pub struct SessionCoordinator {
    clock: Clock,
    collaborators: SessionCollaborators,
    progress: Arc<ProgressAggregator>,
    model_types: Vec<String>,
    state: Mutex<CoordinatorState>,
}

impl SessionCoordinator {
    #[must_use]
    pub fn new(
        clock: Clock,
        collaborators: SessionCollaborators,
        progress: Arc<ProgressAggregator>,
    ) -> Self {
        Self {
            clock,
            collaborators,
            progress,
            model_types: DEFAULT_MODEL_TYPES.iter().map(|s| (*s).to_string()).collect(),
            state: Mutex::new(CoordinatorState {
                defaults: TrainingConfig::default(),
                current: None,
                stopping: false,
            }),
        }
    }

    /// Replace the sub-models tracked by future sessions.
    #[must_use]
    pub fn with_model_types<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.model_types = names.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_default_config(mut self, config: TrainingConfig) -> Self {
        self.state.get_mut().defaults = config;
        self
    }

    #[must_use]
    pub fn model_types(&self) -> &[String] {
        &self.model_types
    }

    #[must_use]
    pub fn progress(&self) -> Arc<ProgressAggregator> {
        Arc::clone(&self.progress)
    }

    //
    // ─── LIFECYCLE ─────────────────────────────────────────────────────────────
    //

    /// Start a session with `overrides` merged over the default configuration.
    ///
    /// Data collection and training are started in that order; tracking of
    /// every model type begins only once both succeeded. A [`stop`] issued
    /// while the session is initializing is honoured here: once the
    /// collaborators are up the session goes straight through teardown and
    /// the coordinator is idle again when this returns.
    ///
    /// Dropping the returned future before it resolves abandons the session:
    /// the coordinator is idle at once and collaborators already started are
    /// released in the background.
    ///
    /// [`stop`]: Self::stop
    ///
    /// # Errors
    ///
    /// Returns `SessionError::AlreadyActive` if a session is initializing or
    /// training, `SessionError::InvalidConfig` if the merged configuration is
    /// invalid, and `SessionError::Initialization` if a collaborator fails.
    /// After an initialization failure the coordinator is idle again.
    pub async fn start(&self, overrides: &TrainingConfigPatch) -> Result<SessionId, SessionError> {
        let session = {
            let mut state = self.state.lock();
            if let Some(active) = state.current.as_ref().filter(|s| s.status().is_active()) {
                return Err(SessionError::AlreadyActive {
                    session_id: active.id(),
                });
            }
            let config = state.defaults.merged(overrides);
            config.validate()?;

            let session = Session::begin(SessionId::generate(), config, self.clock.now());
            state.current = Some(session.clone());
            state.stopping = false;
            session
        };
        let session_id = session.id();
        let mut guard = LifecycleGuard::new(self, session.clone(), SessionStatus::Failed);
        info!("session {session_id} initializing");

        if let Err(source) = self
            .collaborators
            .data_collection
            .begin_data_collection(session.config())
            .await
        {
            return Err(self.abort_start(guard, Stage::DataCollection, source).await);
        }
        guard.collection = true;
        guard.training = true;
        if let Err(source) = self.collaborators.training.begin_training(&session).await {
            guard.training = false;
            return Err(self.abort_start(guard, Stage::Training, source).await);
        }

        if !self.state.lock().stopping {
            self.progress.start_tracking(session_id);
            for name in &self.model_types {
                self.progress.start_model_tracking(name);
            }
        }

        let (training, stop_requested) = {
            let mut lock = self.state.lock();
            let state = &mut *lock;
            match state.current.as_mut().filter(|s| s.id() == session_id) {
                Some(current) => {
                    current.mark_training()?;
                    (current.clone(), state.stopping)
                }
                None => (session, false),
            }
        };
        guard.disarm();

        if stop_requested {
            info!("session {session_id} was stopped while initializing");
            self.teardown(training).await;
            return Ok(session_id);
        }

        self.progress.announce(&ProgressEvent::session(
            0.0,
            ProgressStatus::Training,
            Some(session_id),
        ));
        info!(
            "session {session_id} training {} model(s)",
            self.model_types.len()
        );
        Ok(session_id)
    }

    async fn abort_start(
        &self,
        mut guard: LifecycleGuard<'_>,
        stage: Stage,
        source: CollaboratorError,
    ) -> SessionError {
        let session_id = guard.session.id();
        error!("session {session_id} failed during {stage}: {source}");

        if guard.collection {
            if let Err(err) = self.collaborators.data_collection.end_data_collection().await {
                warn!("could not end data collection after failed start: {err}");
            }
            guard.collection = false;
        }

        let mut session = guard.session.clone();
        match session.fail(self.clock.now()) {
            Ok(()) => {
                self.replace_current(&session);
                if let Err(err) = self.collaborators.sessions.persist_session(&session).await {
                    warn!("could not persist failed session {session_id}: {err}");
                }
            }
            Err(err) => warn!("could not mark session {session_id} failed: {err}"),
        }

        guard.disarm();
        self.clear_current(session_id);
        SessionError::Initialization { stage, source }
    }

    /// Stop the active session, if any.
    ///
    /// With no active session this returns at once without calling any
    /// collaborator. A session still initializing is only flagged: `start`
    /// tears it down once its collaborators are up, and the returned outcome
    /// is [deferred](StopOutcome::is_deferred). Teardown is best-effort:
    /// every step runs even if an earlier one failed, and the session always
    /// ends up `Completed` and cleared.
    pub async fn stop(&self) -> StopOutcome {
        let session = {
            let mut state = self.state.lock();
            let Some(current) = state
                .current
                .as_ref()
                .filter(|s| s.status().is_active())
                .cloned()
            else {
                return StopOutcome::default();
            };
            if state.stopping {
                return StopOutcome::default();
            }
            state.stopping = true;
            if current.status() == SessionStatus::Initializing {
                info!("stop requested for initializing session {}", current.id());
                return StopOutcome {
                    session: Some(current),
                    warnings: Vec::new(),
                };
            }
            current
        };
        self.teardown(session).await
    }

    async fn teardown(&self, mut session: Session) -> StopOutcome {
        let session_id = session.id();
        let mut guard = LifecycleGuard::new(self, session.clone(), SessionStatus::Completed);
        guard.collection = true;
        guard.training = true;
        info!("stopping session {session_id}");

        let mut warnings = Vec::new();
        let collection = self.collaborators.data_collection.end_data_collection().await;
        guard.collection = false;
        if let Err(source) = collection {
            warnings.push(TeardownWarning::new(Stage::DataCollection, source));
        }
        let training = self.collaborators.training.end_training().await;
        guard.training = false;
        if let Err(source) = training {
            warnings.push(TeardownWarning::new(Stage::Training, source));
        }

        self.progress.stop_tracking();
        self.progress.reset_progress();

        match session.complete(self.clock.now()) {
            Ok(()) => self.replace_current(&session),
            Err(err) => warn!("could not mark session {session_id} completed: {err}"),
        }
        if let Err(err) = self.collaborators.sessions.persist_session(&session).await {
            warnings.push(TeardownWarning::new(
                Stage::Persistence,
                CollaboratorError::Storage(err),
            ));
        }

        guard.disarm();
        self.clear_current(session_id);
        self.progress.announce(
            &ProgressEvent::session(0.0, ProgressStatus::Completed, Some(session_id))
                .with_message(COMPLETED_MESSAGE),
        );

        for warning in &warnings {
            warn!("session {session_id}: {warning}");
        }
        info!("session {session_id} completed");

        StopOutcome {
            session: Some(session),
            warnings,
        }
    }

    /// Make a terminal status visible through `current_status` until cleared.
    fn replace_current(&self, session: &Session) {
        let mut state = self.state.lock();
        if let Some(current) = state.current.as_mut().filter(|s| s.id() == session.id()) {
            *current = session.clone();
        }
    }

    fn clear_current(&self, session_id: SessionId) -> bool {
        let mut state = self.state.lock();
        if state.current.as_ref().is_some_and(|s| s.id() == session_id) {
            state.current = None;
            state.stopping = false;
            true
        } else {
            false
        }
    }

    /// Finish an abandoned session off the caller's task.
    fn release_in_background(&self, session: Option<Session>, collection: bool, training: bool) {
        let Ok(handle) = Handle::try_current() else {
            warn!("no runtime to release collaborators of an abandoned session");
            return;
        };
        let data_collection = Arc::clone(&self.collaborators.data_collection);
        let trainer = Arc::clone(&self.collaborators.training);
        let sessions = Arc::clone(&self.collaborators.sessions);
        handle.spawn(async move {
            if collection {
                if let Err(err) = data_collection.end_data_collection().await {
                    warn!("could not end data collection of abandoned session: {err}");
                }
            }
            if training {
                if let Err(err) = trainer.end_training().await {
                    warn!("could not end training of abandoned session: {err}");
                }
            }
            if let Some(session) = session {
                if let Err(err) = sessions.persist_session(&session).await {
                    warn!("could not persist abandoned session {}: {err}", session.id());
                }
            }
        });
    }

    /// Stop any running session and every progress schedule.
    pub async fn shutdown(&self) -> StopOutcome {
        let outcome = self.stop().await;
        self.progress.shutdown();
        outcome
    }

    //
    // ─── QUERIES & CONFIG ──────────────────────────────────────────────────────
    //

    #[must_use]
    pub fn current_status(&self) -> SessionStatus {
        self.state
            .lock()
            .current
            .as_ref()
            .map_or(SessionStatus::Idle, Session::status)
    }

    #[must_use]
    pub fn current_session(&self) -> Option<Session> {
        self.state.lock().current.clone()
    }

    #[must_use]
    pub fn default_config(&self) -> TrainingConfig {
        self.state.lock().defaults.clone()
    }

    /// Merge `patch` into the defaults used by later starts.
    ///
    /// The active session keeps the configuration it started with.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the merged defaults would be invalid; the
    /// defaults are left unchanged in that case.
    pub fn update_config(&self, patch: &TrainingConfigPatch) -> Result<TrainingConfig, ConfigError> {
        let mut state = self.state.lock();
        let merged = state.defaults.merged(patch);
        merged.validate()?;
        state.defaults = merged.clone();
        Ok(merged)
    }

    //
    // ─── CUSTOM MODELS ─────────────────────────────────────────────────────────
    //

    /// Train, validate and (if allowed) deploy one named model.
    ///
    /// Uses the active session's configuration when one is running, the
    /// defaults otherwise.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Collaborator` if any of the three steps fails.
    /// A model that merely misses its thresholds is not an error.
    pub async fn train_custom_model(
        &self,
        model_type: &str,
        name: &str,
    ) -> Result<CustomModelOutcome, SessionError> {
        let config = {
            let state = self.state.lock();
            state
                .current
                .as_ref()
                .map_or_else(|| state.defaults.clone(), |s| s.config().clone())
        };
        let request = ModelRequest::new(model_type, name);

        let model = self
            .collaborators
            .training
            .train_model(&request, &config.training)
            .await?;
        let report = self
            .collaborators
            .validation
            .validate_model(&model, &config.validation)
            .await?;

        let deployment = if report.is_valid && config.deployment.auto_deploy {
            Some(
                self.collaborators
                    .deployment
                    .deploy_model(&model, &config.deployment)
                    .await?,
            )
        } else {
            None
        };

        if report.is_valid {
            info!(
                "{model_type} model {name} trained (accuracy {:.3})",
                report.accuracy
            );
        } else {
            warn!(
                "{model_type} model {name} failed validation: {}",
                report.errors.join("; ")
            );
        }

        Ok(CustomModelOutcome {
            model,
            report,
            deployment,
        })
    }

    /// # Errors
    ///
    /// Returns `SessionError::Collaborator` if the deployment registry is unavailable.
    pub async fn deployed_models(&self) -> Result<Vec<DeployedModel>, SessionError> {
        Ok(self.collaborators.deployment.deployed_models().await?)
    }
}

/// Puts the coordinator back to idle if a lifecycle future is dropped before
/// it finishes. `collection` and `training` record which collaborators still
/// owe an `end_*` call.
struct LifecycleGuard<'a> {
    coordinator: &'a SessionCoordinator,
    session: Session,
    ends_as: SessionStatus,
    collection: bool,
    training: bool,
    armed: bool,
}

impl<'a> LifecycleGuard<'a> {
    fn new(coordinator: &'a SessionCoordinator, session: Session, ends_as: SessionStatus) -> Self {
        Self {
            coordinator,
            session,
            ends_as,
            collection: false,
            training: false,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }

    fn step(&self) -> &'static str {
        if self.ends_as == SessionStatus::Completed {
            "stop"
        } else {
            "start"
        }
    }
}

impl Drop for LifecycleGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let coordinator = self.coordinator;
        let session_id = self.session.id();
        warn!("session {session_id} abandoned mid-{}", self.step());

        if coordinator.clear_current(session_id) {
            coordinator.progress.stop_tracking();
            coordinator.progress.reset_progress();
        }

        let mut session = self.session.clone();
        let now = coordinator.clock.now();
        let ended = if self.ends_as == SessionStatus::Completed {
            session.complete(now)
        } else {
            session.fail(now)
        };
        let session = match ended {
            Ok(()) => Some(session),
            Err(err) => {
                warn!("could not close abandoned session {session_id}: {err}");
                None
            }
        };
        coordinator.release_in_background(session, self.collection, self.training);
    }
}
