use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};
use std::time::Duration;

use log::{debug, warn};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use studio_core::model::{
    AggregateProgress, ModelProgress, ProgressEvent, ProgressSnapshot, ProgressStatus, SessionId,
};

use super::increments::{IncrementSource, RandomIncrements};

/// Observer invoked with every progress event.
pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

const DEFAULT_TICK_PERIOD: Duration = Duration::from_millis(300);
const DEFAULT_MAX_STEP: f64 = 5.0;
const MIN_TICK_PERIOD: Duration = Duration::from_millis(1);
const EVENT_BUFFER: usize = 64;

/// What advances the per-model counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDriver {
    /// Each tracked model gets its own tokio interval with this period.
    Timer(Duration),
    /// No timers; the owner calls [`ProgressAggregator::tick`].
    External,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSettings {
    pub driver: TickDriver,
    /// Upper bound of a single tick's increment, in percentage points.
    pub max_step: f64,
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self {
            driver: TickDriver::Timer(DEFAULT_TICK_PERIOD),
            max_step: DEFAULT_MAX_STEP,
        }
    }
}

impl ProgressSettings {
    #[must_use]
    pub fn external(max_step: f64) -> Self {
        Self {
            driver: TickDriver::External,
            max_step,
        }
    }

    #[must_use]
    pub fn timer(period: Duration, max_step: f64) -> Self {
        Self {
            driver: TickDriver::Timer(period),
            max_step,
        }
    }
}

struct ModelSlot {
    progress: ModelProgress,
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl ModelSlot {
    /// Cancels the running schedule. Safe to call repeatedly.
    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[derive(Default)]
struct TrackerState {
    snapshot: ProgressSnapshot,
    models: BTreeMap<String, ModelSlot>,
    generation: u64,
}

impl TrackerState {
    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn aggregate(&self) -> AggregateProgress {
        AggregateProgress::from_models(self.models.values().map(|slot| &slot.progress))
    }

    /// Recompute the session snapshot while a session is being tracked.
    fn refresh_snapshot(&mut self) -> AggregateProgress {
        let aggregate = self.aggregate();
        if self.snapshot.session_id.is_some() {
            self.snapshot.percentage = aggregate.percentage;
            self.snapshot.status = match aggregate.status {
                ProgressStatus::Idle => ProgressStatus::Training,
                status => status,
            };
        }
        aggregate
    }
}

struct TickStep {
    event: ProgressEvent,
    completed: bool,
}

/// Tracks per-model progress and reports the combined percentage.
///
/// Every tracked model advances on its own schedule; ticks of one model are
/// sequential, ticks of different models interleave freely. Each update
/// recomputes the mean over the tracked models under the same lock that
/// recorded it, so an emitted aggregate never mixes in stale values.
///
/// Observers run after the lock is released and may call back into the
/// aggregator.
pub struct ProgressAggregator {
    settings: ProgressSettings,
    state: Mutex<TrackerState>,
    increments: Mutex<Box<dyn IncrementSource>>,
    observer: Mutex<Option<ProgressCallback>>,
    events: broadcast::Sender<ProgressEvent>,
}

impl ProgressAggregator {
    #[must_use]
    pub fn new(settings: ProgressSettings, increments: impl IncrementSource + 'static) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            settings,
            state: Mutex::new(TrackerState::default()),
            increments: Mutex::new(Box::new(increments)),
            observer: Mutex::new(None),
            events,
        }
    }

    /// Timer-driven aggregator with random increments.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(ProgressSettings::default(), RandomIncrements::from_entropy())
    }

    #[must_use]
    pub fn settings(&self) -> ProgressSettings {
        self.settings
    }

    //
    // ─── OBSERVERS ─────────────────────────────────────────────────────────────
    //

    /// Register the single progress callback, replacing any previous one.
    pub fn set_on_progress_update<F>(&self, callback: F)
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        *self.observer.lock() = Some(Arc::new(callback));
    }

    pub fn clear_on_progress_update(&self) {
        *self.observer.lock() = None;
    }

    /// Additional listener stream; any number of subscribers may coexist with the callback.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    /// Publish an event that does not originate from a model tick.
    pub fn announce(&self, event: &ProgressEvent) {
        self.emit(event);
    }

    fn emit(&self, event: &ProgressEvent) {
        let callback = self.observer.lock().clone();
        if let Some(callback) = callback {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                warn!(
                    "progress observer panicked on {:?} update; schedule continues",
                    event.model_type
                );
            }
        }
        // no subscribers is fine
        let _ = self.events.send(event.clone());
    }

    //
    // ─── SESSION TRACKING ──────────────────────────────────────────────────────
    //

    /// Begin reporting session-level progress for `session_id`.
    ///
    /// The percentage starts from the current mean of tracked models, which
    /// is 0 after a reset.
    pub fn start_tracking(&self, session_id: SessionId) {
        let mut state = self.state.lock();
        state.snapshot = ProgressSnapshot {
            percentage: 0.0,
            status: ProgressStatus::Training,
            session_id: Some(session_id),
        };
        state.refresh_snapshot();
        debug!("tracking progress for session {session_id}");
    }

    /// Back to the idle snapshot.
    ///
    /// Per-model schedules keep running; use [`Self::reset_progress`] to stop them too.
    pub fn stop_tracking(&self) {
        let mut state = self.state.lock();
        state.snapshot = ProgressSnapshot::idle();
    }

    /// Stops session tracking and every model schedule.
    pub fn reset_progress(&self) {
        self.stop_tracking();
        let names: Vec<String> = self.state.lock().models.keys().cloned().collect();
        for name in names {
            self.stop_model_tracking(&name);
        }
    }

    /// Stops everything. Called when the owner goes away.
    pub fn shutdown(&self) {
        self.reset_progress();
        debug!("progress aggregator shut down");
    }

    //
    // ─── MODEL TRACKING ────────────────────────────────────────────────────────
    //

    /// Track `name` from `{0, training}`, re-arming it if it was already tracked.
    pub fn start_model_tracking(self: &Arc<Self>, name: &str) {
        let mut state = self.state.lock();
        let generation = state.next_generation();
        let task = self.spawn_schedule(name, generation);

        let slot = state
            .models
            .entry(name.to_string())
            .or_insert_with(|| ModelSlot {
                progress: ModelProgress::idle(name),
                generation,
                task: None,
            });
        slot.cancel();
        slot.progress = ModelProgress::training(name);
        slot.generation = generation;
        slot.task = task;

        state.refresh_snapshot();
    }

    /// Cancel `name`'s schedule and reset it to `{0, idle}`. Other models are untouched.
    pub fn stop_model_tracking(&self, name: &str) {
        let mut state = self.state.lock();
        let generation = state.next_generation();
        let Some(slot) = state.models.get_mut(name) else {
            return;
        };
        slot.cancel();
        // a tick already past its await sees the new generation and drops out
        slot.generation = generation;
        slot.progress.reset();
        state.refresh_snapshot();
    }

    /// Advance `name` by one step right now and return the emitted event.
    ///
    /// Returns `None` if `name` is not currently training.
    pub fn tick(&self, name: &str) -> Option<ProgressEvent> {
        self.advance(name, None).map(|step| step.event)
    }

    fn advance(&self, name: &str, generation: Option<u64>) -> Option<TickStep> {
        let step = {
            let mut state = self.state.lock();
            let session_id = state.snapshot.session_id;
            let slot = state.models.get_mut(name)?;
            if generation.is_some_and(|g| g != slot.generation)
                || slot.progress.status() != ProgressStatus::Training
            {
                return None;
            }

            let delta = self.draw_increment();
            let completed = slot.progress.advance(delta);
            if completed {
                // the timer task exits on its own after this step
                slot.task = None;
                debug!("model {name} reached 100%");
            }
            let model = slot.progress.clone();
            let aggregate = state.refresh_snapshot();

            TickStep {
                event: ProgressEvent::session(aggregate.percentage, aggregate.status, session_id)
                    .with_model(&model),
                completed,
            }
        };

        self.emit(&step.event);
        Some(step)
    }

    fn draw_increment(&self) -> f64 {
        let max_step = self.settings.max_step;
        if !(max_step.is_finite() && max_step > 0.0) {
            return 0.0;
        }
        let raw = self.increments.lock().next_increment(max_step);
        if raw.is_finite() {
            raw.clamp(0.0, max_step)
        } else {
            0.0
        }
    }

    fn spawn_schedule(self: &Arc<Self>, name: &str, generation: u64) -> Option<JoinHandle<()>> {
        let TickDriver::Timer(period) = self.settings.driver else {
            return None;
        };
        let Ok(runtime) = Handle::try_current() else {
            warn!("no tokio runtime; model {name} only advances through tick()");
            return None;
        };

        let period = period.max(MIN_TICK_PERIOD);
        let weak: Weak<Self> = Arc::downgrade(self);
        let name = name.to_string();

        Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(aggregator) = weak.upgrade() else {
                    break;
                };
                match aggregator.advance(&name, Some(generation)) {
                    Some(step) if !step.completed => {}
                    _ => break,
                }
            }
        }))
    }

    //
    // ─── QUERIES ───────────────────────────────────────────────────────────────
    //

    /// Current percentage of `name`, 0 when untracked.
    #[must_use]
    pub fn get_progress(&self, name: &str) -> f64 {
        self.state
            .lock()
            .models
            .get(name)
            .map_or(0.0, |slot| slot.progress.percentage())
    }

    #[must_use]
    pub fn get_current_progress(&self) -> ProgressSnapshot {
        self.state.lock().snapshot
    }

    #[must_use]
    pub fn model_progress(&self, name: &str) -> Option<ModelProgress> {
        self.state
            .lock()
            .models
            .get(name)
            .map(|slot| slot.progress.clone())
    }

    /// Every model ever tracked, including ones reset to idle, ordered by name.
    #[must_use]
    pub fn all_model_progress(&self) -> Vec<ModelProgress> {
        self.state
            .lock()
            .models
            .values()
            .map(|slot| slot.progress.clone())
            .collect()
    }

    #[must_use]
    pub fn aggregate(&self) -> AggregateProgress {
        self.state.lock().aggregate()
    }
}

impl Drop for ProgressAggregator {
    fn drop(&mut self) {
        for slot in self.state.get_mut().models.values_mut() {
            slot.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{FixedIncrements, ScriptedIncrements};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manual(step: f64) -> Arc<ProgressAggregator> {
        Arc::new(ProgressAggregator::new(
            ProgressSettings::external(100.0),
            FixedIncrements(step),
        ))
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    fn mean_of_tracked(agg: &ProgressAggregator) -> f64 {
        let tracked: Vec<f64> = agg
            .all_model_progress()
            .iter()
            .filter(|m| m.is_tracked())
            .map(ModelProgress::percentage)
            .collect();
        if tracked.is_empty() {
            0.0
        } else {
            tracked.iter().sum::<f64>() / tracked.len() as f64
        }
    }

    #[test]
    fn two_models_aggregate_to_their_mean_and_complete_together() {
        let agg = manual(20.0);
        agg.start_tracking(SessionId::generate());
        agg.start_model_tracking("a");
        agg.start_model_tracking("b");

        for _ in 0..5 {
            agg.tick("a");
        }
        for _ in 0..2 {
            agg.tick("b");
        }
        assert_close(agg.get_progress("a"), 100.0);
        assert_close(agg.get_progress("b"), 40.0);
        assert_close(agg.get_current_progress().percentage, 70.0);
        assert_eq!(agg.get_current_progress().status, ProgressStatus::Training);

        for _ in 0..3 {
            agg.tick("b");
        }
        let snapshot = agg.get_current_progress();
        assert_close(snapshot.percentage, 100.0);
        assert_eq!(snapshot.status, ProgressStatus::Completed);
    }

    #[test]
    fn snapshot_matches_mean_after_every_tick() {
        let agg = Arc::new(ProgressAggregator::new(
            ProgressSettings::external(7.5),
            RandomIncrements::seeded(42),
        ));
        agg.start_tracking(SessionId::generate());
        let names = ["gesture", "objectDetection", "voiceRecognition", "gaze"];
        for name in names {
            agg.start_model_tracking(name);
            assert_close(agg.get_current_progress().percentage, mean_of_tracked(&agg));
        }

        for round in 0..200 {
            let name = names[(round * 7 + round / 3) % names.len()];
            agg.tick(name);
            assert_close(agg.get_current_progress().percentage, mean_of_tracked(&agg));
        }
    }

    #[test]
    fn model_progress_is_monotonic_and_capped() {
        let agg = Arc::new(ProgressAggregator::new(
            ProgressSettings::external(30.0),
            ScriptedIncrements::new([10.0, 95.0, 500.0, -4.0]).then_repeat(30.0),
        ));
        agg.start_model_tracking("gesture");

        let mut last = 0.0;
        while agg.tick("gesture").is_some() {
            let now = agg.get_progress("gesture");
            assert!(now >= last);
            assert!(now <= 100.0);
            last = now;
        }

        let model = agg.model_progress("gesture").unwrap();
        assert_eq!(model.status(), ProgressStatus::Completed);
        assert_close(model.percentage(), 100.0);
        assert!(agg.tick("gesture").is_none());
        assert_close(agg.get_progress("gesture"), 100.0);
    }

    #[test]
    fn reset_returns_everything_to_idle() {
        let agg = manual(25.0);
        agg.start_tracking(SessionId::generate());
        for name in ["a", "b", "c"] {
            agg.start_model_tracking(name);
            agg.tick(name);
        }

        agg.reset_progress();

        assert_eq!(agg.get_current_progress(), ProgressSnapshot::idle());
        for name in ["a", "b", "c"] {
            assert_close(agg.get_progress(name), 0.0);
            assert_eq!(
                agg.model_progress(name).unwrap().status(),
                ProgressStatus::Idle
            );
        }
        assert!(agg.tick("a").is_none());
    }

    #[test]
    fn stop_tracking_leaves_models_running() {
        let agg = manual(10.0);
        agg.start_tracking(SessionId::generate());
        agg.start_model_tracking("a");
        agg.tick("a");

        agg.stop_tracking();
        assert_eq!(agg.get_current_progress(), ProgressSnapshot::idle());

        let event = agg.tick("a").expect("model still training");
        assert_close(event.model_progress.unwrap(), 20.0);
        assert_eq!(event.session_id, None);
        // the idle snapshot is not revived by model ticks
        assert_eq!(agg.get_current_progress(), ProgressSnapshot::idle());
    }

    #[test]
    fn stop_model_tracking_only_affects_that_model() {
        let agg = manual(10.0);
        agg.start_tracking(SessionId::generate());
        agg.start_model_tracking("a");
        agg.start_model_tracking("b");
        agg.tick("a");
        agg.tick("b");
        agg.tick("b");

        agg.stop_model_tracking("a");
        agg.stop_model_tracking("a");
        agg.stop_model_tracking("never-tracked");

        assert_close(agg.get_progress("a"), 0.0);
        assert_close(agg.get_progress("b"), 20.0);
        assert_close(agg.get_current_progress().percentage, 20.0);
    }

    #[test]
    fn restarting_a_model_rearms_it_from_zero() {
        let agg = manual(40.0);
        agg.start_model_tracking("a");
        agg.tick("a");
        agg.start_model_tracking("a");
        assert_close(agg.get_progress("a"), 0.0);
        assert_eq!(
            agg.model_progress("a").unwrap().status(),
            ProgressStatus::Training
        );
    }

    #[test]
    fn untracked_queries_return_idle_defaults() {
        let agg = manual(10.0);
        assert_close(agg.get_progress("nothing"), 0.0);
        assert_eq!(agg.get_current_progress(), ProgressSnapshot::idle());
        assert!(agg.tick("nothing").is_none());
        assert!(agg.all_model_progress().is_empty());
    }

    #[test]
    fn observer_receives_model_details_and_last_registration_wins() {
        let agg = manual(10.0);
        let first = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let counter = Arc::clone(&first);
        agg.set_on_progress_update(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let sink = Arc::clone(&seen);
        agg.set_on_progress_update(move |event: &ProgressEvent| {
            sink.lock().push(event.clone());
        });

        let session = SessionId::generate();
        agg.start_tracking(session);
        agg.start_model_tracking("a");
        agg.start_model_tracking("b");
        agg.tick("a");

        assert_eq!(first.load(Ordering::SeqCst), 0);
        let events = seen.lock();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.model_type.as_deref(), Some("a"));
        assert_close(event.model_progress.unwrap(), 10.0);
        assert_close(event.percentage, 5.0);
        assert_eq!(event.session_id, Some(session));
    }

    #[test]
    fn panicking_observer_does_not_stop_progress() {
        let agg = manual(50.0);
        agg.set_on_progress_update(|_| panic!("observer blew up"));
        agg.start_model_tracking("a");

        assert!(agg.tick("a").is_some());
        assert!(agg.tick("a").is_some());
        assert_close(agg.get_progress("a"), 100.0);
    }

    #[test]
    fn observer_may_call_back_into_the_aggregator() {
        let agg = manual(10.0);
        let weak = Arc::downgrade(&agg);
        agg.set_on_progress_update(move |event| {
            if let (Some(agg), Some(name)) = (weak.upgrade(), event.model_type.as_deref()) {
                agg.stop_model_tracking(name);
            }
        });
        agg.start_model_tracking("a");

        agg.tick("a");
        assert_close(agg.get_progress("a"), 0.0);
        assert!(agg.tick("a").is_none());
    }

    #[test]
    fn ticks_without_observer_still_advance() {
        let agg = manual(10.0);
        agg.start_model_tracking("a");
        agg.tick("a");
        agg.clear_on_progress_update();
        agg.tick("a");
        assert_close(agg.get_progress("a"), 20.0);
    }

    #[tokio::test]
    async fn subscribers_see_the_same_events() {
        let agg = manual(10.0);
        let mut rx_a = agg.subscribe();
        let mut rx_b = agg.subscribe();
        agg.start_model_tracking("a");
        agg.tick("a");

        let a = rx_a.recv().await.unwrap();
        let b = rx_b.recv().await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.model_type.as_deref(), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn timers_drive_every_model_to_completion() {
        let agg = Arc::new(ProgressAggregator::new(
            ProgressSettings::timer(Duration::from_millis(300), 5.0),
            RandomIncrements::seeded(3),
        ));
        agg.start_tracking(SessionId::generate());
        agg.start_model_tracking("gesture");
        agg.start_model_tracking("objectDetection");

        // a seed with tiny increments could take longer; give it plenty of room
        for _ in 0..2_000 {
            tokio::time::sleep(Duration::from_millis(300)).await;
            if agg.get_current_progress().status == ProgressStatus::Completed {
                break;
            }
        }

        let snapshot = agg.get_current_progress();
        assert_eq!(snapshot.status, ProgressStatus::Completed);
        assert_close(snapshot.percentage, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_model_never_ticks_again() {
        let agg = Arc::new(ProgressAggregator::new(
            ProgressSettings::timer(Duration::from_millis(100), 1.0),
            FixedIncrements(1.0),
        ));
        agg.start_model_tracking("a");
        agg.start_model_tracking("b");

        tokio::time::sleep(Duration::from_millis(550)).await;
        assert!(agg.get_progress("a") > 0.0);

        agg.stop_model_tracking("a");
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_close(agg.get_progress("a"), 0.0);
        assert_eq!(
            agg.model_progress("a").unwrap().status(),
            ProgressStatus::Idle
        );
        assert!(agg.get_progress("b") > 5.0);
    }
}
