use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::SessionId;

/// Upper bound of every progress percentage.
pub const MAX_PERCENTAGE: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    #[default]
    Idle,
    Training,
    Completed,
}

impl ProgressStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ProgressStatus::Idle => "idle",
            ProgressStatus::Training => "training",
            ProgressStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//
// ─── PER-MODEL PROGRESS ────────────────────────────────────────────────────────
//

/// Progress of one named sub-model.
///
/// Percentage only grows while training and is clamped at 100; reaching 100
/// flips the status to `Completed`, after which `advance` is a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProgress {
    name: String,
    percentage: f64,
    status: ProgressStatus,
}

impl ModelProgress {
    #[must_use]
    pub fn idle(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            percentage: 0.0,
            status: ProgressStatus::Idle,
        }
    }

    #[must_use]
    pub fn training(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            percentage: 0.0,
            status: ProgressStatus::Training,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn percentage(&self) -> f64 {
        self.percentage
    }

    #[must_use]
    pub fn status(&self) -> ProgressStatus {
        self.status
    }

    /// Idle entries are kept for display but do not count towards the aggregate.
    #[must_use]
    pub fn is_tracked(&self) -> bool {
        self.status != ProgressStatus::Idle
    }

    /// Add `delta` percentage points.
    ///
    /// Negative or non-finite deltas count as zero. Returns `true` only on the
    /// step that completes the model.
    pub fn advance(&mut self, delta: f64) -> bool {
        if self.status != ProgressStatus::Training {
            return false;
        }
        let delta = if delta.is_finite() { delta.max(0.0) } else { 0.0 };
        self.percentage = (self.percentage + delta).min(MAX_PERCENTAGE);
        if self.percentage >= MAX_PERCENTAGE {
            self.status = ProgressStatus::Completed;
            return true;
        }
        false
    }

    /// Back to `{0, idle}`.
    pub fn reset(&mut self) {
        self.percentage = 0.0;
        self.status = ProgressStatus::Idle;
    }
}

//
// ─── AGGREGATE ─────────────────────────────────────────────────────────────────
//

/// Mean progress over the tracked sub-models.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AggregateProgress {
    pub percentage: f64,
    pub status: ProgressStatus,
    pub tracked: usize,
}

impl AggregateProgress {
    /// Derive the aggregate from the current per-model entries.
    ///
    /// With nothing tracked the result is `{0, idle}`. The status is
    /// `Completed` once every tracked entry completed, `Training` otherwise.
    pub fn from_models<'a, I>(models: I) -> Self
    where
        I: IntoIterator<Item = &'a ModelProgress>,
    {
        let mut sum = 0.0;
        let mut tracked = 0_usize;
        let mut all_completed = true;

        for model in models.into_iter().filter(|m| m.is_tracked()) {
            sum += model.percentage();
            tracked += 1;
            all_completed &= model.status() == ProgressStatus::Completed;
        }

        if tracked == 0 {
            return Self::default();
        }

        #[allow(clippy::cast_precision_loss)]
        let percentage = sum / tracked as f64;
        let status = if all_completed {
            ProgressStatus::Completed
        } else {
            ProgressStatus::Training
        };

        Self {
            percentage,
            status,
            tracked,
        }
    }
}

//
// ─── REPORTED SHAPES ───────────────────────────────────────────────────────────
//

/// Session-level progress as last computed by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub percentage: f64,
    pub status: ProgressStatus,
    pub session_id: Option<SessionId>,
}

impl ProgressSnapshot {
    #[must_use]
    pub fn idle() -> Self {
        Self::default()
    }
}

/// Payload delivered to progress observers.
///
/// `model_type` and `model_progress` are set when the update comes from a
/// single sub-model's tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub percentage: f64,
    pub status: ProgressStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressEvent {
    #[must_use]
    pub fn session(
        percentage: f64,
        status: ProgressStatus,
        session_id: Option<SessionId>,
    ) -> Self {
        Self {
            percentage,
            status,
            session_id,
            model_type: None,
            model_progress: None,
            message: None,
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: &ModelProgress) -> Self {
        self.model_type = Some(model.name().to_string());
        self.model_progress = Some(model.percentage());
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_clamps_and_completes_once() {
        let mut m = ModelProgress::training("gesture");
        assert!(!m.advance(60.0));
        assert!(m.advance(60.0));
        assert!((m.percentage() - MAX_PERCENTAGE).abs() < f64::EPSILON);
        assert_eq!(m.status(), ProgressStatus::Completed);

        assert!(!m.advance(10.0));
        assert!((m.percentage() - MAX_PERCENTAGE).abs() < f64::EPSILON);
    }

    #[test]
    fn advance_ignores_bad_deltas_and_idle_entries() {
        let mut m = ModelProgress::training("gesture");
        m.advance(-5.0);
        m.advance(f64::NAN);
        assert!(m.percentage().abs() < f64::EPSILON);

        let mut idle = ModelProgress::idle("voice");
        idle.advance(50.0);
        assert!(idle.percentage().abs() < f64::EPSILON);
    }

    #[test]
    fn aggregate_is_mean_of_tracked_entries_only() {
        let mut a = ModelProgress::training("a");
        let mut b = ModelProgress::training("b");
        let idle = ModelProgress::idle("c");
        a.advance(100.0);
        b.advance(40.0);

        let agg = AggregateProgress::from_models([&a, &b, &idle]);
        assert!((agg.percentage - 70.0).abs() < 1e-9);
        assert_eq!(agg.status, ProgressStatus::Training);
        assert_eq!(agg.tracked, 2);

        b.advance(60.0);
        let agg = AggregateProgress::from_models([&a, &b, &idle]);
        assert!((agg.percentage - 100.0).abs() < 1e-9);
        assert_eq!(agg.status, ProgressStatus::Completed);
    }

    #[test]
    fn aggregate_of_nothing_is_idle_zero() {
        let agg = AggregateProgress::from_models(std::iter::empty());
        assert_eq!(agg, AggregateProgress::default());
        assert_eq!(agg.status, ProgressStatus::Idle);
    }

    #[test]
    fn event_serializes_like_the_observer_sink_expects() {
        let mut m = ModelProgress::training("gesture");
        m.advance(12.5);
        let event = ProgressEvent::session(4.0, ProgressStatus::Training, None).with_model(&m);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["modelType"], "gesture");
        assert_eq!(json["modelProgress"], 12.5);
        assert_eq!(json["status"], "training");
        assert!(json.get("sessionId").is_none());
    }
}
