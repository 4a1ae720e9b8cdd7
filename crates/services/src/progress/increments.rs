use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of per-tick progress increments.
///
/// The aggregator clamps whatever comes out of here to `[0, max_step]`.
pub trait IncrementSource: Send {
    fn next_increment(&mut self, max_step: f64) -> f64;
}

/// Uniform increments in `[0, max_step]`.
#[derive(Debug, Clone)]
pub struct RandomIncrements {
    rng: StdRng,
}

impl RandomIncrements {
    /// Reproducible sequence for tests and demos.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    #[must_use]
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }
}

impl IncrementSource for RandomIncrements {
    fn next_increment(&mut self, max_step: f64) -> f64 {
        if !(max_step.is_finite() && max_step > 0.0) {
            return 0.0;
        }
        self.rng.random_range(0.0..=max_step)
    }
}

/// Same increment every tick.
#[derive(Debug, Clone, Copy)]
pub struct FixedIncrements(pub f64);

impl IncrementSource for FixedIncrements {
    fn next_increment(&mut self, _max_step: f64) -> f64 {
        self.0
    }
}

/// Replays a fixed list of increments, then repeats `fallback`.
#[derive(Debug, Clone, Default)]
pub struct ScriptedIncrements {
    steps: VecDeque<f64>,
    fallback: f64,
}

impl ScriptedIncrements {
    #[must_use]
    pub fn new(steps: impl IntoIterator<Item = f64>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            fallback: 0.0,
        }
    }

    #[must_use]
    pub fn then_repeat(mut self, fallback: f64) -> Self {
        self.fallback = fallback;
        self
    }
}

impl IncrementSource for ScriptedIncrements {
    fn next_increment(&mut self, _max_step: f64) -> f64 {
        self.steps.pop_front().unwrap_or(self.fallback)
    }
}
