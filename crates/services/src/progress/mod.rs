mod aggregator;
mod increments;

pub use aggregator::{ProgressAggregator, ProgressCallback, ProgressSettings, TickDriver};
pub use increments::{FixedIncrements, IncrementSource, RandomIncrements, ScriptedIncrements};
