//! Time-Decay Aggregation
//!
//! Folds a window of timestamped observations into one score in `[0, 100]`
//! using exponential half-life weighting. Old observations are down-weighted,
//! never filtered out.

mod aggregator;
mod history;

pub use aggregator::{aggregate, decay_factor, minutes_between, DecayAggregator, MIN_HALF_LIFE_MINUTES};
pub use history::{DecayedScore, ScoreHistory};
