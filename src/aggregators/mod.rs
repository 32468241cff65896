//! Aggregation policies for combining client parameter sets.
//!
//! | Algorithm key | Strategy | Byzantine Tolerance |
//! |---------------|----------|---------------------|
//! | `fed_avg` | [`fedavg`] (coordinate-wise mean) | None (baseline) |
//! | `detection_guard` | [`trimmed_mean`] (coordinate-wise) | `floor(N * trim_fraction)` per side |

pub mod fedavg;
pub mod trimmed_mean;

pub use fedavg::fedavg;
pub use trimmed_mean::{trimmed_mean, trimmed_mean_stacked};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GuardError;
use crate::params::ParameterSet;

/// How N client parameter sets are reduced to one.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AggregationStrategy {
    /// Elementwise arithmetic mean of every client
    Mean,
    /// Coordinate-wise trimmed mean
    TrimmedMean {
        /// Fraction of clients trimmed from each end of every coordinate
        trim_fraction: f64,
    },
}

impl AggregationStrategy {
    /// Reduce client parameter sets to a single parameter set.
    ///
    /// Fails with [`GuardError::NoClientUpdates`] on empty input and
    /// [`GuardError::ShapeMismatch`] when the sets disagree on schema.
    pub fn reduce(&self, updates: &[ParameterSet]) -> Result<ParameterSet, GuardError> {
        match *self {
            AggregationStrategy::Mean => fedavg(updates),
            AggregationStrategy::TrimmedMean { trim_fraction } => {
                trimmed_mean(updates, trim_fraction)
            }
        }
    }

    /// Short human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            AggregationStrategy::Mean => "mean",
            AggregationStrategy::TrimmedMean { .. } => "trimmed_mean",
        }
    }
}

/// Aggregation policy selected by the algorithm key of a round.
///
/// Each variant owns an independent global model in the
/// [`GlobalModelRegistry`](crate::registry::GlobalModelRegistry).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Standard FedAvg, `fed_avg`
    FedAvg,
    /// Trimmed-mean defense, `detection_guard`
    DetectionGuard,
}

impl Algorithm {
    /// Every supported algorithm, in registry order.
    pub const ALL: [Algorithm; 2] = [Algorithm::FedAvg, Algorithm::DetectionGuard];

    /// The wire key for this algorithm.
    pub fn key(&self) -> &'static str {
        match self {
            Algorithm::FedAvg => "fed_avg",
            Algorithm::DetectionGuard => "detection_guard",
        }
    }

    /// Resolve the aggregation strategy for a round.
    ///
    /// The trimmed mean uses the declared attacker fraction as its trim
    /// fraction; it is not estimated from the updates.
    pub fn strategy(&self, malicious_percent: f64) -> AggregationStrategy {
        match self {
            Algorithm::FedAvg => AggregationStrategy::Mean,
            Algorithm::DetectionGuard => AggregationStrategy::TrimmedMean {
                trim_fraction: malicious_percent,
            },
        }
    }

    /// Log line reported after aggregation.
    pub fn aggregation_log(&self) -> &'static str {
        match self {
            Algorithm::FedAvg => "FedAvg: Standard mean aggregation applied.",
            Algorithm::DetectionGuard => "DetectionGuard: Trimmed Mean aggregation applied.",
        }
    }
}

impl FromStr for Algorithm {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Algorithm::ALL
            .into_iter()
            .find(|algorithm| algorithm.key() == s)
            .ok_or_else(|| GuardError::UnknownAlgorithm(s.to_string()))
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Check that `updates` is non-empty and every set shares the first one's schema.
pub(crate) fn validate_updates(updates: &[ParameterSet]) -> Result<&ParameterSet, GuardError> {
    let first = updates.first().ok_or(GuardError::NoClientUpdates)?;
    for update in &updates[1..] {
        first.ensure_same_schema(update)?;
    }
    Ok(first)
}

/// Mean accumulated progressively, `m += (x - m) / i`.
///
/// Identical inputs reproduce the input exactly.
pub(crate) fn running_mean(values: impl IntoIterator<Item = f32>) -> f32 {
    values
        .into_iter()
        .enumerate()
        .fold(0.0f32, |mean, (i, x)| mean + (x - mean) / (i + 1) as f32)
}
