//! Error types for detection-guard

use thiserror::Error;

/// All possible errors raised by a simulated round.
///
/// Every variant aborts the round it occurs in. Nothing is committed to the
/// global model registry and nothing is retried.
#[derive(Error, Debug)]
pub enum GuardError {
    /// No updates were provided for aggregation, or zero clients were requested
    #[error("No client updates provided")]
    NoClientUpdates,

    /// Parameter sets disagree on their key set or per-key shapes
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Algorithm key is not one of the registered aggregation policies
    #[error("Unknown algorithm '{0}' (use 'fed_avg' or 'detection_guard')")]
    UnknownAlgorithm(String),

    /// Local training produced non-finite values
    #[error("Training diverged on client {client_id}: {reason}")]
    TrainingDivergence {
        /// Client whose local pass diverged
        client_id: usize,
        /// What went non-finite
        reason: String,
    },

    /// Trim fraction is negative or not finite
    #[error("Invalid trim fraction: {0} (must be finite and >= 0.0)")]
    InvalidTrimFraction(f64),

    /// Declared attacker fraction is outside [0, 1)
    #[error("Invalid malicious percent: {0} (must be in [0.0, 1.0))")]
    InvalidMaliciousPercent(f64),

    /// Simulation configuration failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Array shape error
    #[error("Array shape error: {0}")]
    ShapeError(String),

    /// Configuration could not be parsed
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

impl From<ndarray::ShapeError> for GuardError {
    fn from(e: ndarray::ShapeError) -> Self {
        GuardError::ShapeError(e.to_string())
    }
}
