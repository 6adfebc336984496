//! Validation Error Types

use thiserror::Error;

/// Errors raised while turning a raw row into an [`Observation`](crate::Observation)
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// Timestamp present but not parseable
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Value present but not a finite number
    #[error("Non-numeric value: {0}")]
    NonNumericValue(String),

    /// Observation kind outside the known vocabulary
    #[error("Unknown observation kind: {0}")]
    UnknownKind(String),
}
