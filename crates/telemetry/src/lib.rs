//! Telemetry Model and Validation
//!
//! Provides the observation model shared by every stage of the pipeline,
//! validation of raw datastore rows, and severity normalization.

mod error;
mod key;
mod observation;
mod severity;
mod validator;

pub use error::ValidationError;
pub use key::MonitorKey;
pub use observation::{Observation, ObservationKind, RawObservation, SeverityOrValue};
pub use severity::{SeverityLevel, SeverityNormalizer, DEFAULT_UNKNOWN_SCORE};
pub use validator::{parse_timestamp, ValidationReport, Validator};
