//! Row Validator
//!
//! Turns raw datastore rows into observations. A malformed row is skipped
//! and counted; it never aborts the batch.

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::debug;

use crate::error::ValidationError;
use crate::observation::{Observation, ObservationKind, RawObservation, SeverityOrValue};

/// Parse an ISO-8601 timestamp. Values without an offset are read as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ValidationError> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(ValidationError::InvalidTimestamp(raw.to_string()))
}

/// Result of validating a batch of rows
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// Rows that validated
    pub observations: Vec<Observation>,
    /// Number of rows skipped
    pub skipped: usize,
    /// Why each skipped row was rejected
    pub errors: Vec<ValidationError>,
}

/// Validator for raw observation rows
#[derive(Debug, Clone, Copy, Default)]
pub struct Validator;

impl Validator {
    pub fn new() -> Self {
        Self
    }

    /// Validate a single row
    pub fn validate(&self, row: &RawObservation) -> Result<Observation, ValidationError> {
        let source = row
            .source
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(ValidationError::MissingField("source"))?;

        let timestamp = row
            .timestamp
            .as_deref()
            .ok_or(ValidationError::MissingField("timestamp"))
            .and_then(parse_timestamp)?;

        // Plain log tables carry no kind column
        let kind = match row.kind.as_deref() {
            None => ObservationKind::Log,
            Some(k) => ObservationKind::parse(k).ok_or_else(|| ValidationError::UnknownKind(k.to_string()))?,
        };

        let reading = match (&row.value, &row.severity) {
            (Some(raw), _) => {
                let value: f64 = raw
                    .trim()
                    .parse()
                    .map_err(|_| ValidationError::NonNumericValue(raw.clone()))?;
                if !value.is_finite() {
                    return Err(ValidationError::NonNumericValue(raw.clone()));
                }
                SeverityOrValue::Value(value)
            }
            (None, Some(label)) => SeverityOrValue::Severity(label.trim().to_string()),
            (None, None) if kind == ObservationKind::Heartbeat => SeverityOrValue::Value(0.0),
            (None, None) => return Err(ValidationError::MissingField("severity")),
        };

        if kind == ObservationKind::Forecast && !matches!(reading, SeverityOrValue::Value(_)) {
            return Err(ValidationError::MissingField("value"));
        }

        Ok(Observation {
            source: source.to_string(),
            metric: row.metric.as_deref().map(str::trim).filter(|m| !m.is_empty()).map(str::to_string),
            timestamp,
            reading,
            kind,
        })
    }

    /// Validate a batch, skipping rows that fail
    pub fn validate_batch<'a, I>(&self, rows: I) -> ValidationReport
    where
        I: IntoIterator<Item = &'a RawObservation>,
    {
        let mut report = ValidationReport::default();
        for row in rows {
            match self.validate(row) {
                Ok(obs) => report.observations.push(obs),
                Err(e) => {
                    debug!("Skipping malformed observation: {}", e);
                    report.skipped += 1;
                    report.errors.push(e);
                }
            }
        }
        report
    }
}
