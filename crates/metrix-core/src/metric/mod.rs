//! Metric value types and their merge rules.
//!
//! Two kinds exist:
//! - gauge: `f64` sample, every write replaces the stored value
//! - counter: `i64` accumulator, every write adds its delta
//!
//! Canonical text form is what `GET /value/...` returns: gauges render as the
//! shortest decimal that round-trips (never exponent notation, no padding),
//! counters as a plain integer.

mod record;

pub use record::{MetricBatch, MetricRecord};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Validation errors for metric names, kinds and raw values.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetricError {
    #[error("unknown metric type: {0:?}")]
    UnknownKind(String),
    #[error("metric name is empty")]
    EmptyName,
    #[error("invalid {kind} value {raw:?}")]
    InvalidValue { kind: MetricKind, raw: String },
    #[error("{kind} {name:?} carries no value")]
    MissingValue { kind: MetricKind, name: String },
    #[error("gauge {0:?} is not a finite number")]
    NonFinite(String),
    #[error("metric {0:?} sent as both gauge and counter")]
    KindConflict(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            other => Err(MetricError::UnknownKind(other.to_string())),
        }
    }
}

/// A single metric value tagged with its kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Gauge(f64),
    Counter(i64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Gauge(_) => MetricKind::Gauge,
            MetricValue::Counter(_) => MetricKind::Counter,
        }
    }

    /// Parses a raw path segment (`/update/{kind}/{name}/{value}`) for the given kind.
    pub fn parse(kind: MetricKind, raw: &str) -> Result<Self, MetricError> {
        let invalid = || MetricError::InvalidValue {
            kind,
            raw: raw.to_string(),
        };
        match kind {
            MetricKind::Gauge => {
                let v: f64 = raw.parse().map_err(|_| invalid())?;
                if !v.is_finite() {
                    return Err(invalid());
                }
                Ok(MetricValue::Gauge(v))
            }
            MetricKind::Counter => raw
                .parse::<i64>()
                .map(MetricValue::Counter)
                .map_err(|_| invalid()),
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Gauge(v) => f.write_str(&format_gauge(*v)),
            MetricValue::Counter(v) => write!(f, "{v}"),
        }
    }
}

/// Gauge merge rule: the new sample replaces whatever was stored.
pub fn apply_gauge(_current: Option<f64>, value: f64) -> f64 {
    value
}

/// Counter merge rule: the delta is added to the stored value (0 when absent).
///
/// Negative deltas are accepted and simply decrease the accumulator.
/// Arithmetic is 64-bit signed and wraps on overflow.
pub fn apply_counter(current: Option<i64>, delta: i64) -> i64 {
    current.unwrap_or(0).wrapping_add(delta)
}

/// Canonical gauge text: `3.400` -> `"3.4"`, `2.0` -> `"2"`, `1e-7` -> `"0.0000001"`.
pub fn format_gauge(value: f64) -> String {
    // f64's Display is the shortest round-trip form and never switches to exponent notation.
    format!("{value}")
}

/// Rejects empty metric names.
pub fn validate_name(name: &str) -> Result<(), MetricError> {
    if name.is_empty() {
        Err(MetricError::EmptyName)
    } else {
        Ok(())
    }
}
