//! metrix gRPC API
//!
//! The protobuf definitions are in `proto/metrics.proto` and code-generated
//! via `tonic-build`. This crate also converts between wire messages and
//! the `metrix-core` metric model.

pub mod metrics {
    pub mod v1 {
        tonic::include_proto!("metrics.v1");
    }
}

pub use metrics::v1::*;

use metrix_core::metric::{MetricError, MetricKind, MetricRecord, MetricValue};

/// Metadata key carrying the integrity tag (gRPC keys are lowercase).
pub const HASH_METADATA: &str = "hashsha256";
/// Metadata key carrying the agent's address.
pub const REAL_IP_METADATA: &str = "x-real-ip";

impl From<MetricKind> for MetricType {
    fn from(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Gauge => MetricType::Gauge,
            MetricKind::Counter => MetricType::Counter,
        }
    }
}

pub fn kind_from_wire(raw: i32) -> Result<MetricKind, MetricError> {
    match MetricType::try_from(raw) {
        Ok(MetricType::Gauge) => Ok(MetricKind::Gauge),
        Ok(MetricType::Counter) => Ok(MetricKind::Counter),
        _ => Err(MetricError::UnknownKind(raw.to_string())),
    }
}

impl Metric {
    pub fn from_value(id: impl Into<String>, value: MetricValue) -> Self {
        MetricRecord::new(id, value).into()
    }
}

impl From<MetricRecord> for Metric {
    fn from(r: MetricRecord) -> Self {
        Metric {
            id: r.id,
            r#type: MetricType::from(r.kind) as i32,
            value: r.value,
            delta: r.delta,
        }
    }
}

impl TryFrom<Metric> for MetricRecord {
    type Error = MetricError;

    fn try_from(m: Metric) -> Result<Self, Self::Error> {
        Ok(MetricRecord {
            kind: kind_from_wire(m.r#type)?,
            id: m.id,
            value: m.value,
            delta: m.delta,
        })
    }
}
