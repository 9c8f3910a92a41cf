//! Wire representation of a metric and merged write batches.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{MetricError, MetricKind, MetricValue, apply_counter, validate_name};

/// JSON shape of a metric: `{"id":"Alloc","type":"gauge","value":3.4}`.
///
/// `value` is present only for gauges and `delta` only for counters. The
/// absent field is omitted, never serialized as zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
}

impl MetricRecord {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Gauge,
            value: Some(value),
            delta: None,
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Counter,
            value: None,
            delta: Some(delta),
        }
    }

    pub fn new(id: impl Into<String>, value: MetricValue) -> Self {
        match value {
            MetricValue::Gauge(v) => Self::gauge(id, v),
            MetricValue::Counter(d) => Self::counter(id, d),
        }
    }

    /// Validates the record and extracts the value matching its kind.
    pub fn metric_value(&self) -> Result<MetricValue, MetricError> {
        validate_name(&self.id)?;
        match self.kind {
            MetricKind::Gauge => {
                let v = self.value.ok_or_else(|| MetricError::MissingValue {
                    kind: self.kind,
                    name: self.id.clone(),
                })?;
                if !v.is_finite() {
                    return Err(MetricError::NonFinite(self.id.clone()));
                }
                Ok(MetricValue::Gauge(v))
            }
            MetricKind::Counter => self
                .delta
                .map(MetricValue::Counter)
                .ok_or_else(|| MetricError::MissingValue {
                    kind: self.kind,
                    name: self.id.clone(),
                }),
        }
    }
}

/// A set of writes merged per metric kind, ready for a storage batch call.
///
/// Counter entries with the same name are summed, gauge entries with the same
/// name keep the last value. A name used for both kinds rejects the batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricBatch {
    pub gauges: HashMap<String, f64>,
    pub counters: HashMap<String, i64>,
}

impl MetricBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &str, value: MetricValue) -> Result<(), MetricError> {
        validate_name(name)?;
        match value {
            MetricValue::Gauge(v) => {
                if self.counters.contains_key(name) {
                    return Err(MetricError::KindConflict(name.to_string()));
                }
                self.gauges.insert(name.to_string(), v);
            }
            MetricValue::Counter(d) => {
                if self.gauges.contains_key(name) {
                    return Err(MetricError::KindConflict(name.to_string()));
                }
                let entry = self.counters.entry(name.to_string()).or_insert(0);
                *entry = apply_counter(Some(*entry), d);
            }
        }
        Ok(())
    }

    pub fn from_records<'a, I>(records: I) -> Result<Self, MetricError>
    where
        I: IntoIterator<Item = &'a MetricRecord>,
    {
        let mut batch = Self::new();
        for record in records {
            batch.push(&record.id, record.metric_value()?)?;
        }
        Ok(batch)
    }

    pub fn len(&self) -> usize {
        self.gauges.len() + self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gauges.is_empty() && self.counters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_omits_absent_field() {
        let json = serde_json::to_string(&MetricRecord::gauge("Alloc", 0.0)).unwrap();
        assert_eq!(json, r#"{"id":"Alloc","type":"gauge","value":0.0}"#);

        let json = serde_json::to_string(&MetricRecord::counter("PollCount", 0)).unwrap();
        assert_eq!(json, r#"{"id":"PollCount","type":"counter","delta":0}"#);
    }

    #[test]
    fn test_json_garbage_value_rejected() {
        let res = serde_json::from_str::<MetricRecord>(
            r#"{"id":"Alloc","type":"gauge","value":"abracadabra"}"#,
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_json_unknown_type_rejected() {
        let res = serde_json::from_str::<MetricRecord>(r#"{"id":"x","type":"summary","value":1}"#);
        assert!(res.is_err());
    }

    #[test]
    fn test_missing_value_for_kind() {
        let record: MetricRecord =
            serde_json::from_str(r#"{"id":"Alloc","type":"gauge","delta":3}"#).unwrap();
        assert!(matches!(
            record.metric_value(),
            Err(MetricError::MissingValue { .. })
        ));
        assert_eq!(
            MetricRecord::counter("", 1).metric_value(),
            Err(MetricError::EmptyName)
        );
    }

    #[test]
    fn test_batch_sums_duplicate_counters() {
        let records = vec![
            MetricRecord::counter("PollCount", 3),
            MetricRecord::gauge("Alloc", 1.0),
            MetricRecord::counter("PollCount", 5),
            MetricRecord::gauge("Alloc", 2.0),
        ];
        let batch = MetricBatch::from_records(&records).unwrap();
        assert_eq!(batch.counters["PollCount"], 8);
        assert_eq!(batch.gauges["Alloc"], 2.0);
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_batch_rejects_kind_conflict() {
        let records = vec![
            MetricRecord::counter("Mixed", 1),
            MetricRecord::gauge("Mixed", 1.0),
        ];
        assert_eq!(
            MetricBatch::from_records(&records),
            Err(MetricError::KindConflict("Mixed".to_string()))
        );
    }
}
