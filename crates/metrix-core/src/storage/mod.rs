//! Metric storage engine.
//!
//! [`Storage`] is the one contract every backend implements:
//! - [`MemStorage`]: two maps behind a single mutex
//! - [`FileStorage`]: wraps `MemStorage`, restores from and dumps to a JSON snapshot file
//! - [`PgStorage`]: one PostgreSQL table per metric kind, merge rules run as upserts
//!
//! All methods are blocking. Async callers run them on the blocking pool.

mod file;
mod memory;
mod pg;

pub use file::{FileStorage, FlushPolicy, SnapshotFile};
pub use memory::MemStorage;
pub use pg::PgStorage;

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::metric::{MetricBatch, MetricError, MetricKind, MetricValue, format_gauge};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {name:?} not found")]
    NotFound { kind: MetricKind, name: String },
    #[error("invalid metric: {0}")]
    InvalidMetric(String),
    #[error("storage backend unavailable: {0}")]
    BackendUnavailable(String),
}

impl StoreError {
    pub(crate) fn not_found(kind: MetricKind, name: &str) -> Self {
        StoreError::NotFound {
            kind,
            name: name.to_string(),
        }
    }

    pub(crate) fn retyped(name: &str, stored_as: MetricKind) -> Self {
        StoreError::InvalidMetric(format!("{name:?} is already stored as a {stored_as}"))
    }
}

impl From<MetricError> for StoreError {
    fn from(e: MetricError) -> Self {
        StoreError::InvalidMetric(e.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::BackendUnavailable(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::BackendUnavailable(e.to_string())
    }
}

impl From<postgres::Error> for StoreError {
    fn from(e: postgres::Error) -> Self {
        StoreError::BackendUnavailable(e.to_string())
    }
}

/// Storage contract shared by all backends.
///
/// Gauge writes overwrite, counter writes accumulate. A name holds one kind
/// only: writing the other kind to it fails with `InvalidMetric`.
pub trait Storage: Send + Sync {
    fn set_gauge(&self, name: &str, value: f64) -> Result<(), StoreError>;

    fn set_counter(&self, name: &str, delta: i64) -> Result<(), StoreError>;

    fn gauge(&self, name: &str) -> Result<f64, StoreError>;

    fn counter(&self, name: &str) -> Result<i64, StoreError>;

    fn set_gauges(&self, batch: &HashMap<String, f64>) -> Result<(), StoreError>;

    fn set_counters(&self, batch: &HashMap<String, i64>) -> Result<(), StoreError>;

    /// Applies both halves of a merged batch. Backends override this to make
    /// the whole batch atomic.
    fn update_batch(&self, batch: &MetricBatch) -> Result<(), StoreError> {
        self.set_gauges(&batch.gauges)?;
        self.set_counters(&batch.counters)
    }

    /// All gauges, ordered by name.
    fn gauges(&self) -> Result<BTreeMap<String, f64>, StoreError>;

    /// All counters, ordered by name.
    fn counters(&self) -> Result<BTreeMap<String, i64>, StoreError>;

    /// Liveness probe. Local backends always succeed.
    fn ping(&self) -> Result<(), StoreError>;

    /// Persists deferred state. No-op for backends that write synchronously.
    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Applies one write and returns the value stored afterwards.
    fn update(&self, name: &str, value: MetricValue) -> Result<MetricValue, StoreError> {
        crate::metric::validate_name(name)?;
        match value {
            MetricValue::Gauge(v) => {
                self.set_gauge(name, v)?;
                Ok(MetricValue::Gauge(v))
            }
            MetricValue::Counter(d) => {
                self.set_counter(name, d)?;
                self.counter(name).map(MetricValue::Counter)
            }
        }
    }

    fn get(&self, kind: MetricKind, name: &str) -> Result<MetricValue, StoreError> {
        match kind {
            MetricKind::Gauge => self.gauge(name).map(MetricValue::Gauge),
            MetricKind::Counter => self.counter(name).map(MetricValue::Counter),
        }
    }

    /// Canonical values of every metric: gauges by name, then counters by name.
    fn list_all(&self) -> Result<Vec<String>, StoreError> {
        let gauges = self.gauges()?;
        let counters = self.counters()?;
        let mut out = Vec::with_capacity(gauges.len() + counters.len());
        out.extend(gauges.values().map(|v| format_gauge(*v)));
        out.extend(counters.values().map(|v| v.to_string()));
        Ok(out)
    }
}

/// Which backend the server runs on.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendConfig {
    Memory,
    File {
        path: PathBuf,
        restore: bool,
        policy: FlushPolicy,
    },
    Postgres {
        dsn: String,
    },
}

/// Opens the configured backend.
pub fn open(config: &BackendConfig) -> Result<Arc<dyn Storage>, StoreError> {
    let storage: Arc<dyn Storage> = match config {
        BackendConfig::Memory => {
            info!("storage: in-memory");
            Arc::new(MemStorage::new())
        }
        BackendConfig::File {
            path,
            restore,
            policy,
        } => {
            info!(path = %path.display(), restore, ?policy, "storage: file-backed");
            Arc::new(FileStorage::open(path, *restore, *policy)?)
        }
        BackendConfig::Postgres { dsn } => {
            info!("storage: postgres");
            Arc::new(PgStorage::connect(dsn)?)
        }
    };
    Ok(storage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_all_orders_gauges_then_counters() {
        let store = MemStorage::new();
        store.set_counter("b_counter", 2).unwrap();
        store.set_gauge("z_gauge", 1.5).unwrap();
        store.set_counter("a_counter", 1).unwrap();
        store.set_gauge("a_gauge", 3.400).unwrap();

        assert_eq!(store.list_all().unwrap(), vec!["3.4", "1.5", "1", "2"]);
    }

    #[test]
    fn test_update_returns_accumulated_counter() {
        let store = MemStorage::new();
        store.update("PollCount", MetricValue::Counter(3)).unwrap();
        let stored = store.update("PollCount", MetricValue::Counter(5)).unwrap();
        assert_eq!(stored, MetricValue::Counter(8));
    }

    #[test]
    fn test_update_rejects_empty_name() {
        let store = MemStorage::new();
        let err = store.update("", MetricValue::Gauge(1.0)).unwrap_err();
        assert!(matches!(err, StoreError::InvalidMetric(_)));
    }

    #[test]
    fn test_open_memory_backend() {
        let store = open(&BackendConfig::Memory).unwrap();
        store.set_gauge("Alloc", 1.0).unwrap();
        assert_eq!(store.get(MetricKind::Gauge, "Alloc").unwrap(), MetricValue::Gauge(1.0));
        assert!(matches!(
            store.get(MetricKind::Counter, "Alloc"),
            Err(StoreError::NotFound { .. })
        ));
        assert!(store.ping().is_ok());
    }
}
