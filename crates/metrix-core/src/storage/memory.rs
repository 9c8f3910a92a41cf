use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;

use super::{Storage, StoreError};
use crate::metric::{
    MetricBatch, MetricKind, MetricValue, apply_counter, apply_gauge, validate_name,
};

#[derive(Default)]
struct Maps {
    gauges: HashMap<String, f64>,
    counters: HashMap<String, i64>,
}

impl Maps {
    fn check_gauge_slot(&self, name: &str) -> Result<(), StoreError> {
        validate_name(name)?;
        if self.counters.contains_key(name) {
            return Err(StoreError::retyped(name, MetricKind::Counter));
        }
        Ok(())
    }

    fn check_counter_slot(&self, name: &str) -> Result<(), StoreError> {
        validate_name(name)?;
        if self.gauges.contains_key(name) {
            return Err(StoreError::retyped(name, MetricKind::Gauge));
        }
        Ok(())
    }

    fn put_gauge(&mut self, name: &str, value: f64) {
        let current = self.gauges.get(name).copied();
        self.gauges
            .insert(name.to_string(), apply_gauge(current, value));
    }

    fn add_counter(&mut self, name: &str, delta: i64) -> i64 {
        let entry = self.counters.entry(name.to_string()).or_insert(0);
        *entry = apply_counter(Some(*entry), delta);
        *entry
    }
}

/// In-memory backend: a gauge map and a counter map under one mutex.
///
/// Batches are validated in full and applied under a single lock
/// acquisition, so a rejected batch leaves the maps untouched.
#[derive(Default)]
pub struct MemStorage {
    maps: Mutex<Maps>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads absolute values, replacing any stored entry with the same name.
    ///
    /// Counter values are stored as-is, not accumulated, so restoring the
    /// same snapshot twice does not double them.
    pub fn restore(&self, gauges: &BTreeMap<String, f64>, counters: &BTreeMap<String, i64>) {
        let mut maps = self.maps.lock();
        for (name, value) in gauges {
            maps.counters.remove(name);
            maps.gauges.insert(name.clone(), *value);
        }
        for (name, value) in counters {
            maps.gauges.remove(name);
            maps.counters.insert(name.clone(), *value);
        }
    }

    /// Consistent copy of both maps taken under one lock.
    pub fn snapshot(&self) -> (BTreeMap<String, f64>, BTreeMap<String, i64>) {
        let maps = self.maps.lock();
        let gauges = maps.gauges.iter().map(|(k, v)| (k.clone(), *v)).collect();
        let counters = maps.counters.iter().map(|(k, v)| (k.clone(), *v)).collect();
        (gauges, counters)
    }

    pub fn len(&self) -> usize {
        let maps = self.maps.lock();
        maps.gauges.len() + maps.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Storage for MemStorage {
    fn set_gauge(&self, name: &str, value: f64) -> Result<(), StoreError> {
        let mut maps = self.maps.lock();
        maps.check_gauge_slot(name)?;
        maps.put_gauge(name, value);
        Ok(())
    }

    fn set_counter(&self, name: &str, delta: i64) -> Result<(), StoreError> {
        let mut maps = self.maps.lock();
        maps.check_counter_slot(name)?;
        maps.add_counter(name, delta);
        Ok(())
    }

    /// Applies the write and reads the stored value under one lock.
    fn update(&self, name: &str, value: MetricValue) -> Result<MetricValue, StoreError> {
        let mut maps = self.maps.lock();
        match value {
            MetricValue::Gauge(v) => {
                maps.check_gauge_slot(name)?;
                maps.put_gauge(name, v);
                Ok(MetricValue::Gauge(v))
            }
            MetricValue::Counter(d) => {
                maps.check_counter_slot(name)?;
                Ok(MetricValue::Counter(maps.add_counter(name, d)))
            }
        }
    }

    fn gauge(&self, name: &str) -> Result<f64, StoreError> {
        self.maps
            .lock()
            .gauges
            .get(name)
            .copied()
            .ok_or_else(|| StoreError::not_found(MetricKind::Gauge, name))
    }

    fn counter(&self, name: &str) -> Result<i64, StoreError> {
        self.maps
            .lock()
            .counters
            .get(name)
            .copied()
            .ok_or_else(|| StoreError::not_found(MetricKind::Counter, name))
    }

    fn set_gauges(&self, batch: &HashMap<String, f64>) -> Result<(), StoreError> {
        let mut maps = self.maps.lock();
        for name in batch.keys() {
            maps.check_gauge_slot(name)?;
        }
        for (name, value) in batch {
            maps.put_gauge(name, *value);
        }
        Ok(())
    }

    fn set_counters(&self, batch: &HashMap<String, i64>) -> Result<(), StoreError> {
        let mut maps = self.maps.lock();
        for name in batch.keys() {
            maps.check_counter_slot(name)?;
        }
        for (name, delta) in batch {
            maps.add_counter(name, *delta);
        }
        Ok(())
    }

    fn update_batch(&self, batch: &MetricBatch) -> Result<(), StoreError> {
        let mut maps = self.maps.lock();
        for name in batch.gauges.keys() {
            maps.check_gauge_slot(name)?;
        }
        for name in batch.counters.keys() {
            maps.check_counter_slot(name)?;
        }
        for (name, value) in &batch.gauges {
            maps.put_gauge(name, *value);
        }
        for (name, delta) in &batch.counters {
            maps.add_counter(name, *delta);
        }
        Ok(())
    }

    fn gauges(&self) -> Result<BTreeMap<String, f64>, StoreError> {
        Ok(self.snapshot().0)
    }

    fn counters(&self) -> Result<BTreeMap<String, i64>, StoreError> {
        Ok(self.snapshot().1)
    }

    fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_gauge_last_write_wins() {
        let store = MemStorage::new();
        store.set_gauge("Alloc", 1.25).unwrap();
        store.set_gauge("Alloc", 7.5).unwrap();
        assert_eq!(store.gauge("Alloc").unwrap(), 7.5);
    }

    #[test]
    fn test_counter_sums_deltas() {
        let store = MemStorage::new();
        store.set_counter("PollCount", 3).unwrap();
        store.set_counter("PollCount", 5).unwrap();
        assert_eq!(store.counter("PollCount").unwrap(), 8);
    }

    #[test]
    fn test_missing_metric_is_not_found() {
        let store = MemStorage::new();
        assert!(matches!(
            store.gauge("nope"),
            Err(StoreError::NotFound { kind: MetricKind::Gauge, .. })
        ));
        assert!(matches!(
            store.counter("nope"),
            Err(StoreError::NotFound { kind: MetricKind::Counter, .. })
        ));
    }

    #[test]
    fn test_retyping_rejected() {
        let store = MemStorage::new();
        store.set_gauge("Alloc", 1.0).unwrap();
        assert!(matches!(
            store.set_counter("Alloc", 1),
            Err(StoreError::InvalidMetric(_))
        ));
        assert_eq!(store.gauge("Alloc").unwrap(), 1.0);
        assert!(store.counter("Alloc").is_err());
    }

    #[test]
    fn test_gauge_batch_is_idempotent() {
        let store = MemStorage::new();
        let batch: HashMap<String, f64> =
            [("a".to_string(), 1.0), ("b".to_string(), 2.0)].into();
        store.set_gauges(&batch).unwrap();
        let once = store.gauges().unwrap();
        store.set_gauges(&batch).unwrap();
        assert_eq!(store.gauges().unwrap(), once);
    }

    #[test]
    fn test_counter_batch_accumulates_on_repeat() {
        let store = MemStorage::new();
        let batch: HashMap<String, i64> = [("a".to_string(), 2), ("b".to_string(), -3)].into();
        store.set_counters(&batch).unwrap();
        store.set_counters(&batch).unwrap();
        assert_eq!(store.counter("a").unwrap(), 4);
        assert_eq!(store.counter("b").unwrap(), -6);
    }

    #[test]
    fn test_rejected_batch_applies_nothing() {
        let store = MemStorage::new();
        store.set_gauge("taken", 1.0).unwrap();

        let mut batch = MetricBatch::new();
        batch.counters.insert("fresh".to_string(), 1);
        batch.counters.insert("taken".to_string(), 1);
        batch.gauges.insert("other".to_string(), 2.0);

        assert!(store.update_batch(&batch).is_err());
        assert!(store.counter("fresh").is_err());
        assert!(store.gauge("other").is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_restore_sets_absolute_counters() {
        let store = MemStorage::new();
        let gauges = BTreeMap::from([("Alloc".to_string(), 3.4)]);
        let counters = BTreeMap::from([("PollCount".to_string(), 10)]);
        store.restore(&gauges, &counters);
        store.restore(&gauges, &counters);
        assert_eq!(store.counter("PollCount").unwrap(), 10);
        assert_eq!(store.gauge("Alloc").unwrap(), 3.4);
    }

    #[test]
    fn test_concurrent_updates_echo_distinct_totals() {
        let store = Arc::new(MemStorage::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    (0..250)
                        .map(|_| match store.update("hits", MetricValue::Counter(1)).unwrap() {
                            MetricValue::Counter(total) => total,
                            other => panic!("unexpected {other:?}"),
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut totals: Vec<i64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        totals.sort_unstable();
        assert_eq!(totals, (1..=1000).collect::<Vec<_>>());
    }

    #[test]
    fn test_concurrent_counter_writes_are_linearized() {
        let store = Arc::new(MemStorage::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        store.set_counter("hits", 1).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.counter("hits").unwrap(), 8000);
    }
}
