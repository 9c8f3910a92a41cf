//! File-backed storage: an in-memory store plus a JSON snapshot file.
//!
//! File layout:
//! ```text
//! {"gauges": {"Alloc": 3.4, ...}, "counters": {"PollCount": 8, ...}}
//! ```
//!
//! The snapshot is written atomically via a `.tmp` intermediate file and a
//! rename. With [`FlushPolicy::Immediate`] every mutation rewrites it; with
//! [`FlushPolicy::Interval`] the caller drives [`Storage::flush`].

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{MemStorage, Storage, StoreError};
use crate::metric::{MetricBatch, MetricValue};

/// When the snapshot file is rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// After every successful mutation (write-through).
    Immediate,
    /// Deferred to an external periodic trigger.
    Interval(Duration),
}

impl FlushPolicy {
    /// `0` seconds means write-through.
    pub fn from_interval(interval: Duration) -> Self {
        if interval.is_zero() {
            FlushPolicy::Immediate
        } else {
            FlushPolicy::Interval(interval)
        }
    }
}

/// On-disk snapshot format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotFile {
    #[serde(default)]
    pub gauges: BTreeMap<String, f64>,
    #[serde(default)]
    pub counters: BTreeMap<String, i64>,
}

impl SnapshotFile {
    pub fn read(path: &Path) -> Result<Self, StoreError> {
        let data = fs::read(path)?;
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        Ok(serde_json::from_slice(&data)?)
    }

    /// Writes the snapshot atomically (`.tmp` + rename).
    pub fn write(&self, path: &Path) -> Result<(), StoreError> {
        let tmp_path = tmp_path(path);
        let data = serde_json::to_vec(self)?;

        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

/// `metrics.json` -> `metrics.json.tmp`. Never equal to `path` itself.
fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

pub struct FileStorage {
    mem: MemStorage,
    path: PathBuf,
    policy: FlushPolicy,
    // Serializes dumps so the last rename always carries the newest state.
    dump_lock: Mutex<()>,
}

impl FileStorage {
    /// Opens the store, replaying the snapshot file when `restore` is set.
    ///
    /// A missing file is not an error. An unreadable or malformed one is.
    pub fn open(
        path: impl Into<PathBuf>,
        restore: bool,
        policy: FlushPolicy,
    ) -> Result<Self, StoreError> {
        let path = path.into();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        // Cleanup a .tmp left by an interrupted dump
        let tmp_path = tmp_path(&path);
        if tmp_path.exists() {
            let _ = fs::remove_file(&tmp_path);
        }

        let mem = MemStorage::new();
        if restore {
            match SnapshotFile::read(&path) {
                Ok(snapshot) => {
                    mem.restore(&snapshot.gauges, &snapshot.counters);
                    info!(
                        path = %path.display(),
                        gauges = snapshot.gauges.len(),
                        counters = snapshot.counters.len(),
                        "restored metrics snapshot"
                    );
                }
                Err(StoreError::BackendUnavailable(_)) if !path.exists() => {
                    debug!(path = %path.display(), "no snapshot to restore");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(Self {
            mem,
            path,
            policy,
            dump_lock: Mutex::new(()),
        })
    }

    /// Serializes the full current state to the snapshot file.
    pub fn dump(&self) -> Result<(), StoreError> {
        let _guard = self.dump_lock.lock();
        let (gauges, counters) = self.mem.snapshot();
        SnapshotFile { gauges, counters }.write(&self.path)
    }

    /// Write-through hook. A failed dump is logged and the in-memory
    /// mutation stands.
    fn after_write(&self) {
        if self.policy == FlushPolicy::Immediate
            && let Err(e) = self.dump()
        {
            warn!(path = %self.path.display(), error = %e, "snapshot dump failed");
        }
    }
}

impl Storage for FileStorage {
    fn set_gauge(&self, name: &str, value: f64) -> Result<(), StoreError> {
        self.mem.set_gauge(name, value)?;
        self.after_write();
        Ok(())
    }

    fn set_counter(&self, name: &str, delta: i64) -> Result<(), StoreError> {
        self.mem.set_counter(name, delta)?;
        self.after_write();
        Ok(())
    }

    fn update(&self, name: &str, value: MetricValue) -> Result<MetricValue, StoreError> {
        let stored = self.mem.update(name, value)?;
        self.after_write();
        Ok(stored)
    }

    fn gauge(&self, name: &str) -> Result<f64, StoreError> {
        self.mem.gauge(name)
    }

    fn counter(&self, name: &str) -> Result<i64, StoreError> {
        self.mem.counter(name)
    }

    fn set_gauges(&self, batch: &HashMap<String, f64>) -> Result<(), StoreError> {
        self.mem.set_gauges(batch)?;
        self.after_write();
        Ok(())
    }

    fn set_counters(&self, batch: &HashMap<String, i64>) -> Result<(), StoreError> {
        self.mem.set_counters(batch)?;
        self.after_write();
        Ok(())
    }

    fn update_batch(&self, batch: &MetricBatch) -> Result<(), StoreError> {
        self.mem.update_batch(batch)?;
        self.after_write();
        Ok(())
    }

    fn gauges(&self) -> Result<BTreeMap<String, f64>, StoreError> {
        self.mem.gauges()
    }

    fn counters(&self) -> Result<BTreeMap<String, i64>, StoreError> {
        self.mem.counters()
    }

    fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.dump()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_dump_and_restore_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metrics.json");

        let store = FileStorage::open(&path, false, FlushPolicy::Interval(Duration::from_secs(60)))
            .unwrap();
        store.set_gauge("Alloc", 3.4).unwrap();
        store.set_gauge("Zero", 0.0).unwrap();
        store.set_counter("PollCount", 3).unwrap();
        store.set_counter("PollCount", 5).unwrap();
        store.flush().unwrap();

        let restored = FileStorage::open(&path, true, FlushPolicy::Immediate).unwrap();
        assert_eq!(restored.gauges().unwrap(), store.gauges().unwrap());
        assert_eq!(restored.counters().unwrap(), store.counters().unwrap());
        assert_eq!(restored.counter("PollCount").unwrap(), 8);
    }

    #[test]
    fn test_repeated_restore_does_not_double_counters() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metrics.json");

        let store = FileStorage::open(&path, true, FlushPolicy::Immediate).unwrap();
        store.set_counter("PollCount", 4).unwrap();
        drop(store);

        for _ in 0..3 {
            let store = FileStorage::open(&path, true, FlushPolicy::Immediate).unwrap();
            assert_eq!(store.counter("PollCount").unwrap(), 4);
            store.flush().unwrap();
        }
    }

    #[test]
    fn test_write_through_persists_every_mutation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metrics.json");

        let store = FileStorage::open(&path, false, FlushPolicy::Immediate).unwrap();
        store.set_gauge("Alloc", 1.5).unwrap();

        let on_disk = SnapshotFile::read(&path).unwrap();
        assert_eq!(on_disk.gauges.get("Alloc"), Some(&1.5));
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn test_tmp_suffixed_snapshot_survives_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metrics.tmp");

        let store = FileStorage::open(&path, true, FlushPolicy::Immediate).unwrap();
        store.set_counter("PollCount", 4).unwrap();
        drop(store);

        let reopened = FileStorage::open(&path, true, FlushPolicy::Immediate).unwrap();
        assert_eq!(reopened.counters().unwrap().get("PollCount"), Some(&4));
        assert_eq!(tmp_path(&path), dir.path().join("metrics.tmp.tmp"));
    }

    #[test]
    fn test_stale_tmp_is_removed_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        fs::write(dir.path().join("metrics.json.tmp"), b"partial").unwrap();

        FileStorage::open(&path, true, FlushPolicy::Immediate).unwrap();
        assert!(!dir.path().join("metrics.json.tmp").exists());
    }

    #[test]
    fn test_interval_policy_defers_dump() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metrics.json");

        let store =
            FileStorage::open(&path, false, FlushPolicy::from_interval(Duration::from_secs(300)))
                .unwrap();
        store.set_counter("PollCount", 1).unwrap();
        assert!(!path.exists());

        store.flush().unwrap();
        assert_eq!(SnapshotFile::read(&path).unwrap().counters["PollCount"], 1);
    }

    #[test]
    fn test_restore_missing_file_starts_empty() {
        let dir = tempdir().unwrap();
        let store =
            FileStorage::open(dir.path().join("absent.json"), true, FlushPolicy::Immediate)
                .unwrap();
        assert!(store.gauges().unwrap().is_empty());
    }

    #[test]
    fn test_restore_malformed_file_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        fs::write(&path, b"{not json").unwrap();

        let res = FileStorage::open(&path, true, FlushPolicy::Immediate);
        assert!(matches!(res, Err(StoreError::BackendUnavailable(_))));
    }

    #[test]
    fn test_failed_dump_keeps_memory_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let store = FileStorage::open(&path, false, FlushPolicy::Immediate).unwrap();

        // A directory where the snapshot file should be makes the rename fail.
        fs::create_dir(&path).unwrap();

        store.set_gauge("Alloc", 2.0).unwrap();
        assert_eq!(store.gauge("Alloc").unwrap(), 2.0);
        assert!(store.flush().is_err());
    }

    #[test]
    fn test_file_format_shape() {
        let snapshot = SnapshotFile {
            gauges: BTreeMap::from([("Alloc".to_string(), 3.4)]),
            counters: BTreeMap::from([("PollCount".to_string(), 8)]),
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        assert_eq!(json, r#"{"gauges":{"Alloc":3.4},"counters":{"PollCount":8}}"#);
    }
}
