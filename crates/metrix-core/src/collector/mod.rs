//! Runtime statistics sampling for the agent.
//!
//! Each [`RuntimeCollector::collect`] call produces one immutable [`Snapshot`]:
//! - allocator statistics from jemalloc
//! - process statistics from `/proc/self/stat`
//! - system memory and CPU utilization from `/proc/meminfo` and `/proc/stat`
//! - `RandomValue`, a fresh random gauge per tick
//! - `PollCount`, the number of completed collections
//!
//! A source that cannot be read is skipped for that tick; the rest of the
//! snapshot is still produced.

pub mod alloc;
pub mod mock;
pub mod procfs;
mod traits;

pub use traits::{FileSystem, RealFs};

use std::collections::BTreeMap;
use std::path::Path;

use rand::Rng;
use tracing::debug;

use crate::metric::{MetricRecord, MetricValue};
use procfs::CpuTimes;

pub const POLL_COUNT: &str = "PollCount";
pub const RANDOM_VALUE: &str = "RandomValue";

const MEMINFO: &str = "/proc/meminfo";
const STAT: &str = "/proc/stat";
const SELF_STAT: &str = "/proc/self/stat";

/// Metrics captured at one collection tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    metrics: BTreeMap<String, MetricValue>,
}

impl Snapshot {
    pub fn get(&self, name: &str) -> Option<MetricValue> {
        self.metrics.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, MetricValue)> {
        self.metrics.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Wire records, ordered by name.
    pub fn records(&self) -> Vec<MetricRecord> {
        self.iter()
            .map(|(name, value)| MetricRecord::new(name, value))
            .collect()
    }
}

/// Builder used while sampling; frozen into a [`Snapshot`].
#[derive(Default)]
struct SnapshotBuilder {
    metrics: BTreeMap<String, MetricValue>,
}

impl SnapshotBuilder {
    fn gauge(&mut self, name: &str, value: f64) {
        // Non-finite samples would be rejected by the server.
        if value.is_finite() {
            self.metrics.insert(name.to_string(), MetricValue::Gauge(value));
        }
    }

    fn counter(&mut self, name: &str, value: i64) {
        self.metrics
            .insert(name.to_string(), MetricValue::Counter(value));
    }

    fn build(self) -> Snapshot {
        Snapshot {
            metrics: self.metrics,
        }
    }
}

pub struct RuntimeCollector<F: FileSystem> {
    fs: F,
    poll_count: i64,
    prev_cpu: Option<CpuTimes>,
}

impl RuntimeCollector<RealFs> {
    pub fn real() -> Self {
        Self::new(RealFs::new())
    }
}

impl<F: FileSystem> RuntimeCollector<F> {
    pub fn new(fs: F) -> Self {
        Self {
            fs,
            poll_count: 0,
            prev_cpu: None,
        }
    }

    pub fn poll_count(&self) -> i64 {
        self.poll_count
    }

    pub fn collect(&mut self) -> Snapshot {
        let mut snap = SnapshotBuilder::default();

        self.collect_alloc(&mut snap);
        self.collect_process(&mut snap);
        self.collect_system(&mut snap);
        snap.gauge(RANDOM_VALUE, rand::rng().random::<f64>());

        self.poll_count = self.poll_count.wrapping_add(1);
        snap.counter(POLL_COUNT, self.poll_count);

        let snapshot = snap.build();
        debug!(metrics = snapshot.len(), poll_count = self.poll_count, "collected");
        snapshot
    }

    fn collect_alloc(&self, snap: &mut SnapshotBuilder) {
        match alloc::read() {
            Ok(stats) => {
                snap.gauge("HeapAlloc", stats.allocated as f64);
                snap.gauge("HeapInuse", stats.active as f64);
                snap.gauge("HeapMetadata", stats.metadata as f64);
                snap.gauge("HeapResident", stats.resident as f64);
                snap.gauge("HeapSys", stats.mapped as f64);
                snap.gauge("HeapReleased", stats.retained as f64);
            }
            Err(e) => debug!(error = %e, "allocator stats unavailable"),
        }
    }

    fn collect_process(&self, snap: &mut SnapshotBuilder) {
        let stat = self
            .read(SELF_STAT)
            .and_then(|c| procfs::parse_process_stat(&c).map_err(|e| e.to_string()));
        match stat {
            Ok(stat) => {
                snap.gauge("ProcessRss", stat.rss_bytes() as f64);
                snap.gauge("ProcessVirtualMemory", stat.vsize as f64);
                snap.gauge("ProcessThreads", stat.num_threads as f64);
                snap.gauge("ProcessMinorFaults", stat.minflt as f64);
                snap.gauge("ProcessMajorFaults", stat.majflt as f64);
                snap.gauge("ProcessCpuSeconds", stat.cpu_seconds());
            }
            Err(e) => debug!(error = %e, "process stats unavailable"),
        }
    }

    fn collect_system(&mut self, snap: &mut SnapshotBuilder) {
        match self
            .read(MEMINFO)
            .and_then(|c| procfs::parse_meminfo(&c).map_err(|e| e.to_string()))
        {
            Ok(mem) => {
                snap.gauge("TotalMemory", mem.total as f64);
                snap.gauge("FreeMemory", mem.free as f64);
            }
            Err(e) => debug!(error = %e, "memory stats unavailable"),
        }

        match self
            .read(STAT)
            .and_then(|c| procfs::parse_cpu_times(&c).map_err(|e| e.to_string()))
        {
            Ok(times) => {
                // Utilization needs two samples; the first tick reports 0.
                let util = self
                    .prev_cpu
                    .and_then(|prev| times.utilization_since(&prev))
                    .unwrap_or(0.0);
                snap.gauge("CPUutilization1", util);
                self.prev_cpu = Some(times);
            }
            Err(e) => debug!(error = %e, "cpu stats unavailable"),
        }
    }

    fn read(&self, path: &str) -> Result<String, String> {
        self.fs
            .read_to_string(Path::new(path))
            .map_err(|e| format!("{path}: {e}"))
    }
}
