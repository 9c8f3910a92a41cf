//! Allocator statistics from jemalloc.
//!
//! The figures describe the global allocator only when the binary installs
//! `tikv_jemallocator::Jemalloc`, as the agent does.

/// Byte counts reported by `stats.*` mallctls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocStats {
    pub allocated: u64,
    pub active: u64,
    pub metadata: u64,
    pub resident: u64,
    pub mapped: u64,
    pub retained: u64,
}

#[cfg(not(target_env = "msvc"))]
pub fn read() -> Result<AllocStats, String> {
    use tikv_jemalloc_ctl::{epoch, stats};

    // Stats are cached until the epoch is bumped.
    epoch::advance().map_err(|e| e.to_string())?;

    let read = |r: tikv_jemalloc_ctl::Result<usize>| r.map(|v| v as u64).map_err(|e| e.to_string());
    Ok(AllocStats {
        allocated: read(stats::allocated::read())?,
        active: read(stats::active::read())?,
        metadata: read(stats::metadata::read())?,
        resident: read(stats::resident::read())?,
        mapped: read(stats::mapped::read())?,
        retained: read(stats::retained::read())?,
    })
}

#[cfg(target_env = "msvc")]
pub fn read() -> Result<AllocStats, String> {
    Err("jemalloc statistics are unavailable on this target".to_string())
}

#[cfg(all(test, not(target_env = "msvc")))]
mod tests {
    use super::*;

    #[test]
    fn test_read_reports_consistent_stats() {
        let stats = read().unwrap();
        assert!(stats.active >= stats.allocated);
        assert!(stats.mapped >= stats.active);
    }
}
