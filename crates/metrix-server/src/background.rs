//! Periodic snapshot flush.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use metrix_core::storage::Storage;

pub(crate) async fn flush_loop(store: Arc<dyn Storage>, period: Duration, shutdown: CancellationToken) {
    let mut tick = tokio::time::interval(period);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick completes immediately; nothing to dump yet.
    tick.tick().await;

    info!(period_secs = period.as_secs(), "snapshot flush loop started");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tick.tick() => flush(store.clone()).await,
        }
    }
    debug!("snapshot flush loop stopped");
}

/// Flushes on the blocking pool. Failures are logged, never fatal.
pub(crate) async fn flush(store: Arc<dyn Storage>) {
    let t0 = Instant::now();
    match tokio::task::spawn_blocking(move || store.flush()).await {
        Ok(Ok(())) => debug!(elapsed_ms = t0.elapsed().as_millis() as u64, "snapshot flushed"),
        Ok(Err(e)) => error!(error = %e, "snapshot flush failed"),
        Err(e) => error!(error = %e, "snapshot flush panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrix_core::storage::{FileStorage, FlushPolicy, SnapshotFile};

    #[tokio::test]
    async fn test_flush_loop_dumps_on_tick_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let period = Duration::from_millis(50);
        let store = Arc::new(FileStorage::open(&path, false, FlushPolicy::Interval(period)).unwrap());
        store.set_counter("PollCount", 2).unwrap();
        assert!(!path.exists());

        let token = CancellationToken::new();
        let task = tokio::spawn(flush_loop(store.clone(), period, token.clone()));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(SnapshotFile::read(&path).unwrap().counters["PollCount"], 2);

        token.cancel();
        task.await.unwrap();
    }
}
