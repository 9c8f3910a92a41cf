//! The agent's control loop.
//!
//! One task drives both timers, so a collection and a report never overlap.
//! The latest snapshot is kept after a report: reports between two
//! collections resend the same values.

use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use metrix_core::collector::{FileSystem, RuntimeCollector, Snapshot};

use crate::report::Reporter;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Stats {
    pub collections: u64,
    pub reports_ok: u64,
    pub reports_failed: u64,
}

pub(crate) struct Scheduler<F: FileSystem, R: Reporter> {
    collector: RuntimeCollector<F>,
    reporter: R,
    latest: Option<Snapshot>,
    stats: Stats,
}

impl<F: FileSystem, R: Reporter> Scheduler<F, R> {
    pub fn new(collector: RuntimeCollector<F>, reporter: R) -> Self {
        Self {
            collector,
            reporter,
            latest: None,
            stats: Stats::default(),
        }
    }

    /// Runs until `shutdown` is cancelled. Cancellation is observed between
    /// ticks; a report in flight is allowed to finish.
    pub async fn run(mut self, poll: Duration, report: Duration, shutdown: CancellationToken) -> Self {
        let mut poll_tick = interval(poll);
        poll_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut report_tick = interval(report);
        report_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(poll_secs = poll.as_secs_f64(), report_secs = report.as_secs_f64(), "scheduler started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = poll_tick.tick() => self.collect(),
                _ = report_tick.tick() => self.report().await,
            }
        }
        info!(
            collections = self.stats.collections,
            reports_ok = self.stats.reports_ok,
            reports_failed = self.stats.reports_failed,
            "scheduler stopped"
        );
        self
    }

    fn collect(&mut self) {
        self.latest = Some(self.collector.collect());
        self.stats.collections += 1;
    }

    async fn report(&mut self) {
        let Some(snapshot) = &self.latest else {
            debug!("nothing collected yet, skipping report");
            return;
        };

        let t0 = Instant::now();
        match self.reporter.report(snapshot).await {
            Ok(accepted) => {
                self.stats.reports_ok += 1;
                debug!(accepted, elapsed_ms = t0.elapsed().as_millis() as u64, "report sent");
            }
            Err(e) => {
                self.stats.reports_failed += 1;
                warn!(error = %e, "report failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrix_core::collector::POLL_COUNT;
    use metrix_core::collector::mock::MockFs;
    use metrix_core::metric::MetricValue;

    use crate::report::ReportError;

    #[derive(Default)]
    struct Recorder {
        poll_counts: Vec<i64>,
        fail: bool,
    }

    impl Reporter for Recorder {
        async fn report(&mut self, snapshot: &Snapshot) -> Result<usize, ReportError> {
            if let Some(MetricValue::Counter(n)) = snapshot.get(POLL_COUNT) {
                self.poll_counts.push(n);
            }
            if self.fail {
                return Err(ReportError::Rejected {
                    status: 500,
                    body: "down".into(),
                });
            }
            Ok(snapshot.len())
        }
    }

    fn cancel_after(after: Duration) -> CancellationToken {
        let token = CancellationToken::new();
        let t = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            t.cancel();
        });
        token
    }

    fn scheduler(recorder: Recorder) -> Scheduler<MockFs, Recorder> {
        Scheduler::new(RuntimeCollector::new(MockFs::typical_system()), recorder)
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_carry_cumulative_poll_count() {
        let token = cancel_after(Duration::from_millis(20_500));
        let done = scheduler(Recorder::default())
            .run(Duration::from_secs(2), Duration::from_secs(10), token)
            .await;

        // Ticks at 0, 10 and 20 s; polls every 2 s run first on shared ticks.
        assert_eq!(done.reporter.poll_counts, vec![1, 6, 11]);
        assert_eq!(done.stats.collections, 11);
        assert_eq!(done.stats.reports_ok, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_between_collections_resend_snapshot() {
        let token = cancel_after(Duration::from_millis(3_500));
        let done = scheduler(Recorder::default())
            .run(Duration::from_secs(10), Duration::from_secs(1), token)
            .await;

        assert_eq!(done.reporter.poll_counts, vec![1, 1, 1, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reports_do_not_stop_the_loop() {
        let token = cancel_after(Duration::from_millis(2_500));
        let done = scheduler(Recorder {
            fail: true,
            ..Recorder::default()
        })
        .run(Duration::from_secs(1), Duration::from_secs(1), token)
        .await;

        assert_eq!(done.stats.reports_failed, 3);
        assert_eq!(done.stats.reports_ok, 0);
        assert_eq!(done.reporter.poll_counts, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start_does_nothing() {
        let token = CancellationToken::new();
        token.cancel();
        let done = scheduler(Recorder::default())
            .run(Duration::from_secs(1), Duration::from_secs(1), token)
            .await;
        assert_eq!(done.stats, Stats::default());
    }
}
