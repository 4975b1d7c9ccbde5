//! Background refresh loop.
//!
//! One cycle runs at a time: collect workflows, collect jobs, commit. Ticks
//! missed while a cycle overruns the interval are skipped rather than queued.

use log::{error, info, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::config::FailurePolicy;
use crate::error::{ExporterError, Result};
use crate::metrics::MetricRegistry;
use crate::providers::{CircleCiProvider, CycleReport};

pub struct RefreshLoop {
    provider: CircleCiProvider,
    registry: Arc<MetricRegistry>,
    interval: Duration,
    on_error: FailurePolicy,
}

impl RefreshLoop {
    pub fn new(
        provider: CircleCiProvider,
        registry: Arc<MetricRegistry>,
        interval: Duration,
        on_error: FailurePolicy,
    ) -> Self {
        Self {
            provider,
            registry,
            interval,
            on_error,
        }
    }

    /// Run one cycle and apply the failure policy to its outcome.
    ///
    /// Under [`FailurePolicy::Degrade`] a transport failure leaves the previous
    /// snapshot in place and skipped scopes are simply absent from the new one.
    /// Under [`FailurePolicy::Exit`] either condition is returned as an error
    /// and nothing is committed.
    pub async fn refresh_once(&self) -> Result<()> {
        let started = Instant::now();
        info!("Refresh cycle started");

        let report = match self.provider.collect_snapshot().await {
            Ok(report) => report,
            Err(e) => {
                self.registry.record_failure();
                return match self.on_error {
                    FailurePolicy::Exit => Err(e),
                    FailurePolicy::Degrade => {
                        error!("Refresh cycle aborted, keeping previous metrics: {e}");
                        Ok(())
                    }
                };
            }
        };

        if !report.skipped.is_empty() && self.on_error == FailurePolicy::Exit {
            for skipped in &report.skipped {
                error!("{} failed: {}", skipped.scope, skipped.reason);
            }
            self.registry.record_failure();
            return Err(ExporterError::ScopesSkipped(report.skipped.len()));
        }

        self.commit(report, started)
    }

    fn commit(&self, report: CycleReport, started: Instant) -> Result<()> {
        let CycleReport {
            snapshot,
            workflows,
            jobs,
            skipped,
        } = report;
        let samples = snapshot.len();

        if let Err(e) = self.registry.commit(snapshot) {
            self.registry.record_failure();
            return match self.on_error {
                FailurePolicy::Exit => Err(e),
                FailurePolicy::Degrade => {
                    error!("Failed to publish snapshot, keeping previous metrics: {e}");
                    Ok(())
                }
            };
        }

        if !skipped.is_empty() {
            let scopes: Vec<String> = skipped.iter().map(|s| s.scope.to_string()).collect();
            warn!(
                "{} scopes skipped this cycle: {}",
                scopes.len(),
                scopes.join(", ")
            );
        }
        info!(
            "Refresh cycle finished in {:.1}s: {} workflow records, {} job records, {} samples",
            started.elapsed().as_secs_f64(),
            workflows.len(),
            jobs.len(),
            samples
        );

        Ok(())
    }

    /// Refresh immediately, then once per interval, until `shutdown` flips.
    ///
    /// A cycle in flight when shutdown arrives is dropped at its next await
    /// point, which is bounded by the per-request timeout.
    ///
    /// # Errors
    ///
    /// Only returns an error under [`FailurePolicy::Exit`].
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            "Refreshing CircleCI insights every {}s",
            self.interval.as_secs()
        );

        run_every(self.interval, shutdown, move || self.refresh_once()).await?;

        info!("Refresh loop stopped");
        Ok(())
    }
}

/// Drive `cycle` on a fixed period. Cycles never overlap; ticks that fall due
/// while one is running are skipped, not replayed.
async fn run_every<F, Fut>(
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut cycle: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let stopping = *shutdown.borrow();
        if stopping {
            return Ok(());
        }

        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => return Ok(()),
        }

        tokio::select! {
            result = cycle() => result?,
            _ = shutdown.changed() => {
                info!("Refresh cycle cancelled by shutdown");
                return Ok(());
            }
        }
    }
}
