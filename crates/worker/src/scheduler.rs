//! Periodic driver for the monitor.
//!
//! Runs cycles one after another on a single task, each inside a
//! [`CycleLock`] so that workers sharing a database never overlap.

use std::time::Duration;

use sqlx::PgPool;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use trackq_db::lock::MONITOR_LOCK_KEY;
use trackq_db::CycleLock;

use crate::monitor::{CycleOutcome, CycleReport, Monitor, MonitorError};

/// Drives [`Monitor::run_cycle`] on a fixed interval.
pub struct Scheduler {
    monitor: Monitor,
    pool: PgPool,
    interval: Duration,
}

impl Scheduler {
    /// `pool` is only used for the cycle lock.
    pub fn new(monitor: Monitor, pool: PgPool, interval: Duration) -> Self {
        Self {
            monitor,
            pool,
            interval,
        }
    }

    /// Run cycles every `interval` until `cancel` is triggered.
    ///
    /// A cycle that is awaiting a job when cancellation arrives returns
    /// promptly and leaves the job for the next start to reconcile.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        // A cycle can outlast several ticks while it awaits a job.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval_secs = self.interval.as_secs(), "Monitor scheduler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Monitor scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match self.locked_cycle(&cancel).await {
                        Ok(Some(report)) => log_report(&report),
                        Ok(None) => {
                            tracing::debug!("Another worker holds the cycle lock, skipping tick");
                        }
                        Err(MonitorError::Launch(e)) => {
                            tracing::error!(job_id = e.job_id, error = %e, "Launch failed, job left queued");
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Monitor cycle failed");
                        }
                    }
                }
            }
        }
    }

    /// One cycle under the advisory lock. `None` if the lock was taken.
    async fn locked_cycle(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<CycleReport>, MonitorError> {
        let Some(lock) = CycleLock::try_acquire(&self.pool, MONITOR_LOCK_KEY).await? else {
            return Ok(None);
        };

        let result = self.monitor.run_cycle(cancel).await;

        if let Err(e) = lock.release().await {
            tracing::warn!(error = %e, "Failed to release cycle lock");
        }
        result.map(Some)
    }
}

fn log_report(report: &CycleReport) {
    let reconciled = report.reconciled;
    match &report.outcome {
        CycleOutcome::Completed { job_id, status } => {
            tracing::info!(job_id, %status, reconciled, "Monitor cycle completed a job");
        }
        CycleOutcome::Interrupted { job_id } => {
            tracing::warn!(job_id, reconciled, "Monitor cycle interrupted");
        }
        CycleOutcome::Unrecorded { job_id, status } => {
            tracing::warn!(job_id, %status, reconciled, "Monitor cycle could not save job result");
        }
        outcome => {
            tracing::debug!(?outcome, reconciled, "Monitor cycle finished");
        }
    }
}
