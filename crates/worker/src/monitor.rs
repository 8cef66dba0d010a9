//! The dispatch loop.
//!
//! One [`Monitor::run_cycle`] call walks Idle → Reconcile → Admit → Launch
//! → Await → Finalize at most once. At most one execution unit exists at a
//! time: a job is only admitted when the runtime reports no runner
//! containers at all, stopped ones included.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use trackq_core::error::CoreError;
use trackq_core::output::output_location;
use trackq_core::status::MediaStatus;
use trackq_core::types::DbId;
use trackq_db::models::job::JobWithMedia;
use trackq_db::JobStore;
use trackq_docker::{ContainerSummary, RuntimeError};
use trackq_events::EventBus;
use trackq_runner::{Completion, LaunchError, RunRequest, Runner, RunningUnit};

/// How long to wait for a launched unit to finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Sleep before each completion check.
    pub interval: Duration,
    /// Completion checks before the run is given up as failed.
    pub attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            attempts: 3,
        }
    }
}

/// Per-run settings the monitor hands to every launch.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Root bucket for run outputs.
    pub bucket: String,
    /// Key prefix under the bucket.
    pub track_prefix: String,
    /// Tracker configuration reference.
    pub track_config: String,
    /// Processing arguments.
    pub args: String,
    /// Completion polling for each launched unit.
    pub poll: PollPolicy,
}

/// What a cycle ended with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Cancellation was requested before the cycle began.
    Stopped,
    /// Nothing queued.
    Idle,
    /// Work is queued but `active` runner containers already exist.
    Busy { active: usize },
    /// The head job was no longer queued when admission ran.
    Skipped { job_id: DbId },
    /// A job ran to a terminal status.
    Completed { job_id: DbId, status: MediaStatus },
    /// Cancellation arrived while awaiting; the job stays RUNNING.
    Interrupted { job_id: DbId },
    /// The run finished with `status` but saving it failed. The job is
    /// still RUNNING in the store and the next cycle reconciles it.
    Unrecorded { job_id: DbId, status: MediaStatus },
}

/// Result of one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Jobs found RUNNING at cycle start and marked FAILED.
    pub reconciled: usize,
    /// How the admission part of the cycle ended.
    pub outcome: CycleOutcome,
}

impl CycleReport {
    fn new(reconciled: usize, outcome: CycleOutcome) -> Self {
        Self {
            reconciled,
            outcome,
        }
    }
}

/// Errors that end a cycle early. The job store is left as it was, apart
/// from an admitted job being put back in the queue.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// A store read or write failed.
    #[error("Job store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Listing runner containers failed.
    #[error("Container runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// The runner could not start a container for the head job.
    #[error(transparent)]
    Launch(#[from] LaunchError),
}

/// Single-worker dispatch loop over a job store and a container runner.
pub struct Monitor {
    store: Arc<dyn JobStore>,
    runner: Runner,
    events: Arc<EventBus>,
    config: MonitorConfig,
}

impl Monitor {
    /// Monitor dispatching jobs from `store` through `runner`, publishing
    /// status changes on `events`.
    pub fn new(
        store: Arc<dyn JobStore>,
        runner: Runner,
        events: Arc<EventBus>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            store,
            runner,
            events,
            config,
        }
    }

    /// Run one monitor cycle.
    ///
    /// Must not overlap with another cycle against the same store and
    /// runtime; the [`Scheduler`](crate::scheduler::Scheduler) guarantees
    /// that.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleReport, MonitorError> {
        if cancel.is_cancelled() {
            tracing::info!("Stop requested, skipping monitor cycle");
            return Ok(CycleReport::new(0, CycleOutcome::Stopped));
        }

        let units = self.runner.units().await?;
        tracing::debug!(active = units.len(), "Listed runner containers");

        let jobs = self.store.docker_jobs().await?;
        let (queued, running) = partition_jobs(&jobs);
        tracing::debug!(
            jobs = jobs.len(),
            queued = queued.len(),
            running = running.len(),
            "Loaded docker jobs",
        );

        let mut reconciled = 0;
        for job in &running {
            match self.reconcile(job.job.id, &units).await {
                Ok(true) => reconciled += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(job_id = job.job.id, error = %e, "Failed to reconcile job");
                }
            }
        }

        let Some(head) = queued.first() else {
            return Ok(CycleReport::new(reconciled, CycleOutcome::Idle));
        };

        let active = if reconciled > 0 {
            self.runner.units().await?.len()
        } else {
            units.len()
        };
        if active > 0 {
            tracing::info!(active, queued = queued.len(), "Execution slot occupied");
            return Ok(CycleReport::new(reconciled, CycleOutcome::Busy { active }));
        }

        let outcome = self.dispatch(head, cancel).await?;
        Ok(CycleReport::new(reconciled, outcome))
    }

    /// Fail a job left RUNNING by an earlier process and free its unit.
    ///
    /// Returns `false` if the job was no longer RUNNING.
    async fn reconcile(&self, job_id: DbId, units: &[ContainerSummary]) -> Result<bool, MonitorError> {
        let Some(orphan) = self.store.fail_orphan(job_id).await? else {
            return Ok(false);
        };
        tracing::error!(job_id, "Job was left running by a previous worker, marking failed");

        match orphan.engine.as_deref() {
            Some(engine) => match self.runner.reap(engine).await {
                Ok(true) => tracing::info!(job_id, engine, "Removed orphaned container"),
                Ok(false) => tracing::warn!(job_id, engine, "Orphaned container already gone"),
                Err(e) => {
                    tracing::warn!(job_id, engine, error = %e, "Failed to remove orphaned container");
                }
            },
            None => self.reap_unrecorded(job_id, units).await,
        }

        self.events
            .notify(job_id, &orphan.email, MediaStatus::Failed);
        Ok(true)
    }

    /// Remove containers named for `job_id` when no engine was persisted,
    /// i.e. the previous worker stopped between admission and recording.
    async fn reap_unrecorded(&self, job_id: DbId, units: &[ContainerSummary]) {
        let name_start = format!("{}-{}-", self.runner.config().name_prefix, job_id);
        let matching = units
            .iter()
            .filter(|u| u.names.iter().any(|n| n.starts_with(&name_start)));

        let mut found = false;
        for unit in matching {
            found = true;
            match self.runner.reap(&unit.id).await {
                Ok(_) => tracing::info!(job_id, engine = %unit.id, "Removed unrecorded container"),
                Err(e) => tracing::warn!(
                    job_id,
                    engine = %unit.id,
                    error = %e,
                    "Failed to remove unrecorded container",
                ),
            }
        }
        if !found {
            tracing::warn!(job_id, "No engine recorded for orphaned job");
        }
    }

    /// Admit, launch, await and finalize the head-of-queue job.
    async fn dispatch(
        &self,
        job: &JobWithMedia,
        cancel: &CancellationToken,
    ) -> Result<CycleOutcome, MonitorError> {
        let job_id = job.job.id;
        let Some(media) = job.first_media() else {
            return Ok(CycleOutcome::Idle);
        };
        let input_url = media.name.as_str();

        let output = match output_location(
            &self.config.bucket,
            &self.config.track_prefix,
            input_url,
            Utc::now(),
        ) {
            Ok(output) => output,
            Err(e) => return self.reject(job, input_url, e).await,
        };

        if !self.store.admit(job_id, input_url).await? {
            tracing::info!(job_id, "Job no longer queued, skipping");
            return Ok(CycleOutcome::Skipped { job_id });
        }
        tracing::info!(job_id, %output, "Running job");

        let request = RunRequest {
            job_id,
            output,
            input_url: input_url.to_string(),
            model: job.job.model.clone(),
            track_config: self.config.track_config.clone(),
            args: self.config.args.clone(),
        };

        let unit = match self.runner.launch(&request).await {
            Ok(unit) => unit,
            Err(e) => {
                self.requeue(job_id, input_url).await;
                return Err(e.into());
            }
        };

        if let Err(e) = self.store.record_launch(job_id, input_url, unit.id()).await {
            tracing::error!(job_id, engine = unit.id(), error = %e, "Failed to record engine");
            self.cleanup(job_id, &unit).await;
            self.requeue(job_id, input_url).await;
            return Err(e.into());
        }
        self.events
            .notify(job_id, &job.job.email, MediaStatus::Running);

        let Some(completion) = self.await_completion(job_id, &unit, cancel).await else {
            tracing::warn!(
                job_id,
                engine = unit.id(),
                "Stop requested while awaiting, leaving job running",
            );
            return Ok(CycleOutcome::Interrupted { job_id });
        };

        let status = match completion {
            Completion::Success => MediaStatus::Success,
            Completion::Failure => MediaStatus::Failed,
            Completion::Pending => {
                tracing::error!(
                    job_id,
                    engine = unit.id(),
                    attempts = self.config.poll.attempts,
                    "Job did not finish within the poll budget, marking failed",
                );
                MediaStatus::Failed
            }
        };

        let recorded = match self.store.update_media_status(job_id, input_url, status).await {
            Ok(_) => {
                self.events.notify(job_id, &job.job.email, status);
                true
            }
            Err(e) => {
                tracing::error!(
                    job_id,
                    %status,
                    error = %e,
                    "Failed to record job result, job stays running until reconciled",
                );
                false
            }
        };
        self.cleanup(job_id, &unit).await;

        if !recorded {
            return Ok(CycleOutcome::Unrecorded { job_id, status });
        }
        tracing::info!(job_id, %status, "Job finished running");
        Ok(CycleOutcome::Completed { job_id, status })
    }

    /// Poll the unit until it reaches a terminal state or the budget runs
    /// out. `None` means cancellation interrupted the wait.
    async fn await_completion(
        &self,
        job_id: DbId,
        unit: &RunningUnit,
        cancel: &CancellationToken,
    ) -> Option<Completion> {
        let policy = self.config.poll;

        for attempt in 1..=policy.attempts {
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(policy.interval) => {}
            }

            match unit.is_successful().await {
                Ok(Completion::Pending) => {
                    tracing::debug!(job_id, attempt, "Job still running");
                }
                Ok(done) => return Some(done),
                Err(e) => {
                    tracing::warn!(job_id, attempt, error = %e, "Failed to inspect runner container");
                }
            }
        }

        Some(Completion::Pending)
    }

    /// Fail a job whose input cannot be processed at all.
    async fn reject(
        &self,
        job: &JobWithMedia,
        input_url: &str,
        error: CoreError,
    ) -> Result<CycleOutcome, MonitorError> {
        let job_id = job.job.id;
        tracing::error!(job_id, error = %error, "Rejecting job with unusable input");

        self.store
            .update_media_status(job_id, input_url, MediaStatus::Failed)
            .await?;
        self.events
            .notify(job_id, &job.job.email, MediaStatus::Failed);

        Ok(CycleOutcome::Completed {
            job_id,
            status: MediaStatus::Failed,
        })
    }

    /// Put an admitted job back at the head of the queue.
    async fn requeue(&self, job_id: DbId, input_url: &str) {
        if let Err(e) = self
            .store
            .update_media_status(job_id, input_url, MediaStatus::Queued)
            .await
        {
            tracing::error!(job_id, error = %e, "Failed to requeue job");
        }
    }

    async fn cleanup(&self, job_id: DbId, unit: &RunningUnit) {
        match unit.cleanup().await {
            Ok(true) => tracing::debug!(job_id, engine = unit.id(), "Runner container removed"),
            Ok(false) => tracing::warn!(job_id, engine = unit.id(), "Runner container already gone"),
            Err(e) => {
                tracing::error!(job_id, engine = unit.id(), error = %e, "Failed to remove runner container");
            }
        }
    }
}

/// Split jobs into `(queued, running)`, keeping store order.
///
/// A job is running when its derived status is RUNNING. It is queued when
/// the media item it dispatches (the first) is still QUEUED; later media
/// never make a job admissible again. Jobs without media are in neither.
pub fn partition_jobs(jobs: &[JobWithMedia]) -> (Vec<&JobWithMedia>, Vec<&JobWithMedia>) {
    let mut queued = Vec::new();
    let mut running = Vec::new();

    for job in jobs {
        match (job.status(), job.dispatch_status()) {
            (Some(MediaStatus::Running), _) => running.push(job),
            (_, Some(MediaStatus::Queued)) => queued.push(job),
            (None, _) => tracing::warn!(job_id = job.job.id, "Job has no media"),
            _ => {}
        }
    }

    (queued, running)
}
