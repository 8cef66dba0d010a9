//! In-memory [`JobStore`] for tests.
//!
//! Mirrors the PostgreSQL store's semantics, including the conditional
//! writes, and additionally records every status change in order so tests
//! can assert on sequencing.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use trackq_core::job_type::JOB_TYPE_DOCKER;
use trackq_core::status::MediaStatus;
use trackq_core::types::DbId;

use crate::models::job::{CreateJob, Job, JobWithMedia, OrphanedJob};
use crate::models::media::Media;
use crate::store::JobStore;

#[derive(Debug, Default)]
struct MemoryState {
    jobs: Vec<JobWithMedia>,
    next_id: DbId,
    /// `(job_id, new status)` for every media status write, in order.
    transitions: Vec<(DbId, MediaStatus)>,
    /// Writes still to succeed before one fails.
    fail_after: Option<usize>,
}

impl MemoryState {
    fn job_mut(&mut self, job_id: DbId) -> Option<&mut JobWithMedia> {
        self.jobs.iter_mut().find(|j| j.job.id == job_id)
    }

    fn take_failure(&mut self) -> Result<(), sqlx::Error> {
        match self.fail_after {
            Some(0) => {
                self.fail_after = None;
                Err(sqlx::Error::PoolTimedOut)
            }
            Some(n) => {
                self.fail_after = Some(n - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// Shared in-memory job store. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryJobStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a job; media start out `QUEUED`.
    pub fn insert(&self, input: &CreateJob) -> JobWithMedia {
        let mut state = self.lock();
        let now = Utc::now();

        state.next_id += 1;
        let job = Job {
            id: state.next_id,
            name: input.name.clone(),
            job_type: input.job_type.clone(),
            email: input.email.clone(),
            model: input.model.clone(),
            engine: None,
            created_at: now,
            updated_at: now,
        };

        let mut media = Vec::with_capacity(input.media.len());
        for item in &input.media {
            state.next_id += 1;
            media.push(Media {
                id: state.next_id,
                job_id: job.id,
                name: item.name.clone(),
                status_id: MediaStatus::Queued.id(),
                created_at: now,
                updated_at: now,
            });
        }

        let row = JobWithMedia { job, media };
        state.jobs.push(row.clone());
        row
    }

    /// Overwrite a job's media status and engine directly, bypassing the
    /// transition log. Used to stage state left behind by an earlier run.
    pub fn force_state(&self, job_id: DbId, status: MediaStatus, engine: Option<&str>) {
        let mut state = self.lock();
        if let Some(job) = state.job_mut(job_id) {
            job.job.engine = engine.map(str::to_string);
            for media in &mut job.media {
                media.status_id = status.id();
            }
        }
    }

    /// Make the next write operation fail with a pool timeout.
    pub fn fail_next_write(&self) {
        self.fail_write_after(0);
    }

    /// Let `successes` write operations through, then fail the one after.
    /// Writes are `update_media_status`, `admit`, `record_launch` and
    /// `fail_orphan`.
    pub fn fail_write_after(&self, successes: usize) {
        self.lock().fail_after = Some(successes);
    }

    /// Snapshot of one job.
    pub fn job(&self, job_id: DbId) -> Option<JobWithMedia> {
        self.lock().jobs.iter().find(|j| j.job.id == job_id).cloned()
    }

    /// Every media status write so far, in order.
    pub fn transitions(&self) -> Vec<(DbId, MediaStatus)> {
        self.lock().transitions.clone()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn docker_jobs(&self) -> Result<Vec<JobWithMedia>, sqlx::Error> {
        Ok(self
            .lock()
            .jobs
            .iter()
            .filter(|j| j.job.job_type == JOB_TYPE_DOCKER)
            .cloned()
            .collect())
    }

    async fn find_job(&self, job_id: DbId) -> Result<Option<JobWithMedia>, sqlx::Error> {
        Ok(self.job(job_id))
    }

    async fn update_media_status(
        &self,
        job_id: DbId,
        media_url: &str,
        status: MediaStatus,
    ) -> Result<bool, sqlx::Error> {
        let mut state = self.lock();
        state.take_failure()?;

        let Some(job) = state.job_mut(job_id) else {
            return Ok(false);
        };
        let mut changed = false;
        for media in job.media.iter_mut().filter(|m| m.name == media_url) {
            media.status_id = status.id();
            changed = true;
        }
        if changed {
            state.transitions.push((job_id, status));
        }
        Ok(changed)
    }

    async fn admit(&self, job_id: DbId, media_url: &str) -> Result<bool, sqlx::Error> {
        let mut state = self.lock();
        state.take_failure()?;

        let Some(job) = state.job_mut(job_id) else {
            return Ok(false);
        };
        let Some(media) = job.media.iter_mut().find(|m| m.name == media_url) else {
            return Ok(false);
        };
        if media.status() != Some(MediaStatus::Queued) {
            return Ok(false);
        }
        media.status_id = MediaStatus::Running.id();
        state.transitions.push((job_id, MediaStatus::Running));
        Ok(true)
    }

    async fn record_launch(
        &self,
        job_id: DbId,
        media_url: &str,
        engine: &str,
    ) -> Result<(), sqlx::Error> {
        let mut state = self.lock();
        state.take_failure()?;

        let Some(job) = state.job_mut(job_id) else {
            return Err(sqlx::Error::RowNotFound);
        };
        job.job.engine = Some(engine.to_string());
        for media in job.media.iter_mut().filter(|m| m.name == media_url) {
            media.status_id = MediaStatus::Running.id();
        }
        Ok(())
    }

    async fn fail_orphan(&self, job_id: DbId) -> Result<Option<OrphanedJob>, sqlx::Error> {
        let mut state = self.lock();
        state.take_failure()?;

        let Some(job) = state.job_mut(job_id) else {
            return Ok(None);
        };
        if job.status() != Some(MediaStatus::Running) {
            return Ok(None);
        }
        for media in job
            .media
            .iter_mut()
            .filter(|m| m.status() == Some(MediaStatus::Running))
        {
            media.status_id = MediaStatus::Failed.id();
        }
        let orphan = OrphanedJob {
            job_id,
            email: job.job.email.clone(),
            engine: job.job.engine.clone(),
        };
        state.transitions.push((job_id, MediaStatus::Failed));
        Ok(Some(orphan))
    }
}
