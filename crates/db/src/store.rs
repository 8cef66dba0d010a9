//! The job store seam used by the monitor.
//!
//! Every [`JobStore`] method is one unit of work: it either commits as a
//! whole or leaves the store untouched. Steps that read and then write
//! (admission, orphan reconciliation) lock the rows they read, so two
//! monitors racing on the same job cannot both win.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use trackq_core::job_type::JOB_TYPE_DOCKER;
use trackq_core::status::MediaStatus;
use trackq_core::types::DbId;

use crate::models::job::{JobWithMedia, OrphanedJob};
use crate::models::media::Media;
use crate::repositories::{JobRepo, MediaRepo};

/// Transactional operations the monitor performs against the job table.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// All docker-type jobs in creation order, media loaded.
    async fn docker_jobs(&self) -> Result<Vec<JobWithMedia>, sqlx::Error>;

    /// One job with its media.
    async fn find_job(&self, job_id: DbId) -> Result<Option<JobWithMedia>, sqlx::Error>;

    /// Set the status of the job's media whose URL is `media_url`.
    ///
    /// Returns `false` if no such media exists.
    async fn update_media_status(
        &self,
        job_id: DbId,
        media_url: &str,
        status: MediaStatus,
    ) -> Result<bool, sqlx::Error>;

    /// Move the job's media from `QUEUED` to `RUNNING`.
    ///
    /// Returns `false` if the media is missing or no longer queued, which
    /// means another cycle admitted it first.
    async fn admit(&self, job_id: DbId, media_url: &str) -> Result<bool, sqlx::Error>;

    /// Persist the execution unit handle and keep the media `RUNNING`.
    async fn record_launch(
        &self,
        job_id: DbId,
        media_url: &str,
        engine: &str,
    ) -> Result<(), sqlx::Error>;

    /// Fail every `RUNNING` media of a job left behind by a previous run.
    ///
    /// Returns `None` without writing anything if the job no longer has a
    /// derived status of `RUNNING`, so repeating it is harmless.
    async fn fail_orphan(&self, job_id: DbId) -> Result<Option<OrphanedJob>, sqlx::Error>;
}

/// [`JobStore`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn docker_jobs(&self) -> Result<Vec<JobWithMedia>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let jobs = JobRepo::list_by_type(&mut *tx, JOB_TYPE_DOCKER).await?;
        let ids: Vec<DbId> = jobs.iter().map(|job| job.id).collect();
        let media = MediaRepo::list_for_jobs(&mut *tx, &ids).await?;

        tx.commit().await?;

        let mut by_job: HashMap<DbId, Vec<Media>> = HashMap::new();
        for item in media {
            by_job.entry(item.job_id).or_default().push(item);
        }

        Ok(jobs
            .into_iter()
            .map(|job| {
                let media = by_job.remove(&job.id).unwrap_or_default();
                JobWithMedia { job, media }
            })
            .collect())
    }

    async fn find_job(&self, job_id: DbId) -> Result<Option<JobWithMedia>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let Some(job) = JobRepo::find_by_id(&mut *tx, job_id).await? else {
            return Ok(None);
        };
        let media = MediaRepo::list_for_job(&mut *tx, job_id).await?;

        tx.commit().await?;
        Ok(Some(JobWithMedia { job, media }))
    }

    async fn update_media_status(
        &self,
        job_id: DbId,
        media_url: &str,
        status: MediaStatus,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let changed = MediaRepo::set_status(&mut *tx, job_id, media_url, status).await?;
        tx.commit().await?;

        tracing::debug!(job_id, media_url, %status, changed, "Media status updated");
        Ok(changed > 0)
    }

    async fn admit(&self, job_id: DbId, media_url: &str) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let Some(media) = MediaRepo::find_for_update(&mut *tx, job_id, media_url).await? else {
            return Ok(false);
        };
        if media.status() != Some(MediaStatus::Queued) {
            return Ok(false);
        }

        let moved =
            MediaRepo::transition(&mut *tx, media.id, MediaStatus::Queued, MediaStatus::Running)
                .await?;
        tx.commit().await?;
        Ok(moved)
    }

    async fn record_launch(
        &self,
        job_id: DbId,
        media_url: &str,
        engine: &str,
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        if !JobRepo::set_engine(&mut *tx, job_id, engine).await? {
            return Err(sqlx::Error::RowNotFound);
        }
        MediaRepo::set_status(&mut *tx, job_id, media_url, MediaStatus::Running).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn fail_orphan(&self, job_id: DbId) -> Result<Option<OrphanedJob>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let Some(job) = JobRepo::find_by_id_for_update(&mut *tx, job_id).await? else {
            return Ok(None);
        };
        let media = MediaRepo::list_for_job(&mut *tx, job_id).await?;
        let current = JobWithMedia { job, media };

        if current.status() != Some(MediaStatus::Running) {
            return Ok(None);
        }

        MediaRepo::transition_job(&mut *tx, job_id, MediaStatus::Running, MediaStatus::Failed)
            .await?;
        tx.commit().await?;

        Ok(Some(OrphanedJob {
            job_id,
            email: current.job.email,
            engine: current.job.engine,
        }))
    }
}
