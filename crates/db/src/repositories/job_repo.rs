//! Repository for the `jobs` table.

use sqlx::{PgExecutor, PgPool};
use trackq_core::status::MediaStatus;
use trackq_core::types::DbId;

use crate::models::job::{CreateJob, Job, JobWithMedia};
use crate::models::media::Media;
use crate::repositories::MediaRepo;

/// Column list for `jobs` queries.
const COLUMNS: &str = "id, name, job_type, email, model, engine, created_at, updated_at";

/// Provides CRUD operations for jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert a job and its media in one transaction. Every media item
    /// starts out `QUEUED`.
    pub async fn create(pool: &PgPool, input: &CreateJob) -> Result<JobWithMedia, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "INSERT INTO jobs (name, job_type, email, model) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        let job = sqlx::query_as::<_, Job>(&query)
            .bind(&input.name)
            .bind(&input.job_type)
            .bind(&input.email)
            .bind(&input.model)
            .fetch_one(&mut *tx)
            .await?;

        let mut media: Vec<Media> = Vec::with_capacity(input.media.len());
        for item in &input.media {
            let row = MediaRepo::insert(&mut *tx, job.id, &item.name, MediaStatus::Queued).await?;
            media.push(row);
        }

        tx.commit().await?;
        Ok(JobWithMedia { job, media })
    }

    /// Find a job by its ID.
    pub async fn find_by_id<'e>(
        executor: impl PgExecutor<'e>,
        id: DbId,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Find a job by its ID and lock the row until the enclosing
    /// transaction ends.
    pub async fn find_by_id_for_update<'e>(
        executor: impl PgExecutor<'e>,
        id: DbId,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// List all jobs of one type in creation order.
    pub async fn list_by_type<'e>(
        executor: impl PgExecutor<'e>,
        job_type: &str,
    ) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE job_type = $1 ORDER BY id ASC");
        sqlx::query_as::<_, Job>(&query)
            .bind(job_type)
            .fetch_all(executor)
            .await
    }

    /// Store the execution unit handle for a job.
    pub async fn set_engine<'e>(
        executor: impl PgExecutor<'e>,
        id: DbId,
        engine: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE jobs SET engine = $2 WHERE id = $1")
            .bind(id)
            .bind(engine)
            .execute(executor)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
