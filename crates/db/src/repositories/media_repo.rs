//! Repository for the `media` table.
//!
//! Uses `MediaStatus` from `trackq_core::status` for every status write.

use sqlx::PgExecutor;
use trackq_core::status::MediaStatus;
use trackq_core::types::DbId;

use crate::models::media::Media;

/// Column list for `media` queries.
const COLUMNS: &str = "id, job_id, name, status_id, created_at, updated_at";

/// Provides CRUD operations for media items.
pub struct MediaRepo;

impl MediaRepo {
    /// Insert a media item for a job.
    pub async fn insert<'e>(
        executor: impl PgExecutor<'e>,
        job_id: DbId,
        name: &str,
        status: MediaStatus,
    ) -> Result<Media, sqlx::Error> {
        let query = format!(
            "INSERT INTO media (job_id, name, status_id) \
             VALUES ($1, $2, $3) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Media>(&query)
            .bind(job_id)
            .bind(name)
            .bind(status.id())
            .fetch_one(executor)
            .await
    }

    /// List media for one job, ordered by id.
    pub async fn list_for_job<'e>(
        executor: impl PgExecutor<'e>,
        job_id: DbId,
    ) -> Result<Vec<Media>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM media WHERE job_id = $1 ORDER BY id ASC");
        sqlx::query_as::<_, Media>(&query)
            .bind(job_id)
            .fetch_all(executor)
            .await
    }

    /// List media for several jobs, ordered by job then media id.
    pub async fn list_for_jobs<'e>(
        executor: impl PgExecutor<'e>,
        job_ids: &[DbId],
    ) -> Result<Vec<Media>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM media WHERE job_id = ANY($1) ORDER BY job_id ASC, id ASC"
        );
        sqlx::query_as::<_, Media>(&query)
            .bind(job_ids)
            .fetch_all(executor)
            .await
    }

    /// Find the first media of a job with the given URL and lock the row
    /// until the enclosing transaction ends.
    pub async fn find_for_update<'e>(
        executor: impl PgExecutor<'e>,
        job_id: DbId,
        name: &str,
    ) -> Result<Option<Media>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM media \
             WHERE job_id = $1 AND name = $2 \
             ORDER BY id ASC LIMIT 1 \
             FOR UPDATE"
        );
        sqlx::query_as::<_, Media>(&query)
            .bind(job_id)
            .bind(name)
            .fetch_optional(executor)
            .await
    }

    /// Set the status of every media of `job_id` whose URL is `name`.
    ///
    /// Returns the number of rows changed.
    pub async fn set_status<'e>(
        executor: impl PgExecutor<'e>,
        job_id: DbId,
        name: &str,
        status: MediaStatus,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("UPDATE media SET status_id = $3 WHERE job_id = $1 AND name = $2")
            .bind(job_id)
            .bind(name)
            .bind(status.id())
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }

    /// Move one media item from `from` to `to`.
    ///
    /// Returns `false` if the item was no longer in `from`.
    pub async fn transition<'e>(
        executor: impl PgExecutor<'e>,
        media_id: DbId,
        from: MediaStatus,
        to: MediaStatus,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE media SET status_id = $3 WHERE id = $1 AND status_id = $2")
            .bind(media_id)
            .bind(from.id())
            .bind(to.id())
            .execute(executor)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Move every media item of a job from `from` to `to`.
    ///
    /// Returns the number of rows changed.
    pub async fn transition_job<'e>(
        executor: impl PgExecutor<'e>,
        job_id: DbId,
        from: MediaStatus,
        to: MediaStatus,
    ) -> Result<u64, sqlx::Error> {
        let result =
            sqlx::query("UPDATE media SET status_id = $3 WHERE job_id = $1 AND status_id = $2")
                .bind(job_id)
                .bind(from.id())
                .bind(to.id())
                .execute(executor)
                .await?;
        Ok(result.rows_affected())
    }
}
