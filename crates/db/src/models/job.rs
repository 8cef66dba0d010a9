//! Job entity models and DTOs.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use trackq_core::status::{derive_job_status, MediaStatus};
use trackq_core::types::{DbId, Timestamp};

use super::media::{CreateMedia, Media};

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub id: DbId,
    pub name: String,
    pub job_type: String,
    /// Owner address used for status notifications.
    pub email: String,
    /// Model reference handed to the runner.
    pub model: String,
    /// Container id of the execution unit; `None` until launched.
    pub engine: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A job together with its media, ordered by media id.
#[derive(Debug, Clone, Serialize)]
pub struct JobWithMedia {
    #[serde(flatten)]
    pub job: Job,
    pub media: Vec<Media>,
}

impl JobWithMedia {
    /// Effective job status derived from the media statuses.
    ///
    /// Media rows with unknown status ids are ignored.
    pub fn status(&self) -> Option<MediaStatus> {
        derive_job_status(self.media.iter().filter_map(Media::status))
    }

    /// The media item a docker job processes.
    pub fn first_media(&self) -> Option<&Media> {
        self.media.first()
    }

    /// Status of the media item a docker job processes.
    ///
    /// Unlike [`status`](Self::status), later media do not count: a job
    /// whose first item has finished is not queued even if others are.
    pub fn dispatch_status(&self) -> Option<MediaStatus> {
        self.first_media().and_then(Media::status)
    }
}

/// What reconciliation needs to clean up after a job abandoned in
/// `RUNNING`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanedJob {
    pub job_id: DbId,
    pub email: String,
    pub engine: Option<String>,
}

/// DTO for submitting a new job. All media start out queued.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateJob {
    pub name: String,
    pub job_type: String,
    pub email: String,
    pub model: String,
    pub media: Vec<CreateMedia>,
}
