//! Media entity model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use trackq_core::status::{MediaStatus, StatusId};
use trackq_core::types::{DbId, Timestamp};

/// A row from the `media` table.
///
/// `name` holds the source URL of the media item.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Media {
    pub id: DbId,
    pub job_id: DbId,
    pub name: String,
    pub status_id: StatusId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Media {
    /// Typed status, or `None` if the row carries an id the code does not
    /// know about.
    pub fn status(&self) -> Option<MediaStatus> {
        MediaStatus::try_from(self.status_id).ok()
    }
}

/// DTO for attaching a media item to a new job.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateMedia {
    pub name: String,
}
