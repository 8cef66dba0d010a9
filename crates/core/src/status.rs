//! Media processing status and the job status derived from it.
//!
//! Each variant's discriminant matches the seed data order (1-based) in the
//! `media_statuses` lookup table. Jobs do not store a status of their own;
//! [`derive_job_status`] computes it from the job's media.

use std::fmt;

use crate::error::CoreError;

/// Status ID type matching SMALLINT/SMALLSERIAL in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:literal => $label:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Upper-case name, as shown to users and in logs.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( Self::$variant => $label ),+
                }
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }

        impl TryFrom<StatusId> for $name {
            type Error = CoreError;

            fn try_from(value: StatusId) -> Result<Self, Self::Error> {
                match value {
                    $( $val => Ok(Self::$variant), )+
                    other => Err(CoreError::UnknownStatus(other)),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

define_status_enum! {
    /// Processing status of a single media item.
    ///
    /// `Queued -> Running -> {Success | Failed}`. Both terminal states are
    /// final; nothing transitions out of them automatically.
    MediaStatus {
        Queued = 1 => "QUEUED",
        Running = 2 => "RUNNING",
        Success = 3 => "SUCCESS",
        Failed = 4 => "FAILED",
    }
}

/// Compute a job's effective status from its media statuses.
///
/// Returns `None` for a job without media, which can never be dispatched.
/// Otherwise the first matching rule wins:
///
/// | Media contain         | Job status |
/// |-----------------------|------------|
/// | any `Running`         | `Running`  |
/// | any `Queued`          | `Queued`   |
/// | any `Failed`          | `Failed`   |
/// | only `Success`        | `Success`  |
pub fn derive_job_status<I>(statuses: I) -> Option<MediaStatus>
where
    I: IntoIterator<Item = MediaStatus>,
{
    let mut seen_any = false;
    let mut queued = false;
    let mut failed = false;

    for status in statuses {
        seen_any = true;
        match status {
            MediaStatus::Running => return Some(MediaStatus::Running),
            MediaStatus::Queued => queued = true,
            MediaStatus::Failed => failed = true,
            MediaStatus::Success => {}
        }
    }

    if !seen_any {
        None
    } else if queued {
        Some(MediaStatus::Queued)
    } else if failed {
        Some(MediaStatus::Failed)
    } else {
        Some(MediaStatus::Success)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use MediaStatus::*;

    #[test]
    fn empty_media_has_no_status() {
        assert_eq!(derive_job_status(Vec::<MediaStatus>::new()), None);
    }

    #[test]
    fn single_media_maps_to_itself() {
        for status in [Queued, Running, Success, Failed] {
            assert_eq!(derive_job_status([status]), Some(status));
        }
    }

    #[test]
    fn running_dominates_everything() {
        assert_eq!(derive_job_status([Success, Failed, Running, Queued]), Some(Running));
    }

    #[test]
    fn pending_work_keeps_job_queued_despite_failures() {
        assert_eq!(derive_job_status([Failed, Queued, Success]), Some(Queued));
    }

    #[test]
    fn any_failure_without_pending_work_fails_the_job() {
        assert_eq!(derive_job_status([Success, Failed]), Some(Failed));
    }

    #[test]
    fn all_success_is_success() {
        assert_eq!(derive_job_status([Success, Success]), Some(Success));
    }

    #[test]
    fn status_ids_match_seed_order() {
        assert_eq!(Queued.id(), 1);
        assert_eq!(Running.id(), 2);
        assert_eq!(Success.id(), 3);
        assert_eq!(Failed.id(), 4);
        assert_eq!(MediaStatus::try_from(4).unwrap(), Failed);
        assert_matches!(MediaStatus::try_from(9), Err(CoreError::UnknownStatus(9)));
    }

    #[test]
    fn display_uses_upper_case_names() {
        assert_eq!(Running.to_string(), "RUNNING");
        assert_eq!(Failed.as_str(), "FAILED");
    }
}
