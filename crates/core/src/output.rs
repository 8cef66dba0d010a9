//! Output location naming for processing runs.
//!
//! Every run writes under
//! `s3://{bucket}/{prefix}/{input-dir}/{YYYYMMDDTHHMMSSZ}/output`, where
//! `input-dir` is the directory part of the input URL's path. The
//! timestamp keeps repeated runs over the same input apart.

use url::Url;

use crate::error::CoreError;
use crate::types::Timestamp;

/// `strftime` pattern for the run timestamp segment.
pub const RUN_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Build the output location for a run of `input_url` started at `now`.
///
/// Only the URL path is used; scheme, host, query and fragment are dropped.
/// Empty segments (for example an input at the host root) are skipped so
/// the result never contains `//` after the scheme.
pub fn output_location(
    bucket: &str,
    prefix: &str,
    input_url: &str,
    now: Timestamp,
) -> Result<String, CoreError> {
    let parsed = Url::parse(input_url).map_err(|e| CoreError::InvalidMediaUrl {
        url: input_url.to_string(),
        reason: e.to_string(),
    })?;

    let path = parsed.path();
    let input_dir = match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    };

    let stamp = now.format(RUN_TIMESTAMP_FORMAT).to_string();

    let key = [
        bucket.trim_matches('/'),
        prefix.trim_matches('/'),
        input_dir.trim_matches('/'),
        stamp.as_str(),
        "output",
    ]
    .into_iter()
    .filter(|segment| !segment.is_empty())
    .collect::<Vec<_>>()
    .join("/");

    Ok(format!("s3://{key}"))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::{TimeZone, Utc};

    use super::*;

    fn at() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
    }

    #[test]
    fn combines_bucket_prefix_dir_and_timestamp() {
        let out = output_location("bucket1", "tracks", "http://host/path/video.mp4", at()).unwrap();
        assert_eq!(out, "s3://bucket1/tracks/path/20240102T030405Z/output");
    }

    #[test]
    fn keeps_nested_directories() {
        let out = output_location(
            "bucket1",
            "tracks",
            "https://host:8080/a/b/c/video.mov?sig=abc#t=10",
            at(),
        )
        .unwrap();
        assert_eq!(out, "s3://bucket1/tracks/a/b/c/20240102T030405Z/output");
    }

    #[test]
    fn input_at_host_root_has_no_dir_segment() {
        let out = output_location("bucket1", "tracks", "http://host/video.mp4", at()).unwrap();
        assert_eq!(out, "s3://bucket1/tracks/20240102T030405Z/output");
    }

    #[test]
    fn tolerates_slashes_in_settings() {
        let out = output_location("bucket1/", "/tracks/", "http://host/path/video.mp4", at()).unwrap();
        assert_eq!(out, "s3://bucket1/tracks/path/20240102T030405Z/output");
    }

    #[test]
    fn rejects_unparsable_url() {
        let err = output_location("bucket1", "tracks", "not a url", at());
        assert_matches!(err, Err(CoreError::InvalidMediaUrl { .. }));
    }
}
