//! Well-known job type names.
//!
//! These must match the values written to `jobs.job_type` by the
//! submission path.

/// A job processed by launching a local container. The only type the
/// monitor dispatches.
pub const JOB_TYPE_DOCKER: &str = "docker";

/// A job processed by a managed cloud pipeline. Never dispatched here.
pub const JOB_TYPE_AWS: &str = "aws";
