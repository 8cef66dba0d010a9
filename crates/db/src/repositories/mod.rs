//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods. Methods
//! that run a single statement accept any `PgExecutor`, so they work both
//! against the pool and inside a caller's transaction.

pub mod job_repo;
pub mod media_repo;

pub use job_repo::JobRepo;
pub use media_repo::MediaRepo;
