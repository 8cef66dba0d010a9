//! Job store for the trackq dispatcher.
//!
//! PostgreSQL persistence for jobs and their media, the [`JobStore`] seam
//! the monitor talks to, and the advisory [`CycleLock`] that keeps monitor
//! cycles from overlapping across processes.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;

pub mod lock;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod models;
pub mod repositories;
pub mod store;

pub use lock::CycleLock;
pub use store::{JobStore, PgJobStore};

pub type DbPool = sqlx::PgPool;

/// Maximum time to wait for a pooled connection.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Create a connection pool from a database URL.
///
/// The dispatcher is single-worker; a handful of connections covers the
/// monitor cycle, the cycle lock, and the notification tasks.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await
}

/// Verify the database answers a trivial query.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool)
        .await?;
    Ok(())
}

/// Apply pending migrations from `db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../db/migrations").run(pool).await
}
