//! Cross-process exclusion for monitor cycles.
//!
//! A cycle checks the runtime for an active execution unit and then
//! launches one. That check-then-act only holds if no other cycle runs at
//! the same time, in this process or any other worker pointed at the same
//! database. [`CycleLock`] takes a PostgreSQL session advisory lock on a
//! dedicated connection for the whole cycle.

use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};

/// Advisory lock key shared by every trackq monitor.
pub const MONITOR_LOCK_KEY: i64 = 0x7472_6163_6b71;

/// A held advisory lock. Release it with [`CycleLock::release`].
///
/// The connection is closed rather than returned to the pool when the lock
/// is dropped, so an unreleased lock never outlives its holder.
pub struct CycleLock {
    conn: PoolConnection<Postgres>,
    key: i64,
}

impl CycleLock {
    /// Try to take the lock without waiting.
    ///
    /// Returns `None` if another session holds it.
    pub async fn try_acquire(pool: &PgPool, key: i64) -> Result<Option<Self>, sqlx::Error> {
        let mut conn = pool.acquire().await?;

        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(key)
            .fetch_one(&mut *conn)
            .await?;

        if !acquired {
            return Ok(None);
        }

        conn.close_on_drop();
        Ok(Some(Self { conn, key }))
    }

    /// Release the lock explicitly.
    pub async fn release(mut self) -> Result<(), sqlx::Error> {
        let released: bool = sqlx::query_scalar("SELECT pg_advisory_unlock($1)")
            .bind(self.key)
            .fetch_one(&mut *self.conn)
            .await?;

        if !released {
            tracing::warn!(key = self.key, "Cycle lock was not held at release");
        }
        Ok(())
    }
}
