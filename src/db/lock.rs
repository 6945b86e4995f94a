//! Session-level advisory lock that keeps two runs from overlapping.

use crate::error::Result;
use sqlx::Postgres;
use sqlx::pool::PoolConnection;
use tracing::{debug, warn};

/// Advisory lock key shared by every margin-dispatch process.
pub const RUN_LOCK_KEY: i64 = 1_234_567_890;

/// A held advisory lock.
///
/// The lock lives on one pooled connection. Call [`RunLock::release`] when the
/// run ends; dropping without release closes the connection instead of
/// returning it to the pool, which also frees the lock server-side.
pub struct RunLock {
    conn: Option<PoolConnection<Postgres>>,
    key: i64,
}

impl RunLock {
    pub fn key(&self) -> i64 {
        self.key
    }

    /// Unlock and return the connection to the pool.
    pub async fn release(mut self) -> Result<()> {
        if let Some(mut conn) = self.conn.take() {
            let (released,): (bool,) = sqlx::query_as("SELECT pg_advisory_unlock($1)")
                .bind(self.key)
                .fetch_one(&mut *conn)
                .await?;
            if !released {
                warn!(key = self.key, "advisory lock was not held at release");
            }
            debug!(key = self.key, "advisory lock released");
        }
        Ok(())
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            drop(conn.detach());
        }
    }
}

impl super::Db {
    /// Try to take the run lock without waiting.
    ///
    /// Returns `None` when another session already holds it.
    pub async fn try_run_lock(&self, key: i64) -> Result<Option<RunLock>> {
        let mut conn = self.pool().acquire().await?;
        let (acquired,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
            .bind(key)
            .fetch_one(&mut *conn)
            .await?;
        if !acquired {
            return Ok(None);
        }
        debug!(key, "advisory lock acquired");
        Ok(Some(RunLock {
            conn: Some(conn),
            key,
        }))
    }
}
