//! Advisory, time-boxed run lock stored in SQLite.
//!
//! Overlapping ingestion runs are safe (upserts are idempotent) but
//! wasteful, so each run tries to claim a named lock first. A lock whose
//! `expires_at` has passed is free to take over, which keeps a crashed run
//! from blocking the schedule forever. Long runs call [`RunLock::renew`]
//! as they make progress so the TTL only has to cover one page.
//!
//! Dropping a [`RunLock`] without calling [`RunLock::release`] (a cancelled
//! run) still frees it: the drop hands the delete to the current tokio
//! runtime.

use anyhow::Result;
use chrono::{Duration, Utc};
use sqlx::SqlitePool;

pub struct RunLock {
    pool: SqlitePool,
    name: String,
    holder: String,
    released: bool,
}

fn expiry(ttl: Duration) -> i64 {
    Utc::now().timestamp().saturating_add(ttl.num_seconds().max(1))
}

impl RunLock {
    /// Try to claim `name` for `ttl`. `None` means a live holder exists.
    pub async fn acquire(pool: &SqlitePool, name: &str, ttl: Duration) -> Result<Option<RunLock>> {
        let holder = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO ingest_locks (name, holder, expires_at) VALUES (?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET holder = excluded.holder, expires_at = excluded.expires_at
            WHERE ingest_locks.expires_at <= ?
            "#,
        )
        .bind(name)
        .bind(&holder)
        .bind(expiry(ttl))
        .bind(now)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        Ok(Some(RunLock {
            pool: pool.clone(),
            name: name.to_string(),
            holder,
            released: false,
        }))
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Push the expiry out to `now + ttl`. `false` means another run took
    /// the lock over after ours expired.
    pub async fn renew(&self, ttl: Duration) -> Result<bool> {
        let result =
            sqlx::query("UPDATE ingest_locks SET expires_at = ? WHERE name = ? AND holder = ?")
                .bind(expiry(ttl))
                .bind(&self.name)
                .bind(&self.holder)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Release the lock if we still hold it.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        delete(&self.pool, &self.name, &self.holder).await
    }
}

async fn delete(pool: &SqlitePool, name: &str, holder: &str) -> Result<()> {
    sqlx::query("DELETE FROM ingest_locks WHERE name = ? AND holder = ?")
        .bind(name)
        .bind(holder)
        .execute(pool)
        .await?;
    Ok(())
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(lock = %self.name, "run lock dropped outside a runtime; left to expire");
            return;
        };
        let pool = self.pool.clone();
        let name = std::mem::take(&mut self.name);
        let holder = std::mem::take(&mut self.holder);
        runtime.spawn(async move {
            match delete(&pool, &name, &holder).await {
                Ok(()) => tracing::debug!(lock = %name, "released run lock of a cancelled run"),
                Err(e) => tracing::warn!(lock = %name, error = %e, "failed to release dropped run lock"),
            }
        });
    }
}
