//! FIFO job transport over a shared SQLite database.
//!
//! Jobs are opaque byte payloads on named queues. A reservation hides the
//! job from other consumers for its time-to-run; if the consumer neither
//! deletes nor buries it in time, the job becomes reservable again.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use sqlx::{Row, Sqlite, SqlitePool, migrate::MigrateDatabase};
use time::OffsetDateTime;

pub const DEFAULT_TTR: u64 = 120;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS queue_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    queue TEXT NOT NULL,
    payload BLOB NOT NULL,
    ttr INTEGER NOT NULL,
    state TEXT NOT NULL DEFAULT 'ready',
    reserved_until INTEGER
);
CREATE INDEX IF NOT EXISTS queue_jobs_ready ON queue_jobs (queue, state, id);
"#;

/// A job handed out by [`JobQueue::reserve`]. The consumer must finish with
/// [`JobQueue::delete`] or [`JobQueue::bury`] before the ttr elapses.
#[derive(Debug, Clone)]
pub struct ReservedJob {
    pub id: i64,
    pub queue: String,
    pub payload: Vec<u8>,
}

#[derive(Clone)]
pub struct JobQueue {
    pool: SqlitePool,
    url: String,
    watched: Vec<String>,
    poll_interval: Duration,
}

impl JobQueue {
    pub async fn connect(url: &str) -> Result<Self> {
        if !Sqlite::database_exists(url).await.unwrap_or(false) {
            Sqlite::create_database(url).await.context("Failed to create queue database")?;
        }
        let pool = SqlitePool::connect(url).await.context("Failed to connect to queue")?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self {
            pool,
            url: url.to_owned(),
            watched: Vec::new(),
            poll_interval: Duration::from_millis(250),
        })
    }

    /// A private in-memory queue, for tests.
    pub async fn in_memory() -> Result<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self {
            pool,
            url: "sqlite::memory:".to_owned(),
            watched: Vec::new(),
            poll_interval: Duration::from_millis(10),
        })
    }

    pub fn watch(&mut self, queue: &str) {
        if !self.watched.iter().any(|q| q == queue) {
            self.watched.push(queue.to_owned());
        }
    }

    pub async fn put(&self, queue: &str, payload: &[u8], ttr: u64) -> Result<i64> {
        let id = sqlx::query(
            "INSERT INTO queue_jobs (queue, payload, ttr, state) VALUES (?, ?, ?, 'ready')",
        )
        .bind(queue)
        .bind(payload)
        .bind(ttr as i64)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        tracing::debug!(queue, id, "Queued job");
        Ok(id)
    }

    /// Block until a job is available on a watched queue.
    pub async fn reserve(&self) -> Result<ReservedJob> {
        loop {
            if let Some(job) = self.try_reserve().await? {
                return Ok(job);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// One reservation attempt: the oldest ready job on a watched queue, or
    /// a reserved job whose ttr has elapsed.
    pub async fn try_reserve(&self) -> Result<Option<ReservedJob>> {
        if self.watched.is_empty() {
            return Err(anyhow!("no queues watched"));
        }
        let now = OffsetDateTime::now_utc().unix_timestamp();
        // Two steps under a single pool connection: pick a candidate, then
        // claim it with a guarded UPDATE so racing consumers cannot share it.
        let placeholders = vec!["?"; self.watched.len()].join(", ");
        let sql = format!(
            "SELECT id, queue, payload, ttr FROM queue_jobs
             WHERE queue IN ({placeholders})
               AND (state = 'ready' OR (state = 'reserved' AND reserved_until <= ?))
             ORDER BY id LIMIT 1"
        );
        let mut query = sqlx::query(&sql);
        for queue in &self.watched {
            query = query.bind(queue);
        }
        let Some(row) = query.bind(now).fetch_optional(&self.pool).await? else {
            return Ok(None);
        };
        let id: i64 = row.get("id");
        let ttr: i64 = row.get("ttr");
        let claimed = sqlx::query(
            "UPDATE queue_jobs SET state = 'reserved', reserved_until = ?
             WHERE id = ? AND (state = 'ready' OR (state = 'reserved' AND reserved_until <= ?))",
        )
        .bind(now + ttr)
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if claimed != 1 {
            return Ok(None);
        }
        Ok(Some(ReservedJob { id, queue: row.get("queue"), payload: row.get("payload") }))
    }

    /// Reserve, reconnecting once if the queue connection has gone away.
    pub async fn reserve_with_retry(&mut self) -> Result<ReservedJob> {
        match self.reserve().await {
            Ok(job) => Ok(job),
            Err(e) => {
                tracing::warn!("Queue reservation failed, reconnecting: {e:?}");
                let fresh = Self::connect(&self.url).await?;
                self.pool = fresh.pool;
                self.reserve().await
            }
        }
    }

    pub async fn delete(&self, job: &ReservedJob) -> Result<()> {
        sqlx::query("DELETE FROM queue_jobs WHERE id = ?")
            .bind(job.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Put a job aside for operator inspection. Buried jobs are never
    /// redelivered.
    pub async fn bury(&self, job: &ReservedJob) -> Result<()> {
        sqlx::query("UPDATE queue_jobs SET state = 'buried', reserved_until = NULL WHERE id = ?")
            .bind(job.id)
            .execute(&self.pool)
            .await?;
        tracing::warn!(queue = %job.queue, id = job.id, "Buried job");
        Ok(())
    }

    pub async fn close(&self) { self.pool.close().await }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fifo_within_a_queue() {
        let mut queue = JobQueue::in_memory().await.unwrap();
        queue.watch("build");
        queue.put("build", b"first", DEFAULT_TTR).await.unwrap();
        queue.put("build", b"second", DEFAULT_TTR).await.unwrap();
        queue.put("other", b"elsewhere", DEFAULT_TTR).await.unwrap();

        let job = queue.reserve().await.unwrap();
        assert_eq!(job.payload, b"first");
        queue.delete(&job).await.unwrap();
        let job = queue.reserve().await.unwrap();
        assert_eq!(job.payload, b"second");
        queue.delete(&job).await.unwrap();
        // The unwatched queue is invisible.
        assert!(queue.try_reserve().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reserved_job_is_hidden_until_ttr_elapses() {
        let mut queue = JobQueue::in_memory().await.unwrap();
        queue.watch("build");
        queue.put("build", b"job", 3600).await.unwrap();
        let job = queue.try_reserve().await.unwrap().unwrap();
        assert!(queue.try_reserve().await.unwrap().is_none());
        queue.delete(&job).await.unwrap();
    }

    #[tokio::test]
    async fn expired_reservation_is_redelivered() {
        let mut queue = JobQueue::in_memory().await.unwrap();
        queue.watch("build");
        queue.put("build", b"job", 0).await.unwrap();
        let first = queue.try_reserve().await.unwrap().unwrap();
        // ttr 0: immediately claimable again by another consumer.
        let second = queue.try_reserve().await.unwrap().unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn buried_jobs_stay_buried() {
        let mut queue = JobQueue::in_memory().await.unwrap();
        queue.watch("build");
        queue.put("build", b"broken", 0).await.unwrap();
        let job = queue.try_reserve().await.unwrap().unwrap();
        queue.bury(&job).await.unwrap();
        assert!(queue.try_reserve().await.unwrap().is_none());
    }
}
