//! Durable record of repositories, commits, action runs and artefacts.
//!
//! Every scheduling decision is guarded by one of the single-statement
//! transitions here: the `rows_affected` checks are what make event
//! redelivery and concurrent re-evaluation idempotent.

use std::str::FromStr;

use anyhow::{Context, Result, anyhow};
use golem_core::{
    config::DbConfig,
    models::{ActionRunRecord, ActionStatus, ArtefactRecord, CommitRecord, CommitStatus},
};
use sqlx::{Row, Sqlite, SqlitePool, migrate::MigrateDatabase, sqlite::SqliteRow};
use time::OffsetDateTime;

#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(config: &DbConfig) -> Result<Self> {
        if !Sqlite::database_exists(&config.url).await.unwrap_or(false) {
            tracing::info!(url = %config.url, "Creating database");
            Sqlite::create_database(&config.url).await.context("Failed to create database")?;
        }
        let pool =
            SqlitePool::connect(&config.url).await.context("Failed to connect to database")?;
        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(Self { pool })
    }

    /// A private in-memory store, for tests.
    pub async fn in_memory() -> Result<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        sqlx::migrate!("../../migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) { self.pool.close().await }

    pub async fn ensure_repository(&self, name: &str) -> Result<i64> {
        sqlx::query("INSERT INTO repository (name) VALUES (?) ON CONFLICT (name) DO NOTHING")
            .bind(name)
            .execute(&self.pool)
            .await?;
        let id = sqlx::query("SELECT id FROM repository WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?
            .get::<i64, _>("id");
        Ok(id)
    }

    /// Fetch or lazily create the commit row for (repository, ref, sha1).
    /// Commits are append-only; an existing row is returned untouched.
    pub async fn ensure_commit(
        &self,
        repository_id: i64,
        refname: &str,
        sha1: &str,
        prev_sha1: Option<&str>,
    ) -> Result<CommitRecord> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        sqlx::query(
            r#"
            INSERT INTO "commit" (repository, sha1, prev_sha1, ref, submit_time, status)
            VALUES (?, ?, ?, ?, ?, 'new')
            ON CONFLICT (repository, sha1, ref) DO NOTHING
            "#,
        )
        .bind(repository_id)
        .bind(sha1)
        .bind(prev_sha1)
        .bind(refname)
        .bind(now)
        .execute(&self.pool)
        .await?;
        self.find_commit(repository_id, refname, sha1)
            .await?
            .ok_or_else(|| anyhow!("commit row vanished for {refname}@{sha1}"))
    }

    pub async fn find_commit(
        &self,
        repository_id: i64,
        refname: &str,
        sha1: &str,
    ) -> Result<Option<CommitRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, repository, sha1, prev_sha1, ref, submit_time, status
            FROM "commit"
            WHERE repository = ? AND ref = ? AND sha1 = ?
            "#,
        )
        .bind(repository_id)
        .bind(refname)
        .bind(sha1)
        .fetch_optional(&self.pool)
        .await?;
        row.map(commit_from_row).transpose()
    }

    /// The most recent commit for a ref, by submit time.
    pub async fn latest_commit_for_ref(
        &self,
        repository_id: i64,
        refname: &str,
    ) -> Result<Option<CommitRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, repository, sha1, prev_sha1, ref, submit_time, status
            FROM "commit"
            WHERE repository = ? AND ref = ?
            ORDER BY submit_time DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(repository_id)
        .bind(refname)
        .fetch_optional(&self.pool)
        .await?;
        row.map(commit_from_row).transpose()
    }

    pub async fn set_commit_status(&self, commit_id: i64, status: CommitStatus) -> Result<()> {
        sqlx::query(r#"UPDATE "commit" SET status = ? WHERE id = ?"#)
            .bind(status.as_str())
            .bind(commit_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Mark a commit in-progress unless it has already failed.
    pub async fn mark_commit_in_progress(&self, commit_id: i64) -> Result<()> {
        sqlx::query(r#"UPDATE "commit" SET status = 'in-progress' WHERE id = ? AND status != 'fail'"#)
            .bind(commit_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn ensure_action_run(
        &self,
        commit_id: i64,
        name: &str,
    ) -> Result<ActionRunRecord> {
        sqlx::query(
            r#"
            INSERT INTO action (name, "commit", status)
            VALUES (?, ?, 'new')
            ON CONFLICT (name, "commit") DO NOTHING
            "#,
        )
        .bind(name)
        .bind(commit_id)
        .execute(&self.pool)
        .await?;
        self.find_action_run(commit_id, name)
            .await?
            .ok_or_else(|| anyhow!("action row vanished for {name}"))
    }

    pub async fn find_action_run(
        &self,
        commit_id: i64,
        name: &str,
    ) -> Result<Option<ActionRunRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, "commit", status, start_time, end_time, duration, host
            FROM action
            WHERE "commit" = ? AND name = ?
            "#,
        )
        .bind(commit_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(action_from_row).transpose()
    }

    /// The `new -> scheduled` guard. Returns true for exactly one caller per
    /// (commit, action): re-processing the same event, or a later dependency
    /// re-check, finds the row already scheduled and backs off.
    pub async fn try_schedule(&self, action_id: i64) -> Result<bool> {
        let affected =
            sqlx::query("UPDATE action SET status = 'scheduled' WHERE id = ? AND status = 'new'")
                .bind(action_id)
                .execute(&self.pool)
                .await?
                .rows_affected();
        Ok(affected == 1)
    }

    pub async fn record_action_started(
        &self,
        commit_id: i64,
        name: &str,
        start_time: Option<i64>,
        host: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE action SET status = 'started', start_time = ?, host = ?
            WHERE "commit" = ? AND name = ?
            "#,
        )
        .bind(start_time)
        .bind(host)
        .bind(commit_id)
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn record_action_done(
        &self,
        commit_id: i64,
        name: &str,
        status: ActionStatus,
        start_time: Option<i64>,
        end_time: Option<i64>,
        duration: Option<f64>,
        host: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE action
            SET status = ?, start_time = ?, end_time = ?, duration = ?, host = ?
            WHERE "commit" = ? AND name = ?
            "#,
        )
        .bind(status.as_str())
        .bind(start_time)
        .bind(end_time)
        .bind(duration)
        .bind(host)
        .bind(commit_id)
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Whether any action run for this commit is not yet successful.
    pub async fn has_unfinished_actions(&self, commit_id: i64) -> Result<bool> {
        let exists = sqlx::query(
            r#"SELECT EXISTS (SELECT 1 FROM action WHERE "commit" = ? AND status != 'success') AS e"#,
        )
        .bind(commit_id)
        .fetch_one(&self.pool)
        .await?
        .get::<i64, _>("e");
        Ok(exists != 0)
    }

    /// Names of this commit's action runs currently in the given status.
    pub async fn runs_with_status(
        &self,
        commit_id: i64,
        status: ActionStatus,
    ) -> Result<Vec<String>> {
        let rows = sqlx::query(r#"SELECT name FROM action WHERE "commit" = ? AND status = ?"#)
            .bind(commit_id)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.get::<String, _>("name")).collect())
    }

    /// Reschedule reset: back to `new`, timings and host cleared. The row
    /// itself is never deleted.
    pub async fn reset_action_run(&self, commit_id: i64, name: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE action
            SET status = 'new', start_time = NULL, end_time = NULL, duration = NULL, host = NULL
            WHERE "commit" = ? AND name = ?
            "#,
        )
        .bind(commit_id)
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record an artefact; a filename collision updates the existing row.
    pub async fn upsert_artefact(&self, action_id: i64, filename: &str, sha1: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO artefact (filename, action, sha1)
            VALUES (?, ?, ?)
            ON CONFLICT (filename, action) DO UPDATE SET sha1 = EXCLUDED.sha1
            "#,
        )
        .bind(filename)
        .bind(action_id)
        .bind(sha1)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn artefacts_for_action(&self, action_id: i64) -> Result<Vec<ArtefactRecord>> {
        let rows = sqlx::query(
            "SELECT id, filename, action, sha1 FROM artefact WHERE action = ? ORDER BY filename",
        )
        .bind(action_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| ArtefactRecord {
                id: row.get("id"),
                filename: row.get("filename"),
                action_id: row.get("action"),
                sha1: row.get("sha1"),
            })
            .collect())
    }
}

fn commit_from_row(row: SqliteRow) -> Result<CommitRecord> {
    let status: String = row.get("status");
    Ok(CommitRecord {
        id: row.get("id"),
        repository_id: row.get("repository"),
        sha1: row.get("sha1"),
        prev_sha1: row.get("prev_sha1"),
        refname: row.get("ref"),
        submit_time: row.get("submit_time"),
        status: CommitStatus::from_str(&status)
            .map_err(|()| anyhow!("invalid commit status {status:?}"))?,
    })
}

fn action_from_row(row: SqliteRow) -> Result<ActionRunRecord> {
    let status: String = row.get("status");
    Ok(ActionRunRecord {
        id: row.get("id"),
        name: row.get("name"),
        commit_id: row.get("commit"),
        status: ActionStatus::from_str(&status)
            .map_err(|()| anyhow!("invalid action status {status:?}"))?,
        start_time: row.get("start_time"),
        end_time: row.get("end_time"),
        duration: row.get("duration"),
        host: row.get("host"),
    })
}
