//! Durable delayed-job queue
//!
//! Jobs live in the `jobs` table next to the posts they publish, so a
//! restart loses nothing. Every transition is a single conditional SQL
//! statement, which makes claim and cancel race-safe against each other:
//! whichever statement runs first wins and the other matches no row.
//!
//! ```text
//! pending --claim--> active --complete--> completed
//!    ^                 |
//!    +---fail (retry)--+--fail (bound reached) / bury--> dead --requeue--> pending
//! ```
//!
//! Claim order is priority descending, then fire time ascending, so
//! immediate publishes overtake scheduled posts that are merely due.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;

use crate::config::QueueConfig;
use crate::db::Database;
use crate::error::{CastError, DbError, Result};
use crate::types::{JobPayload, QueueStats};

pub const PRIORITY_SCHEDULED: i64 = 0;
pub const PRIORITY_IMMEDIATE: i64 = 10;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Active,
    Completed,
    Dead,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Dead => "dead",
        }
    }
}

impl FromStr for JobState {
    type Err = CastError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobState::Pending),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "dead" => Ok(JobState::Dead),
            other => Err(CastError::Validation(format!("Unknown job state '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Job {
    pub id: String,
    pub post_id: String,
    pub payload: JobPayload,
    pub run_at_ms: i64,
    pub priority: i64,
    pub state: JobState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub locked_until_ms: Option<i64>,
}

/// A job whose lease expired, as left by `recover_stalled`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalledJob {
    pub job_id: String,
    pub post_id: String,
    /// `Pending` if it will run again, `Dead` if its attempts were used up
    pub state: JobState,
    pub last_error: Option<String>,
}

/// What `fail` did with the job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Back to pending, runs again at `next_run_at_ms`
    Retrying { attempt: u32, next_run_at_ms: i64 },
    /// Attempt bound reached; kept as a dead letter
    Dead { attempts: u32 },
}

#[derive(Clone)]
pub struct JobQueue {
    db: Database,
    max_attempts: u32,
    backoff_ms: u64,
    lease_ms: i64,
    completed_retention_secs: i64,
}

impl JobQueue {
    pub fn new(db: Database, config: &QueueConfig) -> Self {
        Self {
            db,
            max_attempts: config.max_attempts.max(1),
            backoff_ms: config.backoff_ms,
            lease_ms: (config.lease_secs as i64).saturating_mul(1000),
            completed_retention_secs: i64::try_from(config.completed_retention_secs)
                .unwrap_or(i64::MAX),
        }
    }

    pub fn new_job_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Register a job that fires at `fire_at`.
    ///
    /// # Errors
    ///
    /// `CastError::Validation` if `fire_at` is not strictly in the future;
    /// nothing is written in that case.
    pub async fn schedule(
        &self,
        job_id: &str,
        fire_at: DateTime<Utc>,
        payload: &JobPayload,
    ) -> Result<()> {
        let now = Utc::now();
        if fire_at <= now {
            return Err(CastError::Validation(format!(
                "Scheduled time must be in the future (got {})",
                fire_at.to_rfc3339()
            )));
        }

        self.insert(job_id, fire_at.timestamp_millis(), PRIORITY_SCHEDULED, payload)
            .await?;
        tracing::debug!(job_id, post_id = %payload.post_id, fire_at = %fire_at, "Scheduled job");
        Ok(())
    }

    /// Register a job that is due now and claimed ahead of scheduled work.
    pub async fn enqueue_immediate(&self, job_id: &str, payload: &JobPayload) -> Result<()> {
        self.insert(job_id, Utc::now().timestamp_millis(), PRIORITY_IMMEDIATE, payload)
            .await?;
        tracing::debug!(job_id, post_id = %payload.post_id, "Enqueued immediate job");
        Ok(())
    }

    async fn insert(
        &self,
        job_id: &str,
        run_at_ms: i64,
        priority: i64,
        payload: &JobPayload,
    ) -> Result<()> {
        let payload_json = serde_json::to_string(payload)
            .map_err(|e| CastError::Validation(format!("Unserializable job payload: {}", e)))?;
        let now = Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO jobs (id, post_id, payload, run_at_ms, priority, state, attempts,
                              max_attempts, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 'pending', 0, ?, ?, ?)
            "#,
        )
        .bind(job_id)
        .bind(&payload.post_id)
        .bind(payload_json)
        .bind(run_at_ms)
        .bind(priority)
        .bind(self.max_attempts as i64)
        .bind(now)
        .bind(now)
        .execute(self.db.pool())
        .await
        .map_err(queue_error)?;

        Ok(())
    }

    /// Remove a job that has not started yet.
    ///
    /// Returns `false` if the job was already claimed, finished or never
    /// existed. Never an error for "not found".
    pub async fn cancel(&self, job_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ? AND state = 'pending'")
            .bind(job_id)
            .execute(self.db.pool())
            .await
            .map_err(queue_error)?;

        let cancelled = result.rows_affected() == 1;
        tracing::debug!(job_id, cancelled, "Cancel job");
        Ok(cancelled)
    }

    /// Atomically claim the next due job and take a lease on it.
    pub async fn claim_next(&self) -> Result<Option<Job>> {
        let now_ms = Utc::now().timestamp_millis();

        let row = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'active', attempts = attempts + 1, locked_until_ms = ?, updated_at = ?
            WHERE id = (
                SELECT id FROM jobs
                WHERE state = 'pending' AND run_at_ms <= ?
                ORDER BY priority DESC, run_at_ms ASC, created_at ASC
                LIMIT 1
            )
            AND state = 'pending'
            RETURNING *
            "#,
        )
        .bind(now_ms + self.lease_ms)
        .bind(now_ms / 1000)
        .bind(now_ms)
        .fetch_optional(self.db.pool())
        .await
        .map_err(queue_error)?;

        row.map(|r| row_to_job(&r)).transpose()
    }

    /// Mark an active job finished
    pub async fn complete(&self, job_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET state = 'completed', locked_until_ms = NULL, updated_at = ?
            WHERE id = ? AND state = 'active'
            "#,
        )
        .bind(Utc::now().timestamp())
        .bind(job_id)
        .execute(self.db.pool())
        .await
        .map_err(queue_error)?;

        Ok(result.rows_affected() == 1)
    }

    /// Report a failed run.
    ///
    /// The job goes back to pending after `backoff_ms * 2^(attempt-1)`, or to
    /// the dead state once its attempt bound is reached.
    pub async fn fail(&self, job_id: &str, error: &str) -> Result<FailOutcome> {
        let now_ms = Utc::now().timestamp_millis();

        let row = sqlx::query(
            r#"
            UPDATE jobs
            SET state = CASE WHEN attempts >= max_attempts THEN 'dead' ELSE 'pending' END,
                run_at_ms = CASE WHEN attempts >= max_attempts THEN run_at_ms
                                 ELSE ? + (? << (MIN(attempts, 20) - 1)) END,
                last_error = ?, locked_until_ms = NULL, updated_at = ?
            WHERE id = ? AND state = 'active'
            RETURNING state, attempts, run_at_ms
            "#,
        )
        .bind(now_ms)
        .bind(self.backoff_ms as i64)
        .bind(error)
        .bind(now_ms / 1000)
        .bind(job_id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(queue_error)?
        .ok_or_else(|| CastError::NotFound(format!("active job {}", job_id)))?;

        let attempts = row.get::<i64, _>("attempts") as u32;
        let outcome = match JobState::from_str(&row.get::<String, _>("state"))? {
            JobState::Dead => FailOutcome::Dead { attempts },
            _ => FailOutcome::Retrying {
                attempt: attempts,
                next_run_at_ms: row.get("run_at_ms"),
            },
        };
        Ok(outcome)
    }

    /// Move an active job straight to the dead state, skipping retries
    pub async fn bury(&self, job_id: &str, error: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET state = 'dead', last_error = ?, locked_until_ms = NULL, updated_at = ?
            WHERE id = ? AND state = 'active'
            "#,
        )
        .bind(error)
        .bind(Utc::now().timestamp())
        .bind(job_id)
        .execute(self.db.pool())
        .await
        .map_err(queue_error)?;

        Ok(result.rows_affected() == 1)
    }

    /// Release jobs whose lease expired (their worker died mid-run).
    ///
    /// Jobs that already used up their attempts are dead-lettered instead.
    /// Every released job is returned so the caller can settle the posts of
    /// the dead ones.
    pub async fn recover_stalled(&self) -> Result<Vec<StalledJob>> {
        let now_ms = Utc::now().timestamp_millis();

        let rows = sqlx::query(
            r#"
            UPDATE jobs
            SET state = CASE WHEN attempts >= max_attempts THEN 'dead' ELSE 'pending' END,
                last_error = COALESCE(last_error, 'lease expired'),
                locked_until_ms = NULL, updated_at = ?
            WHERE state = 'active' AND locked_until_ms < ?
            RETURNING id, post_id, state, last_error
            "#,
        )
        .bind(now_ms / 1000)
        .bind(now_ms)
        .fetch_all(self.db.pool())
        .await
        .map_err(queue_error)?;

        let stalled = rows
            .iter()
            .map(|r| {
                Ok(StalledJob {
                    job_id: r.get("id"),
                    post_id: r.get("post_id"),
                    state: JobState::from_str(&r.get::<String, _>("state"))?,
                    last_error: r.get("last_error"),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if !stalled.is_empty() {
            let dead = stalled.iter().filter(|job| job.state == JobState::Dead).count();
            tracing::warn!(
                recovered = stalled.len(),
                dead,
                "Recovered stalled jobs with expired leases"
            );
        }
        Ok(stalled)
    }

    /// Delete completed jobs older than the retention window.
    ///
    /// Dead jobs are kept for `requeue_dead`. A zero window disables pruning.
    pub async fn prune_completed(&self) -> Result<u64> {
        if self.completed_retention_secs == 0 {
            return Ok(0);
        }
        let cutoff = Utc::now()
            .timestamp()
            .saturating_sub(self.completed_retention_secs);

        let result = sqlx::query("DELETE FROM jobs WHERE state = 'completed' AND updated_at < ?")
            .bind(cutoff)
            .execute(self.db.pool())
            .await
            .map_err(queue_error)?;

        let pruned = result.rows_affected();
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned completed jobs");
        }
        Ok(pruned)
    }

    /// Job counts by state; all zeros when the backend is unavailable.
    pub async fn stats(&self) -> QueueStats {
        match self.try_stats().await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!(error = %e, "Queue stats unavailable");
                QueueStats::default()
            }
        }
    }

    async fn try_stats(&self) -> Result<QueueStats> {
        let now_ms = Utc::now().timestamp_millis();

        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN state = 'pending' AND run_at_ms <= ? THEN 1 ELSE 0 END), 0) AS waiting,
                COALESCE(SUM(CASE WHEN state = 'active' THEN 1 ELSE 0 END), 0) AS active,
                COALESCE(SUM(CASE WHEN state = 'completed' THEN 1 ELSE 0 END), 0) AS completed,
                COALESCE(SUM(CASE WHEN state = 'dead' THEN 1 ELSE 0 END), 0) AS failed,
                COALESCE(SUM(CASE WHEN state = 'pending' AND run_at_ms > ? THEN 1 ELSE 0 END), 0) AS delayed
            FROM jobs
            "#,
        )
        .bind(now_ms)
        .bind(now_ms)
        .fetch_one(self.db.pool())
        .await
        .map_err(queue_error)?;

        Ok(QueueStats {
            waiting: row.get::<i64, _>("waiting") as u64,
            active: row.get::<i64, _>("active") as u64,
            completed: row.get::<i64, _>("completed") as u64,
            failed: row.get::<i64, _>("failed") as u64,
            delayed: row.get::<i64, _>("delayed") as u64,
        })
    }

    pub async fn get(&self, job_id: &str) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(queue_error)?;

        row.map(|r| row_to_job(&r)).transpose()
    }

    /// Dead-lettered jobs, most recently abandoned first
    pub async fn dead_letters(&self, limit: usize) -> Result<Vec<Job>> {
        let rows = sqlx::query(
            "SELECT * FROM jobs WHERE state = 'dead' ORDER BY updated_at DESC, id LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(self.db.pool())
        .await
        .map_err(queue_error)?;

        rows.iter().map(row_to_job).collect()
    }

    /// Put a dead job back in line with a fresh attempt budget
    pub async fn requeue_dead(&self, job_id: &str) -> Result<bool> {
        let now_ms = Utc::now().timestamp_millis();

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'pending', attempts = 0, run_at_ms = ?, last_error = NULL, updated_at = ?
            WHERE id = ? AND state = 'dead'
            "#,
        )
        .bind(now_ms)
        .bind(now_ms / 1000)
        .bind(job_id)
        .execute(self.db.pool())
        .await
        .map_err(queue_error)?;

        Ok(result.rows_affected() == 1)
    }
}

/// Backend unreachable (pool closed, I/O) is a queue outage; the rest is a database error.
fn queue_error(error: sqlx::Error) -> CastError {
    match error {
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
            CastError::QueueUnavailable(error.to_string())
        }
        other => CastError::Database(DbError::SqlxError(other)),
    }
}

fn row_to_job(r: &SqliteRow) -> Result<Job> {
    let payload: JobPayload = serde_json::from_str(&r.get::<String, _>("payload"))
        .map_err(|e| CastError::Validation(format!("Corrupt job payload: {}", e)))?;

    Ok(Job {
        id: r.get("id"),
        post_id: r.get("post_id"),
        payload,
        run_at_ms: r.get("run_at_ms"),
        priority: r.get("priority"),
        state: JobState::from_str(&r.get::<String, _>("state"))?,
        attempts: r.get::<i64, _>("attempts") as u32,
        max_attempts: r.get::<i64, _>("max_attempts") as u32,
        last_error: r.get("last_error"),
        locked_until_ms: r.get("locked_until_ms"),
    })
}
