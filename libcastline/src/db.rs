//! Database operations for Castline
//!
//! Posts, their outcome log, credentials and jobs share one SQLite file.
//! Every status transition on a post is a conditional write so that a
//! concurrent publication attempt and an edit can never both win.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{DbError, Result};
use crate::types::{PlatformId, PlatformResult, Post, PostOutcome, PostStatus};

/// A post with its full outcome log
#[derive(Debug, Clone, serde::Serialize)]
pub struct PostWithOutcomes {
    pub post: Post,
    pub outcomes: Vec<PostOutcome>,
}

/// What happened when a publication result was written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Outcomes appended under this attempt number
    Recorded(i64),
    /// The post was deleted while the attempt ran
    PostMissing,
    /// The post no longer references the job (rescheduled or republished)
    Superseded,
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database and apply migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = crate::config::resolve_db_path(db_path);
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool; later operations fail.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Insert a new post
    pub async fn insert_post(&self, post: &Post) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO posts (id, owner_id, content, media_url, ai_metadata, platforms,
                               scheduled_at, status, job_id, retry_count, published_at,
                               created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.id)
        .bind(&post.owner_id)
        .bind(&post.content)
        .bind(&post.media_url)
        .bind(post.ai_metadata.as_ref().map(|m| m.to_string()))
        .bind(encode_platforms(&post.platforms))
        .bind(post.scheduled_at)
        .bind(post.status.as_str())
        .bind(&post.job_id)
        .bind(post.retry_count)
        .bind(post.published_at)
        .bind(post.created_at)
        .bind(post.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Get a post by ID
    pub async fn get_post(&self, post_id: &str) -> Result<Option<Post>> {
        let row = sqlx::query("SELECT * FROM posts WHERE id = ?")
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.map(|r| row_to_post(&r)).transpose()
    }

    /// Get a post by ID, only if it belongs to `owner_id`
    pub async fn get_owned_post(&self, post_id: &str, owner_id: &str) -> Result<Option<Post>> {
        Ok(self
            .get_post(post_id)
            .await?
            .filter(|post| post.owner_id == owner_id))
    }

    /// List an owner's posts, newest first
    pub async fn list_posts(
        &self,
        owner_id: &str,
        status: Option<PostStatus>,
        limit: usize,
    ) -> Result<Vec<Post>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    r#"
                    SELECT * FROM posts
                    WHERE owner_id = ? AND status = ?
                    ORDER BY created_at DESC, id
                    LIMIT ?
                    "#,
                )
                .bind(owner_id)
                .bind(status.as_str())
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT * FROM posts
                    WHERE owner_id = ?
                    ORDER BY created_at DESC, id
                    LIMIT ?
                    "#,
                )
                .bind(owner_id)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(DbError::SqlxError)?;

        rows.iter().map(row_to_post).collect()
    }

    /// Get the outcome log for a post in append order
    pub async fn get_outcomes(&self, post_id: &str) -> Result<Vec<PostOutcome>> {
        let rows = sqlx::query(
            r#"
            SELECT id, post_id, attempt, platform, success, external_id, error_message, recorded_at
            FROM post_outcomes
            WHERE post_id = ?
            ORDER BY id
            "#,
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter()
            .map(|r| {
                Ok(PostOutcome {
                    id: Some(r.get("id")),
                    post_id: r.get("post_id"),
                    attempt: r.get("attempt"),
                    platform: PlatformId::from_str(&r.get::<String, _>("platform"))?,
                    success: r.get("success"),
                    external_id: r.get("external_id"),
                    error_message: r.get("error_message"),
                    recorded_at: r.get("recorded_at"),
                })
            })
            .collect()
    }

    pub async fn get_post_with_outcomes(&self, post_id: &str) -> Result<Option<PostWithOutcomes>> {
        match self.get_post(post_id).await? {
            Some(post) => {
                let outcomes = self.get_outcomes(post_id).await?;
                Ok(Some(PostWithOutcomes { post, outcomes }))
            }
            None => Ok(None),
        }
    }

    /// Overwrite a post's editable fields, status and job handle.
    ///
    /// Only applies while the stored row still has `expected_status` and
    /// `expected_job`. Returns false when another writer got there first.
    pub async fn replace_post(
        &self,
        post: &Post,
        expected_status: PostStatus,
        expected_job: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE posts
            SET content = ?, media_url = ?, platforms = ?, scheduled_at = ?,
                status = ?, job_id = ?, updated_at = ?
            WHERE id = ? AND status = ? AND job_id IS ?
            "#,
        )
        .bind(&post.content)
        .bind(&post.media_url)
        .bind(encode_platforms(&post.platforms))
        .bind(post.scheduled_at)
        .bind(post.status.as_str())
        .bind(&post.job_id)
        .bind(post.updated_at)
        .bind(&post.id)
        .bind(expected_status.as_str())
        .bind(expected_job)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Delete a post; its outcome log goes with it
    pub async fn delete_post(&self, post_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM posts WHERE id = ?")
            .bind(post_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Move a post to `publishing` if it still belongs to `job_id` and awaits publication
    pub async fn mark_publishing(&self, post_id: &str, job_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE posts
            SET status = 'publishing', updated_at = ?
            WHERE id = ? AND job_id = ?
              AND status IN ('scheduled', 'publishing', 'failed')
            "#,
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(post_id)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Write the aggregate result of one publication attempt.
    ///
    /// Status, `published_at`, retry counter, job handle and every outcome
    /// entry land in one transaction. At least one success means
    /// `published` and the job handle is released; otherwise the post is
    /// `failed`, the retry counter increments and the handle is kept for
    /// the queue's next attempt.
    pub async fn record_publication(
        &self,
        post_id: &str,
        job_id: &str,
        results: &[PlatformResult],
    ) -> Result<RecordOutcome> {
        let now = chrono::Utc::now().timestamp();
        let any_success = results.iter().any(|r| r.success);

        let (status, published_at, retry_increment, job_after) = if any_success {
            (PostStatus::Published, Some(now), 0_i64, None)
        } else {
            (PostStatus::Failed, None, 1_i64, Some(job_id))
        };

        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        // Write first so the transaction takes the write lock up front.
        let updated = sqlx::query(
            r#"
            UPDATE posts
            SET status = ?, published_at = COALESCE(?, published_at),
                retry_count = retry_count + ?, job_id = ?, updated_at = ?
            WHERE id = ? AND job_id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(published_at)
        .bind(retry_increment)
        .bind(job_after)
        .bind(now)
        .bind(post_id)
        .bind(job_id)
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        if updated.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM posts WHERE id = ?")
                .bind(post_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(DbError::SqlxError)?
                .is_some();
            tx.rollback().await.map_err(DbError::SqlxError)?;
            return Ok(if exists {
                RecordOutcome::Superseded
            } else {
                RecordOutcome::PostMissing
            });
        }

        let attempt: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(attempt), 0) + 1 FROM post_outcomes WHERE post_id = ?",
        )
        .bind(post_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        for result in results {
            sqlx::query(
                r#"
                INSERT INTO post_outcomes (post_id, attempt, platform, success, external_id, error_message, recorded_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(post_id)
            .bind(attempt)
            .bind(result.platform.as_str())
            .bind(result.success)
            .bind(&result.external_id)
            .bind(&result.error)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(DbError::SqlxError)?;
        }

        tx.commit().await.map_err(DbError::SqlxError)?;

        Ok(RecordOutcome::Recorded(attempt))
    }

    /// Re-link a failed post with no outstanding job to `job_id`
    pub async fn attach_job(&self, post_id: &str, job_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE posts SET job_id = ?, updated_at = ?
            WHERE id = ? AND job_id IS NULL AND status = 'failed'
            "#,
        )
        .bind(job_id)
        .bind(chrono::Utc::now().timestamp())
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Drop the job handle once its job has been abandoned.
    ///
    /// A post left in `publishing` by a failed store write ends up `failed`.
    pub async fn release_job_handle(&self, post_id: &str, job_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE posts
            SET job_id = NULL,
                status = CASE WHEN status = 'publishing' THEN 'failed' ELSE status END,
                updated_at = ?
            WHERE id = ? AND job_id = ?
            "#,
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(post_id)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }
}

fn encode_platforms(platforms: &[PlatformId]) -> String {
    platforms
        .iter()
        .map(PlatformId::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

fn decode_platforms(raw: &str) -> Result<Vec<PlatformId>> {
    raw.split(',')
        .filter(|p| !p.is_empty())
        .map(PlatformId::from_str)
        .collect()
}

fn row_to_post(r: &SqliteRow) -> Result<Post> {
    let ai_metadata = r
        .get::<Option<String>, _>("ai_metadata")
        .and_then(|raw| serde_json::from_str(&raw).ok());

    Ok(Post {
        id: r.get("id"),
        owner_id: r.get("owner_id"),
        content: r.get("content"),
        media_url: r.get("media_url"),
        ai_metadata,
        platforms: decode_platforms(&r.get::<String, _>("platforms"))?,
        scheduled_at: r.get("scheduled_at"),
        status: PostStatus::from_str(&r.get::<String, _>("status"))?,
        job_id: r.get("job_id"),
        retry_count: r.get("retry_count"),
        published_at: r.get("published_at"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup_db() -> (Database, TempDir) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");
        let db = Database::new(path.to_str().unwrap()).await.unwrap();
        (db, dir)
    }

    fn scheduled_post(job_id: &str) -> Post {
        let mut post = Post::new(
            "owner".to_string(),
            "hello".to_string(),
            vec![PlatformId::Twitter, PlatformId::LinkedIn],
        );
        post.status = PostStatus::Scheduled;
        post.scheduled_at = Some(post.created_at + 3600);
        post.job_id = Some(job_id.to_string());
        post
    }

    #[tokio::test]
    async fn test_insert_and_get_post() {
        let (db, _dir) = setup_db().await;
        let mut post = scheduled_post("job-1");
        post.ai_metadata = Some(serde_json::json!({"prompt": "launch"}));
        db.insert_post(&post).await.unwrap();

        let loaded = db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(loaded, post);
    }

    #[tokio::test]
    async fn test_get_owned_post_hides_other_owners() {
        let (db, _dir) = setup_db().await;
        let post = scheduled_post("job-1");
        db.insert_post(&post).await.unwrap();

        assert!(db.get_owned_post(&post.id, "owner").await.unwrap().is_some());
        assert!(db.get_owned_post(&post.id, "intruder").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_post_is_conditional() {
        let (db, _dir) = setup_db().await;
        let post = scheduled_post("job-1");
        db.insert_post(&post).await.unwrap();

        let mut edited = post.clone();
        edited.content = "edited".to_string();
        edited.job_id = Some("job-2".to_string());

        // Wrong job handle loses
        assert!(!db
            .replace_post(&edited, PostStatus::Scheduled, Some("job-x"))
            .await
            .unwrap());
        assert!(db
            .replace_post(&edited, PostStatus::Scheduled, Some("job-1"))
            .await
            .unwrap());

        let loaded = db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(loaded.content, "edited");
        assert_eq!(loaded.job_id.as_deref(), Some("job-2"));
    }

    #[tokio::test]
    async fn test_replace_post_matches_null_job() {
        let (db, _dir) = setup_db().await;
        let post = Post::new("owner".to_string(), "draft".to_string(), vec![PlatformId::Twitter]);
        db.insert_post(&post).await.unwrap();

        let mut edited = post.clone();
        edited.content = "still a draft".to_string();
        assert!(db.replace_post(&edited, PostStatus::Draft, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_record_publication_success_releases_handle() {
        let (db, _dir) = setup_db().await;
        let post = scheduled_post("job-1");
        db.insert_post(&post).await.unwrap();
        assert!(db.mark_publishing(&post.id, "job-1").await.unwrap());

        let results = vec![
            PlatformResult::succeeded(PlatformId::Twitter, "t-1".to_string()),
            PlatformResult::failed(PlatformId::LinkedIn, "Rate limit exceeded: slow down"),
        ];
        let outcome = db.record_publication(&post.id, "job-1", &results).await.unwrap();
        assert_eq!(outcome, RecordOutcome::Recorded(1));

        let loaded = db.get_post_with_outcomes(&post.id).await.unwrap().unwrap();
        assert_eq!(loaded.post.status, PostStatus::Published);
        assert!(loaded.post.job_id.is_none());
        assert!(loaded.post.published_at.is_some());
        assert_eq!(loaded.post.retry_count, 0);
        assert_eq!(loaded.outcomes.len(), 2);
        assert!(loaded.outcomes.iter().all(|o| o.attempt == 1));
    }

    #[tokio::test]
    async fn test_record_publication_failure_keeps_handle_and_counts() {
        let (db, _dir) = setup_db().await;
        let post = scheduled_post("job-1");
        db.insert_post(&post).await.unwrap();

        let results = vec![PlatformResult::failed(PlatformId::Twitter, "down")];
        assert_eq!(
            db.record_publication(&post.id, "job-1", &results).await.unwrap(),
            RecordOutcome::Recorded(1)
        );
        assert_eq!(
            db.record_publication(&post.id, "job-1", &results).await.unwrap(),
            RecordOutcome::Recorded(2)
        );

        let loaded = db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, PostStatus::Failed);
        assert_eq!(loaded.retry_count, 2);
        assert_eq!(loaded.job_id.as_deref(), Some("job-1"));
        assert_eq!(db.get_outcomes(&post.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_record_publication_missing_and_superseded() {
        let (db, _dir) = setup_db().await;
        let post = scheduled_post("job-1");
        db.insert_post(&post).await.unwrap();

        let results = vec![PlatformResult::succeeded(PlatformId::Twitter, "1".to_string())];
        assert_eq!(
            db.record_publication(&post.id, "job-old", &results).await.unwrap(),
            RecordOutcome::Superseded
        );
        assert_eq!(
            db.record_publication("no-such-post", "job-1", &results).await.unwrap(),
            RecordOutcome::PostMissing
        );
        assert!(db.get_outcomes(&post.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_post_cascades_outcomes() {
        let (db, _dir) = setup_db().await;
        let post = scheduled_post("job-1");
        db.insert_post(&post).await.unwrap();
        let results = vec![PlatformResult::failed(PlatformId::Twitter, "down")];
        db.record_publication(&post.id, "job-1", &results).await.unwrap();

        assert!(db.delete_post(&post.id).await.unwrap());
        assert!(db.get_outcomes(&post.id).await.unwrap().is_empty());
        assert!(!db.delete_post(&post.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_posts_filters_by_status() {
        let (db, _dir) = setup_db().await;
        db.insert_post(&scheduled_post("job-1")).await.unwrap();
        db.insert_post(&Post::new("owner".to_string(), "d".to_string(), vec![PlatformId::Twitter]))
            .await
            .unwrap();
        db.insert_post(&Post::new("other".to_string(), "x".to_string(), vec![PlatformId::Twitter]))
            .await
            .unwrap();

        assert_eq!(db.list_posts("owner", None, 10).await.unwrap().len(), 2);
        let drafts = db.list_posts("owner", Some(PostStatus::Draft), 10).await.unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].content, "d");
    }
}
