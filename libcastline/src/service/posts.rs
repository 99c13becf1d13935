//! Post lifecycle operations
//!
//! Creating, editing, deleting and publishing posts, keeping the post's job
//! handle and the queue in step. Every status change is a conditional write
//! against the status and job handle that were read, so an edit that races a
//! running handler loses with `CastError::Conflict` instead of clobbering it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::validation::{ValidationRequest, ValidationService};
use crate::credentials::CredentialStore;
use crate::db::{Database, PostWithOutcomes};
use crate::error::{CastError, Result};
use crate::queue::{JobQueue, JobState};
use crate::types::{normalize_platforms, PlatformId, Post, PostStatus, QueueStats};

/// Input for `create_post`
#[derive(Debug, Clone)]
pub struct NewPost {
    pub owner_id: String,
    pub content: String,
    pub platforms: Vec<PlatformId>,
    pub media_url: Option<String>,
    /// `None` creates a draft
    pub scheduled_at: Option<DateTime<Utc>>,
    pub ai_metadata: Option<serde_json::Value>,
}

impl NewPost {
    pub fn new(owner_id: &str, content: &str, platforms: Vec<PlatformId>) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            content: content.to_string(),
            platforms,
            media_url: None,
            scheduled_at: None,
            ai_metadata: None,
        }
    }
}

/// Fields to change on an existing post; `None` leaves a field alone.
///
/// The nested options distinguish "clear" (`Some(None)`) from "keep".
#[derive(Debug, Clone, Default)]
pub struct PostUpdate {
    pub content: Option<String>,
    pub media_url: Option<Option<String>>,
    pub platforms: Option<Vec<PlatformId>>,
    pub scheduled_at: Option<Option<DateTime<Utc>>>,
}

impl PostUpdate {
    fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.media_url.is_none()
            && self.platforms.is_none()
            && self.scheduled_at.is_none()
    }
}

#[derive(Clone)]
pub struct PostService {
    db: Database,
    queue: JobQueue,
    credentials: Arc<dyn CredentialStore>,
    validation: ValidationService,
}

impl PostService {
    pub fn new(
        db: Database,
        queue: JobQueue,
        credentials: Arc<dyn CredentialStore>,
        validation: ValidationService,
    ) -> Self {
        Self {
            db,
            queue,
            credentials,
            validation,
        }
    }

    /// Create a draft, or a scheduled post with its job registered.
    ///
    /// # Errors
    ///
    /// - `Validation` for bad content, no platforms or a past schedule
    /// - `NoCredential` naming every platform the owner has no active account for
    /// - `QueueUnavailable` if the job cannot be registered; no post is stored then
    pub async fn create_post(&self, request: NewPost) -> Result<Post> {
        let platforms = normalize_platforms(request.platforms);
        self.validate(&request.content, &platforms, request.media_url.as_deref())?;
        if let Some(at) = request.scheduled_at {
            ensure_future(at)?;
        }
        self.ensure_credentials(&request.owner_id, &platforms).await?;

        let mut post = Post::new(request.owner_id, request.content, platforms);
        post.media_url = request.media_url;
        post.ai_metadata = request.ai_metadata;

        let Some(fire_at) = request.scheduled_at else {
            self.db.insert_post(&post).await?;
            info!(post_id = %post.id, "Created draft");
            return Ok(post);
        };

        let job_id = JobQueue::new_job_id();
        post.status = PostStatus::Scheduled;
        post.scheduled_at = Some(fire_at.timestamp());
        post.job_id = Some(job_id.clone());

        self.queue
            .schedule(&job_id, fire_at, &post.job_payload(false))
            .await?;
        if let Err(e) = self.db.insert_post(&post).await {
            self.discard_job(&job_id).await;
            return Err(e);
        }

        info!(post_id = %post.id, job_id = %job_id, fire_at = %fire_at, "Scheduled post");
        Ok(post)
    }

    /// Edit a post that has not been published.
    ///
    /// A post that ends up with a schedule gets a new job carrying a fresh
    /// snapshot; the previous job, if any, is cancelled. Clearing the
    /// schedule cancels the job and reverts the post to draft (a failed post
    /// stays failed).
    pub async fn update_post(&self, id: &str, owner_id: &str, update: PostUpdate) -> Result<Post> {
        let current = self.owned_post(id, owner_id).await?;
        match current.status {
            PostStatus::Published => {
                return Err(CastError::Validation(format!(
                    "Post {} is already published and can no longer be edited",
                    id
                )))
            }
            PostStatus::Publishing => {
                return Err(CastError::Conflict(format!("Post {} is being published", id)))
            }
            _ => {}
        }
        if update.is_empty() {
            return Ok(current);
        }

        let mut post = current.clone();
        if let Some(content) = update.content {
            post.content = content;
        }
        if let Some(media_url) = update.media_url {
            post.media_url = media_url;
        }
        if let Some(platforms) = update.platforms {
            post.platforms = normalize_platforms(platforms);
        }
        self.validate(&post.content, &post.platforms, post.media_url.as_deref())?;

        let added: Vec<PlatformId> = post
            .platforms
            .iter()
            .copied()
            .filter(|p| !current.platforms.contains(p))
            .collect();
        self.ensure_credentials(owner_id, &added).await?;

        let fire_at = match update.scheduled_at {
            Some(target) => target,
            None if current.status == PostStatus::Scheduled => current
                .scheduled_at
                .and_then(|secs| DateTime::from_timestamp(secs, 0)),
            None => None,
        };
        if let Some(at) = fire_at {
            ensure_future(at)?;
        }

        let new_job = match fire_at {
            Some(at) => {
                let job_id = JobQueue::new_job_id();
                post.status = PostStatus::Scheduled;
                post.scheduled_at = Some(at.timestamp());
                post.job_id = Some(job_id.clone());
                self.queue.schedule(&job_id, at, &post.job_payload(false)).await?;
                Some(job_id)
            }
            None => {
                if current.status == PostStatus::Scheduled {
                    post.status = PostStatus::Draft;
                }
                post.scheduled_at = None;
                post.job_id = None;
                None
            }
        };

        if let Err(e) = self.retire_job(&current).await {
            if let Some(job_id) = &new_job {
                self.discard_job(job_id).await;
            }
            return Err(e);
        }

        post.updated_at = Utc::now().timestamp();
        let applied = self
            .db
            .replace_post(&post, current.status, current.job_id.as_deref())
            .await;
        match applied {
            Ok(true) => {
                info!(post_id = %post.id, status = %post.status, job_id = ?post.job_id, "Updated post");
                Ok(post)
            }
            Ok(false) => {
                if let Some(job_id) = &new_job {
                    self.discard_job(job_id).await;
                }
                Err(CastError::Conflict(format!(
                    "Post {} changed while it was being updated",
                    id
                )))
            }
            Err(e) => {
                if let Some(job_id) = &new_job {
                    self.discard_job(job_id).await;
                }
                Err(e)
            }
        }
    }

    /// Cancel the post's outstanding job, then remove the post and its outcome log.
    ///
    /// A job that already ran is not an error; a handler that fires later
    /// finds no post and the job is dead-lettered.
    pub async fn delete_post(&self, id: &str, owner_id: &str) -> Result<()> {
        let post = self.owned_post(id, owner_id).await?;

        if let Some(job_id) = &post.job_id {
            let cancelled = self.queue.cancel(job_id).await?;
            if !cancelled {
                debug!(post_id = %id, job_id = %job_id, "Job already started or gone; deleting anyway");
            }
        }

        if !self.db.delete_post(id).await? {
            return Err(CastError::NotFound(format!("Post {}", id)));
        }
        info!(post_id = %id, "Deleted post");
        Ok(())
    }

    /// Publish right away through an elevated-priority job.
    ///
    /// The post is left `publishing` with the new job handle; the handler
    /// settles it to `published` or `failed`.
    pub async fn publish_now(&self, id: &str, owner_id: &str) -> Result<Post> {
        let current = self.owned_post(id, owner_id).await?;
        match current.status {
            PostStatus::Published => {
                return Err(CastError::Validation(format!("Post {} is already published", id)))
            }
            PostStatus::Publishing => {
                return Err(CastError::Conflict(format!("Post {} is already being published", id)))
            }
            _ => {}
        }

        self.retire_job(&current).await?;

        let job_id = JobQueue::new_job_id();
        let mut post = current.clone();
        post.status = PostStatus::Publishing;
        post.scheduled_at = None;
        post.job_id = Some(job_id.clone());
        post.updated_at = Utc::now().timestamp();

        // The post must point at the job before a worker can claim it.
        if !self
            .db
            .replace_post(&post, current.status, current.job_id.as_deref())
            .await?
        {
            return Err(CastError::Conflict(format!(
                "Post {} changed while it was being queued",
                id
            )));
        }

        if let Err(e) = self
            .queue
            .enqueue_immediate(&job_id, &post.job_payload(true))
            .await
        {
            let mut restored = current.clone();
            restored.job_id = None;
            restored.scheduled_at = None;
            if restored.status == PostStatus::Scheduled {
                restored.status = PostStatus::Draft;
            }
            restored.updated_at = Utc::now().timestamp();
            if let Err(revert) = self
                .db
                .replace_post(&restored, PostStatus::Publishing, Some(&job_id))
                .await
            {
                warn!(post_id = %id, error = %revert, "Failed to restore post after enqueue error");
            }
            return Err(e);
        }

        info!(post_id = %id, job_id = %job_id, "Queued immediate publish");
        Ok(post)
    }

    pub async fn get_post(&self, id: &str, owner_id: &str) -> Result<PostWithOutcomes> {
        let post = self.owned_post(id, owner_id).await?;
        let outcomes = self.db.get_outcomes(&post.id).await?;
        Ok(PostWithOutcomes { post, outcomes })
    }

    pub async fn list_posts(
        &self,
        owner_id: &str,
        status: Option<PostStatus>,
        limit: usize,
    ) -> Result<Vec<Post>> {
        self.db.list_posts(owner_id, status, limit).await
    }

    /// Never fails: an unreachable queue reports all zeros
    pub async fn queue_stats(&self) -> QueueStats {
        self.queue.stats().await
    }

    /// Give a dead-lettered job a fresh attempt budget and re-link its post.
    pub async fn requeue_dead(&self, job_id: &str) -> Result<()> {
        let job = self
            .queue
            .get(job_id)
            .await?
            .ok_or_else(|| CastError::NotFound(format!("Job {}", job_id)))?;
        if job.state != JobState::Dead {
            return Err(CastError::Validation(format!(
                "Job {} is {}, only dead jobs can be requeued",
                job_id,
                job.state.as_str()
            )));
        }
        if self.db.get_post(&job.post_id).await?.is_none() {
            return Err(CastError::NotFound(format!("Post {}", job.post_id)));
        }

        if !self.db.attach_job(&job.post_id, job_id).await? {
            return Err(CastError::Conflict(format!(
                "Post {} is no longer failed or already has a job",
                job.post_id
            )));
        }
        if !self.queue.requeue_dead(job_id).await? {
            self.db.release_job_handle(&job.post_id, job_id).await?;
            return Err(CastError::Conflict(format!("Job {} changed state", job_id)));
        }

        info!(job_id, post_id = %job.post_id, "Requeued dead job");
        Ok(())
    }

    async fn owned_post(&self, id: &str, owner_id: &str) -> Result<Post> {
        self.db
            .get_owned_post(id, owner_id)
            .await?
            .ok_or_else(|| CastError::NotFound(format!("Post {}", id)))
    }

    fn validate(&self, content: &str, platforms: &[PlatformId], media_url: Option<&str>) -> Result<()> {
        self.validation
            .validate(&ValidationRequest {
                content: content.to_string(),
                platforms: platforms.to_vec(),
                media_url: media_url.map(str::to_string),
            })
            .into_result()
    }

    async fn ensure_credentials(&self, owner_id: &str, platforms: &[PlatformId]) -> Result<()> {
        let mut missing = Vec::new();
        for platform in platforms {
            if self
                .credentials
                .find_active_credential(owner_id, *platform)
                .await?
                .is_none()
            {
                missing.push(platform.to_string());
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(CastError::NoCredential(missing))
        }
    }

    /// Cancel the post's current job before its handle is replaced.
    ///
    /// A job that is already running cannot be taken back, so that is a
    /// conflict. A job that finished or was dead-lettered is simply dropped.
    async fn retire_job(&self, post: &Post) -> Result<()> {
        let Some(job_id) = &post.job_id else {
            return Ok(());
        };
        if self.queue.cancel(job_id).await? {
            return Ok(());
        }

        match self.queue.get(job_id).await? {
            Some(job) if job.state == JobState::Active => Err(CastError::Conflict(format!(
                "Post {} is being published",
                post.id
            ))),
            _ => Ok(()),
        }
    }

    async fn discard_job(&self, job_id: &str) {
        if let Err(e) = self.queue.cancel(job_id).await {
            warn!(job_id, error = %e, "Failed to cancel orphaned job");
        }
    }
}

fn ensure_future(at: DateTime<Utc>) -> Result<()> {
    if at <= Utc::now() {
        return Err(CastError::Validation(format!(
            "Scheduled time must be in the future (got {})",
            at.to_rfc3339()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::credentials::{NewCredential, SqliteCredentialStore};
    use chrono::Duration;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, Database, JobQueue, PostService) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("posts.db");
        let db = Database::new(path.to_str().unwrap()).await.unwrap();
        let store = SqliteCredentialStore::new(db.clone());
        for platform in [PlatformId::Twitter, PlatformId::LinkedIn] {
            store
                .upsert_credential(NewCredential::bearer("alice", platform, "token"))
                .await
                .unwrap();
        }
        let queue = JobQueue::new(db.clone(), &QueueConfig::default());
        let service = PostService::new(
            db.clone(),
            queue.clone(),
            Arc::new(store),
            ValidationService::new(),
        );
        (dir, db, queue, service)
    }

    #[tokio::test]
    async fn test_create_draft() {
        let (_dir, db, _queue, service) = setup().await;
        let post = service
            .create_post(NewPost::new("alice", "Hello world", vec![PlatformId::Twitter]))
            .await
            .unwrap();

        assert_eq!(post.status, PostStatus::Draft);
        assert!(post.job_id.is_none());
        assert_eq!(db.get_post(&post.id).await.unwrap().unwrap(), post);
    }

    #[tokio::test]
    async fn test_create_names_missing_credentials() {
        let (_dir, _db, _queue, service) = setup().await;
        let err = service
            .create_post(NewPost::new(
                "alice",
                "hi",
                vec![PlatformId::Twitter, PlatformId::Instagram],
            ))
            .await
            .unwrap_err();

        match err {
            CastError::NoCredential(missing) => assert_eq!(missing, vec!["instagram"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_update_rejects_published() {
        let (_dir, db, _queue, service) = setup().await;
        let mut post = service
            .create_post(NewPost::new("alice", "hi", vec![PlatformId::Twitter]))
            .await
            .unwrap();
        post.status = PostStatus::Published;
        assert!(db.replace_post(&post, PostStatus::Draft, None).await.unwrap());

        let err = service
            .update_post(
                &post.id,
                "alice",
                PostUpdate {
                    content: Some("edited".to_string()),
                    ..PostUpdate::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CastError::Validation(_)));
    }

    #[tokio::test]
    async fn test_clear_schedule_reverts_to_draft() {
        let (_dir, _db, queue, service) = setup().await;
        let mut request = NewPost::new("alice", "later", vec![PlatformId::LinkedIn]);
        request.scheduled_at = Some(Utc::now() + Duration::hours(1));
        let post = service.create_post(request).await.unwrap();
        let job_id = post.job_id.clone().unwrap();

        let updated = service
            .update_post(
                &post.id,
                "alice",
                PostUpdate {
                    scheduled_at: Some(None),
                    ..PostUpdate::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.status, PostStatus::Draft);
        assert!(updated.job_id.is_none());
        assert!(updated.scheduled_at.is_none());
        assert!(queue.get(&job_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_other_owner_sees_not_found() {
        let (_dir, _db, _queue, service) = setup().await;
        let post = service
            .create_post(NewPost::new("alice", "mine", vec![PlatformId::Twitter]))
            .await
            .unwrap();

        assert!(matches!(
            service.get_post(&post.id, "mallory").await,
            Err(CastError::NotFound(_))
        ));
        assert!(matches!(
            service.delete_post(&post.id, "mallory").await,
            Err(CastError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_publish_now_marks_publishing() {
        let (_dir, _db, queue, service) = setup().await;
        let post = service
            .create_post(NewPost::new("alice", "now", vec![PlatformId::Twitter]))
            .await
            .unwrap();

        let queued = service.publish_now(&post.id, "alice").await.unwrap();
        assert_eq!(queued.status, PostStatus::Publishing);

        let job = queue.get(queued.job_id.as_deref().unwrap()).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert!(job.payload.immediate);

        let err = service.publish_now(&post.id, "alice").await.unwrap_err();
        assert!(matches!(err, CastError::Conflict(_)));
    }
}
