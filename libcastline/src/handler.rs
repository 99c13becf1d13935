//! Publication handler
//!
//! Runs once per claimed job: checks the post still wants this job,
//! publishes to every target platform concurrently, then writes the
//! aggregate result and all outcome entries in one transaction.
//!
//! Platform failures never escape as errors. Each becomes a failed outcome
//! entry, and the aggregate decides the post's status: one success is
//! enough for `published`. Only store failures are returned as `Err`, so
//! the worker can hand them to the queue's retry policy.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::credentials::CredentialStore;
use crate::db::{Database, RecordOutcome};
use crate::error::{PlatformError, Result};
use crate::platforms::PublisherRegistry;
use crate::queue::Job;
use crate::service::events::{Event, EventBus};
use crate::types::{JobPayload, PlatformId, PlatformResult, PostStatus};

pub const NO_ACTIVE_ACCOUNT: &str = "no active account";

/// Itemized result of one publication attempt
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PublishReport {
    pub post_id: String,
    pub job_id: String,
    pub attempt: i64,
    pub status: PostStatus,
    pub results: Vec<PlatformResult>,
}

impl PublishReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    /// One-line reason used when the whole attempt failed
    pub fn failure_summary(&self) -> String {
        self.results
            .iter()
            .filter(|r| !r.success)
            .map(|r| format!("{}: {}", r.platform, r.error.as_deref().unwrap_or("unknown error")))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Post is in a status that does not accept publication (draft, published)
    NotAwaiting(PostStatus),
    /// Post now belongs to a different job, or none
    Superseded,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    /// At least one platform succeeded
    Published(PublishReport),
    /// Every platform failed
    Failed(PublishReport),
    /// Guards rejected the job; nothing was called or written
    Skipped(SkipReason),
    /// The post no longer exists
    PostMissing,
}

#[derive(Clone)]
pub struct PublicationHandler {
    db: Database,
    credentials: Arc<dyn CredentialStore>,
    publishers: PublisherRegistry,
    adapter_timeout: Duration,
    events: EventBus,
}

impl PublicationHandler {
    pub fn new(
        db: Database,
        credentials: Arc<dyn CredentialStore>,
        publishers: PublisherRegistry,
        adapter_timeout: Duration,
        events: EventBus,
    ) -> Self {
        Self {
            db,
            credentials,
            publishers,
            adapter_timeout,
            events,
        }
    }

    pub fn publishers(&self) -> &PublisherRegistry {
        &self.publishers
    }

    pub async fn handle(&self, job: &Job) -> Result<HandlerOutcome> {
        let Some(post) = self.db.get_post(&job.post_id).await? else {
            warn!(job_id = %job.id, post_id = %job.post_id, "Post no longer exists");
            return Ok(HandlerOutcome::PostMissing);
        };

        if post.job_id.as_deref() != Some(job.id.as_str()) {
            debug!(job_id = %job.id, post_id = %post.id, "Job superseded, skipping");
            return Ok(HandlerOutcome::Skipped(SkipReason::Superseded));
        }
        if !post.status.awaits_publication() {
            debug!(job_id = %job.id, post_id = %post.id, status = %post.status, "Post not awaiting publication");
            return Ok(HandlerOutcome::Skipped(SkipReason::NotAwaiting(post.status)));
        }

        if !self.db.mark_publishing(&post.id, &job.id).await? {
            debug!(job_id = %job.id, post_id = %post.id, "Lost race to mark publishing");
            return Ok(HandlerOutcome::Skipped(SkipReason::Superseded));
        }

        let payload = &job.payload;
        info!(
            job_id = %job.id,
            post_id = %post.id,
            platforms = payload.platforms.len(),
            attempt = job.attempts,
            "Publishing post"
        );
        self.events.emit(Event::PublishStarted {
            post_id: post.id.clone(),
            job_id: job.id.clone(),
            platforms: payload.platforms.iter().map(|p| p.to_string()).collect(),
        });

        let futures = payload
            .platforms
            .iter()
            .map(|platform| self.publish_one(*platform, payload));
        let results: Vec<PlatformResult> = join_all(futures).await;

        let recorded = self.db.record_publication(&post.id, &job.id, &results).await?;
        let attempt = match recorded {
            RecordOutcome::Recorded(attempt) => attempt,
            RecordOutcome::PostMissing => {
                warn!(job_id = %job.id, post_id = %post.id, "Post deleted during publication");
                return Ok(HandlerOutcome::PostMissing);
            }
            RecordOutcome::Superseded => {
                warn!(job_id = %job.id, post_id = %post.id, "Post superseded during publication, results discarded");
                return Ok(HandlerOutcome::Skipped(SkipReason::Superseded));
            }
        };

        let any_success = results.iter().any(|r| r.success);
        let report = PublishReport {
            post_id: post.id.clone(),
            job_id: job.id.clone(),
            attempt,
            status: if any_success {
                PostStatus::Published
            } else {
                PostStatus::Failed
            },
            results,
        };

        if any_success {
            info!(
                post_id = %report.post_id,
                attempt,
                succeeded = report.succeeded(),
                failed = report.failed(),
                "Post published"
            );
            self.events.emit(Event::PublishCompleted {
                post_id: report.post_id.clone(),
                attempt,
                results: report.results.clone(),
            });
            Ok(HandlerOutcome::Published(report))
        } else {
            warn!(
                post_id = %report.post_id,
                attempt,
                reason = %report.failure_summary(),
                "All platforms failed"
            );
            self.events.emit(Event::PublishFailed {
                post_id: report.post_id.clone(),
                attempt,
                results: report.results.clone(),
            });
            Ok(HandlerOutcome::Failed(report))
        }
    }

    async fn publish_one(&self, platform: PlatformId, payload: &JobPayload) -> PlatformResult {
        let result = self.try_publish(platform, payload).await;

        if let Some(reason) = &result.error {
            warn!(post_id = %payload.post_id, platform = %platform, reason = %reason, "Platform publish failed");
        } else {
            debug!(post_id = %payload.post_id, platform = %platform, "Platform publish succeeded");
        }

        self.events.emit(Event::PlatformSettled {
            post_id: payload.post_id.clone(),
            result: result.clone(),
        });
        result
    }

    async fn try_publish(&self, platform: PlatformId, payload: &JobPayload) -> PlatformResult {
        let credential = match self
            .credentials
            .find_active_credential(&payload.owner_id, platform)
            .await
        {
            Ok(Some(credential)) => credential,
            Ok(None) => return PlatformResult::failed(platform, NO_ACTIVE_ACCOUNT),
            Err(e) => {
                return PlatformResult::failed(platform, format!("credential lookup failed: {}", e))
            }
        };

        let Some(publisher) = self.publishers.get(platform) else {
            return PlatformResult::failed(platform, format!("no publisher configured for {}", platform));
        };

        let call = publisher.publish(&payload.content, payload.media_url.as_deref(), &credential);
        match tokio::time::timeout(self.adapter_timeout, call).await {
            Ok(Ok(external_id)) => PlatformResult::succeeded(platform, external_id),
            Ok(Err(e)) => PlatformResult::failed(platform, e.to_string()),
            Err(_) => PlatformResult::failed(
                platform,
                PlatformError::Timeout(self.adapter_timeout.as_millis() as u64).to_string(),
            ),
        }
    }
}
