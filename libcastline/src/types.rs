//! Core types for Castline

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{CastError, Result};

/// An external social network Castline can publish to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum PlatformId {
    Twitter,
    LinkedIn,
    Instagram,
}

impl PlatformId {
    pub const ALL: [PlatformId; 3] = [
        PlatformId::Twitter,
        PlatformId::LinkedIn,
        PlatformId::Instagram,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformId::Twitter => "twitter",
            PlatformId::LinkedIn => "linkedin",
            PlatformId::Instagram => "instagram",
        }
    }
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformId {
    type Err = CastError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "twitter" => Ok(PlatformId::Twitter),
            "linkedin" => Ok(PlatformId::LinkedIn),
            "instagram" => Ok(PlatformId::Instagram),
            other => Err(CastError::Validation(format!(
                "Unknown platform '{}'. Valid platforms: twitter, linkedin, instagram",
                other
            ))),
        }
    }
}

/// Parse a comma-separated platform list such as `"twitter,linkedin"`.
///
/// Duplicates collapse to their first occurrence. An empty list is an error.
pub fn parse_platform_list(input: &str) -> Result<Vec<PlatformId>> {
    let parsed = input
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(PlatformId::from_str)
        .collect::<Result<Vec<_>>>()?;

    let platforms = normalize_platforms(parsed);
    if platforms.is_empty() {
        return Err(CastError::Validation(
            "At least one platform is required".to_string(),
        ));
    }
    Ok(platforms)
}

/// Collapse duplicate platforms, keeping first-seen order.
pub fn normalize_platforms(platforms: Vec<PlatformId>) -> Vec<PlatformId> {
    let mut seen = Vec::with_capacity(platforms.len());
    for platform in platforms {
        if !seen.contains(&platform) {
            seen.push(platform);
        }
    }
    seen
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Draft,
    Scheduled,
    /// Transient: a publication job has been claimed or enqueued for immediate run.
    Publishing,
    Published,
    Failed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Scheduled => "scheduled",
            PostStatus::Publishing => "publishing",
            PostStatus::Published => "published",
            PostStatus::Failed => "failed",
        }
    }

    /// Statuses from which a publication attempt may start.
    pub fn awaits_publication(&self) -> bool {
        matches!(
            self,
            PostStatus::Scheduled | PostStatus::Publishing | PostStatus::Failed
        )
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostStatus {
    type Err = CastError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(PostStatus::Draft),
            "scheduled" => Ok(PostStatus::Scheduled),
            "publishing" => Ok(PostStatus::Publishing),
            "published" => Ok(PostStatus::Published),
            "failed" => Ok(PostStatus::Failed),
            other => Err(CastError::Validation(format!(
                "Unknown post status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Post {
    pub id: String,
    pub owner_id: String,
    pub content: String,
    pub media_url: Option<String>,
    pub ai_metadata: Option<serde_json::Value>,
    pub platforms: Vec<PlatformId>,
    pub scheduled_at: Option<i64>,
    pub status: PostStatus,
    pub job_id: Option<String>,
    pub retry_count: i64,
    pub published_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Post {
    pub fn new(owner_id: String, content: String, platforms: Vec<PlatformId>) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id,
            content,
            media_url: None,
            ai_metadata: None,
            platforms: normalize_platforms(platforms),
            scheduled_at: None,
            status: PostStatus::Draft,
            job_id: None,
            retry_count: 0,
            published_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Snapshot of what a publication job will deliver.
    pub fn job_payload(&self, immediate: bool) -> JobPayload {
        JobPayload {
            post_id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            content: self.content.clone(),
            media_url: self.media_url.clone(),
            platforms: self.platforms.clone(),
            immediate,
        }
    }
}

/// One platform's result for one publication attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PostOutcome {
    pub id: Option<i64>,
    pub post_id: String,
    pub attempt: i64,
    pub platform: PlatformId,
    pub success: bool,
    pub external_id: Option<String>,
    pub error_message: Option<String>,
    pub recorded_at: i64,
}

/// Settled result of one adapter call, before it is written to the outcome log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlatformResult {
    pub platform: PlatformId,
    pub success: bool,
    pub external_id: Option<String>,
    pub error: Option<String>,
}

impl PlatformResult {
    pub fn succeeded(platform: PlatformId, external_id: String) -> Self {
        Self {
            platform,
            success: true,
            external_id: Some(external_id),
            error: None,
        }
    }

    pub fn failed(platform: PlatformId, reason: impl Into<String>) -> Self {
        Self {
            platform,
            success: false,
            external_id: None,
            error: Some(reason.into()),
        }
    }
}

/// Payload carried by a scheduled job, captured when the job is registered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobPayload {
    pub post_id: String,
    pub owner_id: String,
    pub content: String,
    pub media_url: Option<String>,
    pub platforms: Vec<PlatformId>,
    #[serde(default)]
    pub immediate: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStats {
    /// Pending jobs whose fire time has passed
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    /// Dead-lettered jobs
    pub failed: u64,
    /// Pending jobs whose fire time is still ahead
    pub delayed: u64,
}
