//! Content validation service
//!
//! Checks a post against its target platforms before anything is stored or
//! queued, including character limits, content size, media URL shape and
//! empty content checks.

use serde::Serialize;

use crate::error::{CastError, Result};
use crate::platforms::character_limit;
use crate::types::PlatformId;

/// Maximum content size in bytes (64KB)
pub const MAX_CONTENT_LENGTH: usize = 64 * 1024;

/// Service for validating content against platform requirements
///
/// # Example
///
/// ```
/// use libcastline::service::validation::{ValidationRequest, ValidationService};
/// use libcastline::PlatformId;
///
/// let service = ValidationService::new();
/// let response = service.validate(&ValidationRequest {
///     content: "Hello world".to_string(),
///     platforms: vec![PlatformId::Twitter, PlatformId::Instagram],
///     media_url: None,
/// });
///
/// assert!(response.valid);
/// // Instagram without media is only a warning
/// assert!(!response.results[1].warnings.is_empty());
/// ```
#[derive(Clone, Default)]
pub struct ValidationService;

#[derive(Debug, Clone)]
pub struct ValidationRequest {
    pub content: String,
    pub platforms: Vec<PlatformId>,
    pub media_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationResponse {
    /// Whether content is valid for all requested platforms
    pub valid: bool,
    /// Problems not tied to one platform (empty content, bad media URL)
    pub errors: Vec<String>,
    pub results: Vec<PlatformValidation>,
}

impl ValidationResponse {
    /// Collapse into a single `CastError::Validation` listing every error
    pub fn into_result(self) -> Result<()> {
        if self.valid {
            return Ok(());
        }

        let mut messages = self.errors;
        for result in self.results {
            for error in result.errors {
                messages.push(format!("{}: {}", result.platform, error));
            }
        }
        Err(CastError::Validation(messages.join("; ")))
    }
}

/// Validation result for a single platform
#[derive(Debug, Clone, Serialize)]
pub struct PlatformValidation {
    pub platform: PlatformId,
    pub valid: bool,
    pub errors: Vec<String>,
    /// Non-blocking
    pub warnings: Vec<String>,
}

impl ValidationService {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, request: &ValidationRequest) -> ValidationResponse {
        let mut errors = Vec::new();

        if request.platforms.is_empty() {
            errors.push("At least one platform is required".to_string());
        }
        if request.content.trim().is_empty() {
            errors.push("Content cannot be empty".to_string());
        }
        if request.content.len() > MAX_CONTENT_LENGTH {
            errors.push(format!(
                "Content exceeds maximum size of {} bytes",
                MAX_CONTENT_LENGTH
            ));
        }
        if let Some(url) = &request.media_url {
            if let Err(e) = validate_media_url(url) {
                errors.push(e);
            }
        }

        let results: Vec<PlatformValidation> = request
            .platforms
            .iter()
            .map(|platform| self.validate_for_platform(request, *platform))
            .collect();

        ValidationResponse {
            valid: errors.is_empty() && results.iter().all(|r| r.valid),
            errors,
            results,
        }
    }

    fn validate_for_platform(
        &self,
        request: &ValidationRequest,
        platform: PlatformId,
    ) -> PlatformValidation {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if let Some(limit) = character_limit(platform) {
            let chars = request.content.chars().count();
            if chars > limit {
                errors.push(format!(
                    "Content is {} characters, limit is {}",
                    chars, limit
                ));
            }
        }

        if platform == PlatformId::Instagram && request.media_url.is_none() {
            warnings.push("Instagram requires an image; publishing will fail without media".to_string());
        }
        if platform == PlatformId::Twitter && request.media_url.is_some() {
            warnings.push("Media is not attached to tweets; only the text is posted".to_string());
        }

        PlatformValidation {
            platform,
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

fn validate_media_url(url: &str) -> std::result::Result<(), String> {
    let trimmed = url.trim();
    let rest = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"));

    match rest {
        Some(host_and_path) if !host_and_path.is_empty() && !host_and_path.starts_with('/') => {
            if trimmed.chars().any(char::is_whitespace) {
                Err(format!("Media URL must not contain whitespace: {}", url))
            } else {
                Ok(())
            }
        }
        _ => Err(format!("Media URL must be an absolute http(s) URL: {}", url)),
    }
}
