//! Platform publisher adapters
//!
//! Every supported network is reached through one capability: publish a text
//! body (with an optional media URL) using the owner's credential and return
//! the platform's id for the new post. Adapters are looked up by
//! [`PlatformId`] in a [`PublisherRegistry`]; they share no state.
//!
//! # Examples
//!
//! ```no_run
//! use libcastline::config::PlatformsConfig;
//! use libcastline::platforms::PublisherRegistry;
//! use libcastline::PlatformId;
//!
//! # fn example() -> libcastline::Result<()> {
//! let registry = PublisherRegistry::from_config(&PlatformsConfig::default())?;
//! if let Some(publisher) = registry.get(PlatformId::Twitter) {
//!     println!("{} accepts {:?} characters", publisher.platform(), publisher.character_limit());
//! }
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::PlatformsConfig;
use crate::credentials::Credential;
use crate::error::{ConfigError, PlatformError, Result};
use crate::types::PlatformId;

pub mod instagram;
pub mod linkedin;
pub mod twitter;

// Mock publisher is available for all builds (not just tests) to support integration tests
pub mod mock;

/// Result type for adapter calls; adapters only ever fail with [`PlatformError`].
pub type PublishResult = std::result::Result<String, PlatformError>;

/// Uniform publishing capability implemented once per platform.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// The platform this adapter publishes to
    fn platform(&self) -> PlatformId;

    /// Publish `content` for the credential's owner
    ///
    /// # Returns
    ///
    /// The platform-side id of the created post (tweet id, share URN, media id)
    ///
    /// # Errors
    ///
    /// - `PlatformError::Authentication` when the token is rejected (401/403)
    /// - `PlatformError::RateLimit` on 429
    /// - `PlatformError::Validation` when the platform rejects the request or a
    ///   local precondition (such as required media) is unmet
    /// - `PlatformError::Network` on transport failures
    /// - `PlatformError::Posting` for any other non-success response
    async fn publish(
        &self,
        content: &str,
        media_url: Option<&str>,
        credential: &Credential,
    ) -> PublishResult;

    /// Maximum characters per post, or `None` if there is no hard limit
    fn character_limit(&self) -> Option<usize> {
        character_limit(self.platform())
    }
}

/// Published character limit for a platform
pub fn character_limit(platform: PlatformId) -> Option<usize> {
    match platform {
        PlatformId::Twitter => Some(280),
        PlatformId::LinkedIn => Some(3000),
        PlatformId::Instagram => Some(2200),
    }
}

/// Platform-keyed adapter lookup
#[derive(Clone, Default)]
pub struct PublisherRegistry {
    publishers: HashMap<PlatformId, Arc<dyn Publisher>>,
}

impl PublisherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build HTTP adapters for every enabled platform, sharing one client
    pub fn from_config(config: &PlatformsConfig) -> Result<Self> {
        let client = http_client()?;
        let mut registry = Self::new();

        if config.twitter.enabled {
            registry.register(Arc::new(twitter::TwitterPublisher::new(
                client.clone(),
                &config.twitter.api_base,
            )));
        }
        if config.linkedin.enabled {
            registry.register(Arc::new(linkedin::LinkedInPublisher::new(
                client.clone(),
                &config.linkedin.api_base,
            )));
        }
        if config.instagram.enabled {
            registry.register(Arc::new(instagram::InstagramPublisher::new(
                client,
                &config.instagram.api_base,
            )));
        }

        Ok(registry)
    }

    /// Register (or replace) the adapter for its platform
    pub fn register(&mut self, publisher: Arc<dyn Publisher>) {
        self.publishers.insert(publisher.platform(), publisher);
    }

    pub fn with(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.register(publisher);
        self
    }

    pub fn get(&self, platform: PlatformId) -> Option<Arc<dyn Publisher>> {
        self.publishers.get(&platform).cloned()
    }

    pub fn platforms(&self) -> Vec<PlatformId> {
        let mut platforms: Vec<_> = self.publishers.keys().copied().collect();
        platforms.sort();
        platforms
    }
}

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("castline/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| ConfigError::Invalid(format!("HTTP client: {}", e)).into())
}

/// Trim a trailing slash so `format!("{}/path", base)` never doubles it
pub(crate) fn normalize_base(api_base: &str) -> String {
    api_base.trim_end_matches('/').to_string()
}

/// Map a non-success HTTP response to a platform error
pub(crate) fn map_http_status(platform: PlatformId, status: u16, body: &str) -> PlatformError {
    let detail = summarize_body(body);
    match status {
        401 | 403 => PlatformError::Authentication(format!(
            "{} rejected the access token ({}): {}",
            platform, status, detail
        )),
        429 => PlatformError::RateLimit(format!("{} returned 429: {}", platform, detail)),
        400 | 422 => PlatformError::Validation(format!(
            "{} rejected the request ({}): {}",
            platform, status, detail
        )),
        _ => PlatformError::Posting(format!("{} returned {}: {}", platform, status, detail)),
    }
}

/// Map a transport-level failure (connect, DNS, decode) to a platform error
pub(crate) fn map_transport_error(platform: PlatformId, error: reqwest::Error) -> PlatformError {
    PlatformError::Network(format!("{} request failed: {}", platform, error))
}

fn summarize_body(body: &str) -> String {
    const MAX: usize = 200;
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }
    if trimmed.chars().count() > MAX {
        let cut: String = trimmed.chars().take(MAX).collect();
        format!("{}...", cut)
    } else {
        trimmed.to_string()
    }
}

/// Send a prepared request and decode its JSON body, mapping every failure.
pub(crate) async fn send_json(
    platform: PlatformId,
    request: reqwest::RequestBuilder,
) -> std::result::Result<(reqwest::header::HeaderMap, serde_json::Value), PlatformError> {
    let response = request
        .send()
        .await
        .map_err(|e| map_transport_error(platform, e))?;

    let status = response.status();
    let headers = response.headers().clone();
    let text = response
        .text()
        .await
        .map_err(|e| map_transport_error(platform, e))?;

    if !status.is_success() {
        return Err(map_http_status(platform, status.as_u16(), &text));
    }

    if text.trim().is_empty() {
        return Ok((headers, serde_json::Value::Null));
    }

    let body = serde_json::from_str(&text).map_err(|e| {
        PlatformError::Posting(format!("{} returned an unreadable body: {}", platform, e))
    })?;
    Ok((headers, body))
}

/// Decode a success body into the adapter's response type
pub(crate) fn decode<T: serde::de::DeserializeOwned>(
    platform: PlatformId,
    body: serde_json::Value,
) -> std::result::Result<T, PlatformError> {
    serde_json::from_value(body).map_err(|e| {
        PlatformError::Posting(format!("{} response missing expected fields: {}", platform, e))
    })
}
