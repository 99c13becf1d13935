//! Mock publisher for testing
//!
//! A configurable stand-in for a platform adapter that can simulate
//! successes, failures and slow responses. Used by integration tests and by
//! `cast-send --dry-run` to exercise the pipeline without network access.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use crate::credentials::Credential;
use crate::error::PlatformError;
use crate::platforms::{PublishResult, Publisher};
use crate::types::PlatformId;

/// Configuration for mock publisher behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub platform: PlatformId,

    /// Error to return instead of publishing
    pub error: Option<PlatformError>,

    /// Delay before completing (simulates network latency)
    pub delay: Duration,

    /// Number of times publish has been called
    pub call_count: Arc<AtomicUsize>,

    /// Content that has been published (for verification)
    pub published_content: Arc<Mutex<Vec<String>>>,
}

impl MockConfig {
    pub fn new(platform: PlatformId) -> Self {
        Self {
            platform,
            error: None,
            delay: Duration::from_millis(0),
            call_count: Arc::new(AtomicUsize::new(0)),
            published_content: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

/// Mock publisher for testing
#[derive(Debug, Clone)]
pub struct MockPublisher {
    config: MockConfig,
}

impl MockPublisher {
    pub fn new(config: MockConfig) -> Self {
        Self { config }
    }

    /// A publisher that always succeeds
    pub fn success(platform: PlatformId) -> Self {
        Self::new(MockConfig::new(platform))
    }

    /// A publisher that always fails with `error`
    pub fn failure(platform: PlatformId, error: PlatformError) -> Self {
        Self::new(MockConfig {
            error: Some(error),
            ..MockConfig::new(platform)
        })
    }

    /// A publisher that succeeds after `delay`
    pub fn with_delay(platform: PlatformId, delay: Duration) -> Self {
        Self::new(MockConfig {
            delay,
            ..MockConfig::new(platform)
        })
    }

    pub fn call_count(&self) -> usize {
        self.config.call_count.load(Ordering::SeqCst)
    }

    pub fn published_content(&self) -> Vec<String> {
        self.config
            .published_content
            .lock()
            .map(|content| content.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    fn platform(&self) -> PlatformId {
        self.config.platform
    }

    async fn publish(
        &self,
        content: &str,
        _media_url: Option<&str>,
        _credential: &Credential,
    ) -> PublishResult {
        let call = self.config.call_count.fetch_add(1, Ordering::SeqCst) + 1;

        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }

        if let Some(error) = &self.config.error {
            return Err(error.clone());
        }

        if let Ok(mut published) = self.config.published_content.lock() {
            published.push(content.to_string());
        }

        Ok(format!("mock-{}-{}", self.config.platform, call))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn credential(platform: PlatformId) -> Credential {
        Credential {
            user_id: "u1".to_string(),
            platform,
            access_token: SecretString::from("t".to_string()),
            refresh_token: None,
            expires_at: None,
            external_account_id: None,
        }
    }

    #[tokio::test]
    async fn test_success_records_content() {
        let mock = MockPublisher::success(PlatformId::Twitter);
        let id = mock
            .publish("hello", None, &credential(PlatformId::Twitter))
            .await
            .unwrap();
        assert_eq!(id, "mock-twitter-1");
        assert_eq!(mock.call_count(), 1);
        assert_eq!(mock.published_content(), vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn test_failure_returns_configured_error() {
        let mock = MockPublisher::failure(
            PlatformId::LinkedIn,
            PlatformError::RateLimit("slow down".to_string()),
        );
        let err = mock
            .publish("hello", None, &credential(PlatformId::LinkedIn))
            .await
            .unwrap_err();
        assert_eq!(err, PlatformError::RateLimit("slow down".to_string()));
        assert_eq!(mock.call_count(), 1);
        assert!(mock.published_content().is_empty());
    }

    #[tokio::test]
    async fn test_clones_share_counters() {
        let mock = MockPublisher::success(PlatformId::Instagram);
        let clone = mock.clone();
        clone
            .publish("x", Some("https://img"), &credential(PlatformId::Instagram))
            .await
            .unwrap();
        assert_eq!(mock.call_count(), 1);
    }
}
