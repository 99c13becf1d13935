//! Twitter (X) adapter: API v2 `POST /2/tweets`

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;

use super::{decode, normalize_base, send_json, PublishResult, Publisher};
use crate::credentials::Credential;
use crate::types::PlatformId;

pub struct TwitterPublisher {
    http: Client,
    api_base: String,
}

impl TwitterPublisher {
    pub fn new(http: Client, api_base: &str) -> Self {
        Self {
            http,
            api_base: normalize_base(api_base),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TweetResponseWrapper {
    data: TweetResponse,
}

#[derive(Debug, Deserialize)]
struct TweetResponse {
    id: String,
}

#[async_trait]
impl Publisher for TwitterPublisher {
    fn platform(&self) -> PlatformId {
        PlatformId::Twitter
    }

    async fn publish(
        &self,
        content: &str,
        media_url: Option<&str>,
        credential: &Credential,
    ) -> PublishResult {
        if media_url.is_some() {
            // Media upload is not supported; the tweet goes out as text only.
            tracing::debug!(platform = "twitter", "Media URL not attached to tweet");
        }

        let url = format!("{}/2/tweets", self.api_base);
        let body = serde_json::json!({ "text": content });

        let request = self
            .http
            .post(&url)
            .bearer_auth(credential.access_token.expose_secret())
            .json(&body);

        let (_, body) = send_json(PlatformId::Twitter, request).await?;
        let wrapper: TweetResponseWrapper = decode(PlatformId::Twitter, body)?;
        Ok(wrapper.data.id)
    }
}
