//! Instagram adapter: Graph API two-step container publish
//!
//! Instagram only accepts posts with an image, so a post without media
//! fails before any request is made.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;

use super::{decode, normalize_base, send_json, PublishResult, Publisher};
use crate::credentials::Credential;
use crate::error::PlatformError;
use crate::types::PlatformId;

pub const MEDIA_REQUIRED: &str = "Instagram requires an image: no media attached to this post";

pub struct InstagramPublisher {
    http: Client,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct GraphId {
    id: String,
}

impl InstagramPublisher {
    pub fn new(http: Client, api_base: &str) -> Self {
        Self {
            http,
            api_base: normalize_base(api_base),
        }
    }

    async fn resolve_user_id(&self, credential: &Credential) -> Result<String, PlatformError> {
        if let Some(id) = &credential.external_account_id {
            return Ok(id.clone());
        }

        let request = self
            .http
            .get(format!("{}/me", self.api_base))
            .query(&[("fields", "id")])
            .bearer_auth(credential.access_token.expose_secret());

        let (_, body) = send_json(PlatformId::Instagram, request).await?;
        let me: GraphId = decode(PlatformId::Instagram, body)?;
        Ok(me.id)
    }
}

#[async_trait]
impl Publisher for InstagramPublisher {
    fn platform(&self) -> PlatformId {
        PlatformId::Instagram
    }

    async fn publish(
        &self,
        content: &str,
        media_url: Option<&str>,
        credential: &Credential,
    ) -> PublishResult {
        let image_url = match media_url.map(str::trim) {
            Some(url) if !url.is_empty() => url,
            _ => return Err(PlatformError::Validation(MEDIA_REQUIRED.to_string())),
        };

        let user_id = self.resolve_user_id(credential).await?;
        let token = credential.access_token.expose_secret();

        let container_request = self
            .http
            .post(format!("{}/{}/media", self.api_base, user_id))
            .bearer_auth(token)
            .json(&serde_json::json!({
                "image_url": image_url,
                "caption": content,
            }));
        let (_, body) = send_json(PlatformId::Instagram, container_request).await?;
        let container: GraphId = decode(PlatformId::Instagram, body)?;

        let publish_request = self
            .http
            .post(format!("{}/{}/media_publish", self.api_base, user_id))
            .bearer_auth(token)
            .json(&serde_json::json!({ "creation_id": container.id }));
        let (_, body) = send_json(PlatformId::Instagram, publish_request).await?;
        let published: GraphId = decode(PlatformId::Instagram, body)?;

        Ok(published.id)
    }
}
