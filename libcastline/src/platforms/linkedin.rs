//! LinkedIn adapter: UGC share on the member's feed
//!
//! The share needs the author URN (`urn:li:person:{id}`). The id comes from
//! the credential's external account id when the connection flow stored
//! one, otherwise from the OpenID `userinfo` endpoint.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;

use super::{decode, normalize_base, send_json, PublishResult, Publisher};
use crate::credentials::Credential;
use crate::error::PlatformError;
use crate::types::PlatformId;

pub struct LinkedInPublisher {
    http: Client,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    sub: String,
}

impl LinkedInPublisher {
    pub fn new(http: Client, api_base: &str) -> Self {
        Self {
            http,
            api_base: normalize_base(api_base),
        }
    }

    async fn resolve_member_id(&self, credential: &Credential) -> Result<String, PlatformError> {
        if let Some(id) = &credential.external_account_id {
            return Ok(id.clone());
        }

        let request = self
            .http
            .get(format!("{}/v2/userinfo", self.api_base))
            .bearer_auth(credential.access_token.expose_secret());

        let (_, body) = send_json(PlatformId::LinkedIn, request).await?;
        let info: UserInfo = decode(PlatformId::LinkedIn, body)?;
        Ok(info.sub)
    }
}

/// Build the `ugcPosts` request body
fn share_body(author: &str, content: &str, media_url: Option<&str>) -> serde_json::Value {
    let share_content = match media_url {
        Some(url) => serde_json::json!({
            "shareCommentary": { "text": content },
            "shareMediaCategory": "ARTICLE",
            "media": [{ "status": "READY", "originalUrl": url }]
        }),
        None => serde_json::json!({
            "shareCommentary": { "text": content },
            "shareMediaCategory": "NONE"
        }),
    };

    serde_json::json!({
        "author": author,
        "lifecycleState": "PUBLISHED",
        "specificContent": {
            "com.linkedin.ugc.ShareContent": share_content
        },
        "visibility": {
            "com.linkedin.ugc.MemberNetworkVisibility": "PUBLIC"
        }
    })
}

#[async_trait]
impl Publisher for LinkedInPublisher {
    fn platform(&self) -> PlatformId {
        PlatformId::LinkedIn
    }

    async fn publish(
        &self,
        content: &str,
        media_url: Option<&str>,
        credential: &Credential,
    ) -> PublishResult {
        let member_id = self.resolve_member_id(credential).await?;
        let author = format!("urn:li:person:{}", member_id);

        let request = self
            .http
            .post(format!("{}/v2/ugcPosts", self.api_base))
            .bearer_auth(credential.access_token.expose_secret())
            .header("X-Restli-Protocol-Version", "2.0.0")
            .json(&share_body(&author, content, media_url));

        let (headers, body) = send_json(PlatformId::LinkedIn, request).await?;

        let header_id = headers
            .get("x-restli-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        header_id
            .or_else(|| body.get("id").and_then(|v| v.as_str()).map(str::to_string))
            .ok_or_else(|| {
                PlatformError::Posting("linkedin response did not include a share id".to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_share_body_text_only() {
        let body = share_body("urn:li:person:abc", "Hello", None);
        let share = &body["specificContent"]["com.linkedin.ugc.ShareContent"];
        assert_eq!(body["author"], "urn:li:person:abc");
        assert_eq!(share["shareMediaCategory"], "NONE");
        assert_eq!(share["shareCommentary"]["text"], "Hello");
        assert!(share.get("media").is_none());
    }

    #[test]
    fn test_share_body_with_media_is_article() {
        let body = share_body("urn:li:person:abc", "Read this", Some("https://example.com/post"));
        let share = &body["specificContent"]["com.linkedin.ugc.ShareContent"];
        assert_eq!(share["shareMediaCategory"], "ARTICLE");
        assert_eq!(share["media"][0]["originalUrl"], "https://example.com/post");
    }
}
