//! AI content generation client
//!
//! A stateless request/response call to an OpenAI-compatible provider that
//! drafts captions and/or an image for a post. There is no retry: callers
//! decide what to do with a failure.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::config::AiConfig;
use crate::error::{CastError, ConfigError, Result};
use crate::platforms::character_limit;
use crate::types::PlatformId;

const MAX_CAPTIONS: usize = 3;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GenerationKind {
    Text,
    Image,
    Both,
}

impl GenerationKind {
    fn wants_text(&self) -> bool {
        matches!(self, GenerationKind::Text | GenerationKind::Both)
    }

    fn wants_image(&self) -> bool {
        matches!(self, GenerationKind::Image | GenerationKind::Both)
    }
}

impl FromStr for GenerationKind {
    type Err = CastError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" => Ok(GenerationKind::Text),
            "image" => Ok(GenerationKind::Image),
            "both" => Ok(GenerationKind::Both),
            other => Err(CastError::Validation(format!(
                "Unknown generation kind '{}'. Valid kinds: text, image, both",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CaptionLength {
    Short,
    Medium,
    Long,
}

impl CaptionLength {
    fn describe(&self) -> &'static str {
        match self {
            CaptionLength::Short => "one short sentence",
            CaptionLength::Medium => "two or three sentences",
            CaptionLength::Long => "a full paragraph",
        }
    }
}

impl FromStr for CaptionLength {
    type Err = CastError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "short" => Ok(CaptionLength::Short),
            "medium" => Ok(CaptionLength::Medium),
            "long" => Ok(CaptionLength::Long),
            other => Err(CastError::Validation(format!(
                "Unknown length '{}'. Valid lengths: short, medium, long",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub kind: GenerationKind,
    pub platform: Option<PlatformId>,
    pub tone: Option<String>,
    pub length: Option<CaptionLength>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GeneratedContent {
    pub captions: Option<Vec<String>>,
    pub image_url: Option<String>,
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedContent>;
}

/// OpenAI-compatible generator (`/chat/completions`, `/images/generations`)
pub struct OpenAiGenerator {
    http: Client,
    endpoint: String,
    api_key: SecretString,
    text_model: String,
    image_model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageOwned,
}

#[derive(Deserialize)]
struct ChatMessageOwned {
    content: String,
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u8,
    size: &'a str,
}

#[derive(Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    url: Option<String>,
}

impl OpenAiGenerator {
    /// Build from config, reading the API key from the configured env var
    pub fn from_config(config: &AiConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| ConfigError::MissingField(config.api_key_env.clone()))?;
        Ok(Self::new(config, SecretString::from(api_key)))
    }

    pub fn new(config: &AiConfig, api_key: SecretString) -> Self {
        Self {
            http: Client::new(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key,
            text_model: config.text_model.clone(),
            image_model: config.image_model.clone(),
        }
    }

    async fn captions(&self, request: &GenerationRequest) -> Result<Vec<String>> {
        let system = system_prompt(request);
        let body = ChatRequest {
            model: &self.text_model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
        };

        let response: ChatResponse = self.post_json("chat/completions", &body).await?;
        let text = response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        let captions = parse_captions(&text);
        if captions.is_empty() {
            return Err(CastError::Generation("provider returned no captions".to_string()));
        }
        Ok(captions)
    }

    async fn image(&self, request: &GenerationRequest) -> Result<String> {
        let body = ImageRequest {
            model: &self.image_model,
            prompt: &request.prompt,
            n: 1,
            size: "1024x1024",
        };

        let response: ImageResponse = self.post_json("images/generations", &body).await?;
        response
            .data
            .into_iter()
            .find_map(|d| d.url)
            .ok_or_else(|| CastError::Generation("provider returned no image URL".to_string()))
    }

    async fn post_json<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let response = self
            .http
            .post(format!("{}/{}", self.endpoint, path))
            .bearer_auth(self.api_key.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| CastError::Generation(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(CastError::Generation(format!("provider returned {}: {}", status, text)));
        }

        response
            .json()
            .await
            .map_err(|e| CastError::Generation(format!("unreadable response: {}", e)))
    }
}

#[async_trait]
impl ContentGenerator for OpenAiGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedContent> {
        if request.prompt.trim().is_empty() {
            return Err(CastError::Validation("Prompt cannot be empty".to_string()));
        }

        let mut content = GeneratedContent::default();
        if request.kind.wants_text() {
            content.captions = Some(self.captions(request).await?);
        }
        if request.kind.wants_image() {
            content.image_url = Some(self.image(request).await?);
        }
        Ok(content)
    }
}

fn system_prompt(request: &GenerationRequest) -> String {
    let mut prompt = format!(
        "You write social media captions. Reply with up to {} alternative captions, one per line, with no numbering or commentary.",
        MAX_CAPTIONS
    );

    if let Some(platform) = request.platform {
        prompt.push_str(&format!(" The captions are for {}.", platform));
        if let Some(limit) = character_limit(platform) {
            prompt.push_str(&format!(" Each must be at most {} characters.", limit));
        }
    }
    if let Some(tone) = &request.tone {
        prompt.push_str(&format!(" Use a {} tone.", tone));
    }
    if let Some(length) = request.length {
        prompt.push_str(&format!(" Each caption should be {}.", length.describe()));
    }
    prompt
}

/// Split a completion into captions, dropping list markers and blank lines
fn parse_captions(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(|c: char| c.is_ascii_digit())
                .trim_start_matches(['.', ')', '-', '*', '•'])
                .trim()
                .trim_matches('"')
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .take(MAX_CAPTIONS)
        .collect()
}
