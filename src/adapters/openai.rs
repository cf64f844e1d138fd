//! OpenAI adapter: post text, category fallback and image generation.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{check_status, read_json, send_error, AiClassifier, ContentGenerator, ImageGenerator};
use crate::domain::{Category, StageError};

const SERVICE: &str = "OpenAI";

/// Descriptions shorter than this are treated as a bad completion
pub const MIN_DESCRIPTION_CHARS: usize = 50;

/// OpenAI connection settings (the API key comes from the environment)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Chat model for descriptions and classification
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_image_model")]
    pub image_model: String,

    #[serde(default = "default_image_size")]
    pub image_size: String,

    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_image_model() -> String {
    "dall-e-3".to_string()
}
fn default_image_size() -> String {
    "1024x1024".to_string()
}
fn default_timeout() -> u64 {
    120
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            image_model: default_image_model(),
            image_size: default_image_size(),
            timeout_seconds: default_timeout(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    #[serde(default)]
    b64_json: Option<String>,
}

/// OpenAI REST client
pub struct OpenAiClient {
    api_key: String,
    config: OpenAiConfig,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(api_key: String, config: OpenAiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to build OpenAI HTTP client")?;

        Ok(Self {
            api_key,
            config,
            client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, StageError> {
        let response = self
            .client
            .post(self.endpoint(path))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| send_error(SERVICE, e))?;

        read_json(check_status(response, SERVICE).await?, SERVICE).await
    }

    /// One chat completion; returns the trimmed text of the first choice
    async fn chat(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, StageError> {
        let response: ChatResponse = self
            .post(
                "chat/completions",
                json!({
                    "model": self.config.model,
                    "messages": [
                        {"role": "system", "content": system},
                        {"role": "user", "content": user},
                    ],
                    "max_tokens": max_tokens,
                    "temperature": temperature,
                }),
            )
            .await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|text| text.trim().to_string())
            .ok_or_else(|| StageError::transient("OpenAI returned no choices"))
    }

    async fn ping(&self) -> Result<(), StageError> {
        let response = self
            .client
            .get(self.endpoint("models"))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| send_error(SERVICE, e))?;
        check_status(response, SERVICE).await.map(|_| ())
    }
}

/// Prompt listing categories as `id. name` lines
fn classification_prompt(subject: &str, content: &str, categories: &[Category]) -> String {
    let listing: Vec<String> = categories
        .iter()
        .map(|c| format!("{}. {}", c.id, c.name))
        .collect();

    format!(
        "Papercraft model: {}\nDescription: {}\n\nAvailable categories:\n{}\n\n\
         Reply with only the id of the best matching category.",
        subject,
        content,
        listing.join("\n")
    )
}

#[async_trait]
impl ContentGenerator for OpenAiClient {
    fn name(&self) -> &str {
        "openai-chat"
    }

    async fn describe(&self, subject: &str) -> Result<String, StageError> {
        let prompt = format!(
            "Papercraft model: {}\n\n\
             Write a short description of this paper model in Vietnamese (100-150 words). \
             Cover what makes it stand out, how hard it is (easy, medium or hard), \
             the age group it suits and one building tip. \
             Keep a friendly blog tone and do not use markdown.",
            subject
        );

        let text = self
            .chat(
                "You are a papercraft expert who writes a blog about paper models.",
                &prompt,
                500,
                0.7,
            )
            .await?;

        if text.chars().count() < MIN_DESCRIPTION_CHARS {
            return Err(StageError::transient(format!(
                "description too short ({} chars)",
                text.chars().count()
            )));
        }

        debug!(subject, chars = text.chars().count(), "Generated description");
        Ok(text)
    }

    async fn health_check(&self) -> Result<(), StageError> {
        self.ping().await
    }
}

#[async_trait]
impl AiClassifier for OpenAiClient {
    async fn ai_classify(
        &self,
        subject: &str,
        content: &str,
        categories: &[Category],
    ) -> Result<String, StageError> {
        self.chat(
            "You classify paper models. Answer with a category id only.",
            &classification_prompt(subject, content, categories),
            10,
            0.3,
        )
        .await
    }
}

#[async_trait]
impl ImageGenerator for OpenAiClient {
    fn name(&self) -> &str {
        "openai-images"
    }

    async fn generate(&self, subject: &str) -> Result<Vec<u8>, StageError> {
        let prompt = format!(
            "A papercraft model of {}, made of folded paper with visible folds and tabs, \
             on a plain white background, sharp studio photo.",
            subject
        );

        let response: ImageResponse = self
            .post(
                "images/generations",
                json!({
                    "model": self.config.image_model,
                    "prompt": prompt,
                    "n": 1,
                    "size": self.config.image_size,
                    "response_format": "b64_json",
                }),
            )
            .await?;

        let encoded = response
            .data
            .into_iter()
            .next()
            .and_then(|d| d.b64_json)
            .ok_or_else(|| StageError::transient("OpenAI returned no image"))?;

        STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| StageError::permanent(format!("invalid image payload: {}", e)))
    }

    async fn health_check(&self) -> Result<(), StageError> {
        self.ping().await
    }
}
