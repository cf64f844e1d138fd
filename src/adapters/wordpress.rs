//! WordPress REST adapter for publishing posts.
//!
//! Authenticates with an application password over HTTP basic auth. The
//! featured image is uploaded first, the category is looked up by name (and
//! created when missing), then the post is created as published.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use super::{check_status, read_json, send_error, Publisher};
use crate::domain::{PostDraft, StageError};

const SERVICE: &str = "WordPress";

/// WordPress site settings (credentials come from the environment)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordPressConfig {
    /// Site root, e.g. `https://blog.example.com`
    #[serde(default)]
    pub url: String,

    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_timeout() -> u64 {
    60
}

impl Default for WordPressConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_seconds: default_timeout(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WpMedia {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct WpCategory {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct WpPost {
    id: u64,
    #[serde(default)]
    link: Option<String>,
}

/// WordPress REST API client
pub struct WordPressClient {
    base_url: String,
    username: String,
    app_password: String,
    client: reqwest::Client,
}

impl WordPressClient {
    pub fn new(config: &WordPressConfig, username: String, app_password: String) -> Result<Self> {
        if config.url.trim().is_empty() {
            anyhow::bail!("WordPress URL is not configured");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
            .user_agent(concat!("craftpost/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build WordPress HTTP client")?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            username,
            app_password,
            client,
        })
    }

    fn api_url(&self, route: &str) -> String {
        format!("{}/wp-json/wp/v2/{}", self.base_url, route)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.basic_auth(&self.username, Some(&self.app_password))
    }

    async fn upload_media(&self, path: &Path) -> Result<u64, StageError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            StageError::permanent(format!("cannot read image {}: {}", path.display(), e))
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "image.jpg".to_string());

        let response = self
            .authed(self.client.post(self.api_url("media")))
            .header(reqwest::header::CONTENT_TYPE, "image/jpeg")
            .header(
                reqwest::header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            )
            .body(bytes)
            .send()
            .await
            .map_err(|e| send_error(SERVICE, e))?;

        let media: WpMedia = read_json(check_status(response, SERVICE).await?, SERVICE).await?;
        debug!(media_id = media.id, file = %file_name, "Uploaded featured image");
        Ok(media.id)
    }

    async fn find_or_create_category(&self, name: &str) -> Result<u64, StageError> {
        let response = self
            .authed(self.client.get(self.api_url("categories")))
            .query(&[("search", name), ("per_page", "100")])
            .send()
            .await
            .map_err(|e| send_error(SERVICE, e))?;

        let existing: Vec<WpCategory> =
            read_json(check_status(response, SERVICE).await?, SERVICE).await?;
        if let Some(found) = existing
            .iter()
            .find(|c| c.name.to_lowercase() == name.to_lowercase())
        {
            return Ok(found.id);
        }

        let response = self
            .authed(self.client.post(self.api_url("categories")))
            .json(&json!({ "name": name }))
            .send()
            .await
            .map_err(|e| send_error(SERVICE, e))?;

        let created: WpCategory = read_json(check_status(response, SERVICE).await?, SERVICE).await?;
        info!(category = %created.name, id = created.id, "Created WordPress category");
        Ok(created.id)
    }
}

#[async_trait]
impl Publisher for WordPressClient {
    fn name(&self) -> &str {
        "wordpress"
    }

    async fn publish(&self, draft: &PostDraft) -> Result<String, StageError> {
        let media_id = self.upload_media(&draft.image.path).await?;
        let category_id = self.find_or_create_category(&draft.category.name).await?;

        let response = self
            .authed(self.client.post(self.api_url("posts")))
            .json(&json!({
                "title": draft.title,
                "content": draft.body,
                "status": "publish",
                "format": "standard",
                "featured_media": media_id,
                "categories": [category_id],
            }))
            .send()
            .await
            .map_err(|e| send_error(SERVICE, e))?;

        let post: WpPost = read_json(check_status(response, SERVICE).await?, SERVICE).await?;
        Ok(post
            .link
            .unwrap_or_else(|| format!("{}/?p={}", self.base_url, post.id)))
    }

    /// Verifies the credentials without creating anything
    async fn health_check(&self) -> Result<(), StageError> {
        let response = self
            .authed(self.client.get(self.api_url("users/me")))
            .send()
            .await
            .map_err(|e| send_error(SERVICE, e))?;
        check_status(response, SERVICE).await.map(|_| ())
    }
}
