//! Generic file-host uploader.
//!
//! Posts the archive as multipart form data and reads the public download
//! URL out of the JSON response with a JSON pointer, so any host with a
//! simple upload endpoint can be used.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{check_status, read_json, send_error, Uploader};
use crate::domain::{ErrorKind, StageError};

const SERVICE: &str = "File host";

/// Upload endpoint settings (the optional token comes from the environment)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileHostConfig {
    #[serde(default)]
    pub upload_url: String,

    /// Multipart field carrying the file
    #[serde(default = "default_field_name")]
    pub field_name: String,

    /// JSON pointer to the download URL in the response, e.g. `/data/url`
    #[serde(default = "default_url_pointer")]
    pub url_pointer: String,

    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_field_name() -> String {
    "file".to_string()
}
fn default_url_pointer() -> String {
    "/url".to_string()
}
fn default_timeout() -> u64 {
    300
}

impl Default for FileHostConfig {
    fn default() -> Self {
        Self {
            upload_url: String::new(),
            field_name: default_field_name(),
            url_pointer: default_url_pointer(),
            timeout_seconds: default_timeout(),
        }
    }
}

/// Multipart uploader
pub struct FileHostUploader {
    config: FileHostConfig,
    token: Option<String>,
    client: reqwest::Client,
}

impl FileHostUploader {
    pub fn new(config: FileHostConfig, token: Option<String>) -> Result<Self> {
        if config.upload_url.trim().is_empty() {
            anyhow::bail!("File host upload URL is not configured");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
            .build()
            .context("Failed to build file host HTTP client")?;

        Ok(Self {
            config,
            token,
            client,
        })
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

/// Pull the download URL out of an upload response
fn extract_url(body: &serde_json::Value, pointer: &str) -> Result<String, StageError> {
    body.pointer(pointer)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| {
            StageError::permanent(format!("upload response has no URL at '{}'", pointer))
        })
}

#[async_trait]
impl Uploader for FileHostUploader {
    fn name(&self) -> &str {
        "file-host"
    }

    async fn upload(&self, path: &Path) -> Result<String, StageError> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload.bin".to_string());

        let bytes = tokio::fs::read(path).await.map_err(|e| {
            StageError::permanent(format!("cannot read {}: {}", path.display(), e))
        })?;
        let size = bytes.len();

        let form = Form::new().part(
            self.config.field_name.clone(),
            Part::bytes(bytes).file_name(file_name.clone()),
        );

        let response = self
            .request(self.client.post(&self.config.upload_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| send_error(SERVICE, e))?;

        let body: serde_json::Value =
            read_json(check_status(response, SERVICE).await?, SERVICE).await?;
        let url = extract_url(&body, &self.config.url_pointer)?;

        debug!(file = %file_name, size, %url, "Uploaded archive");
        Ok(url)
    }

    /// Reachability and credential check; only auth and server errors fail
    async fn health_check(&self) -> Result<(), StageError> {
        let response = self
            .request(self.client.get(&self.config.upload_url))
            .send()
            .await
            .map_err(|e| send_error(SERVICE, e))?;

        match check_status(response, SERVICE).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind == ErrorKind::Permanent => Ok(()),
            Err(e) => Err(e),
        }
    }
}
