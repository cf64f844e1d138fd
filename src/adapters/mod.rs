//! Capability interfaces for external systems.
//!
//! The orchestrator only ever talks to these traits. Every method returns a
//! [`StageError`] that is already classified, so HTTP status codes and
//! transport failures are mapped to an [`ErrorKind`](crate::domain::ErrorKind)
//! inside the adapter, never in the core.

pub mod file_host;
pub mod openai;
pub mod scraper;
pub mod wordpress;

use std::path::Path;

use async_trait::async_trait;

use crate::domain::{Category, ErrorKind, ImageRef, PostDraft, StageError};

pub use file_host::FileHostUploader;
pub use openai::OpenAiClient;
pub use scraper::WebImageScraper;
pub use wordpress::WordPressClient;

/// Uploads the archive and returns a public download URL
#[async_trait]
pub trait Uploader: Send + Sync {
    fn name(&self) -> &str;

    async fn upload(&self, path: &Path) -> Result<String, StageError>;

    async fn health_check(&self) -> Result<(), StageError> {
        Ok(())
    }
}

/// Writes the post text for a subject
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn describe(&self, subject: &str) -> Result<String, StageError>;

    async fn health_check(&self) -> Result<(), StageError> {
        Ok(())
    }
}

/// First half of the image fallback chain: search and download candidates
#[async_trait]
pub trait ImageScraper: Send + Sync {
    fn name(&self) -> &str;

    /// Candidate image URLs for a subject, best first, at most `limit`
    async fn search(&self, subject: &str, limit: usize) -> Result<Vec<String>, StageError>;

    /// Raw bytes of one candidate
    async fn download(&self, url: &str) -> Result<Vec<u8>, StageError>;

    async fn health_check(&self) -> Result<(), StageError> {
        Ok(())
    }
}

/// Second half of the image fallback chain: generate an image from scratch
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    fn name(&self) -> &str;

    /// Encoded image bytes (any format the `image` crate can decode)
    async fn generate(&self, subject: &str) -> Result<Vec<u8>, StageError>;

    async fn health_check(&self) -> Result<(), StageError> {
        Ok(())
    }
}

/// Produces a validated featured image for a subject
#[async_trait]
pub trait ImageAcquirer: Send + Sync {
    async fn acquire(&self, subject: &str) -> Result<ImageRef, StageError>;
}

/// Picks a category when keywords give no signal
#[async_trait]
pub trait AiClassifier: Send + Sync {
    /// Returns the raw label chosen by the model: a category id or name
    async fn ai_classify(
        &self,
        subject: &str,
        content: &str,
        categories: &[Category],
    ) -> Result<String, StageError>;
}

/// Creates the blog post
#[async_trait]
pub trait Publisher: Send + Sync {
    fn name(&self) -> &str;

    /// Publish a draft and return the post reference (its URL)
    async fn publish(&self, draft: &PostDraft) -> Result<String, StageError>;

    async fn health_check(&self) -> Result<(), StageError> {
        Ok(())
    }
}

/// Longest response body excerpt kept in an error message
const MAX_ERROR_BODY: usize = 300;

/// Pass successful responses through; classify everything else by status.
pub(crate) async fn check_status(
    response: reqwest::Response,
    service: &str,
) -> Result<reqwest::Response, StageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let kind = ErrorKind::from_http_status(status.as_u16(), &body);
    let excerpt: String = body.chars().take(MAX_ERROR_BODY).collect();

    Err(StageError::new(
        kind,
        format!("{} returned {}: {}", service, status, excerpt.trim()),
    ))
}

/// Decode a JSON body; a body that does not match is a permanent failure
pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    service: &str,
) -> Result<T, StageError> {
    response
        .json()
        .await
        .map_err(|e| StageError::permanent(format!("{} sent an unexpected response: {}", service, e)))
}

/// Map a failed send to the error taxonomy, naming the service
pub(crate) fn send_error(service: &str, err: reqwest::Error) -> StageError {
    let classified = StageError::from_reqwest(err);
    StageError::new(
        classified.kind,
        format!("{} request failed: {}", service, classified.message),
    )
}
