//! Web image search scraper.
//!
//! Fetches a search results page and pulls absolute image URLs out of the
//! raw HTML. No DOM parsing: search pages embed full-size image URLs in
//! attributes and inline JSON, which a pattern finds well enough.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Url;
use tracing::debug;

use super::{check_status, send_error, ImageScraper};
use crate::domain::StageError;

const SERVICE: &str = "Image search";

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Scrapes a configured search page for candidate images
pub struct WebImageScraper {
    search_url: Url,
    /// Query parameter appended with the search terms
    param: String,
    pattern: Regex,
    client: reqwest::Client,
}

impl WebImageScraper {
    pub fn new(search_url: &str, param: &str) -> Result<Self> {
        let search_url = Url::parse(search_url)
            .with_context(|| format!("Invalid image search URL: {}", search_url))?;
        if search_url.cannot_be_a_base() {
            anyhow::bail!("Image search URL is not a web address: {}", search_url);
        }
        if param.is_empty() {
            anyhow::bail!("Image search query parameter must not be empty");
        }

        let pattern = Regex::new(r#"(?i)https?://[^\s"'<>\\&]+?\.(?:jpe?g|png|webp)"#)
            .context("Failed to compile image URL pattern")?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build scraper HTTP client")?;

        Ok(Self {
            search_url,
            param: param.to_string(),
            pattern,
            client,
        })
    }

    fn search_page_url(&self, subject: &str) -> Url {
        let mut url = self.search_url.clone();
        url.query_pairs_mut()
            .append_pair(&self.param, &format!("{} papercraft", subject));
        url
    }

    /// Distinct image URLs in page order
    fn extract_urls(&self, html: &str, limit: usize) -> Vec<String> {
        let mut urls: Vec<String> = Vec::new();
        for found in self.pattern.find_iter(html) {
            let url = found.as_str().to_string();
            if !urls.contains(&url) {
                urls.push(url);
            }
            if urls.len() >= limit {
                break;
            }
        }
        urls
    }
}

#[async_trait]
impl ImageScraper for WebImageScraper {
    fn name(&self) -> &str {
        "web-search"
    }

    async fn search(&self, subject: &str, limit: usize) -> Result<Vec<String>, StageError> {
        let url = self.search_page_url(subject);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| send_error(SERVICE, e))?;

        let html = check_status(response, SERVICE)
            .await?
            .text()
            .await
            .map_err(|e| send_error(SERVICE, e))?;

        let urls = self.extract_urls(&html, limit);
        debug!(subject, found = urls.len(), "Scraped image candidates");
        Ok(urls)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, StageError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| send_error(SERVICE, e))?;
        let response = check_status(response, SERVICE).await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.starts_with("image/") {
            return Err(StageError::permanent(format!(
                "{} is not an image ({})",
                url, content_type
            )));
        }

        let bytes = response.bytes().await.map_err(|e| send_error(SERVICE, e))?;
        Ok(bytes.to_vec())
    }
}
