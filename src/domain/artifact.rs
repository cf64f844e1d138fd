//! Artifacts produced by pipeline stages.
//!
//! Artifacts are the outputs of stages that feed later stages: the featured
//! image, the chosen category and the assembled post.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::category::Category;

/// Where an accepted image came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageSource {
    /// Downloaded from a scraped search result
    Scraped { url: String },

    /// Produced by the image generation model
    Generated,
}

impl ImageSource {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Scraped { .. } => "scraped",
            Self::Generated => "generated",
        }
    }
}

/// A validated, normalised featured image on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Path to the JPEG written into the images directory
    pub path: PathBuf,

    pub width: u32,
    pub height: u32,
    pub source: ImageSource,
}

/// How a category was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationMethod {
    /// Highest keyword score, deterministic
    Keyword,

    /// Keyword score was zero; the AI classifier picked a known category
    Ai,

    /// Neither step produced a usable category
    Fallback,
}

/// Category chosen for a post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub category_id: u32,

    /// Keyword score of the chosen category (0 unless `method` is `Keyword`)
    pub score: usize,

    pub method: ClassificationMethod,
}

/// Everything the publisher needs to create a post
#[derive(Debug, Clone)]
pub struct PostDraft {
    pub title: String,
    pub body: String,
    pub image: ImageRef,
    pub category: Category,
}

impl PostDraft {
    /// Compose the post body: generated content followed by the download line.
    ///
    /// `download_template` must contain `{url}`.
    pub fn compose_body(content: &str, download_template: &str, upload_url: &str) -> String {
        let download_line = download_template.replace("{url}", upload_url);
        format!("{}\n\n{}", content.trim_end(), download_line)
    }
}
