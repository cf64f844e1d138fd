//! Featured image acquisition: scrape first, generate second.
//!
//! Scraping is cheap and usually good enough; generation costs money and is
//! only attempted once scraping has produced nothing usable. Any scraping
//! failure, whatever its kind, falls through to generation so a blocked
//! search page alone never fails the stage.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::adapters::{ImageAcquirer, ImageGenerator, ImageScraper};
use crate::domain::{Attempt, ImageRef, ImageSource, StageError};

/// Image validation and normalisation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSettings {
    /// Scraped candidates to try before generating
    #[serde(default = "default_max_candidates")]
    pub max_crawl_candidates: usize,

    #[serde(default = "default_min_side")]
    pub min_width: u32,
    #[serde(default = "default_min_side")]
    pub min_height: u32,

    #[serde(default = "default_max_width")]
    pub max_width: u32,
    #[serde(default = "default_max_height")]
    pub max_height: u32,

    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Search page the scraper fetches; existing query pairs are kept
    #[serde(default = "default_search_url")]
    pub search_url: String,

    /// Query parameter that carries the search terms
    #[serde(default = "default_search_param")]
    pub search_param: String,
}

fn default_max_candidates() -> usize {
    5
}
fn default_min_side() -> u32 {
    100
}
fn default_max_width() -> u32 {
    800
}
fn default_max_height() -> u32 {
    600
}
fn default_jpeg_quality() -> u8 {
    85
}
fn default_search_url() -> String {
    "https://www.bing.com/images/search".to_string()
}
fn default_search_param() -> String {
    "q".to_string()
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            max_crawl_candidates: default_max_candidates(),
            min_width: default_min_side(),
            min_height: default_min_side(),
            max_width: default_max_width(),
            max_height: default_max_height(),
            jpeg_quality: default_jpeg_quality(),
            search_url: default_search_url(),
            search_param: default_search_param(),
        }
    }
}

/// Two-step image acquirer over a scraper and a generator
pub struct FallbackImageAcquirer {
    scraper: Arc<dyn ImageScraper>,
    generator: Arc<dyn ImageGenerator>,
    settings: ImageSettings,
    output_dir: PathBuf,
}

impl FallbackImageAcquirer {
    pub fn new(
        scraper: Arc<dyn ImageScraper>,
        generator: Arc<dyn ImageGenerator>,
        settings: ImageSettings,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            scraper,
            generator,
            settings,
            output_dir: output_dir.into(),
        }
    }

    /// Try scraped candidates in order until one validates
    async fn scrape(&self, subject: &str) -> Attempt<ImageRef> {
        let limit = self.settings.max_crawl_candidates;
        if limit == 0 {
            return Attempt::exhausted("scraping disabled");
        }

        let urls = match self.scraper.search(subject, limit).await {
            Ok(urls) => urls,
            Err(e) => {
                warn!(subject, error = %e, "Image search failed");
                return Attempt::exhausted(format!("search failed: {}", e));
            }
        };

        if urls.is_empty() {
            return Attempt::exhausted("no candidates found");
        }

        for url in urls.into_iter().take(limit) {
            let bytes = match self.scraper.download(&url).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!(%url, error = %e, "Candidate download failed");
                    continue;
                }
            };

            let source = ImageSource::Scraped { url: url.clone() };
            match self.accept(subject, bytes, source).await {
                Ok(image) => return Attempt::Success(image),
                Err(reason) => debug!(%url, %reason, "Candidate rejected"),
            }
        }

        Attempt::exhausted("no candidate passed validation")
    }

    /// Validate, downscale and store one image
    async fn accept(
        &self,
        subject: &str,
        bytes: Vec<u8>,
        source: ImageSource,
    ) -> Result<ImageRef, String> {
        let path = self
            .output_dir
            .join(image_file_name(subject, source.label()));
        let settings = self.settings.clone();
        let out = path.clone();

        let (width, height) =
            tokio::task::spawn_blocking(move || normalize(&bytes, &settings, &out))
                .await
                .map_err(|e| format!("image worker failed: {}", e))??;

        Ok(ImageRef {
            path,
            width,
            height,
            source,
        })
    }
}

#[async_trait]
impl ImageAcquirer for FallbackImageAcquirer {
    async fn acquire(&self, subject: &str) -> Result<ImageRef, StageError> {
        match self.scrape(subject).await {
            Attempt::Success(image) => {
                info!(subject, path = %image.path.display(), "Using scraped image");
                return Ok(image);
            }
            Attempt::Exhausted { reason } => {
                info!(subject, %reason, "Scraping exhausted, generating image");
            }
        }

        let bytes = self.generator.generate(subject).await?;
        let image = self
            .accept(subject, bytes, ImageSource::Generated)
            .await
            .map_err(|reason| StageError::permanent(format!("generated image rejected: {}", reason)))?;

        info!(subject, path = %image.path.display(), "Using generated image");
        Ok(image)
    }
}

/// Decode, check minimum size, fit within the maximum box and write a JPEG.
/// Returns the dimensions written.
fn normalize(bytes: &[u8], settings: &ImageSettings, out: &Path) -> Result<(u32, u32), String> {
    if bytes.is_empty() {
        return Err("empty payload".to_string());
    }

    let decoded = image::load_from_memory(bytes).map_err(|e| format!("not an image: {}", e))?;
    let (width, height) = (decoded.width(), decoded.height());
    if width < settings.min_width || height < settings.min_height {
        return Err(format!(
            "{}x{} is below the {}x{} minimum",
            width, height, settings.min_width, settings.min_height
        ));
    }

    let fitted = if width > settings.max_width || height > settings.max_height {
        decoded.thumbnail(settings.max_width, settings.max_height)
    } else {
        decoded
    };
    let rgb = DynamicImage::ImageRgb8(fitted.to_rgb8());

    if let Some(dir) = out.parent() {
        std::fs::create_dir_all(dir).map_err(|e| format!("cannot create {}: {}", dir.display(), e))?;
    }
    let file = File::create(out).map_err(|e| format!("cannot write {}: {}", out.display(), e))?;
    let encoder = JpegEncoder::new_with_quality(BufWriter::new(file), settings.jpeg_quality);
    rgb.write_with_encoder(encoder)
        .map_err(|e| format!("jpeg encoding failed: {}", e))?;

    Ok((rgb.width(), rgb.height()))
}

/// File-system safe version of a subject name
pub fn safe_file_stem(subject: &str) -> String {
    let stem: String = subject
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    if stem.is_empty() {
        "image".to_string()
    } else {
        stem
    }
}

/// `<stem>_<hash>_<label>.jpg`. The hash covers the raw subject, so
/// subjects that sanitize to the same stem still get their own file.
pub fn image_file_name(subject: &str, label: &str) -> String {
    let digest = Sha256::digest(subject.as_bytes());
    format!("{}_{}_{}.jpg", safe_file_stem(subject), &hex::encode(digest)[..8], label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;
    use tempfile::TempDir;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::new(width, height));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_large_image_is_downscaled() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("dragon_scraped.jpg");

        let (w, h) = normalize(&png(1600, 600), &ImageSettings::default(), &out).unwrap();
        assert_eq!((w, h), (800, 300));
        assert!(out.exists());
    }

    #[test]
    fn test_small_and_garbage_payloads_rejected() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("x.jpg");
        let settings = ImageSettings::default();

        assert!(normalize(&[], &settings, &out).is_err());
        assert!(normalize(b"<html>blocked</html>", &settings, &out).is_err());
        assert!(normalize(&png(50, 400), &settings, &out).is_err());
        assert!(!out.exists());
    }

    #[test]
    fn test_safe_file_stem() {
        assert_eq!(safe_file_stem("Gundam RX-78/2"), "Gundam_RX-78_2");
        assert_eq!(safe_file_stem("  "), "image");
    }

    #[test]
    fn test_image_file_name_distinguishes_similar_subjects() {
        let spaced = image_file_name("a b", "scraped");
        let underscored = image_file_name("a_b", "scraped");

        assert_ne!(spaced, underscored);
        assert!(spaced.starts_with("a_b_"));
        assert!(spaced.ends_with("_scraped.jpg"));
        assert_eq!(spaced, image_file_name("a b", "scraped"));
        assert_ne!(spaced, image_file_name("a b", "generated"));
    }
}
