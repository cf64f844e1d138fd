//! Configuration for craftpost.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (CRAFTPOST_HOME, CRAFTPOST_FILES, WORDPRESS_URL)
//! 2. Config file (.craftpost/config.yaml)
//! 3. Defaults (~/.craftpost, ./files)
//!
//! Config file discovery:
//! - Searches current directory and parents for .craftpost/config.yaml
//! - Paths in config file are relative to the project root (parent of .craftpost/)
//!
//! Service secrets are only ever read from the environment.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::file_host::FileHostConfig;
use crate::adapters::openai::OpenAiConfig;
use crate::adapters::wordpress::WordPressConfig;
use crate::core::{ImageSettings, OrchestratorOptions, PreviouslyFailed, RetryPolicy, SubjectRules};
use crate::core::orchestrator::DEFAULT_DOWNLOAD_TEMPLATE;
use crate::domain::category::{default_categories, DEFAULT_FALLBACK_ID};
use crate::domain::{Category, Taxonomy};

/// Directory holding the config file, searched for from the working directory up
pub const CONFIG_DIR: &str = ".craftpost";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub files: FilesConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub images: ImageSettings,
    /// Replaces the built-in taxonomy when present
    #[serde(default)]
    pub categories: Option<Vec<Category>>,
    #[serde(default)]
    pub fallback_category: Option<u32>,
    #[serde(default)]
    pub subject: SubjectRules,
    #[serde(default)]
    pub post: PostConfig,
    #[serde(default)]
    pub services: ServicesConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (processed.json, failed.json, lock)
    pub home: Option<String>,
    /// Directory scanned for input archives
    pub files: Option<String>,
    /// Where normalised featured images are written
    pub images: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    #[serde(default = "default_patterns")]
    pub patterns: Vec<String>,
}

fn default_patterns() -> Vec<String> {
    vec!["*.zip".to_string(), "*.pdf".to_string()]
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            patterns: default_patterns(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Delay between file starts, for external rate limits
    #[serde(default = "default_inter_item_delay")]
    pub inter_item_delay_ms: u64,
    #[serde(default)]
    pub previously_failed: PreviouslyFailed,
}

fn default_concurrency() -> usize {
    1
}
fn default_inter_item_delay() -> u64 {
    2000
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            inter_item_delay_ms: default_inter_item_delay(),
            previously_failed: PreviouslyFailed::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostConfig {
    /// Appended to every post body; `{url}` becomes the download URL
    #[serde(default = "default_download_template")]
    pub download_template: String,
}

fn default_download_template() -> String {
    DEFAULT_DOWNLOAD_TEMPLATE.to_string()
}

impl Default for PostConfig {
    fn default() -> Self {
        Self {
            download_template: default_download_template(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServicesConfig {
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub wordpress: WordPressConfig,
    #[serde(default)]
    pub file_host: FileHostConfig,
}

/// Credentials taken from the environment
#[derive(Clone, Default)]
pub struct Secrets {
    pub openai_api_key: Option<String>,
    pub wordpress_username: Option<String>,
    pub wordpress_app_password: Option<String>,
    pub file_host_token: Option<String>,
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = |v: &Option<String>| if v.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Secrets")
            .field("openai_api_key", &shown(&self.openai_api_key))
            .field("wordpress_username", &shown(&self.wordpress_username))
            .field("wordpress_app_password", &shown(&self.wordpress_app_password))
            .field("file_host_token", &shown(&self.file_host_token))
            .finish()
    }
}

/// Resolved settings with absolute paths and a validated taxonomy
#[derive(Debug, Clone)]
pub struct Settings {
    /// State directory
    pub home: PathBuf,
    /// Input directory
    pub files_dir: PathBuf,
    pub images_dir: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,

    pub patterns: Vec<String>,
    pub retry: RetryPolicy,
    pub batch: BatchConfig,
    pub images: ImageSettings,
    pub taxonomy: Taxonomy,
    pub subject: SubjectRules,
    pub post: PostConfig,
    pub services: ServicesConfig,
    pub secrets: Secrets,
}

impl Settings {
    /// Load from the working directory and the process environment
    pub fn load() -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to determine current directory")?;
        Self::load_from(&cwd, |key| std::env::var(key).ok())
    }

    /// Load starting the config search at `start`, reading variables via `env`
    pub fn load_from(start: &Path, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let found = match find_config_file(start) {
            Some(path) => {
                let file = load_config_file(&path)?;
                Some((path, file))
            }
            None => None,
        };
        Self::resolve(start, found, env)
    }

    fn resolve(
        start: &Path,
        found: Option<(PathBuf, ConfigFile)>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let (config_file, file) = match found {
            Some((path, file)) => (Some(path), file),
            None => (None, ConfigFile::default()),
        };

        // Project root is the parent of .craftpost/, else the start directory
        let base_dir = config_file
            .as_deref()
            .and_then(|p| p.parent())
            .and_then(|p| p.parent())
            .unwrap_or(start)
            .to_path_buf();

        let home = match env("CRAFTPOST_HOME") {
            Some(home) => PathBuf::from(home),
            None => match &file.paths.home {
                Some(home) => resolve_path(&base_dir, home),
                None => dirs::home_dir()
                    .context("Failed to determine home directory")?
                    .join(".craftpost"),
            },
        };

        let files_dir = match env("CRAFTPOST_FILES") {
            Some(files) => PathBuf::from(files),
            None => resolve_path(&base_dir, file.paths.files.as_deref().unwrap_or("files")),
        };

        let images_dir = match &file.paths.images {
            Some(images) => resolve_path(&base_dir, images),
            None => home.join("images"),
        };

        let fallback_id = file.fallback_category.unwrap_or(DEFAULT_FALLBACK_ID);
        let categories = file.categories.clone().unwrap_or_else(default_categories);
        let taxonomy =
            Taxonomy::new(categories, fallback_id).context("Invalid category taxonomy")?;

        let mut services = file.services.clone();
        if let Some(url) = env("WORDPRESS_URL") {
            services.wordpress.url = url;
        }

        let secrets = Secrets {
            openai_api_key: env("OPENAI_API_KEY").filter(|v| !v.is_empty()),
            wordpress_username: env("WORDPRESS_USERNAME").filter(|v| !v.is_empty()),
            wordpress_app_password: env("WORDPRESS_APP_PASSWORD").filter(|v| !v.is_empty()),
            file_host_token: env("FILE_HOST_TOKEN").filter(|v| !v.is_empty()),
        };

        if file.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        if !file.post.download_template.contains("{url}") {
            anyhow::bail!("post.download_template must contain {{url}}");
        }

        Ok(Self {
            home,
            files_dir,
            images_dir,
            config_file,
            patterns: file.files.patterns,
            retry: file.retry,
            batch: file.batch,
            images: file.images,
            taxonomy,
            subject: file.subject,
            post: file.post,
            services,
            secrets,
        })
    }

    /// Orchestrator options for a run
    pub fn orchestrator_options(&self, force: bool, skip_failed: bool) -> OrchestratorOptions {
        OrchestratorOptions {
            force,
            previously_failed: if skip_failed {
                PreviouslyFailed::Skip
            } else {
                self.batch.previously_failed
            },
            download_template: self.post.download_template.clone(),
            subject_rules: self.subject.clone(),
        }
    }
}

/// Find config file by searching `start` and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the project root
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}
