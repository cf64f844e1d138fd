//! Command-line interface for craftpost.
//!
//! Provides commands for running the pipeline over a directory, testing
//! service connections and inspecting or repairing the state store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::warn;

use crate::adapters::{
    AiClassifier, ContentGenerator, FileHostUploader, ImageGenerator, ImageScraper,
    OpenAiClient, Publisher, Uploader, WebImageScraper, WordPressClient,
};
use crate::config::Settings;
use crate::core::{
    discover_files, plan_files, BatchRunner, BatchSummary, Capabilities, CategoryClassifier,
    DataDirLock, FallbackImageAcquirer, PipelineOrchestrator, ResetScope,
    StateStore,
};
use crate::domain::{FileIdentity, ProcessingRecord};

/// craftpost - publish papercraft archives as blog posts
#[derive(Parser, Debug)]
#[command(name = "craftpost")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process archives (every matching file in the input directory by default)
    Run {
        /// Specific files to process
        files: Vec<PathBuf>,

        /// Input directory (overrides config)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Clear existing records and reprocess
        #[arg(short, long)]
        force: bool,

        /// Show what would happen without calling any service
        #[arg(long)]
        dry_run: bool,

        /// Maximum files in flight
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Delay between file starts in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,

        /// Skip files that failed in an earlier run
        #[arg(long)]
        skip_failed: bool,
    },

    /// Test connections to every external service
    Check,

    /// Show processed/failed totals and recent failures
    Stats,

    /// List failed files grouped by error kind
    Failed,

    /// Forget one file so the next run processes it again
    Forget {
        file: PathBuf,
    },

    /// Clear records (backups are written first)
    Reset {
        #[arg(long)]
        processed: bool,

        #[arg(long)]
        failed: bool,

        #[arg(long)]
        all: bool,
    },

    /// Drop failed records older than N days
    Prune {
        #[arg(long, default_value = "30")]
        days: i64,
    },

    /// List the category taxonomy
    Categories,

    /// Classify a subject name with the configured taxonomy
    Classify {
        name: String,

        /// Generated content to score alongside the name
        #[arg(long)]
        content: Option<String>,

        /// Ask OpenAI when no keyword matches
        #[arg(long)]
        ai: bool,
    },

    /// Show resolved configuration
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let settings = Settings::load()?;

        match self.command {
            Commands::Run {
                files,
                dir,
                force,
                dry_run,
                concurrency,
                delay_ms,
                skip_failed,
            } => {
                let args = RunArgs {
                    files,
                    dir,
                    force,
                    dry_run,
                    concurrency,
                    delay_ms,
                    skip_failed,
                };
                run(&settings, args).await
            }
            Commands::Check => check(&settings).await,
            Commands::Stats => stats(&settings).await,
            Commands::Failed => failed(&settings).await,
            Commands::Forget { file } => forget(&settings, &file).await,
            Commands::Reset {
                processed,
                failed,
                all,
            } => reset(&settings, processed, failed, all).await,
            Commands::Prune { days } => prune(&settings, days).await,
            Commands::Categories => {
                show_categories(&settings);
                Ok(())
            }
            Commands::Classify { name, content, ai } => {
                classify(&settings, &name, content.as_deref().unwrap_or(""), ai).await
            }
            Commands::Config => {
                show_config(&settings);
                Ok(())
            }
        }
    }
}

struct RunArgs {
    files: Vec<PathBuf>,
    dir: Option<PathBuf>,
    force: bool,
    dry_run: bool,
    concurrency: Option<usize>,
    delay_ms: Option<u64>,
    skip_failed: bool,
}

/// Concrete collaborators built from settings and environment
struct Services {
    openai: Arc<OpenAiClient>,
    uploader: Arc<FileHostUploader>,
    publisher: Arc<WordPressClient>,
    scraper: Arc<WebImageScraper>,
}

impl Services {
    fn from_settings(settings: &Settings) -> Result<Self> {
        let secrets = &settings.secrets;

        let api_key = secrets
            .openai_api_key
            .clone()
            .context("OPENAI_API_KEY is not set")?;
        let username = secrets
            .wordpress_username
            .clone()
            .context("WORDPRESS_USERNAME is not set")?;
        let password = secrets
            .wordpress_app_password
            .clone()
            .context("WORDPRESS_APP_PASSWORD is not set")?;

        Ok(Self {
            openai: Arc::new(OpenAiClient::new(api_key, settings.services.openai.clone())?),
            uploader: Arc::new(FileHostUploader::new(
                settings.services.file_host.clone(),
                secrets.file_host_token.clone(),
            )?),
            publisher: Arc::new(WordPressClient::new(
                &settings.services.wordpress,
                username,
                password,
            )?),
            scraper: Arc::new(WebImageScraper::new(
                &settings.images.search_url,
                &settings.images.search_param,
            )?),
        })
    }

    fn capabilities(&self, settings: &Settings) -> Capabilities {
        let acquirer = FallbackImageAcquirer::new(
            self.scraper.clone() as Arc<dyn ImageScraper>,
            self.openai.clone() as Arc<dyn ImageGenerator>,
            settings.images.clone(),
            settings.images_dir.clone(),
        );

        Capabilities {
            uploader: self.uploader.clone(),
            content: self.openai.clone(),
            images: Arc::new(acquirer),
            publisher: self.publisher.clone(),
        }
    }
}

/// Process files
async fn run(settings: &Settings, args: RunArgs) -> Result<()> {
    let files = if args.files.is_empty() {
        let dir = args.dir.clone().unwrap_or_else(|| settings.files_dir.clone());
        discover_files(&dir, &settings.patterns)?
    } else {
        args.files.clone()
    };

    if files.is_empty() {
        println!("No files to process");
        return Ok(());
    }

    let options = settings.orchestrator_options(args.force, args.skip_failed);

    if args.dry_run {
        let store = StateStore::open(&settings.home).await?;
        let entries = plan_files(&store, &options, &files).await;

        println!("{:<12} {:<18} FILE", "ACTION", "FINGERPRINT");
        println!("{}", "-".repeat(70));
        for entry in entries {
            let fingerprint = entry
                .identity
                .as_ref()
                .map(|i| i.fingerprint.as_str())
                .unwrap_or("-");
            match entry.action {
                Ok(action) => println!("{:<12} {:<18} {}", action, fingerprint, entry.path.display()),
                Err(e) => println!("{:<12} {:<18} {} ({})", "unreadable", fingerprint, entry.path.display(), e),
            }
        }
        return Ok(());
    }

    let lock = DataDirLock::acquire(&settings.home)?;
    let store = Arc::new(StateStore::open(&settings.home).await?);
    let services = Services::from_settings(settings)?;

    let classifier = CategoryClassifier::new(
        settings.taxonomy.clone(),
        Some(services.openai.clone() as Arc<dyn AiClassifier>),
    );
    let orchestrator = PipelineOrchestrator::new(
        store.clone(),
        services.capabilities(settings),
        Arc::new(classifier),
        settings.retry.clone(),
        options,
    );

    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight calls");
            cancel.cancel();
        }
    });

    let runner = BatchRunner::new(Arc::new(orchestrator));
    let concurrency = args.concurrency.unwrap_or(settings.batch.concurrency);
    let delay = Duration::from_millis(args.delay_ms.unwrap_or(settings.batch.inter_item_delay_ms));

    let summary = runner.run(files, concurrency, delay).await?;
    drop(runner);

    print_summary(&summary);

    if let Ok(store) = Arc::try_unwrap(store) {
        store.close().await;
    }
    drop(lock);

    if summary.has_failures() {
        std::process::exit(1);
    }

    Ok(())
}

fn print_summary(summary: &BatchSummary) {
    println!();
    println!("Run {}", summary.run_id);
    println!("  Completed:        {}", summary.completed);
    println!("  Skipped (done):   {}", summary.skipped_done);
    if summary.skipped_failed > 0 {
        println!("  Skipped (failed): {}", summary.skipped_failed);
    }
    println!("  Failed:           {}", summary.failed);
    if summary.not_started > 0 {
        println!("  Not started:      {}", summary.not_started);
    }

    for (kind, failures) in summary.failures_by_kind() {
        println!("\n  {} ({})", kind, failures.len());
        for failure in failures {
            let stage = failure.stage.map(|s| s.as_str()).unwrap_or("-");
            println!("    {} [{}]: {}", failure.name, stage, failure.message);
        }
    }
}

/// Test connections
async fn check(settings: &Settings) -> Result<()> {
    let services = Services::from_settings(settings)?;
    let mut failures = 0;

    let results = vec![
        ("OpenAI", ContentGenerator::health_check(services.openai.as_ref()).await),
        ("File host", Uploader::health_check(services.uploader.as_ref()).await),
        ("WordPress", Publisher::health_check(services.publisher.as_ref()).await),
        (
            "Image search",
            services
                .scraper
                .search("paper crane", 1)
                .await
                .map(|_| ()),
        ),
    ];

    for (name, result) in results {
        match result {
            Ok(()) => println!("  ok    {}", name),
            Err(e) => {
                failures += 1;
                println!("  FAIL  {}: {}", name, e);
            }
        }
    }

    if failures > 0 {
        eprintln!("\n{} service check(s) failed", failures);
        std::process::exit(1);
    }
    println!("\nAll services reachable");
    Ok(())
}

/// Show store totals
async fn stats(settings: &Settings) -> Result<()> {
    let store = StateStore::open(&settings.home).await?;
    let stats = store.stats().await;

    println!("Data directory: {}", settings.home.display());
    println!("  Processed: {}", stats.processed);
    println!("  Failed:    {}", stats.failed);
    println!("  Total:     {}", stats.total());

    let failed = store.list_failed().await;
    if !failed.is_empty() {
        println!("\nRecent failures:");
        for record in failed.iter().rev().take(5) {
            print_failed(record);
        }
    }

    Ok(())
}

/// Failed records grouped by kind
async fn failed(settings: &Settings) -> Result<()> {
    let store = StateStore::open(&settings.home).await?;
    let records = store.list_failed().await;

    if records.is_empty() {
        println!("No failed files");
        return Ok(());
    }

    let mut grouped: BTreeMap<&str, Vec<&ProcessingRecord>> = BTreeMap::new();
    for record in &records {
        let kind = record
            .last_error
            .as_ref()
            .map(|e| e.kind.as_str())
            .unwrap_or("unknown");
        grouped.entry(kind).or_default().push(record);
    }

    for (kind, records) in grouped {
        println!("{} ({})", kind, records.len());
        for record in records {
            print_failed(record);
        }
        println!();
    }

    Ok(())
}

fn print_failed(record: &ProcessingRecord) {
    let (stage, message) = match &record.last_error {
        Some(e) => (e.stage.map(|s| s.as_str()).unwrap_or("-"), e.message.as_str()),
        None => ("-", ""),
    };
    println!(
        "  {} {} [{}] attempts={} {}",
        record.timestamp.format("%Y-%m-%d %H:%M"),
        record.identity.name,
        stage,
        record.attempts,
        message
    );
}

/// Clear one file's record
async fn forget(settings: &Settings, file: &Path) -> Result<()> {
    let identity = FileIdentity::from_path(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let _lock = DataDirLock::acquire(&settings.home)?;
    let store = StateStore::open(&settings.home).await?;

    if store.clear(&identity).await? {
        println!("Forgot {}", identity);
    } else {
        println!("No record for {}", identity);
    }
    Ok(())
}

/// Clear records with backups
async fn reset(settings: &Settings, processed: bool, failed: bool, all: bool) -> Result<()> {
    let scope = match (all, processed, failed) {
        (true, _, _) | (false, true, true) => ResetScope::All,
        (false, true, false) => ResetScope::Processed,
        (false, false, true) => ResetScope::Failed,
        (false, false, false) => anyhow::bail!("Choose --processed, --failed or --all"),
    };

    let _lock = DataDirLock::acquire(&settings.home)?;
    let store = StateStore::open(&settings.home).await?;
    let backups = store.reset(scope).await?;

    for backup in &backups {
        println!("Backup written: {}", backup.display());
    }
    println!("Reset complete");
    Ok(())
}

/// Drop old failed records
async fn prune(settings: &Settings, days: i64) -> Result<()> {
    if days < 0 {
        anyhow::bail!("--days must not be negative");
    }

    let _lock = DataDirLock::acquire(&settings.home)?;
    let store = StateStore::open(&settings.home).await?;
    let cutoff = Utc::now() - chrono::Duration::days(days);
    let removed = store.prune_failed(cutoff).await?;

    println!("Removed {} failed record(s) older than {} day(s)", removed, days);
    Ok(())
}

fn show_categories(settings: &Settings) {
    let taxonomy = &settings.taxonomy;
    for category in taxonomy.categories() {
        let marker = if category.id == taxonomy.fallback_id() {
            " (fallback)"
        } else {
            ""
        };
        println!("{:>3}. {}{}", category.id, category.name, marker);
        if !category.keywords.is_empty() {
            println!("     {}", category.keywords.join(", "));
        }
    }
}

/// Run the classifier on a name
async fn classify(settings: &Settings, name: &str, content: &str, use_ai: bool) -> Result<()> {
    let ai: Option<Arc<dyn AiClassifier>> = if use_ai {
        let key = settings
            .secrets
            .openai_api_key
            .clone()
            .context("OPENAI_API_KEY is not set")?;
        Some(Arc::new(OpenAiClient::new(key, settings.services.openai.clone())?))
    } else {
        None
    };

    let classifier = CategoryClassifier::new(settings.taxonomy.clone(), ai);
    for (id, score) in classifier.scores(name, content) {
        if score > 0 {
            println!("  score {:>2}  category {}", score, id);
        }
    }

    let result = classifier.classify(name, content).await;
    let category = settings
        .taxonomy
        .get(result.category_id)
        .map(|c| c.name.as_str())
        .unwrap_or("?");
    println!(
        "{} -> {} ({}) via {:?} (score {})",
        name, result.category_id, category, result.method, result.score
    );
    Ok(())
}

/// Print resolved settings (secrets redacted)
fn show_config(settings: &Settings) {
    println!("Config file: {}", match &settings.config_file {
        Some(path) => path.display().to_string(),
        None => "(none)".to_string(),
    });
    println!("Home:        {}", settings.home.display());
    println!("Files:       {}", settings.files_dir.display());
    println!("Images:      {}", settings.images_dir.display());
    println!("Patterns:    {}", settings.patterns.join(", "));
    println!();
    println!(
        "Retry:       max_attempts={} initial={}ms max={}ms x{} quota={}ms",
        settings.retry.max_attempts,
        settings.retry.initial_delay_ms,
        settings.retry.max_delay_ms,
        settings.retry.backoff_multiplier,
        settings.retry.quota_delay_ms
    );
    println!(
        "Batch:       concurrency={} delay={}ms previously_failed={:?}",
        settings.batch.concurrency, settings.batch.inter_item_delay_ms, settings.batch.previously_failed
    );
    println!(
        "Images:      candidates={} min={}x{} max={}x{} quality={}",
        settings.images.max_crawl_candidates,
        settings.images.min_width,
        settings.images.min_height,
        settings.images.max_width,
        settings.images.max_height,
        settings.images.jpeg_quality
    );
    println!(
        "Categories:  {} (fallback {})",
        settings.taxonomy.categories().len(),
        settings.taxonomy.fallback_id()
    );
    println!();
    println!("OpenAI:      {} / {}", settings.services.openai.base_url, settings.services.openai.model);
    println!("WordPress:   {}", settings.services.wordpress.url);
    println!("File host:   {}", settings.services.file_host.upload_url);
    println!("Secrets:     {:?}", settings.secrets);
}
