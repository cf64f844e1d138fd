//! Shared stubs for integration tests.
//!
//! Every stub counts its calls so tests can assert that skipped files never
//! reach a capability.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use craftpost::adapters::{
    AiClassifier, ContentGenerator, ImageAcquirer, ImageGenerator, ImageScraper, Publisher,
    Uploader,
};
use craftpost::core::{
    Capabilities, CategoryClassifier, OrchestratorOptions, PipelineOrchestrator, RetryPolicy,
    StateStore,
};
use craftpost::domain::{Category, ErrorKind, ImageRef, ImageSource, PostDraft, StageError, Taxonomy};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Neutral description: matches no default keyword
pub const DESCRIPTION: &str =
    "A folded paper model with printable sheets and simple assembly steps for the whole family.";

/// Scripted failures keyed by subject: `(kind, times)`; `u32::MAX` fails forever
#[derive(Default)]
struct Script {
    failures: Mutex<HashMap<String, (ErrorKind, u32)>>,
}

impl Script {
    fn set(&self, subject: &str, kind: ErrorKind, times: u32) {
        self.failures
            .lock()
            .unwrap()
            .insert(subject.to_string(), (kind, times));
    }

    fn next(&self, subject: &str) -> Option<StageError> {
        let mut failures = self.failures.lock().unwrap();
        let entry = failures.get_mut(subject)?;
        if entry.1 == 0 {
            return None;
        }
        if entry.1 != u32::MAX {
            entry.1 -= 1;
        }
        Some(StageError::new(entry.0, format!("scripted {} failure", entry.0)))
    }
}

fn subject_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[derive(Default)]
pub struct StubUploader {
    pub calls: AtomicU32,
    script: Script,
    cancel_on_call: Mutex<Option<CancellationToken>>,
}

impl StubUploader {
    pub fn fail(&self, subject: &str, kind: ErrorKind, times: u32) {
        self.script.set(subject, kind, times);
    }

    /// Cancel `token` from inside the next upload call, before it returns
    pub fn cancel_during_call(&self, token: CancellationToken) {
        *self.cancel_on_call.lock().unwrap() = Some(token);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Uploader for StubUploader {
    fn name(&self) -> &str {
        "stub-uploader"
    }

    async fn upload(&self, path: &Path) -> Result<String, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = self.cancel_on_call.lock().unwrap().take() {
            token.cancel();
        }
        let subject = subject_of(path);
        if let Some(error) = self.script.next(&subject) {
            return Err(error);
        }
        Ok(format!("https://files.example/{}", subject.replace(' ', "_")))
    }
}

#[derive(Default)]
pub struct StubContent {
    pub calls: AtomicU32,
    script: Script,
}

impl StubContent {
    pub fn fail(&self, subject: &str, kind: ErrorKind, times: u32) {
        self.script.set(subject, kind, times);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentGenerator for StubContent {
    fn name(&self) -> &str {
        "stub-content"
    }

    async fn describe(&self, subject: &str) -> Result<String, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.script.next(subject) {
            return Err(error);
        }
        Ok(DESCRIPTION.to_string())
    }
}

/// Acquirer that always returns an image path under `dir` without touching disk
pub struct StubImages {
    pub calls: AtomicU32,
    dir: PathBuf,
}

impl StubImages {
    pub fn new(dir: &Path) -> Self {
        Self {
            calls: AtomicU32::new(0),
            dir: dir.to_path_buf(),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageAcquirer for StubImages {
    async fn acquire(&self, subject: &str) -> Result<ImageRef, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ImageRef {
            path: self.dir.join(format!("{}.jpg", subject.replace(' ', "_"))),
            width: 800,
            height: 600,
            source: ImageSource::Generated,
        })
    }
}

/// Publisher that records every draft it receives
#[derive(Default)]
pub struct StubPublisher {
    pub calls: AtomicU32,
    pub drafts: Mutex<Vec<PostDraft>>,
    script: Script,
    /// Held for this long inside `publish`
    pub delay: Mutex<Option<Duration>>,
    in_flight: AtomicU32,
    pub max_in_flight: AtomicU32,
}

impl StubPublisher {
    pub fn fail(&self, subject: &str, kind: ErrorKind, times: u32) {
        self.script.set(subject, kind, times);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn max_in_flight(&self) -> u32 {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn drafts(&self) -> Vec<PostDraft> {
        self.drafts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for StubPublisher {
    fn name(&self) -> &str {
        "stub-publisher"
    }

    async fn publish(&self, draft: &PostDraft) -> Result<String, StageError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(error) = self.script.next(&draft.title) {
            return Err(error);
        }
        self.drafts.lock().unwrap().push(draft.clone());
        Ok(format!("https://blog.example/?p={}", n))
    }
}

/// AI classifier returning a fixed label
pub struct StubAi {
    pub calls: AtomicU32,
    label: Result<String, StageError>,
}

impl StubAi {
    pub fn answering(label: &str) -> Self {
        Self {
            calls: AtomicU32::new(0),
            label: Ok(label.to_string()),
        }
    }

    pub fn failing(kind: ErrorKind) -> Self {
        Self {
            calls: AtomicU32::new(0),
            label: Err(StageError::new(kind, "model unavailable")),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AiClassifier for StubAi {
    async fn ai_classify(
        &self,
        _subject: &str,
        _content: &str,
        _categories: &[Category],
    ) -> Result<String, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.label.clone()
    }
}

/// Scraper serving canned bytes per candidate URL
#[derive(Default)]
pub struct StubScraper {
    pub searches: AtomicU32,
    pub downloads: AtomicU32,
    pub candidates: Vec<(String, Vec<u8>)>,
    pub search_error: Option<StageError>,
}

impl StubScraper {
    pub fn with(candidates: Vec<(&str, Vec<u8>)>) -> Self {
        Self {
            candidates: candidates
                .into_iter()
                .map(|(url, bytes)| (url.to_string(), bytes))
                .collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ImageScraper for StubScraper {
    fn name(&self) -> &str {
        "stub-scraper"
    }

    async fn search(&self, _subject: &str, limit: usize) -> Result<Vec<String>, StageError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.search_error {
            return Err(error.clone());
        }
        Ok(self
            .candidates
            .iter()
            .take(limit)
            .map(|(url, _)| url.clone())
            .collect())
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, StageError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.candidates
            .iter()
            .find(|(candidate, _)| candidate == url)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| StageError::permanent("not found"))
    }
}

/// Generator returning canned bytes or an error
pub struct StubGenerator {
    pub calls: AtomicU32,
    result: Result<Vec<u8>, StageError>,
}

impl StubGenerator {
    pub fn returning(bytes: Vec<u8>) -> Self {
        Self {
            calls: AtomicU32::new(0),
            result: Ok(bytes),
        }
    }

    pub fn failing(error: StageError) -> Self {
        Self {
            calls: AtomicU32::new(0),
            result: Err(error),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageGenerator for StubGenerator {
    fn name(&self) -> &str {
        "stub-generator"
    }

    async fn generate(&self, _subject: &str) -> Result<Vec<u8>, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

/// PNG of the given size
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 120, 40]));
    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

/// Retry policy with millisecond delays
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay_ms: 1,
        max_delay_ms: 5,
        backoff_multiplier: 2.0,
        quota_delay_ms: 1,
    }
}

/// Write an input archive; distinct contents give distinct identities
pub async fn write_input(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    tokio::fs::write(&path, format!("archive bytes for {}", name))
        .await
        .unwrap();
    path
}

/// A full orchestrator wired to stubs
pub struct Harness {
    pub temp: TempDir,
    pub inputs: PathBuf,
    pub store: Arc<StateStore>,
    pub uploader: Arc<StubUploader>,
    pub content: Arc<StubContent>,
    pub images: Arc<StubImages>,
    pub publisher: Arc<StubPublisher>,
    pub ai: Arc<StubAi>,
    pub orchestrator: Arc<PipelineOrchestrator>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_options(OrchestratorOptions::default(), StubAi::answering("7")).await
    }

    pub async fn with_options(options: OrchestratorOptions, ai: StubAi) -> Self {
        let temp = TempDir::new().unwrap();
        let inputs = temp.path().join("inputs");
        tokio::fs::create_dir_all(&inputs).await.unwrap();
        let store = Arc::new(StateStore::open(&temp.path().join("home")).await.unwrap());

        let uploader = Arc::new(StubUploader::default());
        let content = Arc::new(StubContent::default());
        let images = Arc::new(StubImages::new(&temp.path().join("images")));
        let publisher = Arc::new(StubPublisher::default());
        let ai = Arc::new(ai);

        let orchestrator = Self::build(
            &store,
            &uploader,
            &content,
            &images,
            &publisher,
            &ai,
            options,
            fast_retry(),
        );

        Self {
            temp,
            inputs,
            store,
            uploader,
            content,
            images,
            publisher,
            ai,
            orchestrator: Arc::new(orchestrator),
        }
    }

    fn build(
        store: &Arc<StateStore>,
        uploader: &Arc<StubUploader>,
        content: &Arc<StubContent>,
        images: &Arc<StubImages>,
        publisher: &Arc<StubPublisher>,
        ai: &Arc<StubAi>,
        options: OrchestratorOptions,
        retry: RetryPolicy,
    ) -> PipelineOrchestrator {
        let capabilities = Capabilities {
            uploader: uploader.clone(),
            content: content.clone(),
            images: images.clone(),
            publisher: publisher.clone(),
        };
        let classifier = CategoryClassifier::new(
            Taxonomy::default(),
            Some(ai.clone() as Arc<dyn AiClassifier>),
        );

        PipelineOrchestrator::new(
            store.clone(),
            capabilities,
            Arc::new(classifier),
            retry,
            options,
        )
    }

    /// Same stubs and store, different options
    pub fn orchestrator_with(&self, options: OrchestratorOptions) -> Arc<PipelineOrchestrator> {
        self.orchestrator_with_retry(options, fast_retry())
    }

    /// Same stubs and store, different options and retry policy
    pub fn orchestrator_with_retry(
        &self,
        options: OrchestratorOptions,
        retry: RetryPolicy,
    ) -> Arc<PipelineOrchestrator> {
        Arc::new(Self::build(
            &self.store,
            &self.uploader,
            &self.content,
            &self.images,
            &self.publisher,
            &self.ai,
            options,
            retry,
        ))
    }

    pub async fn input(&self, name: &str) -> PathBuf {
        write_input(&self.inputs, name).await
    }

    pub fn home(&self) -> PathBuf {
        self.temp.path().join("home")
    }
}
