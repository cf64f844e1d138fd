//! Per-file pipeline orchestration.
//!
//! Drives one file through
//! `Upload → Describe → AcquireImage → Classify → Publish`, consulting the
//! retry policy whenever a stage fails and writing exactly one record to the
//! state store when the file reaches a terminal state.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{ContentGenerator, ImageAcquirer, Publisher, Uploader};
use crate::domain::{
    ErrorKind, FileIdentity, FileState, PostDraft, RecordOutcome, RecordStatus, RecordedError, RetryState, Stage,
    StageError, StageOutcome, StagePayload,
};

use super::classifier::CategoryClassifier;
use super::retry::{RetryDecision, RetryPolicy};
use super::state_store::{StateStore, StoreError};
use super::subject::SubjectRules;

/// Default line appended to every post body
pub const DEFAULT_DOWNLOAD_TEMPLATE: &str = "Download: {url}";

/// External collaborators used by the stages
#[derive(Clone)]
pub struct Capabilities {
    pub uploader: Arc<dyn Uploader>,
    pub content: Arc<dyn ContentGenerator>,
    pub images: Arc<dyn ImageAcquirer>,
    pub publisher: Arc<dyn Publisher>,
}

/// What a normal run does with files that failed before
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreviouslyFailed {
    /// Run them again from Pending
    #[default]
    Retry,
    /// Leave them alone until forced or cleared
    Skip,
}

/// Per-run orchestration options
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Clear existing records and reprocess
    pub force: bool,
    pub previously_failed: PreviouslyFailed,
    /// Download line template; `{url}` is replaced with the upload URL
    pub download_template: String,
    pub subject_rules: SubjectRules,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            force: false,
            previously_failed: PreviouslyFailed::default(),
            download_template: DEFAULT_DOWNLOAD_TEMPLATE.to_string(),
            subject_rules: SubjectRules::default(),
        }
    }
}

/// Action a file would receive, decided from the store before any stage runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannedAction {
    /// No record yet
    Process,
    /// A record exists but the file runs again (forced, or failed and retried)
    Reprocess,
    SkipDone,
    SkipFailed,
}

impl PlannedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Process => "process",
            Self::Reprocess => "reprocess",
            Self::SkipDone => "skip-done",
            Self::SkipFailed => "skip-failed",
        }
    }

    pub fn runs(&self) -> bool {
        matches!(self, Self::Process | Self::Reprocess)
    }
}

impl fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How one file ended in this run
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    Completed {
        post_reference: String,
        category_id: u32,
    },
    SkippedDone,
    SkippedFailed,
    Failed {
        error: RecordedError,
        /// False when the failure happened before an identity existed
        recorded: bool,
    },
}

/// Result of `process_file`
#[derive(Debug, Clone)]
pub struct FileReport {
    pub path: PathBuf,
    pub identity: Option<FileIdentity>,
    pub disposition: Disposition,
    /// Stages run in this invocation, in order
    pub stages: Vec<StageOutcome>,
}

impl FileReport {
    /// Display name: the identity's name, else the path's file name
    pub fn name(&self) -> String {
        match &self.identity {
            Some(identity) => identity.name.clone(),
            None => self
                .path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| self.path.display().to_string()),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.disposition, Disposition::Failed { .. })
    }

    /// True when this run wrote a record for the file
    fn disposition_recorded(&self) -> bool {
        match &self.disposition {
            Disposition::Completed { .. } => true,
            Disposition::Failed { recorded, .. } => *recorded,
            Disposition::SkippedDone | Disposition::SkippedFailed => false,
        }
    }

    /// Attempts made by a given stage, 0 if it never ran
    pub fn attempts(&self, stage: Stage) -> u32 {
        self.stages
            .iter()
            .find(|o| o.stage == stage)
            .map(|o| o.attempts)
            .unwrap_or(0)
    }
}

/// Action for one identity given the store contents and run options
pub async fn plan_action(
    store: &StateStore,
    options: &OrchestratorOptions,
    identity: &FileIdentity,
) -> PlannedAction {
    let existing = store.get(identity).await.map(|r| r.status);

    match existing {
        None => PlannedAction::Process,
        Some(_) if options.force => PlannedAction::Reprocess,
        Some(RecordStatus::Completed) => PlannedAction::SkipDone,
        Some(RecordStatus::Failed) => match options.previously_failed {
            PreviouslyFailed::Retry => PlannedAction::Reprocess,
            PreviouslyFailed::Skip => PlannedAction::SkipFailed,
        },
    }
}

// Stage failure carried to the terminal transition
struct Abort {
    stage: Option<Stage>,
    error: StageError,
    upload_url: Option<String>,
}

struct Published {
    post_reference: String,
    upload_url: String,
    category_id: u32,
}

#[derive(Default)]
struct ClaimTable {
    locks: HashMap<String, Arc<Mutex<()>>>,
    /// Fingerprints this orchestrator has already recorded
    settled: HashSet<String>,
}

/// Serializes work on one fingerprint, so duplicate files in a batch run the
/// pipeline once and the rest see the recorded outcome.
#[derive(Default)]
struct Claims {
    table: Mutex<ClaimTable>,
}

impl Claims {
    async fn acquire(&self, fingerprint: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut table = self.table.lock().await;
            table.locks.entry(fingerprint.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    async fn is_settled(&self, fingerprint: &str) -> bool {
        self.table.lock().await.settled.contains(fingerprint)
    }

    async fn release(&self, fingerprint: &str, guard: OwnedMutexGuard<()>, settled: bool) {
        let mut table = self.table.lock().await;
        if settled {
            table.settled.insert(fingerprint.to_string());
        }
        drop(guard);
        // Only the table's own handle left: nobody is waiting
        if table
            .locks
            .get(fingerprint)
            .map_or(false, |lock| Arc::strong_count(lock) == 1)
        {
            table.locks.remove(fingerprint);
        }
    }
}

/// Drives files through the pipeline and owns their terminal record
pub struct PipelineOrchestrator {
    store: Arc<StateStore>,
    capabilities: Capabilities,
    classifier: Arc<CategoryClassifier>,
    retry: RetryPolicy,
    options: OrchestratorOptions,
    cancel: CancellationToken,
    claims: Claims,
}

impl PipelineOrchestrator {
    pub fn new(
        store: Arc<StateStore>,
        capabilities: Capabilities,
        classifier: Arc<CategoryClassifier>,
        retry: RetryPolicy,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            store,
            capabilities,
            classifier,
            retry,
            options,
            cancel: CancellationToken::new(),
            claims: Claims::default(),
        }
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    /// Decide what a file would receive without touching it
    pub async fn plan(&self, identity: &FileIdentity) -> PlannedAction {
        plan_action(&self.store, &self.options, identity).await
    }

    /// Run one file to a terminal state.
    ///
    /// Stage failures never surface as `Err`; they end up in the report and
    /// the failed store. `Err` means the store itself could not be written.
    ///
    /// Calls for files with the same content wait for each other. Once one
    /// has recorded an outcome, later duplicates in the same run are skipped
    /// even when `force` is set.
    #[instrument(skip(self, path), fields(file = %path.display()))]
    pub async fn process_file(&self, path: &Path) -> Result<FileReport, StoreError> {
        let identity = match FileIdentity::from_path(path).await {
            Ok(identity) => identity,
            Err(e) => {
                let error = StageError::permanent(format!("cannot read file: {}", e));
                error!(error = %error, "Cannot compute file identity");
                return Ok(FileReport {
                    path: path.to_path_buf(),
                    identity: None,
                    disposition: Disposition::Failed {
                        error: RecordedError::new(None, &error),
                        recorded: false,
                    },
                    stages: Vec::new(),
                });
            }
        };

        let guard = self.claims.acquire(&identity.fingerprint).await;
        let result = self.process_claimed(path, &identity).await;
        let settled = matches!(&result, Ok(report) if report.disposition_recorded());
        self.claims.release(&identity.fingerprint, guard, settled).await;
        result
    }

    /// Body of `process_file`, run while holding the fingerprint's claim
    async fn process_claimed(&self, path: &Path, identity: &FileIdentity) -> Result<FileReport, StoreError> {
        let identity = identity.clone();
        let mut report = FileReport {
            path: path.to_path_buf(),
            identity: Some(identity.clone()),
            disposition: Disposition::SkippedDone,
            stages: Vec::new(),
        };

        let action = if self.claims.is_settled(&identity.fingerprint).await {
            match self.store.get(&identity).await.map(|r| r.status) {
                Some(RecordStatus::Failed) => PlannedAction::SkipFailed,
                _ => PlannedAction::SkipDone,
            }
        } else {
            self.plan(&identity).await
        };

        match action {
            PlannedAction::SkipDone => {
                info!(file = %identity, "Already completed, skipping");
                return Ok(report);
            }
            PlannedAction::SkipFailed => {
                info!(file = %identity, "Previously failed, skipping");
                report.disposition = Disposition::SkippedFailed;
                return Ok(report);
            }
            PlannedAction::Reprocess if self.options.force => {
                self.store.clear(&identity).await?;
            }
            PlannedAction::Process | PlannedAction::Reprocess => {}
        }

        let outcome = match self.run_stages(path, &identity, &mut report.stages).await {
            Ok(published) => {
                info!(
                    file = %identity,
                    post = %published.post_reference,
                    category = published.category_id,
                    "File completed"
                );
                report.disposition = Disposition::Completed {
                    post_reference: published.post_reference.clone(),
                    category_id: published.category_id,
                };
                RecordOutcome::Completed {
                    post_reference: published.post_reference,
                    upload_url: published.upload_url,
                    category_id: published.category_id,
                }
            }
            Err(abort) => {
                let recorded = RecordedError::new(abort.stage, &abort.error);
                error!(
                    file = %identity,
                    stage = abort.stage.map(|s| s.as_str()).unwrap_or("none"),
                    kind = %abort.error.kind,
                    error = %abort.error.message,
                    "File failed"
                );
                report.disposition = Disposition::Failed {
                    error: recorded.clone(),
                    recorded: true,
                };
                RecordOutcome::Failed {
                    error: recorded,
                    upload_url: abort.upload_url,
                }
            }
        };

        self.store.record(&identity, outcome).await?;
        Ok(report)
    }

    /// Pending through Publishing. Returns the publish result or the abort.
    async fn run_stages(
        &self,
        path: &Path,
        identity: &FileIdentity,
        outcomes: &mut Vec<StageOutcome>,
    ) -> Result<Published, Abort> {
        let subject = identity.subject().to_string();
        let mut state = FileState::Pending;

        self.options
            .subject_rules
            .check(&subject)
            .map_err(|error| Abort {
                stage: None,
                error,
                upload_url: None,
            })?;

        state = state.advance();
        debug_assert_eq!(state, FileState::Uploading);
        let upload_url = self
            .stage(Stage::Upload, outcomes, |url| StagePayload::Uploaded { url }, || {
                self.capabilities.uploader.upload(path)
            })
            .await
            .map_err(|error| Abort {
                stage: Some(Stage::Upload),
                error,
                upload_url: None,
            })?;

        let fail = |stage: Stage, error: StageError| Abort {
            stage: Some(stage),
            error,
            upload_url: Some(upload_url.clone()),
        };

        state = state.advance();
        let content = self
            .stage(Stage::Describe, outcomes, |content| StagePayload::Described { content }, || {
                self.capabilities.content.describe(&subject)
            })
            .await
            .map_err(|e| fail(Stage::Describe, e))?;

        state = state.advance();
        let image = self
            .stage(Stage::AcquireImage, outcomes, StagePayload::Image, || {
                self.capabilities.images.acquire(&subject)
            })
            .await
            .map_err(|e| fail(Stage::AcquireImage, e))?;

        state = state.advance();
        let classification = self
            .stage(Stage::Classify, outcomes, StagePayload::Classified, || async {
                Ok(self.classifier.classify(&subject, &content).await)
            })
            .await
            .map_err(|e| fail(Stage::Classify, e))?;

        let taxonomy = self.classifier.taxonomy();
        let category = taxonomy
            .get(classification.category_id)
            .unwrap_or_else(|| taxonomy.fallback())
            .clone();
        let draft = PostDraft {
            title: subject.clone(),
            body: PostDraft::compose_body(&content, &self.options.download_template, &upload_url),
            image,
            category,
        };

        state = state.advance();
        let post_reference = self
            .stage(Stage::Publish, outcomes, |post_reference| StagePayload::Published { post_reference }, || {
                self.capabilities.publisher.publish(&draft)
            })
            .await
            .map_err(|e| fail(Stage::Publish, e))?;

        state = state.advance();
        debug!(?state, "All stages finished");

        Ok(Published {
            post_reference,
            upload_url,
            category_id: draft.category.id,
        })
    }

    /// Run one stage with retries and record its outcome
    async fn stage<T, F, Fut, P>(
        &self,
        stage: Stage,
        outcomes: &mut Vec<StageOutcome>,
        payload: P,
        call: F,
    ) -> Result<T, StageError>
    where
        T: Clone,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StageError>>,
        P: Fn(T) -> StagePayload,
    {
        let (result, attempts) = self.attempt_with_retry(stage, call).await;
        outcomes.push(StageOutcome {
            stage,
            attempts,
            result: result.clone().map(payload),
        });
        result
    }

    /// Call until success, abort, or cancellation. Returns the attempt count.
    async fn attempt_with_retry<T, F, Fut>(
        &self,
        stage: Stage,
        mut call: F,
    ) -> (Result<T, StageError>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StageError>>,
    {
        let mut retry = RetryState::default();

        loop {
            if self.cancel.is_cancelled() {
                return (Err(StageError::cancelled()), retry.attempt_count);
            }

            retry.attempt_count += 1;
            debug!(stage = %stage, attempt = retry.attempt_count, "Running stage");

            let error = match call().await {
                Ok(value) => return (Ok(value), retry.attempt_count),
                Err(error) => error,
            };

            // The in-flight call has returned; abandon the file here
            if self.cancel.is_cancelled() {
                return (Err(StageError::cancelled()), retry.attempt_count);
            }

            match self.retry.decide(error.kind, &retry) {
                RetryDecision::Retry(delay) => {
                    retry.next_backoff = Some(delay);
                    if error.kind == ErrorKind::QuotaExceeded {
                        retry.quota_retries += 1;
                    }
                    warn!(
                        stage = %stage,
                        attempt = retry.attempt_count,
                        delay_ms = delay.as_millis() as u64,
                        kind = %error.kind,
                        error = %error.message,
                        "Stage failed, retrying"
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancel.cancelled() => {
                            return (Err(StageError::cancelled()), retry.attempt_count);
                        }
                    }
                }
                RetryDecision::Abort => {
                    warn!(
                        stage = %stage,
                        attempt = retry.attempt_count,
                        kind = %error.kind,
                        error = %error.message,
                        "Stage failed, giving up"
                    );
                    return (Err(error), retry.attempt_count);
                }
            }
        }
    }
}
