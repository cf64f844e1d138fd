//! Batch execution over a set of files.
//!
//! Starts are spaced by `inter_item_delay` and at most `concurrency` files
//! are in flight at once. A failed file never stops the batch; a cancelled
//! run stops pulling new files and lets in-flight ones wind down.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::{ErrorKind, FileIdentity, Stage};

use super::orchestrator::{
    plan_action, Disposition, FileReport, OrchestratorOptions, PipelineOrchestrator, PlannedAction,
};
use super::state_store::{StateStore, StoreError};

/// A file that ended Failed in this run
#[derive(Debug, Clone, Serialize)]
pub struct FailedFile {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    pub message: String,
}

/// Totals for one batch run
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    pub total: usize,
    /// Newly completed in this run
    pub completed: usize,
    pub skipped_done: usize,
    pub skipped_failed: usize,
    pub failed: usize,
    /// Never started because the run was cancelled
    pub not_started: usize,

    pub failures: Vec<FailedFile>,
}

impl BatchSummary {
    fn new(run_id: Uuid, total: usize) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            started_at: now,
            finished_at: now,
            total,
            completed: 0,
            skipped_done: 0,
            skipped_failed: 0,
            failed: 0,
            not_started: 0,
            failures: Vec::new(),
        }
    }

    fn add(&mut self, report: &FileReport) {
        match &report.disposition {
            Disposition::Completed { .. } => self.completed += 1,
            Disposition::SkippedDone => self.skipped_done += 1,
            Disposition::SkippedFailed => self.skipped_failed += 1,
            Disposition::Failed { error, .. } => {
                self.failed += 1;
                self.failures.push(FailedFile {
                    name: report.name(),
                    fingerprint: report.identity.as_ref().map(|i| i.fingerprint.clone()),
                    kind: error.kind,
                    stage: error.stage,
                    message: error.message.clone(),
                });
            }
        }
    }

    pub fn skipped(&self) -> usize {
        self.skipped_done + self.skipped_failed
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// Failures grouped by error kind
    pub fn failures_by_kind(&self) -> BTreeMap<&'static str, Vec<&FailedFile>> {
        let mut grouped: BTreeMap<&'static str, Vec<&FailedFile>> = BTreeMap::new();
        for failure in &self.failures {
            grouped.entry(failure.kind.as_str()).or_default().push(failure);
        }
        grouped
    }
}

/// Dry-run line for one file
#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub path: PathBuf,
    pub identity: Option<FileIdentity>,
    /// Planned action, or why the file cannot be read
    pub action: Result<PlannedAction, String>,
}

/// Runs the orchestrator over many files
pub struct BatchRunner {
    orchestrator: Arc<PipelineOrchestrator>,
}

impl BatchRunner {
    pub fn new(orchestrator: Arc<PipelineOrchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Arc<PipelineOrchestrator> {
        &self.orchestrator
    }

    /// Process every file; only a store write failure ends the run early
    #[instrument(skip(self, files), fields(files = files.len()))]
    pub async fn run(
        &self,
        files: Vec<PathBuf>,
        concurrency: usize,
        inter_item_delay: Duration,
    ) -> Result<BatchSummary, StoreError> {
        let run_id = Uuid::new_v4();
        let cancel = self.orchestrator.cancellation_token();
        let mut summary = BatchSummary::new(run_id, files.len());
        let concurrency = concurrency.max(1);

        info!(%run_id, concurrency, delay_ms = inter_item_delay.as_millis() as u64, "Starting batch");

        let gate = cancel.clone();
        let spaced = stream::iter(files.into_iter().enumerate())
            .then(move |(index, path)| {
                let cancel = cancel.clone();
                async move {
                    if index > 0 && !inter_item_delay.is_zero() {
                        tokio::select! {
                            _ = tokio::time::sleep(inter_item_delay) => {}
                            _ = cancel.cancelled() => {}
                        }
                    }
                    path
                }
            })
            .take_while(move |_| futures::future::ready(!gate.is_cancelled()));

        let mut reports = Box::pin(
            spaced
                .map(|path| {
                    let orchestrator = Arc::clone(&self.orchestrator);
                    async move { orchestrator.process_file(&path).await }
                })
                .buffer_unordered(concurrency),
        );

        let mut started = 0usize;
        while let Some(result) = reports.next().await {
            let report = result?;
            started += 1;
            summary.add(&report);
        }

        summary.not_started = summary.total - started;
        summary.finished_at = Utc::now();

        if summary.not_started > 0 {
            warn!(%run_id, not_started = summary.not_started, "Batch cancelled before all files started");
        }
        info!(
            %run_id,
            completed = summary.completed,
            skipped = summary.skipped(),
            failed = summary.failed,
            "Batch finished"
        );

        Ok(summary)
    }

    /// What `run` would do to each file, without calling any stage
    pub async fn plan(&self, files: &[PathBuf]) -> Vec<PlanEntry> {
        plan_files(self.orchestrator.store(), self.orchestrator.options(), files).await
    }
}

/// Dry run over a file list; needs only the store, no collaborators
pub async fn plan_files(
    store: &StateStore,
    options: &OrchestratorOptions,
    files: &[PathBuf],
) -> Vec<PlanEntry> {
    let mut entries = Vec::with_capacity(files.len());

    for path in files {
        let entry = match FileIdentity::from_path(path).await {
            Ok(identity) => PlanEntry {
                path: path.clone(),
                action: Ok(plan_action(store, options, &identity).await),
                identity: Some(identity),
            },
            Err(e) => PlanEntry {
                path: path.clone(),
                identity: None,
                action: Err(e.to_string()),
            },
        };
        entries.push(entry);
    }

    entries
}

/// Regular files in `dir` matching any of `patterns`, sorted and deduplicated
pub fn discover_files(dir: &Path, patterns: &[String]) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        anyhow::bail!("Input directory not found: {}", dir.display());
    }

    let base = glob::Pattern::escape(&dir.to_string_lossy());
    let mut files = Vec::new();

    for pattern in patterns {
        let full = format!("{}/{}", base.trim_end_matches('/'), pattern);
        let entries =
            glob::glob(&full).with_context(|| format!("Invalid file pattern: {}", pattern))?;

        for entry in entries {
            let path = entry.context("Failed to read directory entry")?;
            if path.is_file() {
                files.push(path);
            }
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}
