//! Core orchestration logic.
//!
//! This module contains:
//! - StateStore: Durable processed/failed records
//! - RetryPolicy: Retry-or-abort decisions per error kind
//! - PipelineOrchestrator: Per-file state machine
//! - CategoryClassifier: Keyword scoring with AI fallback
//! - FallbackImageAcquirer: Scrape-then-generate image chain
//! - BatchRunner: Spaced, bounded-concurrency batch execution

pub mod batch;
pub mod classifier;
pub mod image;
pub mod lock;
pub mod orchestrator;
pub mod retry;
pub mod state_store;
pub mod subject;

// Re-export commonly used types
pub use batch::{discover_files, plan_files, BatchRunner, BatchSummary, FailedFile, PlanEntry};
pub use classifier::CategoryClassifier;
pub use image::{FallbackImageAcquirer, ImageSettings};
pub use lock::DataDirLock;
pub use orchestrator::{
    plan_action, Capabilities, Disposition, FileReport, OrchestratorOptions, PipelineOrchestrator,
    PlannedAction, PreviouslyFailed,
};
pub use retry::{RetryDecision, RetryPolicy};
pub use state_store::{ResetScope, StateStore, StoreError, StoreStats};
pub use subject::SubjectRules;
