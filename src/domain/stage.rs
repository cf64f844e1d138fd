//! Per-file state machine vocabulary.
//!
//! A file moves strictly forward through
//! `Pending → Uploading → DescribingContent → AcquiringImage → Classifying →
//! Publishing → Completed | Failed`. These types are ephemeral: they live for
//! one orchestration run and are never persisted on their own.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::artifact::{Classification, ImageRef};
use super::error::{ErrorKind, StageError};

/// One step of the per-file pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Upload,
    Describe,
    AcquireImage,
    Classify,
    Publish,
}

impl Stage {
    /// All stages in execution order
    pub const ORDER: [Stage; 5] = [
        Stage::Upload,
        Stage::Describe,
        Stage::AcquireImage,
        Stage::Classify,
        Stage::Publish,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Describe => "describe",
            Self::AcquireImage => "acquire_image",
            Self::Classify => "classify",
            Self::Publish => "publish",
        }
    }

    /// State the file is in while this stage runs
    pub fn state(&self) -> FileState {
        match self {
            Self::Upload => FileState::Uploading,
            Self::Describe => FileState::DescribingContent,
            Self::AcquireImage => FileState::AcquiringImage,
            Self::Classify => FileState::Classifying,
            Self::Publish => FileState::Publishing,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Orchestrator state for one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Pending,
    Uploading,
    DescribingContent,
    AcquiringImage,
    Classifying,
    Publishing,
    Completed,
    Failed,
}

impl FileState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Stage executed in this state, if any
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Uploading => Some(Stage::Upload),
            Self::DescribingContent => Some(Stage::Describe),
            Self::AcquiringImage => Some(Stage::AcquireImage),
            Self::Classifying => Some(Stage::Classify),
            Self::Publishing => Some(Stage::Publish),
            Self::Pending | Self::Completed | Self::Failed => None,
        }
    }

    /// Next state on success. Terminal states map to themselves.
    pub fn advance(&self) -> FileState {
        match self {
            Self::Pending => Self::Uploading,
            Self::Uploading => Self::DescribingContent,
            Self::DescribingContent => Self::AcquiringImage,
            Self::AcquiringImage => Self::Classifying,
            Self::Classifying => Self::Publishing,
            Self::Publishing => Self::Completed,
            Self::Completed => Self::Completed,
            Self::Failed => Self::Failed,
        }
    }
}

/// Value produced by a successful stage
#[derive(Debug, Clone, PartialEq)]
pub enum StagePayload {
    Uploaded { url: String },
    Described { content: String },
    Image(ImageRef),
    Classified(Classification),
    Published { post_reference: String },
}

/// Result of running one stage to completion (including retries)
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub stage: Stage,
    pub attempts: u32,
    pub result: Result<StagePayload, StageError>,
}

impl StageOutcome {
    pub fn success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.result.as_ref().err().map(|e| e.kind)
    }
}

/// Retry bookkeeping for the stage currently running
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    pub attempt_count: u32,
    /// Retries already spent on quota errors, whatever the attempt number
    pub quota_retries: u32,
    pub next_backoff: Option<Duration>,
}

/// Tagged result of one step in a fallback chain
#[derive(Debug, Clone, PartialEq)]
pub enum Attempt<T> {
    Success(T),
    Exhausted { reason: String },
}

impl<T> Attempt<T> {
    pub fn exhausted(reason: impl Into<String>) -> Self {
        Self::Exhausted {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}
