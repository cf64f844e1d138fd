//! Persisted processing outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{ErrorKind, StageError};
use super::identity::FileIdentity;
use super::stage::Stage;

/// Terminal status of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Completed,
    Failed,
}

/// Error preserved verbatim for operator inspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedError {
    pub kind: ErrorKind,

    /// Stage that failed; absent for failures before the first stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,

    pub message: String,
}

impl RecordedError {
    pub fn new(stage: Option<Stage>, error: &StageError) -> Self {
        Self {
            kind: error.kind,
            stage,
            message: error.message.clone(),
        }
    }
}

/// One entry in the processed or failed store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingRecord {
    pub identity: FileIdentity,
    pub status: RecordStatus,

    /// When the terminal outcome was recorded
    pub timestamp: DateTime<Utc>,

    /// Number of runs that reached a terminal outcome for this identity
    pub attempts: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<RecordedError>,

    /// Published post reference (URL)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_reference: Option<String>,

    /// Download URL from the file host, kept for manual recovery
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<u32>,
}

/// What the orchestrator hands to the store at a terminal transition
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Completed {
        post_reference: String,
        upload_url: String,
        category_id: u32,
    },
    Failed {
        error: RecordedError,
        /// Upload URL if the upload stage had already succeeded
        upload_url: Option<String>,
    },
}

impl RecordOutcome {
    pub fn status(&self) -> RecordStatus {
        match self {
            Self::Completed { .. } => RecordStatus::Completed,
            Self::Failed { .. } => RecordStatus::Failed,
        }
    }
}

impl ProcessingRecord {
    /// Build a record for a terminal outcome, carrying forward the attempt
    /// count from a previous record of the same identity.
    pub fn from_outcome(
        identity: FileIdentity,
        outcome: RecordOutcome,
        previous_attempts: u32,
    ) -> Self {
        let status = outcome.status();
        let mut record = Self {
            identity,
            status,
            timestamp: Utc::now(),
            attempts: previous_attempts + 1,
            last_error: None,
            result_reference: None,
            upload_url: None,
            category_id: None,
        };

        match outcome {
            RecordOutcome::Completed {
                post_reference,
                upload_url,
                category_id,
            } => {
                record.result_reference = Some(post_reference);
                record.upload_url = Some(upload_url);
                record.category_id = Some(category_id);
            }
            RecordOutcome::Failed { error, upload_url } => {
                record.last_error = Some(error);
                record.upload_url = upload_url;
            }
        }

        record
    }
}
