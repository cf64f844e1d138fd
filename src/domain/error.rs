//! Error taxonomy shared by every stage of the pipeline.
//!
//! Capability implementations classify their failures into an [`ErrorKind`]
//! before returning, so the orchestrator never has to guess whether a
//! failure is worth retrying.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a stage failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network timeout, 5xx, rate limiting
    Transient,

    /// Invalid or missing credentials
    Auth,

    /// Account quota exhausted
    QuotaExceeded,

    /// Malformed input, unsupported file type, rejected request
    Permanent,

    /// Run-level cancellation observed between external calls
    Cancelled,
}

impl ErrorKind {
    /// Classify an HTTP status code.
    ///
    /// `body` is inspected only for 429 responses, where providers signal an
    /// exhausted quota with the same status as ordinary rate limiting.
    pub fn from_http_status(status: u16, body: &str) -> Self {
        match status {
            401 | 403 => Self::Auth,
            429 => {
                let body = body.to_lowercase();
                if body.contains("insufficient_quota") || body.contains("quota") {
                    Self::QuotaExceeded
                } else {
                    Self::Transient
                }
            }
            408 | 500..=599 => Self::Transient,
            _ => Self::Permanent,
        }
    }

    /// Short lowercase label used in logs and the CLI
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Auth => "auth",
            Self::QuotaExceeded => "quota_exceeded",
            Self::Permanent => "permanent",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The only error type a capability interface may return
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct StageError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    pub fn quota(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::QuotaExceeded, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "run cancelled")
    }

    /// Classify a transport-level reqwest failure.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::new(ErrorKind::from_http_status(status.as_u16(), ""), err.to_string());
        }
        if err.is_timeout() || err.is_connect() || err.is_request() {
            Self::transient(err.to_string())
        } else {
            Self::permanent(err.to_string())
        }
    }
}
