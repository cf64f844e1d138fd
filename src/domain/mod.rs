//! Domain types for the craftpost pipeline.
//!
//! This module contains the core data structures:
//! - Identity: Content-derived key for one input file
//! - Record: Persisted terminal outcome per identity
//! - Stage: Per-file state machine and ephemeral stage outcomes
//! - Artifact: Stage outputs (image, classification, post draft)
//! - Category: Validated taxonomy
//! - Error: Failure taxonomy shared by all capabilities

pub mod artifact;
pub mod category;
pub mod error;
pub mod identity;
pub mod record;
pub mod stage;

// Re-export commonly used types
pub use artifact::{Classification, ClassificationMethod, ImageRef, ImageSource, PostDraft};
pub use category::{Category, Taxonomy, TaxonomyError};
pub use error::{ErrorKind, StageError};
pub use identity::FileIdentity;
pub use record::{ProcessingRecord, RecordOutcome, RecordStatus, RecordedError};
pub use stage::{Attempt, FileState, RetryState, Stage, StageOutcome, StagePayload};
