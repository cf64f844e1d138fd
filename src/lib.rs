//! craftpost - papercraft archive publishing pipeline
//!
//! Takes a directory of papercraft archives and turns each one into a
//! published blog post: upload the archive, generate a description, find
//! or generate a featured image, pick a category and publish.
//!
//! # Architecture
//!
//! Each file is identified by a hash of its contents and moves through a
//! fixed sequence of stages. Only the terminal outcome is persisted:
//! - Completed files are skipped on every later run
//! - Failed files keep their error kind, stage and attempt count
//! - A crash mid-file leaves no record, so the file runs again from the start
//!
//! # Modules
//!
//! - `adapters`: External services (file host, OpenAI, image search, WordPress)
//! - `core`: State store, retry policy, orchestrator, classifier, batch runner
//! - `domain`: Data structures (FileIdentity, ProcessingRecord, Stage, Taxonomy)
//! - `config`: YAML config discovery and environment overrides
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Process every archive in the configured directory
//! craftpost run
//!
//! # See what would happen
//! craftpost run --dry-run
//!
//! # Inspect failures
//! craftpost failed
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use crate::core::{BatchRunner, BatchSummary, PipelineOrchestrator, RetryPolicy, StateStore};
pub use config::Settings;
pub use domain::{ErrorKind, FileIdentity, ProcessingRecord, Stage, StageError};
