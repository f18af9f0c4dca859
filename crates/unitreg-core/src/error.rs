//! Error types for the regression orchestrator.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or filtering the work-item registry.
///
/// A filter value that matches nothing is an error, not an empty set:
/// "no such group" and "group exists but is empty right now" are different
/// situations and the caller needs to know which one it hit.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry source unreadable: {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("registry line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("duplicate unit '{unit}' at registry line {line}")]
    DuplicateUnit { unit: String, line: usize },

    #[error("no work item in group '{0}'")]
    GroupNotFound(String),

    #[error("no work item named '{0}'")]
    UnitNotFound(String),
}

/// Errors raised by the checkpoint journal.
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("checkpoint journal i/o: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("checkpoint journal corrupt at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    #[error("checkpoint journal has no header: {0}")]
    MissingHeader(PathBuf),

    #[error("duplicate checkpoint for item index {index}")]
    Duplicate { index: usize },

    #[error("checkpoint fingerprint mismatch: journal has {found}, run configuration is {expected}")]
    FingerprintMismatch { expected: String, found: String },
}

/// Top-level run errors.
///
/// Per-item failures never surface here; they are recorded in the item's
/// `JobResult` and the run keeps going. Only registry-level and
/// checkpoint-integrity conditions abort a run.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("unknown analysis category: {0}")]
    UnknownCategory(String),

    #[error("run cancelled")]
    Cancelled,

    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, RunError>;
