//! Append-only checkpoint journal for resumable runs.
//!
//! A journal is a JSONL file: one header line identifying the run and its
//! configuration fingerprint, then one completion record per work item that
//! reached a terminal outcome. Records are only ever appended — a resumed
//! run's journal is a strict superset of the interrupted one.
//!
//! All appends flow through a single mutex-guarded writer so that
//! concurrently finishing executors can never interleave or lose a record.

use crate::error::CheckpointError;
use crate::executor::JobResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// First line of every journal: which run this is and what configuration
/// produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JournalHeader {
    pub run_id: String,

    /// Digest of the run configuration, see [`config_fingerprint`].
    pub fingerprint: String,

    pub category: String,
    pub created_at: DateTime<Utc>,
}

/// One completed work item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointRecord {
    pub run_id: String,

    /// Index of the item in the filtered registry order.
    pub index: usize,

    pub unit: String,
    pub result: JobResult,
    pub completed_at: DateTime<Utc>,
}

/// Serialized journal line; the header opens the file, records follow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum JournalLine {
    Header(JournalHeader),
    Complete(CheckpointRecord),
}

/// Deterministic digest of the run configuration a journal belongs to.
///
/// Resuming a journal produced by a different category, command, registry
/// or filter set would silently skip the wrong items; the fingerprint turns
/// that into a pre-flight error instead.
pub fn config_fingerprint(
    category: &str,
    command: &[String],
    registry: &Path,
    group: Option<&str>,
    unit: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(category.as_bytes());
    hasher.update(b"\0");
    for part in command {
        hasher.update(part.as_bytes());
        hasher.update(b"\0");
    }
    hasher.update(registry.to_string_lossy().as_bytes());
    hasher.update(b"\0");
    hasher.update(group.unwrap_or("").as_bytes());
    hasher.update(b"\0");
    hasher.update(unit.unwrap_or("").as_bytes());
    hex::encode(hasher.finalize())
}

/// Checkpoint storage consulted by the scheduler.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Run this store belongs to.
    fn run_id(&self) -> &str;

    /// Configuration fingerprint recorded at creation.
    fn fingerprint(&self) -> &str;

    /// Whether the item at `index` already has a terminal outcome.
    async fn is_complete(&self, index: usize) -> bool;

    /// The previously persisted result for `index`, if any.
    async fn prior_result(&self, index: usize) -> Option<JobResult>;

    /// Append a completion record. Appends are serialized internally; a
    /// second record for the same index is a fatal integrity error.
    async fn record(&self, record: CheckpointRecord) -> Result<(), CheckpointError>;
}

// ---------------------------------------------------------------------------
// JournalStore (file-backed)
// ---------------------------------------------------------------------------

struct JournalState {
    file: tokio::fs::File,
    completed: HashMap<usize, JobResult>,
}

/// File-backed JSONL checkpoint journal.
pub struct JournalStore {
    header: JournalHeader,
    path: PathBuf,
    state: Mutex<JournalState>,
}

impl JournalStore {
    /// Create a fresh journal at `path` and write its header line.
    ///
    /// Fails if the file already exists — a journal is never overwritten.
    pub async fn create(path: &Path, header: JournalHeader) -> Result<Self, CheckpointError> {
        let mut file = tokio::fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(path)
            .await
            .map_err(|source| CheckpointError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        let line = encode_line(&JournalLine::Header(header.clone()))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|source| CheckpointError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        file.flush().await.map_err(|source| CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Self {
            header,
            path: path.to_path_buf(),
            state: Mutex::new(JournalState {
                file,
                completed: HashMap::new(),
            }),
        })
    }

    /// Open an existing journal for resume, replaying its records.
    pub async fn open(path: &Path) -> Result<Self, CheckpointError> {
        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| CheckpointError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;

        let mut header: Option<JournalHeader> = None;
        let mut completed: HashMap<usize, JobResult> = HashMap::new();

        for (lineno, raw) in content.lines().enumerate() {
            let line = lineno + 1;
            if raw.trim().is_empty() {
                continue;
            }
            let parsed: JournalLine =
                serde_json::from_str(raw).map_err(|e| CheckpointError::Corrupt {
                    line,
                    reason: e.to_string(),
                })?;
            match parsed {
                JournalLine::Header(h) => {
                    if header.is_some() {
                        return Err(CheckpointError::Corrupt {
                            line,
                            reason: "second header line".to_string(),
                        });
                    }
                    header = Some(h);
                }
                JournalLine::Complete(record) => {
                    let header = header.as_ref().ok_or(CheckpointError::MissingHeader(
                        path.to_path_buf(),
                    ))?;
                    if record.run_id != header.run_id {
                        return Err(CheckpointError::Corrupt {
                            line,
                            reason: format!(
                                "record belongs to run {}, journal is run {}",
                                record.run_id, header.run_id
                            ),
                        });
                    }
                    if completed.insert(record.index, record.result).is_some() {
                        return Err(CheckpointError::Corrupt {
                            line,
                            reason: format!("duplicate record for item index {}", record.index),
                        });
                    }
                }
            }
        }

        let header = header.ok_or(CheckpointError::MissingHeader(path.to_path_buf()))?;

        let file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(path)
            .await
            .map_err(|source| CheckpointError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Self {
            header,
            path: path.to_path_buf(),
            state: Mutex::new(JournalState { file, completed }),
        })
    }

    /// Number of completion records currently held.
    pub async fn completed_count(&self) -> usize {
        self.state.lock().await.completed.len()
    }

    /// Verify this journal matches the current run configuration.
    pub fn ensure_fingerprint(&self, expected: &str) -> Result<(), CheckpointError> {
        if self.header.fingerprint != expected {
            return Err(CheckpointError::FingerprintMismatch {
                expected: expected.to_string(),
                found: self.header.fingerprint.clone(),
            });
        }
        Ok(())
    }

    pub fn header(&self) -> &JournalHeader {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CheckpointStore for JournalStore {
    fn run_id(&self) -> &str {
        &self.header.run_id
    }

    fn fingerprint(&self) -> &str {
        &self.header.fingerprint
    }

    async fn is_complete(&self, index: usize) -> bool {
        self.state.lock().await.completed.contains_key(&index)
    }

    async fn prior_result(&self, index: usize) -> Option<JobResult> {
        self.state.lock().await.completed.get(&index).cloned()
    }

    async fn record(&self, record: CheckpointRecord) -> Result<(), CheckpointError> {
        let mut state = self.state.lock().await;
        if state.completed.contains_key(&record.index) {
            return Err(CheckpointError::Duplicate {
                index: record.index,
            });
        }

        let line = encode_line(&JournalLine::Complete(record.clone()))?;
        state
            .file
            .write_all(line.as_bytes())
            .await
            .map_err(|source| CheckpointError::Io {
                path: self.path.clone(),
                source,
            })?;
        state
            .file
            .flush()
            .await
            .map_err(|source| CheckpointError::Io {
                path: self.path.clone(),
                source,
            })?;

        state.completed.insert(record.index, record.result);
        Ok(())
    }
}

fn encode_line(line: &JournalLine) -> Result<String, CheckpointError> {
    let mut encoded = serde_json::to_string(line).map_err(|e| CheckpointError::Corrupt {
        line: 0,
        reason: e.to_string(),
    })?;
    encoded.push('\n');
    Ok(encoded)
}

// ---------------------------------------------------------------------------
// MemoryStore (testing)
// ---------------------------------------------------------------------------

/// In-memory checkpoint store satisfying the trait contract without a file.
#[derive(Debug)]
pub struct MemoryStore {
    run_id: String,
    fingerprint: String,
    completed: Mutex<HashMap<usize, JobResult>>,
}

impl MemoryStore {
    pub fn new(run_id: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            fingerprint: fingerprint.into(),
            completed: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    fn run_id(&self) -> &str {
        &self.run_id
    }

    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    async fn is_complete(&self, index: usize) -> bool {
        self.completed.lock().await.contains_key(&index)
    }

    async fn prior_result(&self, index: usize) -> Option<JobResult> {
        self.completed.lock().await.get(&index).cloned()
    }

    async fn record(&self, record: CheckpointRecord) -> Result<(), CheckpointError> {
        let mut completed = self.completed.lock().await;
        if completed.contains_key(&record.index) {
            return Err(CheckpointError::Duplicate {
                index: record.index,
            });
        }
        completed.insert(record.index, record.result);
        Ok(())
    }
}
