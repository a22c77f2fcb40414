//! Persistent failure history
//!
//! Failure records live in `<state_dir>/failures.json` and are never
//! deleted: clearing a model stamps `resolved_at` on its open records.
//!
//! The same file doubles as a write-ahead log for local executions. A model
//! is marked running before it starts and unmarked when it completes. A
//! hard OOM kills the process before the mark is removed, so any model still
//! marked running when the file is next opened is converted into an `OOM`
//! failure record.

use chrono::{DateTime, Utc};
use icebreaker_core::{FailureKind, FailureRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

/// File name of the failure history inside the state directory
pub const FAILURES_FILE: &str = "failures.json";

/// Detail attached to records recovered from a leftover running mark
pub const CRASH_DETAIL: &str = "previous local run did not complete";

/// State persistence errors
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Failed to read state file {0}: {1}")]
    IoError(String, String),

    #[error("Failed to parse state file {0}: {1}")]
    ParseError(String, String),

    #[error("Failed to write state file {0}: {1}")]
    WriteError(String, String),
}

/// A local execution that has started but not completed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningEntry {
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct FailureLog {
    #[serde(default)]
    records: Vec<FailureRecord>,

    #[serde(default)]
    running: BTreeMap<String, RunningEntry>,

    #[serde(default)]
    local_runs: u64,
}

/// Append-only failure records shared by every model in a run
#[derive(Debug, Default)]
pub struct FailureHistory {
    /// Backing file; `None` keeps the history in memory only
    path: Option<PathBuf>,

    log: RwLock<FailureLog>,

    /// Records created from leftover running marks when the file was opened
    recovered: Vec<FailureRecord>,
}

impl FailureHistory {
    /// History that is never written to disk
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open `<state_dir>/failures.json`, creating an empty history if absent
    pub fn open(state_dir: &Path) -> Result<Self, StateError> {
        Self::from_file(&state_dir.join(FAILURES_FILE))
    }

    /// Open a history file and convert leftover running marks into failures
    pub fn from_file(path: &Path) -> Result<Self, StateError> {
        let mut log = if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| StateError::IoError(path.display().to_string(), e.to_string()))?;
            serde_json::from_str::<FailureLog>(&content)
                .map_err(|e| StateError::ParseError(path.display().to_string(), e.to_string()))?
        } else {
            FailureLog::default()
        };

        let recovered: Vec<FailureRecord> = std::mem::take(&mut log.running)
            .into_iter()
            .map(|(model_id, entry)| {
                tracing::warn!(
                    model = %model_id,
                    started_at = %entry.started_at.to_rfc3339(),
                    "local execution never completed; recording as OOM"
                );
                FailureRecord::new(model_id, FailureKind::Oom).with_detail(CRASH_DETAIL)
            })
            .collect();
        log.records.extend(recovered.iter().cloned());

        let history = Self {
            path: Some(path.to_path_buf()),
            log: RwLock::new(log),
            recovered,
        };

        if !history.recovered.is_empty() {
            history.persist()?;
        }

        Ok(history)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Failures detected from leftover running marks at open time
    pub fn recovered(&self) -> &[FailureRecord] {
        &self.recovered
    }

    /// Append a failure of the given kind
    pub fn record(&self, model_id: &str, kind: FailureKind) -> Result<(), StateError> {
        self.record_failure(FailureRecord::new(model_id, kind))
    }

    /// Append a failure classified from the local engine's error message
    pub fn record_error(&self, model_id: &str, message: &str) -> Result<FailureKind, StateError> {
        let kind = FailureKind::classify(message);
        self.record_failure(FailureRecord::new(model_id, kind).with_detail(truncate(message, 200)))?;
        Ok(kind)
    }

    pub fn record_failure(&self, record: FailureRecord) -> Result<(), StateError> {
        tracing::info!(model = %record.model_id, kind = %record.kind, "recording local failure");
        self.mutate(|log| {
            log.running.remove(&record.model_id);
            log.records.push(record);
        })
    }

    /// Whether any record for the model is still unresolved
    pub fn has_unresolved(&self, model_id: &str) -> bool {
        self.unresolved(model_id).is_some()
    }

    /// The most recent unresolved record for the model
    pub fn unresolved(&self, model_id: &str) -> Option<FailureRecord> {
        self.read()
            .records
            .iter()
            .rev()
            .find(|r| r.model_id == model_id && r.is_unresolved())
            .cloned()
    }

    /// Resolve every open record for the model; returns how many were resolved
    pub fn clear(&self, model_id: &str) -> Result<usize, StateError> {
        let now = Utc::now();
        let mut resolved = 0;
        self.mutate(|log| {
            for record in log
                .records
                .iter_mut()
                .filter(|r| r.model_id == model_id && r.is_unresolved())
            {
                record.resolved_at = Some(now);
                resolved += 1;
            }
        })?;
        tracing::info!(model = %model_id, resolved, "cleared failure history");
        Ok(resolved)
    }

    /// Write-ahead mark before a local execution starts
    pub fn mark_running(&self, model_id: &str) -> Result<(), StateError> {
        self.mutate(|log| {
            log.running.insert(
                model_id.to_string(),
                RunningEntry {
                    started_at: Utc::now(),
                },
            );
        })
    }

    /// Remove the running mark after a local execution succeeded
    pub fn mark_complete(&self, model_id: &str) -> Result<(), StateError> {
        self.mutate(|log| {
            if log.running.remove(model_id).is_some() {
                log.local_runs += 1;
            }
        })
    }

    pub fn is_running(&self, model_id: &str) -> bool {
        self.read().running.contains_key(model_id)
    }

    /// All records, oldest first
    pub fn records(&self) -> Vec<FailureRecord> {
        self.read().records.clone()
    }

    /// Records for one model, oldest first
    pub fn records_for(&self, model_id: &str) -> Vec<FailureRecord> {
        self.read()
            .records
            .iter()
            .filter(|r| r.model_id == model_id)
            .cloned()
            .collect()
    }

    /// Number of completed local executions
    pub fn local_runs(&self) -> u64 {
        self.read().local_runs
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, FailureLog> {
        self.log.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn mutate(&self, change: impl FnOnce(&mut FailureLog)) -> Result<(), StateError> {
        {
            let mut log = self.log.write().unwrap_or_else(PoisonError::into_inner);
            change(&mut log);
        }
        self.persist()
    }

    fn persist(&self) -> Result<(), StateError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let json = serde_json::to_string_pretty(&*self.read())
            .map_err(|e| StateError::WriteError(path.display().to_string(), e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StateError::WriteError(parent.display().to_string(), e.to_string()))?;
        }
        std::fs::write(path, json)
            .map_err(|e| StateError::WriteError(path.display().to_string(), e.to_string()))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
