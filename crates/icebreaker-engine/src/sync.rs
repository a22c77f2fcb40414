//! Sync collaborator
//!
//! The routing core reports every execution outcome to a collaborator that
//! decides what to replicate between venues. The collaborator in turn tells
//! the Dependencies gate whether an upstream model's output is available
//! locally, and which models last ran in the cloud without being synced.

use chrono::{DateTime, Utc};
use icebreaker_core::{UnsupportedConstruct, Venue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use crate::state::StateError;

/// File name of the sync ledger inside the state directory
pub const SYNC_FILE: &str = "sync.json";

/// What happened when a model was executed
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub model_id: String,
    pub venue: Venue,
    pub duration: Duration,

    /// Constructs that kept the model off the local engine
    pub unsupported: Vec<UnsupportedConstruct>,
}

impl ExecutionOutcome {
    pub fn new(model_id: impl Into<String>, venue: Venue, duration: Duration) -> Self {
        Self {
            model_id: model_id.into(),
            venue,
            duration,
            unsupported: Vec::new(),
        }
    }

    pub fn with_unsupported(mut self, unsupported: Vec<UnsupportedConstruct>) -> Self {
        self.unsupported = unsupported;
        self
    }
}

/// Replication collaborator consumed by the Dependencies gate
pub trait SyncCollaborator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the model's latest output can be read by the local engine
    fn is_materialized_locally(&self, model_id: &str) -> bool;

    /// Whether the model's output became readable locally at or after `since`
    ///
    /// The Dependencies gate asks this for upstream models routed to the cloud
    /// in the current run, so output left over from an earlier run does not count.
    fn materialized_since(&self, model_id: &str, since: DateTime<Utc>) -> bool;

    /// Venue of a prior run whose output has not been synchronized yet
    fn prior_venue(&self, model_id: &str) -> Option<Venue>;

    /// Receive the outcome of one execution
    fn report(&self, outcome: &ExecutionOutcome) -> Result<(), StateError>;
}

/// Collaborator that knows nothing and keeps nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSync;

impl SyncCollaborator for NoopSync {
    fn name(&self) -> &'static str {
        "none"
    }

    fn is_materialized_locally(&self, _model_id: &str) -> bool {
        false
    }

    fn materialized_since(&self, _model_id: &str, _since: DateTime<Utc>) -> bool {
        false
    }

    fn prior_venue(&self, _model_id: &str) -> Option<Venue> {
        None
    }

    fn report(&self, _outcome: &ExecutionOutcome) -> Result<(), StateError> {
        Ok(())
    }
}

/// Last known state of one model's output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEntry {
    /// Venue of the last execution
    pub venue: Venue,

    /// Output is readable by the local engine
    pub materialized_locally: bool,

    /// Cloud output waiting to be replicated
    pub pending: bool,

    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    models: BTreeMap<String, SyncEntry>,
}

/// JSON-persisted sync state across incremental runs
#[derive(Debug, Default)]
pub struct SyncLedger {
    path: Option<PathBuf>,
    ledger: RwLock<LedgerFile>,
}

impl SyncLedger {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open `<state_dir>/sync.json`, starting empty if absent
    pub fn open(state_dir: &Path) -> Result<Self, StateError> {
        let path = state_dir.join(SYNC_FILE);
        let ledger = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| StateError::IoError(path.display().to_string(), e.to_string()))?;
            serde_json::from_str(&content)
                .map_err(|e| StateError::ParseError(path.display().to_string(), e.to_string()))?
        } else {
            LedgerFile::default()
        };

        Ok(Self {
            path: Some(path),
            ledger: RwLock::new(ledger),
        })
    }

    pub fn entry(&self, model_id: &str) -> Option<SyncEntry> {
        self.read().models.get(model_id).cloned()
    }

    /// All entries by model id
    pub fn entries(&self) -> BTreeMap<String, SyncEntry> {
        self.read().models.clone()
    }

    /// Models whose cloud output has not been replicated
    pub fn pending(&self) -> Vec<String> {
        self.read()
            .models
            .iter()
            .filter(|(_, e)| e.pending)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Record that a model's cloud output now exists locally
    ///
    /// Returns false if the model has no entry.
    pub fn mark_synced(&self, model_id: &str) -> Result<bool, StateError> {
        let found = {
            let mut ledger = self.ledger.write().unwrap_or_else(PoisonError::into_inner);
            match ledger.models.get_mut(model_id) {
                Some(entry) => {
                    entry.materialized_locally = true;
                    entry.pending = false;
                    entry.updated_at = Utc::now();
                    true
                }
                None => false,
            }
        };

        if found {
            tracing::info!(model = %model_id, "marked as synced");
            self.persist()?;
        }
        Ok(found)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, LedgerFile> {
        self.ledger.read().unwrap_or_else(PoisonError::into_inner)
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

impl SyncCollaborator for SyncLedger {
    fn name(&self) -> &'static str {
        "ledger"
    }

    fn is_materialized_locally(&self, model_id: &str) -> bool {
        self.read()
            .models
            .get(model_id)
            .is_some_and(|e| e.materialized_locally)
    }

    fn materialized_since(&self, model_id: &str, since: DateTime<Utc>) -> bool {
        self.read()
            .models
            .get(model_id)
            .is_some_and(|e| e.materialized_locally && e.updated_at >= since)
    }

    fn prior_venue(&self, model_id: &str) -> Option<Venue> {
        self.read()
            .models
            .get(model_id)
            .filter(|e| e.pending)
            .map(|e| e.venue)
    }

    fn report(&self, outcome: &ExecutionOutcome) -> Result<(), StateError> {
        let local = outcome.venue == Venue::Local;
        {
            let mut ledger = self.ledger.write().unwrap_or_else(PoisonError::into_inner);
            ledger.models.insert(
                outcome.model_id.clone(),
                SyncEntry {
                    venue: outcome.venue,
                    materialized_locally: local,
                    pending: !local,
                    updated_at: Utc::now(),
                    duration_seconds: outcome.duration.as_secs_f64(),
                },
            );
        }
        tracing::debug!(
            model = %outcome.model_id,
            venue = %outcome.venue,
            unsupported = outcome.unsupported.len(),
            "execution reported to sync ledger"
        );
        self.persist()
    }
}
