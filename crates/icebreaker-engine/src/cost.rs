//! Historical cloud execution statistics
//!
//! Loaded from `<state_dir>/cloud_stats.json`, which is refreshed from the
//! warehouse's query history outside of the routing run:
//!
//! ```json
//! {
//!   "fetched_at": "2026-10-01T06:00:00Z",
//!   "source": "snowflake",
//!   "models": {
//!     "fct_orders": { "avg_seconds": 812.5, "avg_spill_bytes": 0, "avg_rows_produced": 1200000, "run_count": 14 }
//!   }
//! }
//! ```
//!
//! Statistics only ever produce advisory notes.

use chrono::{DateTime, Utc};
use icebreaker_core::{bytes_to_gb, CostConfig, Model};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::state::StateError;

/// File name of the statistics cache inside the state directory
pub const COST_FILE: &str = "cloud_stats.json";

/// Averages over recent cloud runs of one model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudStats {
    pub avg_seconds: f64,
    pub avg_spill_bytes: f64,
    pub avg_rows_produced: f64,
    pub run_count: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
}

/// Cloud statistics keyed by model name or unique id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostHistory {
    #[serde(default)]
    pub models: BTreeMap<String, CloudStats>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl CostHistory {
    /// Load `<state_dir>/cloud_stats.json`; a missing file is an empty history
    pub fn load(state_dir: &Path) -> Result<Self, StateError> {
        let path = state_dir.join(COST_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::from_file(&path)
    }

    pub fn from_file(path: &Path) -> Result<Self, StateError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StateError::IoError(path.display().to_string(), e.to_string()))?;
        serde_json::from_str(&content)
            .map_err(|e| StateError::ParseError(path.display().to_string(), e.to_string()))
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), StateError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| StateError::WriteError(path.display().to_string(), e.to_string()))?;
        std::fs::write(path, json)
            .map_err(|e| StateError::WriteError(path.display().to_string(), e.to_string()))
    }

    pub fn with_stats(mut self, model: impl Into<String>, stats: CloudStats) -> Self {
        self.models.insert(model.into(), stats);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Statistics for a model, looked up by unique id then short name
    pub fn stats(&self, model: &Model) -> Option<&CloudStats> {
        self.models
            .get(&model.id)
            .or_else(|| self.models.get(model.name()))
    }

    /// Whether the cache is older than `max_age`
    pub fn is_stale(&self, max_age: chrono::Duration) -> bool {
        self.fetched_at
            .map_or(true, |fetched| Utc::now() - fetched > max_age)
    }

    /// Note for the reason trail when a model's cloud runs exceed the limits
    pub fn advisory(&self, model: &Model, limits: &CostConfig) -> Option<String> {
        let stats = self.stats(model)?;
        let mut notes = Vec::new();

        if stats.avg_seconds > limits.max_local_seconds {
            notes.push(format!(
                "averages {:.0}s in the cloud (limit {:.0}s)",
                stats.avg_seconds, limits.max_local_seconds
            ));
        }

        if stats.avg_spill_bytes > limits.max_spill_bytes as f64 {
            notes.push(format!(
                "spills {:.1}GB in the cloud",
                bytes_to_gb(stats.avg_spill_bytes as u64)
            ));
        }

        if notes.is_empty() {
            None
        } else {
            Some(format!("{} over {} runs", notes.join(" and "), stats.run_count))
        }
    }
}
