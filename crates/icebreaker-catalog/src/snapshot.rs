//! In-memory metadata provider backed by a table-size snapshot
//!
//! The snapshot is a JSON file mapping qualified table names to byte sizes,
//! typically exported from the warehouse's `INFORMATION_SCHEMA.TABLES`:
//!
//! ```json
//! {
//!   "fetched_at": "2026-10-01T06:00:00Z",
//!   "tables": { "raw.public.orders": 3221225472 }
//! }
//! ```
//!
//! ## Simulating Failures
//!
//! ```rust,ignore
//! // Every lookup fails as if the warehouse were unreachable
//! let provider = StaticMetadataProvider::new().with_connection_failure();
//!
//! // One table fails
//! let provider = StaticMetadataProvider::new()
//!     .with_error("raw.public.secret", FetchError::PermissionDenied("no grant".into()));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::provider::{FetchError, MetadataProvider, TableIdentifier};

/// Serialized table sizes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSizeSnapshot {
    /// When the sizes were exported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<DateTime<Utc>>,

    /// Bytes per qualified table name
    #[serde(default)]
    pub tables: BTreeMap<String, u64>,
}

impl TableSizeSnapshot {
    /// Load a snapshot from a JSON file
    pub fn from_file(path: &Path) -> Result<Self, FetchError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            FetchError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, FetchError> {
        serde_json::from_str(json).map_err(|e| FetchError::InvalidResponse(e.to_string()))
    }

    /// Save the snapshot as pretty JSON
    pub fn save_to_file(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

/// Metadata provider that answers from memory
///
/// It does not connect to any warehouse. Sizes come from a snapshot or are
/// added directly; errors can be configured per table or for every lookup.
#[derive(Debug, Clone, Default)]
pub struct StaticMetadataProvider {
    /// Sizes by lowercased qualified name
    sizes: HashMap<String, u64>,

    /// Errors to return for specific tables
    errors: HashMap<String, FetchError>,

    /// Simulate an unreachable provider
    fail_connection: bool,
}

impl StaticMetadataProvider {
    /// Create a provider with no known tables
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a provider from a snapshot
    pub fn from_snapshot(snapshot: &TableSizeSnapshot) -> Self {
        snapshot
            .tables
            .iter()
            .fold(Self::new(), |provider, (name, bytes)| provider.with_table(name, *bytes))
    }

    /// Load a snapshot file
    pub fn from_file(path: &Path) -> Result<Self, FetchError> {
        Ok(Self::from_snapshot(&TableSizeSnapshot::from_file(path)?))
    }

    /// Add the size of a table
    pub fn with_table(mut self, qualified_name: &str, bytes: u64) -> Self {
        self.sizes.insert(lookup_key(qualified_name), bytes);
        self
    }

    /// Configure an error to be returned for a specific table
    pub fn with_error(mut self, qualified_name: &str, error: FetchError) -> Self {
        self.errors.insert(lookup_key(qualified_name), error);
        self
    }

    /// Configure every lookup to fail
    pub fn with_connection_failure(mut self) -> Self {
        self.fail_connection = true;
        self
    }

    /// Number of tables with a known size
    pub fn table_count(&self) -> usize {
        self.sizes.len()
    }
}

fn lookup_key(qualified_name: &str) -> String {
    TableIdentifier::parse(qualified_name)
        .map(|t| t.fqn())
        .unwrap_or_else(|| qualified_name.to_lowercase())
}

impl MetadataProvider for StaticMetadataProvider {
    fn name(&self) -> &'static str {
        "snapshot"
    }

    fn get_table_size(&self, qualified_name: &str) -> Result<Option<u64>, FetchError> {
        if self.fail_connection {
            return Err(FetchError::NetworkError(
                "Simulated connection failure".to_string(),
            ));
        }

        let key = lookup_key(qualified_name);
        if let Some(error) = self.errors.get(&key) {
            return Err(error.clone());
        }

        Ok(self.sizes.get(&key).copied())
    }

    fn test_connection(&self) -> Result<(), FetchError> {
        if self.fail_connection {
            return Err(FetchError::NetworkError(
                "Simulated connection failure".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_ignore_case_and_quotes() {
        let provider = StaticMetadataProvider::new().with_table("RAW.PUBLIC.ORDERS", 42);
        assert_eq!(provider.get_table_size("raw.public.orders"), Ok(Some(42)));
        assert_eq!(provider.get_table_size("\"RAW\".public.orders"), Ok(Some(42)));
        assert_eq!(provider.get_table_size("raw.public.missing"), Ok(None));
    }

    #[test]
    fn configured_errors() {
        let provider = StaticMetadataProvider::new()
            .with_table("a.b.c", 1)
            .with_error("a.b.secret", FetchError::PermissionDenied("no grant".to_string()));
        assert!(matches!(
            provider.get_table_size("a.b.secret"),
            Err(FetchError::PermissionDenied(_))
        ));

        let down = provider.with_connection_failure();
        assert!(down.test_connection().is_err());
        assert!(matches!(down.get_table_size("a.b.c"), Err(FetchError::NetworkError(_))));
    }

    #[test]
    fn snapshot_json() {
        let snapshot = TableSizeSnapshot::from_json(
            r#"{"fetched_at": "2026-10-01T06:00:00Z", "tables": {"raw.public.orders": 100, "raw.public.items": 5}}"#,
        )
        .unwrap();
        assert!(snapshot.fetched_at.is_some());

        let provider = StaticMetadataProvider::from_snapshot(&snapshot);
        assert_eq!(provider.table_count(), 2);
        assert_eq!(provider.get_table_size("raw.public.items"), Ok(Some(5)));

        assert!(matches!(
            TableSizeSnapshot::from_json("{not json"),
            Err(FetchError::InvalidResponse(_))
        ));
    }
}
