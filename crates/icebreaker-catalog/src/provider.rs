//! Metadata provider trait for fetching table sizes

use std::fmt;

/// Identifies a table in the warehouse
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableIdentifier {
    /// Database name, if qualified
    pub database: Option<String>,

    /// Schema name, if qualified
    pub schema: Option<String>,

    /// Table name
    pub table: String,
}

impl TableIdentifier {
    /// Create a fully qualified table identifier
    pub fn new(database: impl Into<String>, schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: Some(database.into()),
            schema: Some(schema.into()),
            table: table.into(),
        }
    }

    /// Parse `table`, `schema.table` or `database.schema.table`
    ///
    /// Double quotes around parts are removed. Returns `None` for an empty
    /// name or more than three parts.
    pub fn parse(qualified_name: &str) -> Option<Self> {
        let parts: Vec<String> = qualified_name
            .split('.')
            .map(|p| p.trim().trim_matches('"').to_string())
            .collect();

        if parts.iter().any(|p| p.is_empty()) {
            return None;
        }

        match parts.as_slice() {
            [table] => Some(Self {
                database: None,
                schema: None,
                table: table.clone(),
            }),
            [schema, table] => Some(Self {
                database: None,
                schema: Some(schema.clone()),
                table: table.clone(),
            }),
            [database, schema, table] => Some(Self::new(database, schema, table)),
            _ => None,
        }
    }

    /// Lowercased dotted name used as a lookup key
    pub fn fqn(&self) -> String {
        [self.database.as_deref(), self.schema.as_deref(), Some(self.table.as_str())]
            .into_iter()
            .flatten()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for TableIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fqn())
    }
}

/// Errors that can occur when fetching metadata
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Query failed: {0}")]
    QueryError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Source of table size estimates
///
/// `Ok(None)` means the provider answered but has no size for the table;
/// an error means the provider could not be reached.
pub trait MetadataProvider: Send + Sync {
    /// Provider name for logs (e.g. "snapshot", "Snowflake")
    fn name(&self) -> &'static str;

    /// Estimated size in bytes of a qualified table
    fn get_table_size(&self, qualified_name: &str) -> Result<Option<u64>, FetchError>;

    /// Check that the provider is reachable
    fn test_connection(&self) -> Result<(), FetchError> {
        Ok(())
    }
}
