//! dbt manifest.json parsing
//!
//! Parses dbt-generated manifest.json to extract models, sources, and
//! dependencies, plus the routing hints stored in model config and source
//! meta.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Source `meta.format` values that mean the data lives outside the warehouse
const EXTERNAL_FORMATS: &[&str] = &["external", "stage", "s3", "gcs"];

/// dbt manifest.json structure (subset of fields we care about)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Metadata about the manifest
    #[serde(default)]
    pub metadata: ManifestMetadata,

    /// Model, seed and test nodes
    #[serde(default)]
    pub nodes: HashMap<String, ManifestNode>,

    /// Source definitions
    #[serde(default)]
    pub sources: HashMap<String, ManifestSource>,

    /// Parent map (node -> list of parent nodes)
    #[serde(default)]
    pub parent_map: HashMap<String, Vec<String>>,

    /// Child map (node -> list of child nodes)
    #[serde(default)]
    pub child_map: HashMap<String, Vec<String>>,
}

impl Manifest {
    /// Load manifest from file
    pub fn from_file(path: &Path) -> Result<Self, ManifestError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ManifestError::IoError(path.display().to_string(), e.to_string()))?;

        Self::from_json(&contents)
    }

    /// Parse manifest from JSON string
    pub fn from_json(json: &str) -> Result<Self, ManifestError> {
        serde_json::from_str(json).map_err(|e| ManifestError::ParseError(e.to_string()))
    }

    /// Model nodes by unique_id (filters out tests, seeds, etc.)
    pub fn models(&self) -> BTreeMap<&str, &ManifestNode> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.is_model())
            .map(|(id, node)| (id.as_str(), node))
            .collect()
    }

    /// Get a specific node by unique_id
    pub fn get_node(&self, unique_id: &str) -> Option<&ManifestNode> {
        self.nodes.get(unique_id)
    }

    /// Get a specific source by unique_id
    pub fn get_source(&self, unique_id: &str) -> Option<&ManifestSource> {
        self.sources.get(unique_id)
    }

    /// Find a model by unique_id or short name
    pub fn find_model(&self, name: &str) -> Option<&ManifestNode> {
        self.nodes.get(name).filter(|n| n.is_model()).or_else(|| {
            self.models()
                .into_values()
                .find(|node| node.name.eq_ignore_ascii_case(name))
        })
    }

    /// Database most enabled models build into
    ///
    /// Ties resolve to the alphabetically first name.
    pub fn project_database(&self) -> Option<String> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for node in self.models().into_values().filter(|n| n.config.enabled) {
            if let Some(db) = &node.database {
                *counts.entry(db.to_lowercase()).or_default() += 1;
            }
        }

        let best = counts.values().copied().max()?;
        counts.into_iter().find(|(_, n)| *n == best).map(|(db, _)| db)
    }
}

/// Manifest metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestMetadata {
    #[serde(default)]
    pub dbt_schema_version: String,
    #[serde(default)]
    pub dbt_version: String,
    #[serde(default)]
    pub generated_at: String,
    #[serde(default)]
    pub invocation_id: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
}

/// A node in the manifest (model, test, seed, snapshot, etc.)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestNode {
    /// Unique identifier (e.g., "model.shop.orders")
    pub unique_id: String,

    /// Node name (e.g., "orders")
    pub name: String,

    /// Resource type (model, test, seed, etc.)
    pub resource_type: String,

    #[serde(default)]
    pub package_name: String,

    /// Relative path to SQL file
    #[serde(default)]
    pub path: String,

    #[serde(default)]
    pub original_file_path: String,

    #[serde(default)]
    pub database: Option<String>,

    #[serde(default)]
    pub schema: Option<String>,

    /// Alias (output table name)
    #[serde(default)]
    pub alias: Option<String>,

    /// Quoted relation name as rendered by dbt
    #[serde(default)]
    pub relation_name: Option<String>,

    #[serde(default)]
    pub config: NodeConfig,

    /// Compiled SQL (present after `dbt compile`)
    #[serde(default)]
    pub compiled_code: Option<String>,

    /// Raw SQL with Jinja
    #[serde(default)]
    pub raw_code: Option<String>,

    #[serde(default)]
    pub depends_on: DependsOn,

    /// Fully qualified name
    #[serde(default)]
    pub fqn: Vec<String>,
}

impl ManifestNode {
    pub fn is_model(&self) -> bool {
        self.resource_type == "model"
    }

    pub fn is_ephemeral(&self) -> bool {
        self.config
            .materialized
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case("ephemeral"))
    }

    /// SQL to analyze: compiled code, falling back to raw code
    pub fn sql(&self) -> &str {
        self.compiled_code
            .as_deref()
            .or(self.raw_code.as_deref())
            .unwrap_or_default()
    }

    /// `database.schema.alias`, falling back to the node name
    pub fn relation(&self) -> String {
        qualified(
            self.database.as_deref(),
            self.schema.as_deref(),
            self.alias.as_deref().unwrap_or(&self.name),
        )
    }
}

/// Node configuration (from dbt_project.yml or model config)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Whether the node is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Materialization type
    #[serde(default)]
    pub materialized: Option<String>,

    /// Route override from `{{ config(icebreaker_route='...') }}`
    #[serde(default)]
    pub icebreaker_route: Option<String>,

    #[serde(default)]
    pub meta: HashMap<String, Value>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            materialized: None,
            icebreaker_route: None,
            meta: HashMap::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Dependencies structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependsOn {
    /// List of node unique_ids this node depends on
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// A source in the manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestSource {
    /// Unique identifier (e.g., "source.shop.raw.orders")
    pub unique_id: String,

    /// Source name (e.g., "raw")
    pub source_name: String,

    /// Table name (e.g., "orders")
    pub name: String,

    #[serde(default)]
    pub database: Option<String>,

    #[serde(default)]
    pub schema: Option<String>,

    /// Identifier (actual table name)
    #[serde(default)]
    pub identifier: Option<String>,

    #[serde(default)]
    pub relation_name: Option<String>,

    /// Free-form metadata; routing reads `external`, `format` and `iceberg`
    #[serde(default)]
    pub meta: HashMap<String, Value>,

    /// External table definition (dbt-external-tables)
    #[serde(default)]
    pub external: Option<Value>,
}

impl ManifestSource {
    /// `database.schema.identifier`, falling back to the source table name
    pub fn relation(&self) -> String {
        qualified(
            self.database.as_deref(),
            self.schema.as_deref(),
            self.identifier.as_deref().unwrap_or(&self.name),
        )
    }

    /// Iceberg tables the local engine can read directly
    pub fn is_iceberg(&self) -> bool {
        ["iceberg", "is_iceberg"]
            .iter()
            .any(|key| self.meta.get(*key).is_some_and(truthy))
    }

    /// Data that lives outside the warehouse (stage, bucket, external table)
    pub fn is_external(&self) -> bool {
        if self.is_iceberg() {
            return false;
        }

        let flagged = ["external", "is_external"]
            .iter()
            .any(|key| self.meta.get(*key).is_some_and(truthy));

        let external_format = self
            .meta
            .get("format")
            .and_then(Value::as_str)
            .is_some_and(|f| EXTERNAL_FORMATS.contains(&f.to_lowercase().as_str()));

        let external_table = self
            .external
            .as_ref()
            .is_some_and(|e| e.get("location").is_some_and(|l| !l.is_null()));

        flagged || external_format || external_table
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.to_lowercase().as_str(), "true" | "yes" | "1"),
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        _ => false,
    }
}

fn qualified(database: Option<&str>, schema: Option<&str>, name: &str) -> String {
    [database, schema, Some(name)]
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(".")
}

/// Manifest parsing errors
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("Failed to read manifest file {0}: {1}")]
    IoError(String, String),

    #[error("Failed to parse manifest JSON: {0}")]
    ParseError(String),

    #[error("Invalid icebreaker_route for {model}: {message}")]
    InvalidRoute { model: String, message: String },

    #[error("Dependency cycle between models: {}", .0.join(", "))]
    Cycle(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source(meta: Value) -> ManifestSource {
        serde_json::from_value(json!({
            "unique_id": "source.shop.raw.events",
            "source_name": "raw",
            "name": "events",
            "database": "RAW",
            "schema": "public",
            "meta": meta,
        }))
        .unwrap()
    }

    #[test]
    fn source_external_flags() {
        assert!(!source(json!({})).is_external());
        assert!(source(json!({"external": true})).is_external());
        assert!(source(json!({"is_external": "yes"})).is_external());
        assert!(source(json!({"format": "S3"})).is_external());
        assert!(!source(json!({"format": "parquet"})).is_external());
        assert!(!source(json!({"external": true, "iceberg": true})).is_external());
    }

    #[test]
    fn external_table_definition() {
        let mut src = source(json!({}));
        src.external = Some(json!({"location": "@raw_stage/events"}));
        assert!(src.is_external());
        src.external = Some(json!({"location": null}));
        assert!(!src.is_external());
    }

    #[test]
    fn relation_names() {
        assert_eq!(source(json!({})).relation(), "RAW.public.events");

        let node: ManifestNode = serde_json::from_value(json!({
            "unique_id": "model.shop.orders",
            "name": "orders",
            "resource_type": "model",
            "schema": "analytics",
            "alias": "fct_orders",
            "raw_code": "select 1",
        }))
        .unwrap();
        assert_eq!(node.relation(), "analytics.fct_orders");
        assert_eq!(node.sql(), "select 1");
        assert!(node.config.enabled);
        assert!(!node.is_ephemeral());
    }

    #[test]
    fn project_database_is_most_common() {
        let manifest = Manifest::from_json(
            &json!({
                "nodes": {
                    "model.shop.a": {"unique_id": "model.shop.a", "name": "a", "resource_type": "model", "database": "ANALYTICS"},
                    "model.shop.b": {"unique_id": "model.shop.b", "name": "b", "resource_type": "model", "database": "analytics"},
                    "model.shop.c": {"unique_id": "model.shop.c", "name": "c", "resource_type": "model", "database": "scratch"},
                    "seed.shop.d": {"unique_id": "seed.shop.d", "name": "d", "resource_type": "seed", "database": "seeds"}
                }
            })
            .to_string(),
        )
        .unwrap();

        assert_eq!(manifest.project_database(), Some("analytics".to_string()));
        assert_eq!(manifest.models().len(), 3);
        assert_eq!(manifest.find_model("B").map(|n| n.unique_id.as_str()), Some("model.shop.b"));
    }

    #[test]
    fn invalid_json_is_parse_error() {
        assert!(matches!(Manifest::from_json("{"), Err(ManifestError::ParseError(_))));
    }
}
