//! The compatibility registry
//!
//! One registry instance is shared by the analyzer and the transpiler. It
//! knows which functions only the cloud warehouse can run, which run locally,
//! which storage locations are external, and which catalogs the local engine
//! can read.

use icebreaker_core::{Config, RegistryOverlay, UnknownFunctionPolicy};
use regex::Regex;
use std::collections::BTreeSet;

use crate::rules::RuleSet;

/// Result of classifying a function name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    CloudOnly,
    LocalSafe,
    Unknown,
}

/// Functions and namespaces that only exist in the cloud warehouse
const CLOUD_ONLY_FUNCTIONS: &[&str] = &[
    "snowflake.ml",
    "snowflake.cortex",
    "cortex.complete",
    "cortex.sentiment",
    "cortex.summarize",
    "cortex.translate",
    "cortex.extract_answer",
    "cortex.classify_text",
    "cortex.embed_text_768",
    "ml.predict",
    "ml.explain",
    "ml.evaluate",
    "ml.training_info",
    "get_ddl",
    "get_path",
    "xmlget",
    "parse_xml",
    "check_xml",
    "system$",
    "st_asgeojson",
    "st_geogfromtext",
    "st_makepolygon",
    "to_geography",
    "try_to_geography",
    "to_geometry",
    "try_to_geometry",
    "external_function",
    "invoke",
    "result_scan",
    "generator",
];

/// Column types with no local equivalent
const CLOUD_ONLY_TYPES: &[&str] = &["geography", "geometry"];

/// Built-in functions known to exist locally under the same name
const LOCAL_SAFE_FUNCTIONS: &[&str] = &[
    "abs", "any_value", "array_agg", "avg", "bool_and", "bool_or", "cast", "ceil", "ceiling",
    "coalesce", "concat", "concat_ws", "count", "current_date", "current_timestamp",
    "date_part", "date_trunc", "dense_rank", "exp", "first_value", "floor", "greatest",
    "hash", "initcap", "lag", "last_value", "lead", "least", "left", "length", "ln", "log",
    "lower", "lpad", "ltrim", "max", "md5", "median", "min", "mod", "nth_value", "ntile",
    "nullif", "percent_rank", "power", "qualify", "rank", "regexp_replace", "replace",
    "reverse", "right", "round", "row_number", "rpad", "rtrim", "sha256", "sign", "split_part",
    "sqrt", "stddev", "stddev_pop", "stddev_samp", "string_agg", "substr", "substring", "sum",
    "trim", "trunc", "try_cast", "upper", "var_pop", "var_samp", "variance",
];

/// URL schemes that point at storage the local engine cannot read
const EXTERNAL_LOCATION_PREFIXES: &[&str] = &[
    "s3://", "s3a://", "gs://", "gcs://", "azure://", "abfs://", "abfss://", "wasb://",
    "wasbs://", "http://", "https://",
];

/// Catalogs attached to the local engine by default
const LOCAL_CATALOGS: &[&str] = &["memory", "iceberg_catalog"];

/// Catalog holding warehouse account metadata
const WAREHOUSE_CATALOG: &str = "snowflake";

/// Registry construction failure
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Invalid external location pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

/// Shared classification of functions, locations and catalogs
#[derive(Debug, Clone)]
pub struct CompatibilityRegistry {
    cloud_only: BTreeSet<String>,
    cloud_only_types: BTreeSet<String>,
    local_safe: BTreeSet<String>,
    translatable: BTreeSet<String>,
    external_patterns: Vec<Regex>,
    local_catalogs: BTreeSet<String>,
    unknown: UnknownFunctionPolicy,
}

impl CompatibilityRegistry {
    /// Built-in registry; translatable names come from the built-in rule catalog
    pub fn builtin() -> Self {
        Self::with_translatable(RuleSet::snowflake_to_duckdb().translatable_functions())
    }

    /// Built-in lists plus the given translatable function names
    pub fn with_translatable(translatable: BTreeSet<String>) -> Self {
        Self {
            cloud_only: CLOUD_ONLY_FUNCTIONS.iter().map(|s| s.to_string()).collect(),
            cloud_only_types: CLOUD_ONLY_TYPES.iter().map(|s| s.to_string()).collect(),
            local_safe: LOCAL_SAFE_FUNCTIONS.iter().map(|s| s.to_string()).collect(),
            translatable,
            external_patterns: Vec::new(),
            local_catalogs: LOCAL_CATALOGS.iter().map(|s| s.to_string()).collect(),
            unknown: UnknownFunctionPolicy::LocalSafe,
        }
    }

    /// Built-in registry extended by a configuration overlay
    pub fn with_overlay(overlay: &RegistryOverlay) -> Result<Self, RegistryError> {
        let mut registry = Self::builtin();
        registry.apply_overlay(overlay)?;
        Ok(registry)
    }

    /// Registry for a project: overlay plus the home database as a local catalog
    pub fn from_config(config: &Config) -> Result<Self, RegistryError> {
        let mut registry = Self::with_overlay(&config.registry)?;
        if let Some(home) = &config.routing.home_database {
            registry.add_local_catalog(home);
        }
        Ok(registry)
    }

    pub fn apply_overlay(&mut self, overlay: &RegistryOverlay) -> Result<(), RegistryError> {
        self.cloud_only
            .extend(overlay.cloud_only_functions.iter().map(|s| normalize(s)));
        self.local_safe
            .extend(overlay.local_safe_functions.iter().map(|s| normalize(s)));
        self.cloud_only_types
            .extend(overlay.cloud_only_types.iter().map(|s| normalize(s)));
        for catalog in &overlay.local_catalogs {
            self.add_local_catalog(catalog);
        }
        for pattern in &overlay.external_location_patterns {
            let regex = Regex::new(&format!("(?i){}", pattern)).map_err(|e| {
                RegistryError::InvalidPattern {
                    pattern: pattern.clone(),
                    message: e.to_string(),
                }
            })?;
            self.external_patterns.push(regex);
        }
        self.unknown = overlay.unknown_functions;
        Ok(())
    }

    pub fn add_local_catalog(&mut self, catalog: &str) {
        self.local_catalogs.insert(normalize(catalog));
    }

    pub fn add_cloud_only(&mut self, name: &str) {
        self.cloud_only.insert(normalize(name));
    }

    /// Classify a (possibly dotted) function name
    ///
    /// Cloud-only entries win over local-safe and translatable ones.
    pub fn classify(&self, name: &str) -> Classification {
        let name = normalize(name);

        if self.cloud_only.iter().any(|entry| name_matches(entry, &name)) {
            return Classification::CloudOnly;
        }

        if self.translatable.contains(&name) || self.local_safe.contains(&name) {
            return Classification::LocalSafe;
        }

        Classification::Unknown
    }

    /// Classification with the unknown-function policy applied
    pub fn is_cloud_only(&self, name: &str) -> bool {
        match self.classify(name) {
            Classification::CloudOnly => true,
            Classification::LocalSafe => false,
            Classification::Unknown => self.unknown == UnknownFunctionPolicy::CloudOnly,
        }
    }

    /// Whether a cast target or column type only exists in the cloud warehouse
    ///
    /// Parameterized names such as `GEOGRAPHY(POINT)` match on the base name.
    pub fn is_cloud_only_type(&self, type_name: &str) -> bool {
        let name = normalize(type_name);
        let base = name.split('(').next().unwrap_or(&name).trim();
        self.cloud_only_types.contains(base)
    }

    /// Whether a transform rule exists for the function
    pub fn is_translatable(&self, name: &str) -> bool {
        self.translatable.contains(&normalize(name))
    }

    /// Whether a string literal names external storage
    pub fn is_external_location(&self, text: &str) -> bool {
        let lower = text.trim().to_ascii_lowercase();
        EXTERNAL_LOCATION_PREFIXES.iter().any(|p| lower.starts_with(p))
            || self.external_patterns.iter().any(|re| re.is_match(text))
    }

    pub fn is_local_catalog(&self, catalog: &str) -> bool {
        let catalog = normalize(catalog);
        catalog != WAREHOUSE_CATALOG && self.local_catalogs.contains(&catalog)
    }

    /// Whether a relation name in relation position points outside the local engine
    pub fn is_cross_catalog(&self, parts: &[String]) -> bool {
        match parts {
            [catalog, _, ..] if normalize(catalog) == WAREHOUSE_CATALOG => true,
            [catalog, _, _, ..] => !self.is_local_catalog(catalog),
            _ => false,
        }
    }

    pub fn cloud_only_functions(&self) -> impl Iterator<Item = &str> {
        self.cloud_only.iter().map(String::as_str)
    }

    pub fn cloud_only_types(&self) -> impl Iterator<Item = &str> {
        self.cloud_only_types.iter().map(String::as_str)
    }

    pub fn translatable_functions(&self) -> impl Iterator<Item = &str> {
        self.translatable.iter().map(String::as_str)
    }

    pub fn local_catalogs(&self) -> impl Iterator<Item = &str> {
        self.local_catalogs.iter().map(String::as_str)
    }

    pub fn unknown_policy(&self) -> UnknownFunctionPolicy {
        self.unknown
    }
}

impl Default for CompatibilityRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Dotted-name aware match of a registry entry against a lowercased name
///
/// `snowflake.cortex` matches `snowflake.cortex.complete`, `cortex.complete`
/// matches `snowflake.cortex.complete`, and `system$` matches any name whose
/// last segment starts with it.
fn name_matches(entry: &str, name: &str) -> bool {
    if entry == name {
        return true;
    }

    if let Some(prefix) = entry.strip_suffix('$') {
        let last = name.rsplit('.').next().unwrap_or(name);
        return last.starts_with(prefix) && last[prefix.len()..].starts_with('$');
    }

    name.strip_prefix(entry).is_some_and(|rest| rest.starts_with('.'))
        || name.strip_suffix(entry).is_some_and(|rest| rest.ends_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_matching() {
        assert!(name_matches("snowflake.cortex", "snowflake.cortex.complete"));
        assert!(name_matches("cortex.complete", "snowflake.cortex.complete"));
        assert!(name_matches("cortex.complete", "cortex.complete"));
        assert!(name_matches("system$", "system$stream_has_data"));
        assert!(!name_matches("system$", "systemx"));
        assert!(!name_matches("cortex.complete", "mycortex.complete"));
        assert!(!name_matches("invoke", "invoker"));
    }

    #[test]
    fn classification() {
        let registry = CompatibilityRegistry::builtin();
        assert_eq!(registry.classify("CORTEX.COMPLETE"), Classification::CloudOnly);
        assert_eq!(registry.classify("SNOWFLAKE.ML.FORECAST"), Classification::CloudOnly);
        assert_eq!(registry.classify("SYSTEM$STREAM_HAS_DATA"), Classification::CloudOnly);
        assert_eq!(registry.classify("LISTAGG"), Classification::LocalSafe);
        assert_eq!(registry.classify("iff"), Classification::LocalSafe);
        assert_eq!(registry.classify("qualify"), Classification::LocalSafe);
        assert_eq!(registry.classify("my_udf"), Classification::Unknown);
        assert!(!registry.is_cloud_only("my_udf"));
    }

    #[test]
    fn spatial_names_are_cloud_only() {
        let registry = CompatibilityRegistry::builtin();
        for name in ["TO_GEOGRAPHY", "TRY_TO_GEOGRAPHY", "TO_GEOMETRY", "try_to_geometry"] {
            assert_eq!(registry.classify(name), Classification::CloudOnly, "{}", name);
        }
        assert!(registry.is_cloud_only_type("GEOGRAPHY"));
        assert!(registry.is_cloud_only_type("geometry(point)"));
        assert!(!registry.is_cloud_only_type("VARCHAR"));
    }

    #[test]
    fn overlay_extends_registry() {
        let overlay = RegistryOverlay {
            cloud_only_functions: vec!["My_UDF".to_string(), "iff".to_string()],
            local_safe_functions: vec!["lake_fn".to_string()],
            cloud_only_types: vec!["Vector".to_string()],
            external_location_patterns: vec![r"^r2://".to_string()],
            local_catalogs: vec!["Lake".to_string()],
            unknown_functions: UnknownFunctionPolicy::CloudOnly,
        };
        let registry = CompatibilityRegistry::with_overlay(&overlay).unwrap();

        assert!(registry.is_cloud_only("my_udf"));
        assert_eq!(registry.classify("iff"), Classification::CloudOnly);
        assert!(!registry.is_cloud_only("lake_fn"));
        assert!(registry.is_cloud_only("never_heard_of"));
        assert!(registry.is_external_location("R2://bucket/x"));
        assert!(registry.is_local_catalog("lake"));
        assert!(registry.is_cloud_only_type("VECTOR"));
    }

    #[test]
    fn invalid_overlay_pattern() {
        let overlay = RegistryOverlay {
            external_location_patterns: vec!["(".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            CompatibilityRegistry::with_overlay(&overlay),
            Err(RegistryError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn catalogs() {
        let mut registry = CompatibilityRegistry::builtin();
        registry.add_local_catalog("ANALYTICS");
        let parts = |s: &str| s.split('.').map(String::from).collect::<Vec<_>>();

        assert!(registry.is_cross_catalog(&parts("raw.public.orders")));
        assert!(!registry.is_cross_catalog(&parts("analytics.public.orders")));
        assert!(!registry.is_cross_catalog(&parts("iceberg_catalog.db.t")));
        assert!(registry.is_cross_catalog(&parts("snowflake.account_usage.query_history")));
        assert!(!registry.is_cross_catalog(&parts("public.orders")));
        assert!(registry.is_external_location("s3://bucket/key.parquet"));
        assert!(!registry.is_external_location("hello"));
    }
}
