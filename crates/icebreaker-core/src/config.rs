//! Configuration schema (icebreaker.toml)

use crate::model::RouteSetting;
use crate::transpile::Dialect;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// What the Data Volume gate does when the estimate is unknown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownVolumePolicy {
    /// Treat as over the threshold
    #[default]
    Cloud,

    /// Treat as under the threshold
    Local,
}

/// How the registry classifies functions it has never heard of
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownFunctionPolicy {
    #[default]
    LocalSafe,
    CloudOnly,
}

/// Routing thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Input volume above which a model goes to the cloud (GB, binary)
    pub max_local_gb: f64,

    /// Fallback when volume cannot be estimated
    pub unknown_volume: UnknownVolumePolicy,

    /// Database the project builds into; three-part names in it are local
    #[serde(skip_serializing_if = "Option::is_none")]
    pub home_database: Option<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            max_local_gb: 5.0,
            unknown_volume: UnknownVolumePolicy::Cloud,
            home_database: None,
        }
    }
}

/// Additions to the built-in compatibility registry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryOverlay {
    /// Extra function names only the cloud warehouse can run
    pub cloud_only_functions: Vec<String>,

    /// Extra function names known to run locally
    pub local_safe_functions: Vec<String>,

    /// Extra column type names only the cloud warehouse supports
    pub cloud_only_types: Vec<String>,

    /// Extra regex patterns for external storage locations
    pub external_location_patterns: Vec<String>,

    /// Extra catalogs readable by the local engine
    pub local_catalogs: Vec<String>,

    /// Classification for unknown function names
    pub unknown_functions: UnknownFunctionPolicy,
}

/// Per-model route settings keyed by model id, name, or glob pattern
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteOverrides {
    pub patterns: BTreeMap<String, RouteSetting>,
}

impl RouteOverrides {
    pub fn insert(&mut self, pattern: impl Into<String>, route: RouteSetting) {
        self.patterns.insert(pattern.into(), route);
    }

    /// Resolve the configured route for a model
    ///
    /// Exact matches on id or short name win over glob patterns. Among
    /// glob patterns the longest (most specific) one wins.
    pub fn lookup(&self, model_id: &str, model_name: &str) -> Option<RouteSetting> {
        if let Some(route) = self
            .patterns
            .get(model_id)
            .or_else(|| self.patterns.get(model_name))
        {
            return Some(*route);
        }

        self.patterns
            .iter()
            .filter(|(pattern, _)| pattern.contains('*'))
            .filter(|(pattern, _)| glob_match(pattern, model_id) || glob_match(pattern, model_name))
            .max_by_key(|(pattern, _)| pattern.len())
            .map(|(_, route)| *route)
    }
}

/// Transpiler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranspileConfig {
    pub source: Dialect,
    pub target: Dialect,

    /// Parse the output with the target grammar
    pub validate_output: bool,
}

impl Default for TranspileConfig {
    fn default() -> Self {
        Self {
            source: Dialect::Snowflake,
            target: Dialect::DuckDb,
            validate_output: true,
        }
    }
}

/// Thresholds for historical cloud cost notes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    pub max_local_seconds: f64,
    pub max_spill_bytes: u64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            max_local_seconds: 600.0,
            max_spill_bytes: 1 << 30,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default)]
    pub registry: RegistryOverlay,

    #[serde(default)]
    pub overrides: RouteOverrides,

    #[serde(default)]
    pub transpile: TranspileConfig,

    #[serde(default)]
    pub cost: CostConfig,

    /// Directory for failure history, sync ledger and cost cache
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Project root path (for resolving relative paths)
    #[serde(skip)]
    pub project_root: PathBuf,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".icebreaker")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            routing: RoutingConfig::default(),
            registry: RegistryOverlay::default(),
            overrides: RouteOverrides::default(),
            transpile: TranspileConfig::default(),
            cost: CostConfig::default(),
            state_dir: default_state_dir(),
            project_root: std::env::current_dir().unwrap_or_default(),
        }
    }
}

impl Config {
    /// Load config from TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let mut config = Self::from_toml(&contents)?;

        if let Some(parent) = path.parent() {
            config.project_root = parent.to_path_buf();
        }

        Ok(config)
    }

    /// Load config from TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let mut config: Config =
            toml::from_str(toml).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.project_root = std::env::current_dir().unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    /// Save config to TOML file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let toml = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, toml).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Reject values the routing engine cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.routing.max_local_gb.is_finite() || self.routing.max_local_gb < 0.0 {
            return Err(ConfigError::InvalidValue(format!(
                "routing.max_local_gb must be a non-negative number, got {}",
                self.routing.max_local_gb
            )));
        }

        if !self.cost.max_local_seconds.is_finite() || self.cost.max_local_seconds < 0.0 {
            return Err(ConfigError::InvalidValue(format!(
                "cost.max_local_seconds must be a non-negative number, got {}",
                self.cost.max_local_seconds
            )));
        }

        Ok(())
    }

    /// State directory resolved against the project root
    pub fn state_path(&self) -> PathBuf {
        if self.state_dir.is_absolute() {
            self.state_dir.clone()
        } else {
            self.project_root.join(&self.state_dir)
        }
    }

    /// Threshold in bytes used by the Data Volume gate
    pub fn max_local_bytes(&self) -> u64 {
        crate::gb_to_bytes(self.routing.max_local_gb)
    }
}

/// Simple glob matching (supports a single * wildcard)
fn glob_match(pattern: &str, text: &str) -> bool {
    if pattern == "*" || pattern == "**" {
        return true;
    }

    if let Some(star_pos) = pattern.find('*') {
        let prefix = &pattern[..star_pos];
        let suffix = pattern[star_pos + 1..].trim_start_matches('*');

        text.len() >= prefix.len() + suffix.len()
            && text.starts_with(prefix)
            && text.ends_with(suffix)
    } else {
        pattern == text
    }
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}
