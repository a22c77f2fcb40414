//! Dialects and transpile results

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// SQL dialect
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Cloud warehouse dialect
    #[default]
    Snowflake,

    /// Local engine dialect
    #[serde(alias = "duck_db")]
    DuckDb,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Snowflake => "snowflake",
            Self::DuckDb => "duckdb",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "snowflake" => Ok(Self::Snowflake),
            "duckdb" | "duck_db" => Ok(Self::DuckDb),
            other => Err(format!("unknown dialect '{}'", other)),
        }
    }
}

/// A construct the transpiler refused to rewrite
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsupportedConstruct {
    /// The offending text (function name, clause, or parse error)
    pub construct: String,

    /// Byte offset in the source SQL, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,

    /// Rule that refused the instance, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,

    /// Remediation hint for the user
    pub hint: String,
}

impl UnsupportedConstruct {
    pub fn new(construct: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            construct: construct.into(),
            position: None,
            rule: None,
            hint: hint.into(),
        }
    }

    pub fn at(mut self, position: usize) -> Self {
        self.position = Some(position);
        self
    }

    pub fn from_rule(mut self, rule: impl Into<String>) -> Self {
        self.rule = Some(rule.into());
        self
    }
}

impl fmt::Display for UnsupportedConstruct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.construct)?;
        if let Some(pos) = self.position {
            write!(f, " (offset {})", pos)?;
        }
        if let Some(rule) = &self.rule {
            write!(f, " [{}]", rule)?;
        }
        Ok(())
    }
}

/// Output of one transpilation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranspileResult {
    /// Rewritten SQL
    pub sql: String,

    /// Names of the rules that changed the text, in application order
    pub applied: Vec<String>,

    /// Constructs that could not be rewritten
    pub unsupported: Vec<UnsupportedConstruct>,

    /// Dialect of `sql`
    pub target: Dialect,
}

impl TranspileResult {
    /// A non-empty unsupported list means the output must not run locally
    pub fn is_success(&self) -> bool {
        self.unsupported.is_empty()
    }

    /// Unsupported constructs joined for a reason string
    pub fn unsupported_summary(&self) -> String {
        self.unsupported
            .iter()
            .map(|u| u.construct.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}
