//! Diagnostic codes and error reporting
//!
//! IMPORTANT: Diagnostic codes are versioned and stable.
//! NEVER rename or remove codes - they are part of the public API.
//! Add new codes with new names only.

use serde::{Deserialize, Serialize};

/// Diagnostic code registry (v1)
///
/// These codes are STABLE and VERSIONED.
/// Do NOT rename or remove codes - only add new ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticCode {
    // Routing (1xxx)
    /// SQL could not be scanned for compatibility signals
    RouteAnalysisFailure,

    /// Table size metadata missing or unreachable
    MetadataUnavailable,

    /// Model pinned to the cloud by an unresolved failure record
    RouteFailurePinned,

    // Transpilation (2xxx)
    /// Construct with no local equivalent
    UnsupportedConstruct,

    /// Transpiled SQL rejected by the target grammar
    TranspileInvalidOutput,

    /// Cloud Functions gate passed but the transpiler refused a construct
    RegistryInconsistency,

    // State (3xxx)
    /// Previous local run never completed
    StateCrashDetected,

    // General warnings (9xxx)
    /// General informational message
    Info,

    /// General warning message
    Warning,
}

impl DiagnosticCode {
    /// Get the diagnostic code as a stable string identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RouteAnalysisFailure => "ROUTE_ANALYSIS_FAILURE",
            Self::MetadataUnavailable => "METADATA_UNAVAILABLE",
            Self::RouteFailurePinned => "ROUTE_FAILURE_PINNED",
            Self::UnsupportedConstruct => "UNSUPPORTED_CONSTRUCT",
            Self::TranspileInvalidOutput => "TRANSPILE_INVALID_OUTPUT",
            Self::RegistryInconsistency => "REGISTRY_INCONSISTENCY",
            Self::StateCrashDetected => "STATE_CRASH_DETECTED",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
        }
    }

    /// Severity used when nothing more specific is known
    pub fn default_severity(&self) -> Severity {
        match self {
            Self::Info | Self::RouteFailurePinned => Severity::Info,
            Self::UnsupportedConstruct | Self::TranspileInvalidOutput => Severity::Error,
            _ => Severity::Warn,
        }
    }
}

impl std::fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Diagnostic severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational message
    Info,

    /// Warning - should be reviewed but not blocking
    Warn,

    /// Error - the model cannot run where it was routed
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Position inside a model's SQL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// File path relative to project root, or the model id
    pub file: String,

    /// Line number (1-indexed)
    pub line: Option<usize>,

    /// Column number (1-indexed, in characters)
    pub column: Option<usize>,
}

impl Location {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line: None,
            column: None,
        }
    }

    pub fn with_position(file: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            file: file.into(),
            line: Some(line),
            column: Some(column),
        }
    }

    /// Resolve a byte offset in `text` to line and column
    pub fn from_offset(file: impl Into<String>, text: &str, offset: usize) -> Self {
        let mut end = offset.min(text.len());
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        let before = &text[..end];
        let line = before.matches('\n').count() + 1;
        let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
        let column = before[line_start..].chars().count() + 1;

        Self::with_position(file, line, column)
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.file)?;
        if let Some(line) = self.line {
            write!(f, ":{}", line)?;
            if let Some(column) = self.column {
                write!(f, ":{}", column)?;
            }
        }
        Ok(())
    }
}

/// A diagnostic message with structured metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Stable diagnostic code
    pub code: DiagnosticCode,

    /// Severity level
    pub severity: Severity,

    /// Model the diagnostic is about
    pub model: Option<String>,

    /// Human-readable message
    pub message: String,

    /// Source location (best-effort)
    pub location: Option<Location>,

    /// Remediation hint
    pub suggestion: Option<String>,

    /// Downstream models affected by this issue
    pub impact: Vec<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with minimal fields
    pub fn new(code: DiagnosticCode, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code,
            severity,
            model: None,
            message: message.into(),
            location: None,
            suggestion: None,
            impact: Vec::new(),
        }
    }

    /// Create a diagnostic for a model using the code's default severity
    pub fn for_model(code: DiagnosticCode, model: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(code, code.default_severity(), message).with_model(model)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Set downstream impact
    pub fn with_impact(mut self, impact: Vec<String>) -> Self {
        self.impact = impact;
        self
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(model) = &self.model {
            write!(f, " (model: {})", model)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_code_stability() {
        assert_eq!(DiagnosticCode::RouteAnalysisFailure.as_str(), "ROUTE_ANALYSIS_FAILURE");
        assert_eq!(DiagnosticCode::MetadataUnavailable.as_str(), "METADATA_UNAVAILABLE");
        assert_eq!(DiagnosticCode::UnsupportedConstruct.as_str(), "UNSUPPORTED_CONSTRUCT");
        assert_eq!(DiagnosticCode::RegistryInconsistency.as_str(), "REGISTRY_INCONSISTENCY");
    }

    #[test]
    fn diagnostic_serialization() {
        let diag = Diagnostic::for_model(
            DiagnosticCode::UnsupportedConstruct,
            "model.shop.orders",
            "GET_DDL has no local equivalent",
        )
        .with_suggestion("{{ config(icebreaker_route='cloud') }}");

        let json = serde_json::to_string(&diag).unwrap();
        assert!(json.contains("UNSUPPORTED_CONSTRUCT"));
        assert!(json.contains("\"error\""));
        assert!(json.contains("icebreaker_route"));
    }

    #[test]
    fn location_from_offset() {
        let sql = "SELECT a,\n  cortex.complete('m', b)\nFROM t";
        let offset = sql.find("cortex").unwrap();
        let loc = Location::from_offset("orders.sql", sql, offset);
        assert_eq!(loc.line, Some(2));
        assert_eq!(loc.column, Some(3));
        assert_eq!(loc.to_string(), "orders.sql:2:3");

        let end = Location::from_offset("orders.sql", sql, 10_000);
        assert_eq!(end.line, Some(3));
    }
}
