//! Run report schema (stable v1)
//!
//! This schema is STABLE and VERSIONED.
//! Breaking changes require a new version.

use crate::decision::{RoutingDecision, Venue};
use crate::diagnostic::{Diagnostic, Severity};
use serde::{Deserialize, Serialize};

/// Report schema version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportVersion {
    /// Major version (breaking changes)
    pub major: u32,

    /// Minor version (backward-compatible additions)
    pub minor: u32,
}

impl ReportVersion {
    /// Current report schema version
    pub const CURRENT: ReportVersion = ReportVersion { major: 1, minor: 0 };
}

impl std::fmt::Display for ReportVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Summary statistics for a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_models: usize,
    pub local: usize,
    pub cloud: usize,

    /// Models re-routed to the cloud after a failed transpile
    pub escalated: usize,

    /// Share of models running locally, in percent
    pub local_share_pct: f64,

    pub errors: usize,
    pub warnings: usize,
    pub info: usize,
}

/// One routed model in the report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub model: String,
    pub venue: Venue,

    /// Gate that decided, e.g. "Gate 3 (External Sources)"
    pub gate: String,

    pub reason: String,

    #[serde(default)]
    pub escalated: bool,

    /// Transforms applied for local models
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applied: Vec<String>,
}

impl ModelEntry {
    pub fn from_decision(model: impl Into<String>, decision: &RoutingDecision) -> Self {
        Self {
            model: model.into(),
            venue: decision.venue,
            gate: decision.gate_label(),
            reason: decision.reason.clone(),
            escalated: decision.escalated,
            applied: Vec::new(),
        }
    }

    pub fn with_applied(mut self, applied: Vec<String>) -> Self {
        self.applied = applied;
        self
    }
}

/// Run report (report.json v1)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Schema version
    pub version: ReportVersion,

    /// Timestamp (RFC 3339)
    pub timestamp: String,

    /// Summary statistics
    pub summary: ReportSummary,

    /// Per-model decisions in run order
    pub models: Vec<ModelEntry>,

    /// All diagnostics raised during the run
    pub diagnostics: Vec<Diagnostic>,
}

impl Report {
    /// Create a new empty report
    pub fn new() -> Self {
        Self {
            version: ReportVersion::CURRENT,
            timestamp: chrono::Utc::now().to_rfc3339(),
            summary: ReportSummary::default(),
            models: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Record a routed model
    pub fn add_model(&mut self, entry: ModelEntry) {
        match entry.venue {
            Venue::Local => self.summary.local += 1,
            Venue::Cloud => self.summary.cloud += 1,
        }
        if entry.escalated {
            self.summary.escalated += 1;
        }
        self.summary.total_models += 1;
        self.summary.local_share_pct =
            self.summary.local as f64 * 100.0 / self.summary.total_models as f64;
        self.models.push(entry);
    }

    /// Add a diagnostic to the report
    pub fn add_diagnostic(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Error => self.summary.errors += 1,
            Severity::Warn => self.summary.warnings += 1,
            Severity::Info => self.summary.info += 1,
        }

        self.diagnostics.push(diagnostic);
    }

    /// Check if the report has any errors
    pub fn has_errors(&self) -> bool {
        self.summary.errors > 0
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Save to file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let json = self.to_json().map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

impl Default for Report {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{Gate, GateTrace, RoutingDecision};
    use crate::diagnostic::DiagnosticCode;

    #[test]
    fn empty_report() {
        let report = Report::new();
        assert_eq!(report.version, ReportVersion::CURRENT);
        assert_eq!(report.summary.total_models, 0);
        assert!(!report.has_errors());
    }

    #[test]
    fn report_counts_venues() {
        let mut report = Report::new();
        let local = RoutingDecision::local(vec![]);
        let cloud = RoutingDecision::fired(
            Gate::CloudFunctions,
            Venue::Cloud,
            "Cloud-only function: cortex.complete",
            Vec::<GateTrace>::new(),
        );

        report.add_model(ModelEntry::from_decision("a", &local));
        report.add_model(ModelEntry::from_decision("b", &local.escalate("transpile failed")));
        report.add_model(ModelEntry::from_decision("c", &cloud));
        report.add_model(ModelEntry::from_decision("d", &local));

        assert_eq!(report.summary.total_models, 4);
        assert_eq!(report.summary.local, 2);
        assert_eq!(report.summary.cloud, 2);
        assert_eq!(report.summary.escalated, 1);
        assert_eq!(report.summary.local_share_pct, 50.0);
        assert_eq!(report.models[2].gate, "Gate 4 (Cloud Functions)");
    }

    #[test]
    fn report_with_diagnostics() {
        let mut report = Report::new();
        report.add_diagnostic(Diagnostic::for_model(
            DiagnosticCode::UnsupportedConstruct,
            "model.a",
            "GET_DDL",
        ));
        report.add_diagnostic(Diagnostic::for_model(
            DiagnosticCode::MetadataUnavailable,
            "model.b",
            "no size for RAW.X",
        ));

        assert_eq!(report.summary.errors, 1);
        assert_eq!(report.summary.warnings, 1);
        assert!(report.has_errors());

        let json = report.to_json().unwrap();
        assert!(json.contains("\"version\""));
        assert!(json.contains("METADATA_UNAVAILABLE"));
    }
}
