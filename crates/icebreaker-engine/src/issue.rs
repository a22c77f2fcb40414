//! Non-fatal routing problems and their diagnostic codes

use icebreaker_core::{Diagnostic, DiagnosticCode, FailureRecord, Severity, UnsupportedConstruct};

/// A problem found while routing or planning one model
///
/// None of these abort the run; each one converts to a stable diagnostic.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RoutingIssue {
    #[error("SQL could not be analyzed: {message}")]
    AnalysisFailure { model: String, message: String },

    #[error("No size metadata for {}", .missing.join(", "))]
    MetadataUnavailable { model: String, missing: Vec<String> },

    #[error("Pinned to the cloud by an unresolved failure: {record}")]
    FailurePinned { model: String, record: FailureRecord },

    #[error("{construct} has no local equivalent")]
    UnsupportedConstruct {
        model: String,
        construct: UnsupportedConstruct,
    },

    #[error("Cloud Functions gate passed but the transpiler refused: {}", .constructs.join(", "))]
    RegistryInconsistency { model: String, constructs: Vec<String> },

    #[error("Previous local run did not complete; recorded as OOM")]
    CrashDetected { model: String },
}

impl RoutingIssue {
    pub fn model(&self) -> &str {
        match self {
            Self::AnalysisFailure { model, .. }
            | Self::MetadataUnavailable { model, .. }
            | Self::FailurePinned { model, .. }
            | Self::UnsupportedConstruct { model, .. }
            | Self::RegistryInconsistency { model, .. }
            | Self::CrashDetected { model } => model,
        }
    }

    pub fn code(&self) -> DiagnosticCode {
        match self {
            Self::AnalysisFailure { .. } => DiagnosticCode::RouteAnalysisFailure,
            Self::MetadataUnavailable { .. } => DiagnosticCode::MetadataUnavailable,
            Self::FailurePinned { .. } => DiagnosticCode::RouteFailurePinned,
            Self::UnsupportedConstruct { construct, .. } if construct.rule.as_deref() == Some("validation") => {
                DiagnosticCode::TranspileInvalidOutput
            }
            Self::UnsupportedConstruct { .. } => DiagnosticCode::UnsupportedConstruct,
            Self::RegistryInconsistency { .. } => DiagnosticCode::RegistryInconsistency,
            Self::CrashDetected { .. } => DiagnosticCode::StateCrashDetected,
        }
    }

    fn suggestion(&self) -> String {
        match self {
            Self::AnalysisFailure { .. } => {
                "Fix the SQL or set icebreaker_route='cloud' to silence this warning".to_string()
            }
            Self::MetadataUnavailable { .. } => {
                "Refresh the table size snapshot or set routing.unknown_volume".to_string()
            }
            Self::FailurePinned { model, .. } => {
                format!("Run `icebreaker failures clear {}` once the cause is fixed", model)
            }
            Self::UnsupportedConstruct { construct, .. } => construct.hint.clone(),
            Self::RegistryInconsistency { .. } => {
                "Add the construct to [registry].cloud_only_functions so the Cloud Functions gate catches it".to_string()
            }
            Self::CrashDetected { model } => {
                format!("Run `icebreaker failures clear {}` to try the local engine again", model)
            }
        }
    }

    /// Diagnostic with the code's default severity and a remediation hint
    pub fn to_diagnostic(&self) -> Diagnostic {
        let severity = match self {
            Self::UnsupportedConstruct { .. } => Severity::Warn,
            _ => self.code().default_severity(),
        };

        Diagnostic::new(self.code(), severity, self.to_string())
            .with_model(self.model())
            .with_suggestion(self.suggestion())
    }
}

impl From<RoutingIssue> for Diagnostic {
    fn from(issue: RoutingIssue) -> Self {
        issue.to_diagnostic()
    }
}
