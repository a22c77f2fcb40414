//! Local-execution failure records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a local execution failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    #[serde(rename = "OOM")]
    Oom,
    #[serde(rename = "TIMEOUT")]
    Timeout,
    #[serde(rename = "UNSUPPORTED_CONSTRUCT")]
    UnsupportedConstruct,
    #[serde(rename = "RUNTIME_ERROR")]
    RuntimeError,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Oom => "OOM",
            Self::Timeout => "TIMEOUT",
            Self::UnsupportedConstruct => "UNSUPPORTED_CONSTRUCT",
            Self::RuntimeError => "RUNTIME_ERROR",
        }
    }

    /// Classify a local engine error message
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();

        if lower.contains("out of memory") || lower.contains("oom") || lower.contains("memory limit") {
            return Self::Oom;
        }

        if lower.contains("timeout") || lower.contains("timed out") || lower.contains("interrupted") {
            return Self::Timeout;
        }

        let missing_function = lower.contains("does not exist") && lower.contains("function");
        let variant = lower.contains("variant")
            && (lower.contains("not implemented") || lower.contains("cannot be created"));
        if missing_function || variant || lower.contains("not implemented error") {
            return Self::UnsupportedConstruct;
        }

        Self::RuntimeError
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FailureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "OOM" => Ok(Self::Oom),
            "TIMEOUT" => Ok(Self::Timeout),
            "UNSUPPORTED_CONSTRUCT" | "UNSUPPORTED" => Ok(Self::UnsupportedConstruct),
            "RUNTIME_ERROR" | "RUNTIME" => Ok(Self::RuntimeError),
            other => Err(format!("unknown failure kind '{}'", other)),
        }
    }
}

/// One recorded local failure
///
/// Records are never deleted. Clearing a model stamps `resolved_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub model_id: String,
    pub kind: FailureKind,
    pub recorded_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl FailureRecord {
    pub fn new(model_id: impl Into<String>, kind: FailureKind) -> Self {
        Self {
            model_id: model_id.into(),
            kind,
            recorded_at: Utc::now(),
            detail: None,
            resolved_at: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn is_unresolved(&self) -> bool {
        self.resolved_at.is_none()
    }
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.kind, self.recorded_at.to_rfc3339())?;
        if let Some(detail) = &self.detail {
            write!(f, " ({})", detail)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_engine_errors() {
        assert_eq!(FailureKind::classify("Out of Memory Error: failed to allocate"), FailureKind::Oom);
        assert_eq!(FailureKind::classify("query timed out after 600s"), FailureKind::Timeout);
        assert_eq!(
            FailureKind::classify("Scalar Function 'CONVERT_TIMEZONE' does not exist"),
            FailureKind::UnsupportedConstruct
        );
        assert_eq!(
            FailureKind::classify("Not implemented Error: A table cannot be created from a VARIANT column yet"),
            FailureKind::UnsupportedConstruct
        );
        assert_eq!(
            FailureKind::classify("Table 'my_table' does not exist"),
            FailureKind::RuntimeError
        );
    }

    #[test]
    fn kind_serialization_is_stable() {
        let json = serde_json::to_string(&FailureKind::Oom).unwrap();
        assert_eq!(json, "\"OOM\"");
        assert_eq!("unsupported-construct".parse::<FailureKind>(), Ok(FailureKind::UnsupportedConstruct));
    }

    #[test]
    fn new_record_is_unresolved() {
        let record = FailureRecord::new("model.shop.orders", FailureKind::Timeout).with_detail("600s");
        assert!(record.is_unresolved());
        assert!(record.to_string().starts_with("TIMEOUT at "));
    }
}
