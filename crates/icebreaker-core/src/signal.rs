//! Compatibility signals found by static SQL analysis

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Kind of compatibility concern
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalKind {
    /// Function or statement only the cloud warehouse can execute
    CloudFunction,

    /// Stage reference or direct storage location
    ExternalStage,

    /// Object in a catalog the local engine cannot reach
    CrossDatabaseRef,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CloudFunction => "CLOUD_FUNCTION",
            Self::ExternalStage => "EXTERNAL_STAGE",
            Self::CrossDatabaseRef => "CROSS_DATABASE_REF",
        }
    }

    /// Signals that mean the local engine has no access path to the data
    pub fn is_external(&self) -> bool {
        matches!(self, Self::ExternalStage | Self::CrossDatabaseRef)
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single finding, ordered by position in the SQL text
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompatibilitySignal {
    /// Byte offset of the match in the analyzed SQL
    pub position: usize,

    /// What was found
    pub kind: SignalKind,

    /// The matched text, as written
    pub matched: String,
}

impl CompatibilitySignal {
    pub fn new(kind: SignalKind, matched: impl Into<String>, position: usize) -> Self {
        Self {
            position,
            kind,
            matched: matched.into(),
        }
    }
}

impl fmt::Display for CompatibilitySignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}' at offset {}", self.kind, self.matched, self.position)
    }
}

/// Deterministically ordered set of signals
pub type SignalSet = BTreeSet<CompatibilitySignal>;
