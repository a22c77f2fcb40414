//! Input volume estimation
//!
//! Sums the sizes of a model's direct upstream relations. Any relation
//! without metadata makes the whole estimate `Unknown`; a missing size is
//! never treated as zero.

use icebreaker_core::{bytes_to_gb, Model};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::provider::MetadataProvider;

/// Estimated bytes scanned by a model
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeEstimate {
    /// Every input has a size
    Known(u64),

    /// Some inputs could not be sized
    Unknown {
        /// Relations without metadata, in upstream order
        missing: Vec<String>,

        /// Sum of the inputs that were sized
        known_bytes: u64,
    },
}

impl VolumeEstimate {
    pub fn is_known(&self) -> bool {
        matches!(self, Self::Known(_))
    }

    /// Bytes, if known
    pub fn bytes(&self) -> Option<u64> {
        match self {
            Self::Known(bytes) => Some(*bytes),
            Self::Unknown { .. } => None,
        }
    }

    /// Gigabytes, if known
    pub fn gb(&self) -> Option<f64> {
        self.bytes().map(bytes_to_gb)
    }

    /// Relations that could not be sized
    pub fn missing(&self) -> &[String] {
        match self {
            Self::Known(_) => &[],
            Self::Unknown { missing, .. } => missing,
        }
    }
}

/// Sizes model inputs through a metadata provider
#[derive(Clone)]
pub struct VolumeEstimator {
    provider: Arc<dyn MetadataProvider>,
}

impl VolumeEstimator {
    pub fn new(provider: Arc<dyn MetadataProvider>) -> Self {
        Self { provider }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Estimate the bytes scanned by the model's direct inputs
    pub fn estimate(&self, model: &Model) -> VolumeEstimate {
        self.estimate_relations(model.upstream.iter().map(|u| u.relation_name()))
    }

    /// Sum the sizes of the given relations, each counted once
    pub fn estimate_relations<'a>(&self, relations: impl IntoIterator<Item = &'a str>) -> VolumeEstimate {
        let mut seen = BTreeSet::new();
        let mut known_bytes = 0u64;
        let mut missing = Vec::new();

        for relation in relations {
            if !seen.insert(relation.to_lowercase()) {
                continue;
            }

            match self.provider.get_table_size(relation) {
                Ok(Some(bytes)) => known_bytes = known_bytes.saturating_add(bytes),
                Ok(None) => {
                    tracing::debug!(relation, provider = self.provider.name(), "no size metadata");
                    missing.push(relation.to_string());
                }
                Err(e) => {
                    tracing::debug!(relation, provider = self.provider.name(), error = %e, "size lookup failed");
                    missing.push(relation.to_string());
                }
            }
        }

        if missing.is_empty() {
            VolumeEstimate::Known(known_bytes)
        } else {
            VolumeEstimate::Unknown { missing, known_bytes }
        }
    }
}

impl std::fmt::Debug for VolumeEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeEstimator")
            .field("provider", &self.provider.name())
            .finish()
    }
}
