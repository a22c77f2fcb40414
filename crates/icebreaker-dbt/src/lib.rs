//! dbt artifact parsing and model construction
//!
//! This crate handles:
//! - Parsing manifest.json (dbt-generated artifacts)
//! - Building the dependency graph and a deterministic build order
//! - Turning manifest nodes into routable models, with source metadata
//!   and per-model route overrides

pub mod dag;
pub mod manifest;
pub mod project;

pub use dag::{DependencyGraph, NodeId};
pub use manifest::{
    DependsOn, Manifest, ManifestError, ManifestMetadata, ManifestNode, ManifestSource, NodeConfig,
};
pub use project::DbtProject;
