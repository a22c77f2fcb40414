//! Icebreaker Core
//!
//! Domain model shared by every icebreaker crate: models and their routing
//! decisions, compatibility signals, failure records, transpile results,
//! configuration and run reports.
//! Never rename diagnostic codes - they are part of the public API.

pub mod config;
pub mod decision;
pub mod diagnostic;
pub mod failure;
pub mod model;
pub mod report;
pub mod signal;
pub mod transpile;

pub use config::{
    Config, ConfigError, CostConfig, RegistryOverlay, RouteOverrides, RoutingConfig,
    TranspileConfig, UnknownFunctionPolicy, UnknownVolumePolicy,
};
pub use decision::{Gate, GateOutcome, GateTrace, RoutingDecision, Venue};
pub use diagnostic::{Diagnostic, DiagnosticCode, Location, Severity};
pub use failure::{FailureKind, FailureRecord};
pub use model::{Model, RouteSetting, Upstream};
pub use report::{ModelEntry, Report, ReportSummary, ReportVersion};
pub use signal::{CompatibilitySignal, SignalKind, SignalSet};
pub use transpile::{Dialect, TranspileResult, UnsupportedConstruct};

/// Bytes in one gigabyte as used for volume thresholds (binary, 1024^3)
pub const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Convert a byte count to gigabytes
pub fn bytes_to_gb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_GB
}

/// Convert gigabytes to a byte count, rounding to the nearest byte
pub fn gb_to_bytes(gb: f64) -> u64 {
    (gb * BYTES_PER_GB).round() as u64
}
