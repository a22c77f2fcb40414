//! Venues, gates and routing decisions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a model executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    /// Local engine
    Local,

    /// Cloud warehouse
    Cloud,
}

impl Venue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "LOCAL",
            Self::Cloud => "CLOUD",
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The routing gates, in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    UserOverride,
    FailureHistory,
    ExternalSources,
    CloudFunctions,
    Dependencies,
    DataVolume,
    HistoricalCost,
}

impl Gate {
    /// All gates in evaluation order
    pub const ALL: [Gate; 7] = [
        Gate::UserOverride,
        Gate::FailureHistory,
        Gate::ExternalSources,
        Gate::CloudFunctions,
        Gate::Dependencies,
        Gate::DataVolume,
        Gate::HistoricalCost,
    ];

    /// 1-based position in the pipeline
    pub fn number(&self) -> u8 {
        match self {
            Self::UserOverride => 1,
            Self::FailureHistory => 2,
            Self::ExternalSources => 3,
            Self::CloudFunctions => 4,
            Self::Dependencies => 5,
            Self::DataVolume => 6,
            Self::HistoricalCost => 7,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::UserOverride => "User Override",
            Self::FailureHistory => "Failure History",
            Self::ExternalSources => "External Sources",
            Self::CloudFunctions => "Cloud Functions",
            Self::Dependencies => "Dependencies",
            Self::DataVolume => "Data Volume",
            Self::HistoricalCost => "Historical Cost",
        }
    }
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Gate {} ({})", self.number(), self.label())
    }
}

/// What a gate did during evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateOutcome {
    /// Checked and did not fire
    Passed,

    /// Fired and decided the venue
    Fired,

    /// Produced an observation without deciding
    Advisory,

    /// Not evaluated (an earlier gate fired, or no data source)
    Skipped,
}

impl GateOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Fired => "fired",
            Self::Advisory => "advisory",
            Self::Skipped => "skipped",
        }
    }
}

/// One line of the reason trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateTrace {
    pub gate: Gate,
    pub outcome: GateOutcome,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl GateTrace {
    pub fn new(gate: Gate, outcome: GateOutcome) -> Self {
        Self {
            gate,
            outcome,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Final routing decision for one model in one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub venue: Venue,

    /// Gate that fired; `None` means no gate fired and the model runs locally
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate: Option<Gate>,

    /// Human-readable explanation
    pub reason: String,

    /// Every gate in order with its outcome
    pub trail: Vec<GateTrace>,

    pub decided_at: DateTime<Utc>,

    /// Set when a Local decision was overturned after a failed transpile
    #[serde(default)]
    pub escalated: bool,
}

impl RoutingDecision {
    /// Decision made by a firing gate
    pub fn fired(gate: Gate, venue: Venue, reason: impl Into<String>, trail: Vec<GateTrace>) -> Self {
        Self {
            venue,
            gate: Some(gate),
            reason: reason.into(),
            trail,
            decided_at: Utc::now(),
            escalated: false,
        }
    }

    /// Default decision when every gate passed
    pub fn local(trail: Vec<GateTrace>) -> Self {
        Self {
            venue: Venue::Local,
            gate: None,
            reason: "All gates passed".to_string(),
            trail,
            decided_at: Utc::now(),
            escalated: false,
        }
    }

    /// Copy of this decision re-routed to Cloud
    pub fn escalate(&self, reason: impl Into<String>) -> Self {
        Self {
            venue: Venue::Cloud,
            gate: self.gate,
            reason: reason.into(),
            trail: self.trail.clone(),
            decided_at: Utc::now(),
            escalated: true,
        }
    }

    /// Advisory notes collected from the trail
    pub fn advisories(&self) -> Vec<&str> {
        self.trail
            .iter()
            .filter(|t| t.outcome == GateOutcome::Advisory)
            .filter_map(|t| t.detail.as_deref())
            .collect()
    }

    /// Short form used in tables, e.g. "Gate 4 (Cloud Functions)"
    pub fn gate_label(&self) -> String {
        match (self.gate, self.escalated) {
            (_, true) => "Transpile".to_string(),
            (Some(gate), false) => gate.to_string(),
            (None, false) => "-".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_order_is_fixed() {
        let numbers: Vec<u8> = Gate::ALL.iter().map(|g| g.number()).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5, 6, 7]);
        assert!(Gate::ExternalSources < Gate::DataVolume);
    }

    #[test]
    fn escalation_keeps_trail() {
        let trail = vec![GateTrace::new(Gate::UserOverride, GateOutcome::Passed)];
        let decision = RoutingDecision::local(trail.clone());
        let escalated = decision.escalate("Transpile failed: GET_DDL");

        assert_eq!(escalated.venue, Venue::Cloud);
        assert!(escalated.escalated);
        assert_eq!(escalated.trail, trail);
        assert_eq!(escalated.gate_label(), "Transpile");
        assert_eq!(decision.gate_label(), "-");
    }

    #[test]
    fn advisories_are_collected() {
        let trail = vec![
            GateTrace::new(Gate::DataVolume, GateOutcome::Passed),
            GateTrace::new(Gate::HistoricalCost, GateOutcome::Advisory).with_detail("slow in cloud"),
        ];
        let decision = RoutingDecision::local(trail);
        assert_eq!(decision.advisories(), vec!["slow in cloud"]);
    }
}
