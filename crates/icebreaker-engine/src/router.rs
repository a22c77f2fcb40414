//! Routing engine
//!
//! Evaluates the gates in order for one model; the first gate that fires
//! decides the venue and every later gate is recorded as skipped. If no gate
//! fires the model runs locally. Each evaluation is memoized in the run's
//! [`RunContext`], and `explain` reads the same memoized evaluation.

use icebreaker_catalog::{VolumeEstimate, VolumeEstimator};
use icebreaker_core::{
    Config, CostConfig, Diagnostic, Gate, GateOutcome, GateTrace, Model, RoutingConfig,
    RoutingDecision, SignalSet,
};
use icebreaker_sql::{CompatibilityRegistry, SqlAnalyzer};
use std::fmt;
use std::sync::Arc;

use crate::cost::CostHistory;
use crate::gates::{builtin_gates, Analysis, GateFn, GateInput, GateVerdict};
use crate::issue::RoutingIssue;
use crate::run::{Evaluation, RunContext};
use crate::state::FailureHistory;
use crate::sync::{NoopSync, SyncCollaborator};

/// Ordered gate pipeline with its data sources
pub struct RoutingEngine {
    analyzer: SqlAnalyzer,
    failures: Arc<FailureHistory>,
    sync: Arc<dyn SyncCollaborator>,
    estimator: Option<VolumeEstimator>,
    cost: CostHistory,
    routing: RoutingConfig,
    cost_limits: CostConfig,
    gates: Vec<(Gate, GateFn)>,
}

impl RoutingEngine {
    /// Engine with the built-in gates, an in-memory failure history, no
    /// sync collaborator and no metadata provider
    pub fn new(registry: Arc<CompatibilityRegistry>) -> Self {
        Self {
            analyzer: SqlAnalyzer::new(registry),
            failures: Arc::new(FailureHistory::in_memory()),
            sync: Arc::new(NoopSync),
            estimator: None,
            cost: CostHistory::default(),
            routing: RoutingConfig::default(),
            cost_limits: CostConfig::default(),
            gates: builtin_gates(),
        }
    }

    /// Engine using the `[routing]` and `[cost]` settings
    pub fn from_config(registry: Arc<CompatibilityRegistry>, config: &Config) -> Self {
        Self::new(registry)
            .with_routing(config.routing.clone())
            .with_cost_limits(config.cost.clone())
    }

    pub fn with_failures(mut self, failures: Arc<FailureHistory>) -> Self {
        self.failures = failures;
        self
    }

    pub fn with_sync(mut self, sync: Arc<dyn SyncCollaborator>) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_estimator(mut self, estimator: VolumeEstimator) -> Self {
        self.estimator = Some(estimator);
        self
    }

    pub fn with_cost_history(mut self, cost: CostHistory) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_routing(mut self, routing: RoutingConfig) -> Self {
        self.routing = routing;
        self
    }

    pub fn with_cost_limits(mut self, cost_limits: CostConfig) -> Self {
        self.cost_limits = cost_limits;
        self
    }

    /// Replace the gate pipeline
    pub fn with_gates(mut self, gates: Vec<(Gate, GateFn)>) -> Self {
        self.gates = gates;
        self
    }

    pub fn registry(&self) -> &Arc<CompatibilityRegistry> {
        self.analyzer.registry()
    }

    pub fn failures(&self) -> &Arc<FailureHistory> {
        &self.failures
    }

    pub fn sync(&self) -> &Arc<dyn SyncCollaborator> {
        &self.sync
    }

    pub fn routing(&self) -> &RoutingConfig {
        &self.routing
    }

    /// Route a model, reusing this run's decision if it was already made
    ///
    /// A model escalated after a failed transpile stays escalated.
    pub fn route(&self, model: &Model, run: &RunContext) -> RoutingDecision {
        let evaluation = self.evaluate(model, run);
        run.decision(&model.id).unwrap_or(evaluation.decision)
    }

    /// Full memoized evaluation for a model
    pub fn evaluate(&self, model: &Model, run: &RunContext) -> Evaluation {
        run.cell(&model.id)
            .get_or_init(|| self.compute(model, run))
            .clone()
    }

    /// Gates evaluated, signals found and the final decision
    pub fn explain(&self, model: &Model, run: &RunContext) -> Explanation {
        let evaluation = self.evaluate(model, run);
        let decision = run.decision(&model.id).unwrap_or_else(|| evaluation.decision.clone());

        Explanation {
            model_id: model.id.clone(),
            trail: evaluation.decision.trail,
            signals: evaluation.signals,
            analysis_error: evaluation.analysis_error,
            volume: evaluation.volume,
            decision,
        }
    }

    /// Diagnostics for crashes detected when the failure history was opened
    pub fn crash_diagnostics(&self) -> Vec<Diagnostic> {
        self.failures
            .recovered()
            .iter()
            .map(|record| {
                RoutingIssue::CrashDetected {
                    model: record.model_id.clone(),
                }
                .to_diagnostic()
            })
            .collect()
    }

    fn analyze(&self, model: &Model, run: &RunContext) -> Analysis {
        match self.analyzer.analyze(&model.sql) {
            Ok(signals) => Analysis::of(signals),
            Err(e) => {
                tracing::warn!(model = %model.id, error = %e, "SQL could not be analyzed; failing safe to cloud");
                run.push_diagnostic(
                    RoutingIssue::AnalysisFailure {
                        model: model.id.clone(),
                        message: e.to_string(),
                    }
                    .to_diagnostic(),
                );
                Analysis::failed(e.to_string())
            }
        }
    }

    fn compute(&self, model: &Model, run: &RunContext) -> Evaluation {
        let analysis = self.analyze(model, run);
        let input = GateInput::new(
            model,
            &analysis,
            run,
            &self.failures,
            self.sync.as_ref(),
            &self.cost,
            &self.routing,
            &self.cost_limits,
        )
        .with_estimator(self.estimator.as_ref());

        let mut trail = Vec::with_capacity(self.gates.len());
        let mut fired = None;

        for (gate, evaluate) in &self.gates {
            if fired.is_some() {
                trail.push(GateTrace::new(*gate, GateOutcome::Skipped));
                continue;
            }

            let verdict = evaluate(&input);
            tracing::debug!(model = %model.id, gate = gate.number(), verdict = ?verdict, "gate evaluated");

            let trace = match verdict {
                GateVerdict::Pass(None) => GateTrace::new(*gate, GateOutcome::Passed),
                GateVerdict::Pass(Some(note)) => GateTrace::new(*gate, GateOutcome::Passed).with_detail(note),
                GateVerdict::Skip(note) => GateTrace::new(*gate, GateOutcome::Skipped).with_detail(note),
                GateVerdict::Advisory(note) => GateTrace::new(*gate, GateOutcome::Advisory).with_detail(note),
                GateVerdict::Fire(venue, reason) => {
                    fired = Some((*gate, venue, reason.clone()));
                    GateTrace::new(*gate, GateOutcome::Fired).with_detail(reason)
                }
            };
            trail.push(trace);
        }

        let volume = input.take_volume();
        let decision = match fired {
            Some((gate, venue, reason)) => RoutingDecision::fired(gate, venue, reason, trail),
            None => RoutingDecision::local(trail),
        };

        tracing::debug!(model = %model.id, venue = %decision.venue, gate = %decision.gate_label(), "routed");

        Evaluation {
            model_id: model.id.clone(),
            decision,
            signals: analysis.signals,
            analysis_error: analysis.error,
            volume,
        }
    }
}

impl fmt::Debug for RoutingEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingEngine")
            .field("gates", &self.gates.iter().map(|(g, _)| *g).collect::<Vec<_>>())
            .field("sync", &self.sync.name())
            .field("estimator", &self.estimator)
            .field("routing", &self.routing)
            .finish()
    }
}

/// Read-only view of one model's routing, from the memoized evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct Explanation {
    pub model_id: String,
    pub trail: Vec<GateTrace>,
    pub signals: SignalSet,
    pub analysis_error: Option<String>,
    pub volume: Option<VolumeEstimate>,

    /// Final decision, including a transpile escalation
    pub decision: RoutingDecision,
}

impl fmt::Display for Explanation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Model: {}", self.model_id)?;
        writeln!(f, "Decision: {} ({})", self.decision.venue, self.decision.gate_label())?;
        writeln!(f, "Reason: {}", self.decision.reason)?;

        writeln!(f, "Signals:")?;
        if let Some(error) = &self.analysis_error {
            writeln!(f, "  analysis failed: {}", error)?;
        } else if self.signals.is_empty() {
            writeln!(f, "  none")?;
        }
        for signal in &self.signals {
            writeln!(f, "  {}", signal)?;
        }

        if let Some(volume) = &self.volume {
            match volume.gb() {
                Some(gb) => writeln!(f, "Volume: {:.2}GB", gb)?,
                None => writeln!(f, "Volume: unknown ({})", volume.missing().join(", "))?,
            }
        }

        writeln!(f, "Gates:")?;
        for trace in &self.trail {
            write!(
                f,
                "  {} {:<16} {}",
                trace.gate.number(),
                trace.gate.label(),
                trace.outcome.as_str()
            )?;
            if let Some(detail) = &trace.detail {
                write!(f, ": {}", detail)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use icebreaker_core::{RouteSetting, Venue};

    fn engine() -> RoutingEngine {
        RoutingEngine::new(Arc::new(CompatibilityRegistry::builtin()))
    }

    #[test]
    fn clean_sql_runs_locally() {
        let run = RunContext::new();
        let decision = engine().route(&Model::new("m", "select id from orders"), &run);

        assert_eq!(decision.venue, Venue::Local);
        assert_eq!(decision.gate, None);
        assert_eq!(decision.trail.len(), 7);
        assert_eq!(decision.trail[5].outcome, GateOutcome::Skipped);
    }

    #[test]
    fn later_gates_are_skipped_after_a_fire() {
        let run = RunContext::new();
        let model = Model::new("m", "select get_ddl('table', 'orders')");
        let decision = engine().route(&model, &run);

        assert_eq!(decision.gate, Some(Gate::CloudFunctions));
        let outcomes: Vec<GateOutcome> = decision.trail.iter().map(|t| t.outcome).collect();
        assert_eq!(
            outcomes,
            vec![
                GateOutcome::Passed,
                GateOutcome::Passed,
                GateOutcome::Passed,
                GateOutcome::Fired,
                GateOutcome::Skipped,
                GateOutcome::Skipped,
                GateOutcome::Skipped,
            ]
        );
    }

    #[test]
    fn override_local_beats_cloud_function() {
        let run = RunContext::new();
        let model = Model::new("m", "select cortex.complete('m', 'x') from t").with_route(RouteSetting::Local);
        let decision = engine().route(&model, &run);

        assert_eq!(decision.venue, Venue::Local);
        assert_eq!(decision.gate, Some(Gate::UserOverride));
    }

    #[test]
    fn unanalyzable_sql_fails_safe_at_gate_three() {
        let run = RunContext::new();
        let model = Model::new("m", "select 'unterminated from t");
        let decision = engine().route(&model, &run);

        assert_eq!(decision.venue, Venue::Cloud);
        assert_eq!(decision.gate, Some(Gate::ExternalSources));
        assert!(decision.reason.starts_with("Analysis failure"));
        assert_eq!(run.diagnostics()[0].code.as_str(), "ROUTE_ANALYSIS_FAILURE");
    }

    #[test]
    fn decisions_are_memoized() {
        let run = RunContext::new();
        let engine = engine();
        let model = Model::new("m", "select 1");

        let first = engine.route(&model, &run);
        let second = engine.route(&model, &run);
        assert_eq!(first, second);
        assert_eq!(run.len(), 1);

        // A fresh run decides again
        let other = engine.route(&model, &RunContext::new());
        assert_eq!(other.venue, first.venue);
    }

    #[test]
    fn explain_reads_the_routed_evaluation() {
        let run = RunContext::new();
        let engine = engine();
        let model = Model::new("m", "select * from @raw_stage/orders.csv");

        let decision = engine.route(&model, &run);
        let explanation = engine.explain(&model, &run);
        assert_eq!(explanation.decision, decision);
        assert_eq!(explanation.signals.len(), 1);

        let text = explanation.to_string();
        assert!(text.contains("Decision: CLOUD (Gate 3 (External Sources))"));
        assert!(text.contains("EXTERNAL_STAGE '@raw_stage/orders.csv'"));
    }

    #[test]
    fn custom_gate_list() {
        fn always_cloud(_: &GateInput<'_>) -> GateVerdict {
            GateVerdict::cloud("maintenance window")
        }

        let engine = engine().with_gates(vec![(Gate::UserOverride, always_cloud as GateFn)]);
        let decision = engine.route(&Model::new("m", "select 1"), &RunContext::new());
        assert_eq!(decision.venue, Venue::Cloud);
        assert_eq!(decision.reason, "maintenance window");
    }
}
