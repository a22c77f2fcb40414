//! Execution planning: route, then transpile local models
//!
//! A local decision is only final once the transpiler has produced SQL with
//! no unsupported constructs. Otherwise the model is escalated to the cloud
//! in the run, which downstream Dependencies gates observe.

use icebreaker_core::{
    Dialect, Diagnostic, Gate, GateOutcome, Location, Model, RoutingDecision, TranspileResult,
    UnsupportedConstruct, Venue,
};
use icebreaker_sql::{TranspileError, Transpiler};
use std::time::Duration;

use crate::issue::RoutingIssue;
use crate::router::RoutingEngine;
use crate::run::RunContext;
use crate::state::StateError;
use crate::sync::ExecutionOutcome;

/// What to execute for one model
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionPlan {
    /// Run the transpiled SQL on the local engine
    Local { sql: String, applied: Vec<String> },

    /// Run the original SQL on the cloud warehouse
    Cloud { reason: String },
}

impl ExecutionPlan {
    pub fn venue(&self) -> Venue {
        match self {
            Self::Local { .. } => Venue::Local,
            Self::Cloud { .. } => Venue::Cloud,
        }
    }

    /// Transform rules applied for a local plan
    pub fn applied(&self) -> &[String] {
        match self {
            Self::Local { applied, .. } => applied,
            Self::Cloud { .. } => &[],
        }
    }
}

/// Routes models and prepares their SQL for the chosen venue
#[derive(Debug)]
pub struct ExecutionPlanner {
    engine: RoutingEngine,
    transpiler: Transpiler,
    source: Dialect,
    target: Dialect,
}

impl ExecutionPlanner {
    /// Planner translating Snowflake SQL for DuckDB
    pub fn new(engine: RoutingEngine, transpiler: Transpiler) -> Self {
        Self {
            engine,
            transpiler,
            source: Dialect::Snowflake,
            target: Dialect::DuckDb,
        }
    }

    pub fn with_dialects(mut self, source: Dialect, target: Dialect) -> Self {
        self.source = source;
        self.target = target;
        self
    }

    pub fn engine(&self) -> &RoutingEngine {
        &self.engine
    }

    pub fn transpiler(&self) -> &Transpiler {
        &self.transpiler
    }

    /// Route a model and, if it stays local, transpile it
    pub fn plan(&self, run: &RunContext, model: &Model) -> Result<ExecutionPlan, TranspileError> {
        let decision = self.engine.route(model, run);
        if decision.venue == Venue::Cloud {
            return Ok(ExecutionPlan::Cloud {
                reason: decision.reason,
            });
        }

        let result = self.transpiler.transpile(&model.sql, self.source, self.target)?;
        if result.is_success() {
            tracing::debug!(model = %model.id, applied = ?result.applied, "transpiled for local execution");
            return Ok(ExecutionPlan::Local {
                sql: result.sql,
                applied: result.applied,
            });
        }

        self.report_refusal(run, model, &decision, &result);

        let reason = format!("Transpile failed: {}", result.unsupported_summary());
        tracing::info!(model = %model.id, reason = %reason, "escalating to cloud");
        let escalated = run
            .escalate(&model.id, &reason)
            .map_or(reason, |d| d.reason);

        Ok(ExecutionPlan::Cloud { reason: escalated })
    }

    /// Mark a local execution as started
    pub fn begin(&self, model_id: &str, venue: Venue) -> Result<(), StateError> {
        if venue == Venue::Local {
            self.engine.failures().mark_running(model_id)?;
        }
        Ok(())
    }

    /// Report a finished execution to the sync collaborator
    pub fn finish(
        &self,
        model_id: &str,
        venue: Venue,
        duration: Duration,
        unsupported: Vec<UnsupportedConstruct>,
    ) -> Result<(), StateError> {
        if venue == Venue::Local {
            self.engine.failures().mark_complete(model_id)?;
        }

        let outcome = ExecutionOutcome::new(model_id, venue, duration).with_unsupported(unsupported);
        self.engine.sync().report(&outcome)
    }

    /// Record a failed local execution
    pub fn fail(&self, model_id: &str, message: &str) -> Result<(), StateError> {
        let kind = self.engine.failures().record_error(model_id, message)?;
        tracing::warn!(model = %model_id, kind = %kind, "local execution failed");
        Ok(())
    }

    fn report_refusal(&self, run: &RunContext, model: &Model, decision: &RoutingDecision, result: &TranspileResult) {
        for construct in &result.unsupported {
            let mut diagnostic = RoutingIssue::UnsupportedConstruct {
                model: model.id.clone(),
                construct: construct.clone(),
            }
            .to_diagnostic();
            if let Some(position) = construct.position {
                diagnostic = diagnostic.with_location(Location::from_offset(&model.id, &model.sql, position));
            }
            run.push_diagnostic(diagnostic);
        }

        let gate_four_passed = decision
            .trail
            .iter()
            .any(|t| t.gate == Gate::CloudFunctions && t.outcome == GateOutcome::Passed);
        if !gate_four_passed {
            return;
        }

        let constructs: Vec<String> = result.unsupported.iter().map(|u| u.construct.clone()).collect();
        tracing::warn!(
            model = %model.id,
            constructs = ?constructs,
            "registry inconsistency: Cloud Functions gate passed but the transpiler refused"
        );
        let diagnostic: Diagnostic = RoutingIssue::RegistryInconsistency {
            model: model.id.clone(),
            constructs,
        }
        .into();
        run.push_diagnostic(diagnostic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use icebreaker_core::{DiagnosticCode, RouteSetting};
    use icebreaker_sql::CompatibilityRegistry;
    use std::sync::Arc;

    fn planner() -> ExecutionPlanner {
        let registry = Arc::new(CompatibilityRegistry::builtin());
        ExecutionPlanner::new(
            RoutingEngine::new(Arc::clone(&registry)),
            Transpiler::new(registry),
        )
    }

    #[test]
    fn clean_model_is_transpiled() {
        let run = RunContext::new();
        let model = Model::new("model.shop.orders", r#"SELECT "ID", IFF(amount > 0, 1, 0) AS paid FROM orders"#);

        match planner().plan(&run, &model).unwrap() {
            ExecutionPlan::Local { sql, applied } => {
                assert_eq!(sql, "SELECT id, CASE WHEN amount > 0 THEN 1 ELSE 0 END AS paid FROM orders");
                assert_eq!(applied, vec!["identifier_quoting", "conditional_functions"]);
            }
            other => panic!("expected local plan, got {:?}", other),
        }
        assert!(run.diagnostics().is_empty());
    }

    #[test]
    fn refused_rewrite_escalates_and_flags_registry_gap() {
        let run = RunContext::new();
        // DATEADD with a nanosecond part is refused by the date rule
        let model = Model::new("model.shop.events", "SELECT DATEADD(nanosecond, 5, ts) FROM events");

        let plan = planner().plan(&run, &model).unwrap();
        assert_eq!(plan.venue(), Venue::Cloud);
        assert_eq!(run.venue_of("model.shop.events"), Some(Venue::Cloud));
        assert!(run.is_escalated("model.shop.events"));

        let codes: Vec<DiagnosticCode> = run.diagnostics().iter().map(|d| d.code).collect();
        assert_eq!(
            codes,
            vec![DiagnosticCode::UnsupportedConstruct, DiagnosticCode::RegistryInconsistency]
        );
    }

    #[test]
    fn override_local_still_escalates_unsupported_sql() {
        let run = RunContext::new();
        let model = Model::new("m", "SELECT GET_DDL('table', 'orders')").with_route(RouteSetting::Local);

        let plan = planner().plan(&run, &model).unwrap();
        match plan {
            ExecutionPlan::Cloud { reason } => assert_eq!(reason, "Transpile failed: GET_DDL"),
            other => panic!("expected cloud plan, got {:?}", other),
        }

        // Gate 4 was skipped by the override, so this is not a registry gap
        let codes: Vec<DiagnosticCode> = run.diagnostics().iter().map(|d| d.code).collect();
        assert_eq!(codes, vec![DiagnosticCode::UnsupportedConstruct]);
    }

    #[test]
    fn cloud_models_are_not_transpiled() {
        let run = RunContext::new();
        let model = Model::new("m", "SELECT * FROM @raw_stage/orders.csv");
        let plan = planner().plan(&run, &model).unwrap();
        assert_eq!(
            plan,
            ExecutionPlan::Cloud {
                reason: "External source: @raw_stage/orders.csv".to_string()
            }
        );
        assert!(plan.applied().is_empty());
    }

    #[test]
    fn local_runs_are_tracked_in_failure_history() {
        let planner = planner();
        planner.begin("m", Venue::Local).unwrap();
        assert!(planner.engine().failures().is_running("m"));

        planner.finish("m", Venue::Local, Duration::from_secs(2), Vec::new()).unwrap();
        assert!(!planner.engine().failures().is_running("m"));

        planner.begin("n", Venue::Local).unwrap();
        planner.fail("n", "Out of Memory Error").unwrap();
        assert!(planner.engine().failures().has_unresolved("n"));
    }
}
