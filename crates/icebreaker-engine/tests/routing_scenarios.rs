//! End-to-end routing scenarios over the shared registry

use icebreaker_catalog::StaticMetadataProvider;
use icebreaker_catalog::VolumeEstimator;
use icebreaker_core::{
    gb_to_bytes, DiagnosticCode, FailureKind, Gate, Model, RouteSetting, SignalKind, Venue,
};
use icebreaker_engine::{
    ExecutionPlan, ExecutionPlanner, FailureHistory, RoutingEngine, RunContext, SyncCollaborator,
    SyncLedger,
};
use icebreaker_sql::{CompatibilityRegistry, Transpiler};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn provider() -> StaticMetadataProvider {
    StaticMetadataProvider::new()
        .with_table("analytics.staging.orders", gb_to_bytes(3.0))
        .with_table("analytics.staging.order_items", gb_to_bytes(4.0))
        .with_table("analytics.staging.customers", gb_to_bytes(1.2))
}

fn registry() -> Arc<CompatibilityRegistry> {
    Arc::new(CompatibilityRegistry::builtin())
}

fn engine() -> RoutingEngine {
    RoutingEngine::new(registry()).with_estimator(VolumeEstimator::new(Arc::new(provider())))
}

#[test]
fn scenario_cloud_function() {
    let run = RunContext::new();
    let model = Model::new("model.shop.summaries", "SELECT cortex.complete('m','x') FROM t");

    let engine = engine();
    let decision = engine.route(&model, &run);
    assert_eq!(decision.venue, Venue::Cloud);
    assert_eq!(decision.gate, Some(Gate::CloudFunctions));

    let explanation = engine.explain(&model, &run);
    let kinds: Vec<SignalKind> = explanation.signals.iter().map(|s| s.kind).collect();
    assert_eq!(kinds, vec![SignalKind::CloudFunction]);
}

#[test]
fn scenario_external_stage_never_transpiles() {
    let run = RunContext::new();
    let model = Model::new("model.shop.raw_files", "SELECT * FROM @stage/file.csv");
    let planner = ExecutionPlanner::new(engine(), Transpiler::new(registry()));

    let plan = planner.plan(&run, &model).unwrap();
    assert_eq!(plan.venue(), Venue::Cloud);

    let decision = planner.engine().route(&model, &run);
    assert_eq!(decision.gate, Some(Gate::ExternalSources));
    assert!(!run.is_escalated(&model.id));
}

#[test]
fn scenario_volume_over_limit() {
    let run = RunContext::new();
    let model = Model::new(
        "model.shop.order_lines",
        "SELECT o.id, i.sku FROM orders o JOIN order_items i ON i.order_id = o.id",
    )
    .with_upstream_relation("model.shop.orders", "analytics.staging.orders")
    .with_upstream_relation("model.shop.order_items", "analytics.staging.order_items");

    let decision = engine().route(&model, &run);
    assert_eq!(decision.venue, Venue::Cloud);
    assert_eq!(decision.gate, Some(Gate::DataVolume));
    assert!(decision.reason.contains("7.0GB > 5.0GB"), "reason: {}", decision.reason);
}

#[test]
fn scenario_clean_sql_runs_locally() {
    let run = RunContext::new();
    let model = Model::new("model.shop.customers", r#"SELECT "ID", name FROM customers"#)
        .with_upstream_relation("model.shop.stg_customers", "analytics.staging.customers");
    let planner = ExecutionPlanner::new(engine(), Transpiler::new(registry()));

    match planner.plan(&run, &model).unwrap() {
        ExecutionPlan::Local { sql, applied } => {
            assert_eq!(sql, "SELECT id, name FROM customers");
            assert!(!applied.is_empty());
        }
        other => panic!("expected local plan, got {:?}", other),
    }

    let explanation = planner.engine().explain(&model, &run);
    assert_eq!(explanation.volume.and_then(|v| v.bytes()), Some(gb_to_bytes(1.2)));
}

#[test]
fn external_stage_beats_small_volume() {
    let run = RunContext::new();
    let model = Model::new("model.shop.loaded", "SELECT * FROM @raw_stage/orders")
        .with_upstream_relation("model.shop.customers", "analytics.staging.customers");

    let decision = engine().route(&model, &run);
    assert_eq!(decision.gate, Some(Gate::ExternalSources));
}

#[test]
fn failure_pinning_and_clear() {
    let failures = Arc::new(FailureHistory::in_memory());
    let engine = engine().with_failures(Arc::clone(&failures));
    let model = Model::new("model.shop.heavy", "SELECT cortex.complete('m', body) FROM tickets");

    failures.record(&model.id, FailureKind::Oom).unwrap();
    let pinned = engine.route(&model, &RunContext::new());
    assert_eq!(pinned.gate, Some(Gate::FailureHistory));
    assert!(pinned.reason.contains("OOM"));

    failures.clear(&model.id).unwrap();
    let resumed = engine.route(&model, &RunContext::new());
    assert_eq!(resumed.gate, Some(Gate::CloudFunctions));
}

#[test]
fn escalation_propagates_downstream() {
    let run = RunContext::new();
    let planner = ExecutionPlanner::new(engine(), Transpiler::new(registry()));

    let upstream = Model::new("model.shop.events", "SELECT DATEADD(nanosecond, 5, ts) AS ts FROM events");
    let downstream = Model::new("model.shop.daily", "SELECT ts FROM events_view").with_upstream("model.shop.events");

    assert_eq!(planner.plan(&run, &upstream).unwrap().venue(), Venue::Cloud);

    let decision = planner.engine().route(&downstream, &run);
    assert_eq!(decision.gate, Some(Gate::Dependencies));
    assert_eq!(decision.reason, "Upstream events runs in the cloud");
}

#[test]
fn synced_cloud_upstream_passes_dependencies() {
    let ledger = Arc::new(SyncLedger::in_memory());
    let engine = RoutingEngine::new(registry()).with_sync(ledger.clone());
    let planner = ExecutionPlanner::new(engine, Transpiler::new(registry()));

    let upstream = Model::new("model.shop.big", "SELECT 1").with_route(RouteSetting::Cloud);
    let downstream = Model::new("model.shop.small", "SELECT 1").with_upstream("model.shop.big");

    let run = RunContext::new();
    assert_eq!(planner.plan(&run, &upstream).unwrap().venue(), Venue::Cloud);
    planner
        .finish(&upstream.id, Venue::Cloud, Duration::from_secs(40), Vec::new())
        .unwrap();
    ledger.mark_synced(&upstream.id).unwrap();
    assert!(ledger.is_materialized_locally(&upstream.id));

    let decision = planner.engine().route(&downstream, &run);
    assert_eq!(decision.venue, Venue::Local);
}

#[test]
fn concurrent_routes_compute_once() {
    let engine = engine();
    let run = RunContext::new();
    let model = Model::new("model.shop.customers", "SELECT id FROM customers")
        .with_upstream_relation("model.shop.stg_customers", "analytics.staging.customers");

    let decisions: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| engine.route(&model, &run)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    // Identical timestamps mean a single evaluation was shared
    assert!(decisions.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(run.len(), 1);
}

#[test]
fn spatial_types_and_conversions_stay_in_the_cloud() {
    let planner = ExecutionPlanner::new(engine(), Transpiler::new(registry()));

    for (id, sql) in [
        ("model.geo.cast_suffix", "SELECT loc::GEOGRAPHY AS g FROM t"),
        ("model.geo.cast_call", "SELECT CAST(wkt AS GEOMETRY) AS g FROM t"),
        ("model.geo.try_convert", "SELECT TRY_TO_GEOGRAPHY(wkt) AS g FROM t"),
    ] {
        let run = RunContext::new();
        let model = Model::new(id, sql);

        assert_eq!(planner.plan(&run, &model).unwrap().venue(), Venue::Cloud, "{}", sql);
        let decision = planner.engine().route(&model, &run);
        assert_eq!(decision.gate, Some(Gate::CloudFunctions), "{}", sql);
        assert!(!run.is_escalated(&model.id));
        assert!(
            !run.diagnostics()
                .iter()
                .any(|d| d.code == DiagnosticCode::RegistryInconsistency),
            "{}: {:?}",
            sql,
            run.diagnostics()
        );
    }
}
