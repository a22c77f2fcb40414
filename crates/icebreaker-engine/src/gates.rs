//! The seven routing gates
//!
//! Each gate is a plain function from a [`GateInput`] to a [`GateVerdict`].
//! The engine runs them in order and stops at the first one that fires.

use icebreaker_catalog::{VolumeEstimate, VolumeEstimator};
use icebreaker_core::{
    bytes_to_gb, CostConfig, Gate, Model, RouteSetting, RoutingConfig, SignalKind, SignalSet,
    UnknownVolumePolicy, Venue,
};
use std::cell::OnceCell;

use crate::cost::CostHistory;
use crate::issue::RoutingIssue;
use crate::run::RunContext;
use crate::state::FailureHistory;
use crate::sync::SyncCollaborator;

/// Result of one gate
#[derive(Debug, Clone, PartialEq)]
pub enum GateVerdict {
    /// Checked and did not fire, with an optional note for the trail
    Pass(Option<String>),

    /// Decides the venue
    Fire(Venue, String),

    /// Observation that never decides the venue
    Advisory(String),

    /// No data to evaluate the gate with
    Skip(String),
}

impl GateVerdict {
    pub fn pass() -> Self {
        Self::Pass(None)
    }

    pub fn passed(note: impl Into<String>) -> Self {
        Self::Pass(Some(note.into()))
    }

    pub fn cloud(reason: impl Into<String>) -> Self {
        Self::Fire(Venue::Cloud, reason.into())
    }
}

/// A gate evaluator
pub type GateFn = fn(&GateInput<'_>) -> GateVerdict;

/// Gates in evaluation order
pub fn builtin_gates() -> Vec<(Gate, GateFn)> {
    vec![
        (Gate::UserOverride, user_override as GateFn),
        (Gate::FailureHistory, failure_history),
        (Gate::ExternalSources, external_sources),
        (Gate::CloudFunctions, cloud_functions),
        (Gate::Dependencies, dependencies),
        (Gate::DataVolume, data_volume),
        (Gate::HistoricalCost, historical_cost),
    ]
}

/// Static analysis of a model's SQL
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Analysis {
    pub signals: SignalSet,

    /// Set when the SQL could not be scanned
    pub error: Option<String>,
}

impl Analysis {
    pub fn of(signals: SignalSet) -> Self {
        Self {
            signals,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            signals: SignalSet::new(),
            error: Some(error.into()),
        }
    }
}

/// Everything a gate may look at
pub struct GateInput<'a> {
    pub model: &'a Model,
    pub analysis: &'a Analysis,
    pub run: &'a RunContext,
    pub failures: &'a FailureHistory,
    pub sync: &'a dyn SyncCollaborator,
    pub estimator: Option<&'a VolumeEstimator>,
    pub cost: &'a CostHistory,
    pub routing: &'a RoutingConfig,
    pub cost_limits: &'a CostConfig,
    volume: OnceCell<VolumeEstimate>,
}

impl<'a> GateInput<'a> {
    /// Input without a volume estimator
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model: &'a Model,
        analysis: &'a Analysis,
        run: &'a RunContext,
        failures: &'a FailureHistory,
        sync: &'a dyn SyncCollaborator,
        cost: &'a CostHistory,
        routing: &'a RoutingConfig,
        cost_limits: &'a CostConfig,
    ) -> Self {
        Self {
            model,
            analysis,
            run,
            failures,
            sync,
            estimator: None,
            cost,
            routing,
            cost_limits,
            volume: OnceCell::new(),
        }
    }

    pub fn with_estimator(mut self, estimator: Option<&'a VolumeEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Volume estimate, computed on first use
    pub fn volume(&self) -> Option<&VolumeEstimate> {
        let estimator = self.estimator?;
        Some(self.volume.get_or_init(|| estimator.estimate(self.model)))
    }

    /// The estimate if it was computed
    pub fn take_volume(self) -> Option<VolumeEstimate> {
        self.volume.into_inner()
    }
}

/// Gate 1: an explicit route setting wins unconditionally
pub fn user_override(input: &GateInput<'_>) -> GateVerdict {
    match input.model.route {
        RouteSetting::Auto => GateVerdict::pass(),
        RouteSetting::Local => GateVerdict::Fire(Venue::Local, "User override: icebreaker_route = 'local'".to_string()),
        RouteSetting::Cloud => GateVerdict::cloud("User override: icebreaker_route = 'cloud'"),
    }
}

/// Gate 2: any unresolved local failure pins the model to the cloud
pub fn failure_history(input: &GateInput<'_>) -> GateVerdict {
    match input.failures.unresolved(&input.model.id) {
        Some(record) => {
            let issue = RoutingIssue::FailurePinned {
                model: input.model.id.clone(),
                record: record.clone(),
            };
            if input.run.warn_once(&input.model.id, "failure_pinned") {
                input.run.push_diagnostic(issue.to_diagnostic());
            }
            GateVerdict::cloud(format!("Previous local failure: {}", record))
        }
        None => GateVerdict::pass(),
    }
}

/// Gate 3: data the local engine cannot reach, or SQL that could not be scanned
pub fn external_sources(input: &GateInput<'_>) -> GateVerdict {
    if let Some(error) = &input.analysis.error {
        return GateVerdict::cloud(format!("Analysis failure: {}", error));
    }

    if let Some(signal) = input.analysis.signals.iter().find(|s| s.kind.is_external()) {
        let what = match signal.kind {
            SignalKind::CrossDatabaseRef => "Cross-database reference",
            _ => "External source",
        };
        return GateVerdict::cloud(format!("{}: {}", what, signal.matched));
    }

    if let Some(upstream) = input.model.upstream.iter().find(|u| u.external) {
        return GateVerdict::cloud(format!("External source: {}", upstream.relation_name()));
    }

    GateVerdict::pass()
}

/// Gate 4: functions only the cloud warehouse can run
pub fn cloud_functions(input: &GateInput<'_>) -> GateVerdict {
    let mut names: Vec<&str> = Vec::new();
    for signal in input
        .analysis
        .signals
        .iter()
        .filter(|s| s.kind == SignalKind::CloudFunction)
    {
        if !names.iter().any(|n| n.eq_ignore_ascii_case(&signal.matched)) {
            names.push(&signal.matched);
        }
    }

    if names.is_empty() {
        GateVerdict::pass()
    } else {
        GateVerdict::cloud(format!("Cloud-only function: {}", names.join(", ")))
    }
}

/// Gate 5: upstream models that run in the cloud
///
/// An upstream counts as cloud if it was routed (or escalated) to the cloud
/// in this run, or if the sync collaborator reports an unsynchronized cloud
/// output from a prior run. A cloud upstream passes once its output is
/// materialized locally; for upstreams routed in this run that sync must
/// have happened after the run started.
pub fn dependencies(input: &GateInput<'_>) -> GateVerdict {
    let mut materialized = Vec::new();

    for upstream in input.model.upstream.iter().filter(|u| u.is_model()) {
        // Routed in this run: only output synced since the run started counts
        let synced = match input.run.venue_of(&upstream.id) {
            Some(Venue::Cloud) => input
                .sync
                .materialized_since(&upstream.id, input.run.started_at()),
            Some(Venue::Local) => continue,
            None => match input.sync.prior_venue(&upstream.id) {
                Some(Venue::Cloud) => input.sync.is_materialized_locally(&upstream.id),
                _ => continue,
            },
        };

        if synced {
            materialized.push(short_name(&upstream.id));
            continue;
        }

        return GateVerdict::cloud(format!("Upstream {} runs in the cloud", short_name(&upstream.id)));
    }

    if materialized.is_empty() {
        GateVerdict::pass()
    } else {
        GateVerdict::passed(format!("Cloud upstream already synced: {}", materialized.join(", ")))
    }
}

/// Gate 6: estimated input bytes against the configured limit
pub fn data_volume(input: &GateInput<'_>) -> GateVerdict {
    let Some(estimate) = input.volume() else {
        return GateVerdict::Skip("no metadata provider".to_string());
    };
    let limit_gb = input.routing.max_local_gb;

    match estimate {
        VolumeEstimate::Known(bytes) => {
            let gb = bytes_to_gb(*bytes);
            if *bytes > icebreaker_core::gb_to_bytes(limit_gb) {
                GateVerdict::cloud(format!("Data volume {:.1}GB > {:.1}GB limit", gb, limit_gb))
            } else {
                GateVerdict::passed(format!("{:.1}GB <= {:.1}GB limit", gb, limit_gb))
            }
        }
        VolumeEstimate::Unknown { missing, .. } => {
            if input.run.warn_once(&input.model.id, "metadata_unavailable") {
                let issue = RoutingIssue::MetadataUnavailable {
                    model: input.model.id.clone(),
                    missing: missing.clone(),
                };
                tracing::warn!(model = %input.model.id, missing = ?missing, "volume metadata unavailable");
                input.run.push_diagnostic(issue.to_diagnostic());
            }

            match input.routing.unknown_volume {
                UnknownVolumePolicy::Cloud => GateVerdict::cloud(format!(
                    "Data volume unknown (no metadata for {}); failing safe to cloud",
                    missing.join(", ")
                )),
                UnknownVolumePolicy::Local => GateVerdict::passed(format!(
                    "Data volume unknown (no metadata for {}); treated as under limit",
                    missing.join(", ")
                )),
            }
        }
    }
}

/// Gate 7: cloud runtime history, advisory only
pub fn historical_cost(input: &GateInput<'_>) -> GateVerdict {
    if input.cost.stats(input.model).is_none() {
        return GateVerdict::Skip("no cloud statistics".to_string());
    }

    match input.cost.advisory(input.model, input.cost_limits) {
        Some(note) => {
            tracing::info!(model = %input.model.id, note = %note, "historical cost advisory");
            GateVerdict::Advisory(note)
        }
        None => GateVerdict::pass(),
    }
}

fn short_name(id: &str) -> &str {
    id.rsplit('.').next().unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::CloudStats;
    use crate::sync::{ExecutionOutcome, NoopSync, SyncLedger};
    use icebreaker_catalog::StaticMetadataProvider;
    use icebreaker_core::{gb_to_bytes, CompatibilitySignal, FailureKind};
    use std::sync::Arc;
    use std::time::Duration;

    struct Fixture {
        run: RunContext,
        failures: FailureHistory,
        cost: CostHistory,
        routing: RoutingConfig,
        limits: CostConfig,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                run: RunContext::new(),
                failures: FailureHistory::in_memory(),
                cost: CostHistory::default(),
                routing: RoutingConfig::default(),
                limits: CostConfig::default(),
            }
        }

        fn input<'a>(&'a self, model: &'a Model, analysis: &'a Analysis, sync: &'a dyn SyncCollaborator) -> GateInput<'a> {
            GateInput::new(
                model,
                analysis,
                &self.run,
                &self.failures,
                sync,
                &self.cost,
                &self.routing,
                &self.limits,
            )
        }
    }

    fn signals(list: &[(SignalKind, &str)]) -> Analysis {
        Analysis::of(
            list.iter()
                .enumerate()
                .map(|(i, (kind, text))| CompatibilitySignal::new(*kind, *text, i * 10))
                .collect(),
        )
    }

    #[test]
    fn override_forces_either_venue() {
        let f = Fixture::new();
        let analysis = Analysis::default();

        let local = Model::new("m", "select 1").with_route(RouteSetting::Local);
        assert!(matches!(user_override(&f.input(&local, &analysis, &NoopSync)), GateVerdict::Fire(Venue::Local, _)));

        let cloud = Model::new("m", "select 1").with_route(RouteSetting::Cloud);
        assert!(matches!(user_override(&f.input(&cloud, &analysis, &NoopSync)), GateVerdict::Fire(Venue::Cloud, _)));

        let auto = Model::new("m", "select 1");
        assert_eq!(user_override(&f.input(&auto, &analysis, &NoopSync)), GateVerdict::pass());
    }

    #[test]
    fn failure_history_cites_kind() {
        let f = Fixture::new();
        f.failures.record("m", FailureKind::Oom).unwrap();
        let model = Model::new("m", "select 1");
        let analysis = Analysis::default();

        match failure_history(&f.input(&model, &analysis, &NoopSync)) {
            GateVerdict::Fire(Venue::Cloud, reason) => assert!(reason.starts_with("Previous local failure: OOM at ")),
            other => panic!("expected fire, got {:?}", other),
        }
        assert_eq!(f.run.diagnostics().len(), 1);
    }

    #[test]
    fn external_signals_and_upstreams_fire() {
        let f = Fixture::new();
        let model = Model::new("m", "select 1");

        let stage = signals(&[(SignalKind::CloudFunction, "GET_DDL"), (SignalKind::ExternalStage, "@raw_stage")]);
        assert_eq!(
            external_sources(&f.input(&model, &stage, &NoopSync)),
            GateVerdict::cloud("External source: @raw_stage")
        );

        let cross = signals(&[(SignalKind::CrossDatabaseRef, "other_db.public.t")]);
        assert_eq!(
            external_sources(&f.input(&model, &cross, &NoopSync)),
            GateVerdict::cloud("Cross-database reference: other_db.public.t")
        );

        let failed = Analysis::failed("unterminated string literal at offset 7");
        assert_eq!(
            external_sources(&f.input(&model, &failed, &NoopSync)),
            GateVerdict::cloud("Analysis failure: unterminated string literal at offset 7")
        );

        let declared = Model::new("m", "select 1").with_external_upstream("source.shop.s3.events");
        assert_eq!(
            external_sources(&f.input(&declared, &Analysis::default(), &NoopSync)),
            GateVerdict::cloud("External source: source.shop.s3.events")
        );
    }

    #[test]
    fn cloud_functions_are_listed_once() {
        let f = Fixture::new();
        let model = Model::new("m", "select 1");
        let analysis = signals(&[
            (SignalKind::CloudFunction, "cortex.complete"),
            (SignalKind::CloudFunction, "GET_DDL"),
            (SignalKind::CloudFunction, "CORTEX.COMPLETE"),
        ]);
        assert_eq!(
            cloud_functions(&f.input(&model, &analysis, &NoopSync)),
            GateVerdict::cloud("Cloud-only function: cortex.complete, GET_DDL")
        );
    }

    #[test]
    fn dependencies_follow_sync_state() {
        let f = Fixture::new();
        let model = Model::new("model.shop.fct", "select 1").with_upstream("model.shop.big");
        let analysis = Analysis::default();

        let ledger = SyncLedger::in_memory();
        assert_eq!(dependencies(&f.input(&model, &analysis, &ledger)), GateVerdict::pass());

        ledger
            .report(&ExecutionOutcome::new("model.shop.big", Venue::Cloud, Duration::from_secs(30)))
            .unwrap();
        assert_eq!(
            dependencies(&f.input(&model, &analysis, &ledger)),
            GateVerdict::cloud("Upstream big runs in the cloud")
        );

        ledger.mark_synced("model.shop.big").unwrap();
        assert_eq!(dependencies(&f.input(&model, &analysis, &ledger)), GateVerdict::pass());
    }

    #[test]
    fn volume_gate() {
        let f = Fixture::new();
        let provider = StaticMetadataProvider::new()
            .with_table("raw.public.orders", gb_to_bytes(3.0))
            .with_table("raw.public.items", gb_to_bytes(4.0));
        let estimator = VolumeEstimator::new(Arc::new(provider));
        let analysis = Analysis::default();

        let big = Model::new("m", "select 1")
            .with_upstream_relation("source.s.raw.orders", "raw.public.orders")
            .with_upstream_relation("source.s.raw.items", "raw.public.items");
        let input = f.input(&big, &analysis, &NoopSync).with_estimator(Some(&estimator));
        assert_eq!(data_volume(&input), GateVerdict::cloud("Data volume 7.0GB > 5.0GB limit"));
        assert_eq!(input.take_volume(), Some(VolumeEstimate::Known(gb_to_bytes(7.0))));

        let small = Model::new("m", "select 1").with_upstream_relation("source.s.raw.orders", "raw.public.orders");
        let input = f.input(&small, &analysis, &NoopSync).with_estimator(Some(&estimator));
        assert_eq!(data_volume(&input), GateVerdict::passed("3.0GB <= 5.0GB limit"));

        let no_provider = f.input(&small, &analysis, &NoopSync);
        assert!(matches!(data_volume(&no_provider), GateVerdict::Skip(_)));
    }

    #[test]
    fn unknown_volume_fails_safe_and_warns_once() {
        let mut f = Fixture::new();
        let estimator = VolumeEstimator::new(Arc::new(StaticMetadataProvider::new()));
        let model = Model::new("m", "select 1").with_upstream_relation("source.s.raw.gone", "raw.public.gone");
        let analysis = Analysis::default();

        let verdict = data_volume(&f.input(&model, &analysis, &NoopSync).with_estimator(Some(&estimator)));
        assert!(matches!(verdict, GateVerdict::Fire(Venue::Cloud, _)));
        data_volume(&f.input(&model, &analysis, &NoopSync).with_estimator(Some(&estimator)));
        assert_eq!(f.run.diagnostics().len(), 1);

        f.routing.unknown_volume = UnknownVolumePolicy::Local;
        let verdict = data_volume(&f.input(&model, &analysis, &NoopSync).with_estimator(Some(&estimator)));
        assert!(matches!(verdict, GateVerdict::Pass(Some(_))));
    }

    #[test]
    fn historical_cost_never_fires() {
        let mut f = Fixture::new();
        f.cost = CostHistory::default().with_stats(
            "fct_orders",
            CloudStats {
                avg_seconds: 1200.0,
                run_count: 3,
                ..CloudStats::default()
            },
        );
        let model = Model::new("model.shop.fct_orders", "select 1");
        let analysis = Analysis::default();

        assert!(matches!(
            historical_cost(&f.input(&model, &analysis, &NoopSync)),
            GateVerdict::Advisory(_)
        ));

        let unknown = Model::new("model.shop.other", "select 1");
        assert!(matches!(
            historical_cost(&f.input(&unknown, &analysis, &NoopSync)),
            GateVerdict::Skip(_)
        ));
    }
}
