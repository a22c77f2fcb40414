//! Per-run routing state
//!
//! A `RunContext` is created at the start of a run and dropped at its end.
//! It memoizes one evaluation per model: the map lock is held only long
//! enough to fetch the model's once-cell, so routing different models never
//! contends and the same model is evaluated at most once.

use chrono::{DateTime, Utc};
use icebreaker_catalog::VolumeEstimate;
use icebreaker_core::{Diagnostic, RoutingDecision, SignalSet, Venue};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

/// Everything the gate pipeline produced for one model
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub model_id: String,

    /// Decision made by the gates, before any transpile escalation
    pub decision: RoutingDecision,

    /// Signals found in the model's SQL
    pub signals: SignalSet,

    /// Set when the SQL could not be scanned
    pub analysis_error: Option<String>,

    /// Volume estimate, if the Data Volume gate ran
    pub volume: Option<VolumeEstimate>,
}

/// Decision cache and escalations for one run
#[derive(Debug)]
pub struct RunContext {
    started_at: DateTime<Utc>,
    evaluations: Mutex<HashMap<String, Arc<OnceLock<Evaluation>>>>,
    escalations: Mutex<HashMap<String, RoutingDecision>>,
    warned: Mutex<HashSet<(String, &'static str)>>,
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            evaluations: Mutex::new(HashMap::new()),
            escalations: Mutex::new(HashMap::new()),
            warned: Mutex::new(HashSet::new()),
            diagnostics: Mutex::new(Vec::new()),
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// The once-cell holding a model's evaluation
    pub(crate) fn cell(&self, model_id: &str) -> Arc<OnceLock<Evaluation>> {
        let mut evaluations = lock(&self.evaluations);
        Arc::clone(evaluations.entry(model_id.to_string()).or_default())
    }

    /// Cached evaluation, if the model has been routed in this run
    pub fn evaluation(&self, model_id: &str) -> Option<Evaluation> {
        let cell = lock(&self.evaluations).get(model_id).cloned()?;
        cell.get().cloned()
    }

    /// Final decision including any transpile escalation
    pub fn decision(&self, model_id: &str) -> Option<RoutingDecision> {
        if let Some(escalated) = lock(&self.escalations).get(model_id) {
            return Some(escalated.clone());
        }
        self.evaluation(model_id).map(|e| e.decision)
    }

    /// Venue a model was routed to in this run
    pub fn venue_of(&self, model_id: &str) -> Option<Venue> {
        self.decision(model_id).map(|d| d.venue)
    }

    /// Re-route a model to the cloud after its decision was made
    ///
    /// Returns the escalated decision, or `None` if the model was never routed.
    pub fn escalate(&self, model_id: &str, reason: &str) -> Option<RoutingDecision> {
        let evaluation = self.evaluation(model_id)?;
        let escalated = evaluation.decision.escalate(reason);
        lock(&self.escalations).insert(model_id.to_string(), escalated.clone());
        Some(escalated)
    }

    pub fn is_escalated(&self, model_id: &str) -> bool {
        lock(&self.escalations).contains_key(model_id)
    }

    /// True the first time `(model, key)` is seen in this run
    pub fn warn_once(&self, model_id: &str, key: &'static str) -> bool {
        lock(&self.warned).insert((model_id.to_string(), key))
    }

    pub fn push_diagnostic(&self, diagnostic: Diagnostic) {
        lock(&self.diagnostics).push(diagnostic);
    }

    /// Diagnostics collected so far, in the order they were raised
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        lock(&self.diagnostics).clone()
    }

    /// Number of models evaluated in this run
    pub fn len(&self) -> usize {
        lock(&self.evaluations).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluation(model_id: &str) -> Evaluation {
        Evaluation {
            model_id: model_id.to_string(),
            decision: RoutingDecision::local(Vec::new()),
            signals: SignalSet::new(),
            analysis_error: None,
            volume: None,
        }
    }

    #[test]
    fn cells_are_shared_per_model() {
        let run = RunContext::new();
        let first = run.cell("a");
        let second = run.cell("a");
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &run.cell("b")));
    }

    #[test]
    fn escalation_overrides_cached_decision() {
        let run = RunContext::new();
        assert_eq!(run.escalate("a", "Transpile failed"), None);

        let _ = run.cell("a").set(evaluation("a"));
        assert_eq!(run.venue_of("a"), Some(Venue::Local));

        run.escalate("a", "Transpile failed: GET_DDL");
        assert_eq!(run.venue_of("a"), Some(Venue::Cloud));
        assert!(run.is_escalated("a"));

        // The gate evaluation itself is unchanged
        assert_eq!(run.evaluation("a").map(|e| e.decision.venue), Some(Venue::Local));
    }

    #[test]
    fn warnings_fire_once_per_model() {
        let run = RunContext::new();
        assert!(run.warn_once("a", "metadata"));
        assert!(!run.warn_once("a", "metadata"));
        assert!(run.warn_once("b", "metadata"));
    }
}
