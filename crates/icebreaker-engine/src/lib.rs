//! Icebreaker engine - routing decisions and execution planning
//!
//! This crate decides where each model runs:
//! - Failure history with crash detection
//! - Sync collaborator and ledger
//! - Historical cloud cost notes
//! - The seven-gate routing engine and per-run decision cache
//! - Execution planning with transpile escalation

pub mod cost;
pub mod gates;
pub mod issue;
pub mod planner;
pub mod router;
pub mod run;
pub mod state;
pub mod sync;

pub use cost::{CloudStats, CostHistory};
pub use gates::{builtin_gates, Analysis, GateFn, GateInput, GateVerdict};
pub use issue::RoutingIssue;
pub use planner::{ExecutionPlan, ExecutionPlanner};
pub use router::{Explanation, RoutingEngine};
pub use run::{Evaluation, RunContext};
pub use state::{FailureHistory, StateError};
pub use sync::{ExecutionOutcome, NoopSync, SyncCollaborator, SyncEntry, SyncLedger};
