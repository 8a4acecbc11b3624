//! Boundary types for the external realtime store and location feed.
//!
//! The feed delivers raw, unvalidated payloads (at-least-once, possibly
//! out of order); the manager validates them at ingestion. Published
//! plans flow out through [`PlanSink`]; consumers are read-only. Workers
//! and the requesting principal are pre-authenticated upstream — the
//! core trusts the identifiers it is handed.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{TaskId, TimeWindow, WorkerId};
use crate::plan::Plan;

/// One GPS fix from the location feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub worker: WorkerId,
    pub lat: f64,
    pub lon: f64,
    pub timestamp: i64,
}

/// Raw worker registration payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub id: WorkerId,
    pub lat: f64,
    pub lon: f64,
    pub timestamp: i64,
    pub capacity: i32,
    pub shift: TimeWindow,
    #[serde(default)]
    pub skills: Vec<String>,
}

/// Raw task payload from the intake stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: TaskId,
    pub lat: f64,
    pub lon: f64,
    pub demand: i32,
    pub window: TimeWindow,
    pub service_secs: i64,
    #[serde(default)]
    pub required_skills: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkerEvent {
    Registered(WorkerSpec),
    Deregistered(WorkerId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskEvent {
    Created(TaskSpec),
    Updated(TaskSpec),
    /// Removes the task from the next solve even if currently assigned;
    /// the orphaned stop is dropped from its route.
    Cancelled(TaskId),
    Completed(TaskId),
    Failed(TaskId),
}

/// Receives each plan that supersedes the previous one.
pub trait PlanSink: Send {
    fn publish(&self, plan: &Plan);
}

/// Default sink: log the plan summary and drop it.
#[derive(Debug, Default)]
pub struct LoggingSink;

impl PlanSink for LoggingSink {
    fn publish(&self, plan: &Plan) {
        info!(
            routes = plan.routes.len(),
            assigned = plan.assigned_count(),
            unassigned = plan.unassigned.len(),
            objective = plan.objective.weighted,
            "plan published"
        );
    }
}
