//! Assignment plan: per-worker stop sequences with ETAs.
//!
//! A plan is produced by the solver as a candidate and owned by the plan
//! manager once accepted. Consumers of a published plan are read-only.

use serde::{Deserialize, Serialize};

use crate::domain::{TaskId, WorkerId};

/// Why a task could not be placed on any route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnassignedReason {
    /// No worker satisfies the task's skill/capacity requirements.
    NoCapableWorker,
    /// The window ends before any worker can reach the task.
    WindowUnreachable,
    /// Capable workers exist but every insertion overflows capacity or
    /// breaks the schedule.
    CapacitySaturated,
    Cancelled,
}

/// One serviced stop on a worker's route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledStop {
    pub task: TaskId,
    /// Estimated arrival at the stop.
    pub eta: i64,
    /// Service begins at `max(eta, window.start)` — early arrival waits.
    pub service_start: i64,
    pub departure: i64,
    /// Seconds past the window end, when the stop is kept as a soft
    /// violation. Zero for on-time stops.
    pub violation_secs: i64,
}

/// Ordered stop sequence for one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub worker: WorkerId,
    pub stops: Vec<ScheduledStop>,
    pub travel_secs: i64,
    pub distance_m: f64,
    /// Total demand carried by this route.
    pub load: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unassigned {
    pub task: TaskId,
    pub reason: UnassignedReason,
}

/// Whether the search ran to completion or was cut short by the deadline
/// or a cancellation. A partial plan is still valid, just best-effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanStatus {
    Complete,
    Partial,
}

/// Weighted objective breakdown for operator surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Objective {
    pub travel_secs: i64,
    pub lateness_secs: i64,
    pub unassigned_tasks: usize,
    /// Total under the weights the solve ran with.
    pub weighted: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub routes: Vec<Route>,
    pub unassigned: Vec<Unassigned>,
    pub status: PlanStatus,
    pub objective: Objective,
    /// Seed the producing solve ran with, for reproducibility.
    pub seed: u64,
}

impl Plan {
    pub fn empty() -> Self {
        Self {
            routes: Vec::new(),
            unassigned: Vec::new(),
            status: PlanStatus::Complete,
            objective: Objective {
                travel_secs: 0,
                lateness_secs: 0,
                unassigned_tasks: 0,
                weighted: 0,
            },
            seed: 0,
        }
    }

    pub fn route_for(&self, worker: &WorkerId) -> Option<&Route> {
        self.routes.iter().find(|route| &route.worker == worker)
    }

    pub fn is_assigned(&self, task: &TaskId) -> bool {
        self.routes
            .iter()
            .any(|route| route.stops.iter().any(|stop| &stop.task == task))
    }

    pub fn assigned_count(&self) -> usize {
        self.routes.iter().map(|route| route.stops.len()).sum()
    }

    /// Largest single-route travel time; the load-balancing tie-breaker.
    pub fn max_route_travel_secs(&self) -> i64 {
        self.routes
            .iter()
            .map(|route| route.travel_secs)
            .max()
            .unwrap_or(0)
    }
}
