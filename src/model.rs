//! Declarative constraint model over workers, tasks, and a travel matrix.
//!
//! Hard constraints are an explicit tagged-variant set evaluated by a
//! propagation routine that prunes each task's candidate worker set
//! (arc-consistency over capacity, compatibility, and time windows).
//! A task no worker can serve is flagged unassignable and excluded from
//! the solve instead of failing the whole model.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::{Task, TaskId, TimeWindow, Worker, WorkerId};
use crate::geo::DistanceMatrix;
use crate::plan::{Plan, Unassigned, UnassignedReason};

/// Hard constraint variants. Exclusivity is structural (the solver's
/// route representation cannot double-assign) but is still checked when
/// validating a plan built elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// Route load must not exceed the worker's capacity.
    Capacity { worker: usize },
    /// Service must start within reach of the task's window.
    TimeWindow { task: usize },
    /// Worker must carry every skill the task requires.
    Compatibility { task: usize },
    /// A task appears on at most one route.
    Exclusivity,
}

#[derive(Debug, Clone)]
pub struct ModelWorker {
    pub id: WorkerId,
    pub location: crate::domain::Location,
    pub matrix_idx: usize,
    pub capacity: i32,
    pub shift: TimeWindow,
    pub skills: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ModelTask {
    pub id: TaskId,
    pub location: crate::domain::Location,
    pub matrix_idx: usize,
    pub demand: i32,
    pub window: TimeWindow,
    pub service_secs: i64,
    pub required_skills: Vec<String>,
    /// Worker indices that survived propagation.
    pub candidates: Vec<usize>,
}

/// Snapshot of the assignment problem handed to one solve.
///
/// Worker and task records are copied in at build time; nothing here is
/// mutated while a solve is in flight.
#[derive(Debug, Clone)]
pub struct ConstraintModel {
    pub workers: Vec<ModelWorker>,
    pub tasks: Vec<ModelTask>,
    pub constraints: Vec<Constraint>,
    /// Tasks excluded from the solve, with the reason reported.
    pub unassignable: Vec<Unassigned>,
    pub matrix: Arc<DistanceMatrix>,
}

impl ConstraintModel {
    /// Build a model from validated records and a matrix snapshot.
    ///
    /// Records whose location is missing from the snapshot are skipped
    /// with a warning; a single bad record never fails the build.
    pub fn build(workers: &[Worker], tasks: &[Task], matrix: Arc<DistanceMatrix>) -> Self {
        let mut model_workers = Vec::with_capacity(workers.len());
        for worker in workers {
            let Some(matrix_idx) = matrix.index_of(worker.location) else {
                warn!(worker = %worker.id, "location missing from matrix snapshot, skipping");
                continue;
            };
            model_workers.push(ModelWorker {
                id: worker.id.clone(),
                location: worker.location,
                matrix_idx,
                capacity: worker.capacity,
                shift: worker.shift,
                skills: worker.skills.clone(),
            });
        }

        let mut model_tasks = Vec::with_capacity(tasks.len());
        for task in tasks {
            let Some(matrix_idx) = matrix.index_of(task.location) else {
                warn!(task = %task.id, "location missing from matrix snapshot, skipping");
                continue;
            };
            model_tasks.push(ModelTask {
                id: task.id.clone(),
                location: task.location,
                matrix_idx,
                demand: task.demand,
                window: task.window,
                service_secs: task.service_secs,
                required_skills: task.required_skills.clone(),
                candidates: Vec::new(),
            });
        }

        let mut constraints = vec![Constraint::Exclusivity];
        for worker in 0..model_workers.len() {
            constraints.push(Constraint::Capacity { worker });
        }
        for task in 0..model_tasks.len() {
            constraints.push(Constraint::Compatibility { task });
            constraints.push(Constraint::TimeWindow { task });
        }

        let mut model = Self {
            workers: model_workers,
            tasks: model_tasks,
            constraints,
            unassignable: Vec::new(),
            matrix,
        };
        model.propagate();
        model
    }

    /// Incremental update for a location-only delta: re-index against a
    /// fresh matrix snapshot and re-run propagation. Structural changes
    /// (tasks or workers added/removed) rebuild with [`Self::build`].
    pub fn with_matrix(&self, matrix: Arc<DistanceMatrix>) -> Self {
        let mut workers = self.workers.clone();
        workers.retain_mut(|worker| match matrix.index_of(worker.location) {
            Some(idx) => {
                worker.matrix_idx = idx;
                true
            }
            None => {
                warn!(worker = %worker.id, "location missing from patched matrix, skipping");
                false
            }
        });

        let mut tasks = self.tasks.clone();
        tasks.retain_mut(|task| match matrix.index_of(task.location) {
            Some(idx) => {
                task.matrix_idx = idx;
                true
            }
            None => {
                warn!(task = %task.id, "location missing from patched matrix, skipping");
                false
            }
        });

        let mut constraints = vec![Constraint::Exclusivity];
        for worker in 0..workers.len() {
            constraints.push(Constraint::Capacity { worker });
        }
        for task in 0..tasks.len() {
            constraints.push(Constraint::Compatibility { task });
            constraints.push(Constraint::TimeWindow { task });
        }

        let mut model = Self {
            workers,
            tasks,
            constraints,
            unassignable: self.unassignable.clone(),
            matrix,
        };
        model.propagate();
        model
    }

    /// Arc-consistency pass: every task starts with the full worker set
    /// and each constraint variant prunes it. Tasks left with no
    /// candidate move to `unassignable` and are dropped from the solve
    /// set.
    fn propagate(&mut self) {
        let all_workers: Vec<usize> = (0..self.workers.len()).collect();
        let mut candidates = vec![all_workers; self.tasks.len()];

        for constraint in &self.constraints {
            match constraint {
                Constraint::Capacity { worker } => {
                    let capacity = self.workers[*worker].capacity;
                    for (task, set) in self.tasks.iter().zip(&mut candidates) {
                        if task.demand > capacity {
                            set.retain(|idx| idx != worker);
                        }
                    }
                }
                Constraint::Compatibility { task } => {
                    let required = &self.tasks[*task].required_skills;
                    candidates[*task].retain(|&worker| {
                        required
                            .iter()
                            .all(|skill| self.workers[worker].skills.contains(skill))
                    });
                }
                Constraint::TimeWindow { task } => {
                    let record = &self.tasks[*task];
                    candidates[*task].retain(|&worker| {
                        worker_can_reach(&self.workers[worker], record, &self.matrix)
                    });
                }
                // Structural: the route representation cannot
                // double-assign, nothing to prune here.
                Constraint::Exclusivity => {}
            }
        }

        let mut survivors = Vec::with_capacity(self.tasks.len());
        for (mut task, set) in std::mem::take(&mut self.tasks).into_iter().zip(candidates) {
            if set.is_empty() {
                let any_capable = self
                    .workers
                    .iter()
                    .any(|worker| worker_is_capable(worker, &task));
                let reason = if any_capable {
                    UnassignedReason::WindowUnreachable
                } else {
                    UnassignedReason::NoCapableWorker
                };
                debug!(task = %task.id, ?reason, "task unassignable");
                self.unassignable.push(Unassigned {
                    task: task.id.clone(),
                    reason,
                });
                continue;
            }
            task.candidates = set;
            survivors.push(task);
        }

        self.tasks = survivors;
    }

    pub fn worker_index(&self, id: &WorkerId) -> Option<usize> {
        self.workers.iter().position(|worker| &worker.id == id)
    }

    pub fn task_index(&self, id: &TaskId) -> Option<usize> {
        self.tasks.iter().position(|task| &task.id == id)
    }

    /// Hard-constraint check for a plan built against this model.
    /// Used when deciding whether a patched matrix still supports the
    /// published plan.
    pub fn plan_satisfies(&self, plan: &Plan, lateness_tolerance_secs: i64) -> bool {
        let mut seen = std::collections::HashSet::new();
        for route in &plan.routes {
            let Some(worker_idx) = self.worker_index(&route.worker) else {
                return false;
            };
            let worker = &self.workers[worker_idx];
            let mut load = 0;
            for stop in &route.stops {
                // Exclusivity
                if !seen.insert(stop.task.clone()) {
                    return false;
                }
                let Some(task_idx) = self.task_index(&stop.task) else {
                    return false;
                };
                let task = &self.tasks[task_idx];
                if !task.candidates.contains(&worker_idx) {
                    return false;
                }
                load += task.demand;
                if stop.violation_secs > lateness_tolerance_secs {
                    return false;
                }
            }
            if load > worker.capacity {
                return false;
            }
        }
        true
    }
}

/// Capacity and compatibility: the unary checks that do not depend on
/// travel times.
fn worker_is_capable(worker: &ModelWorker, task: &ModelTask) -> bool {
    if task.demand > worker.capacity {
        return false;
    }
    task.required_skills
        .iter()
        .all(|skill| worker.skills.contains(skill))
}

/// Time-window reachability from the worker's current position: the
/// direct drive must arrive before the window closes, and service must
/// fit inside the shift.
fn worker_can_reach(worker: &ModelWorker, task: &ModelTask, matrix: &DistanceMatrix) -> bool {
    let travel = matrix.leg(worker.matrix_idx, task.matrix_idx).duration_secs;
    let arrival = worker.shift.start + travel;
    if arrival > task.window.end {
        return false;
    }
    let service_start = arrival.max(task.window.start);
    service_start + task.service_secs <= worker.shift.end
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Location;
    use crate::geo::{GeoConfig, GeoIndex};

    fn loc(lat: f64, lon: f64) -> Location {
        Location::new(lat, lon).unwrap()
    }

    fn worker(id: &str, location: Location, capacity: i32, shift: (i64, i64)) -> Worker {
        Worker::new(
            WorkerId::new(id),
            location,
            0,
            capacity,
            TimeWindow::new(shift.0, shift.1),
            Vec::new(),
        )
        .unwrap()
    }

    fn task(id: &str, location: Location, demand: i32, window: (i64, i64)) -> Task {
        Task::new(
            TaskId::new(id),
            location,
            demand,
            TimeWindow::new(window.0, window.1),
            300,
            Vec::new(),
        )
        .unwrap()
    }

    fn snapshot(locations: &[Location]) -> Arc<DistanceMatrix> {
        GeoIndex::fast(GeoConfig::default()).snapshot(locations).unwrap()
    }

    #[test]
    fn reachable_task_keeps_candidates() {
        let base = loc(36.10, -115.10);
        let near = loc(36.11, -115.10);
        let matrix = snapshot(&[base, near]);
        let workers = vec![worker("w1", base, 2, (0, 8 * 3600))];
        let tasks = vec![task("t1", near, 1, (0, 4 * 3600))];

        let model = ConstraintModel::build(&workers, &tasks, matrix);
        assert_eq!(model.tasks.len(), 1);
        assert_eq!(model.tasks[0].candidates, vec![0]);
        assert!(model.unassignable.is_empty());
    }

    #[test]
    fn expired_window_flags_unassignable_but_keeps_others() {
        let base = loc(36.10, -115.10);
        let near = loc(36.11, -115.10);
        let far = loc(38.00, -117.00);
        let matrix = snapshot(&[base, near, far]);
        let workers = vec![worker("w1", base, 2, (0, 8 * 3600))];
        let tasks = vec![
            // far is hours away; window closes after 60s
            task("dead", far, 1, (0, 60)),
            task("ok", near, 1, (0, 4 * 3600)),
        ];

        let model = ConstraintModel::build(&workers, &tasks, matrix);
        assert_eq!(model.tasks.len(), 1);
        assert_eq!(model.tasks[0].id, TaskId::new("ok"));
        assert_eq!(model.unassignable.len(), 1);
        assert_eq!(model.unassignable[0].task, TaskId::new("dead"));
        assert_eq!(model.unassignable[0].reason, UnassignedReason::WindowUnreachable);
    }

    #[test]
    fn oversized_demand_is_no_capable_worker() {
        let base = loc(36.10, -115.10);
        let matrix = snapshot(&[base]);
        let workers = vec![worker("w1", base, 1, (0, 8 * 3600))];
        let tasks = vec![task("big", base, 5, (0, 4 * 3600))];

        let model = ConstraintModel::build(&workers, &tasks, matrix);
        assert!(model.tasks.is_empty());
        assert_eq!(model.unassignable[0].reason, UnassignedReason::NoCapableWorker);
    }

    #[test]
    fn missing_skill_prunes_worker() {
        let base = loc(36.10, -115.10);
        let matrix = snapshot(&[base]);
        let workers = vec![
            Worker::new(
                WorkerId::new("plain"),
                base,
                0,
                2,
                TimeWindow::new(0, 8 * 3600),
                Vec::new(),
            )
            .unwrap(),
            Worker::new(
                WorkerId::new("electrician"),
                base,
                0,
                2,
                TimeWindow::new(0, 8 * 3600),
                vec!["electrical".to_string()],
            )
            .unwrap(),
        ];
        let tasks = vec![Task::new(
            TaskId::new("fuse-box"),
            base,
            1,
            TimeWindow::new(0, 4 * 3600),
            300,
            vec!["electrical".to_string()],
        )
        .unwrap()];

        let model = ConstraintModel::build(&workers, &tasks, matrix);
        assert_eq!(model.tasks[0].candidates, vec![1]);
    }

    #[test]
    fn matrix_update_reindexes_and_repropagates() {
        let base = loc(36.10, -115.10);
        let near = loc(36.11, -115.10);
        let matrix = snapshot(&[base, near]);
        let workers = vec![worker("w1", base, 2, (0, 8 * 3600))];
        let tasks = vec![task("t1", near, 1, (0, 4 * 3600))];
        let model = ConstraintModel::build(&workers, &tasks, matrix);

        // Same locations, different snapshot ordering.
        let patched = model.with_matrix(snapshot(&[near, base]));
        assert_eq!(patched.tasks.len(), 1);
        assert_eq!(patched.tasks[0].matrix_idx, 0);
        assert_eq!(patched.workers[0].matrix_idx, 1);
        assert_eq!(patched.tasks[0].candidates, vec![0]);
    }

    #[test]
    fn constraint_set_covers_every_record() {
        let base = loc(36.10, -115.10);
        let matrix = snapshot(&[base]);
        let workers = vec![worker("w1", base, 2, (0, 3600))];
        let tasks = vec![task("t1", base, 1, (0, 3600))];
        let model = ConstraintModel::build(&workers, &tasks, matrix);

        assert!(model.constraints.contains(&Constraint::Exclusivity));
        assert!(model.constraints.contains(&Constraint::Capacity { worker: 0 }));
        assert!(model.constraints.contains(&Constraint::TimeWindow { task: 0 }));
        assert!(model.constraints.contains(&Constraint::Compatibility { task: 0 }));
    }
}
