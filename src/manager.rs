//! Plan manager: owns the current plan and the worker/task stores.
//!
//! All feed updates land on one mpsc queue consumed by a single
//! dispatch thread, so worker/task records are never touched
//! concurrently with model building. Solves run on their own thread,
//! strictly one at a time; a trigger arriving mid-solve sets the
//! cancellation flag and is coalesced into the next solve. Rapid
//! updates are debounced into a single trigger. Minor location drift
//! patches the matrix and re-times the published plan instead of
//! re-solving.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::domain::{Location, Task, TaskId, TaskStatus, Worker, WorkerId};
use crate::geo::GeoIndex;
use crate::model::ConstraintModel;
use crate::plan::Plan;
use crate::solver::{self, SolveOptions};
use crate::sync::{LocationFix, PlanSink, TaskEvent, WorkerEvent};

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Coalescing window for rapid updates.
    pub debounce: Duration,
    pub solve_options: SolveOptions,
    /// A pending task whose window closes within this horizon forces a
    /// full re-solve even for a location-only batch.
    pub expiry_horizon_secs: i64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(5),
            solve_options: SolveOptions {
                deadline: Some(Duration::from_secs(2)),
                ..SolveOptions::default()
            },
            expiry_horizon_secs: 1800,
        }
    }
}

/// Lifecycle per plan instance. Terminal only on shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Solving,
    Published,
}

/// What a coalesced batch of updates warrants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Trigger {
    /// Matrix refresh + re-timed plan, no search.
    Patch,
    /// Rebuild the model and run the solver.
    Full,
}

enum Command {
    Fix(LocationFix),
    Task(TaskEvent),
    Worker(WorkerEvent),
    Force,
    SolveDone { generation: u64, plan: Plan },
    Shutdown,
}

/// Cloneable feed endpoint. Senders never block; each method returns
/// `false` once the manager has shut down.
#[derive(Clone)]
pub struct UpdateHandle {
    tx: Sender<Command>,
}

impl UpdateHandle {
    pub fn location_fix(&self, fix: LocationFix) -> bool {
        self.tx.send(Command::Fix(fix)).is_ok()
    }

    pub fn task_event(&self, event: TaskEvent) -> bool {
        self.tx.send(Command::Task(event)).is_ok()
    }

    pub fn worker_event(&self, event: WorkerEvent) -> bool {
        self.tx.send(Command::Worker(event)).is_ok()
    }
}

pub struct PlanManager {
    tx: Sender<Command>,
    current: Arc<RwLock<Option<Arc<Plan>>>>,
    thread: Option<JoinHandle<()>>,
}

impl PlanManager {
    pub fn spawn(geo: GeoIndex, config: ManagerConfig, sink: Box<dyn PlanSink>) -> Self {
        let (tx, rx) = mpsc::channel();
        let current = Arc::new(RwLock::new(None));

        let dispatch = Dispatch {
            geo,
            config,
            sink,
            workers: HashMap::new(),
            tasks: HashMap::new(),
            current: Arc::clone(&current),
            pending: None,
            debounce_until: None,
            in_flight: None,
            generation: 0,
            state: Lifecycle::Idle,
            clock: 0,
            tx: tx.clone(),
            rx,
        };

        let thread = thread::Builder::new()
            .name("plan-manager".to_string())
            .spawn(move || dispatch.run())
            .expect("spawn plan-manager thread");

        Self {
            tx,
            current,
            thread: Some(thread),
        }
    }

    pub fn handle(&self) -> UpdateHandle {
        UpdateHandle {
            tx: self.tx.clone(),
        }
    }

    /// Last published plan. Non-blocking; `None` until the first solve
    /// completes.
    pub fn current_plan(&self) -> Option<Arc<Plan>> {
        self.current.read().ok().and_then(|guard| guard.clone())
    }

    /// Trigger a full re-solve immediately, bypassing the debounce.
    pub fn force_resolve(&self) {
        let _ = self.tx.send(Command::Force);
    }

    pub fn shutdown(mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for PlanManager {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

struct InFlight {
    cancel: Arc<AtomicBool>,
    generation: u64,
    handle: JoinHandle<()>,
}

struct Dispatch {
    geo: GeoIndex,
    config: ManagerConfig,
    sink: Box<dyn PlanSink>,
    workers: HashMap<WorkerId, Worker>,
    tasks: HashMap<TaskId, Task>,
    current: Arc<RwLock<Option<Arc<Plan>>>>,
    pending: Option<Trigger>,
    debounce_until: Option<Instant>,
    in_flight: Option<InFlight>,
    generation: u64,
    state: Lifecycle,
    /// Latest feed timestamp seen; the manager's notion of "now".
    clock: i64,
    tx: Sender<Command>,
    rx: Receiver<Command>,
}

impl Dispatch {
    fn run(mut self) {
        loop {
            let command = match self.debounce_until {
                Some(at) => {
                    let wait = at.saturating_duration_since(Instant::now());
                    match self.rx.recv_timeout(wait) {
                        Ok(command) => Some(command),
                        Err(RecvTimeoutError::Timeout) => None,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match self.rx.recv() {
                    Ok(command) => Some(command),
                    Err(_) => break,
                },
            };

            match command {
                Some(Command::Shutdown) => break,
                Some(command) => self.handle(command),
                None => {
                    // Debounce window elapsed with no further updates.
                    self.debounce_until = None;
                    self.fire();
                }
            }

            // A steady update stream must not starve the trigger.
            if self.debounce_until.is_some_and(|at| Instant::now() >= at) {
                self.debounce_until = None;
                self.fire();
            }
        }

        if let Some(in_flight) = self.in_flight.take() {
            in_flight.cancel.store(true, Ordering::Relaxed);
            let _ = in_flight.handle.join();
        }
        debug!("plan manager stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Fix(fix) => self.apply_fix(fix),
            Command::Task(event) => self.apply_task_event(event),
            Command::Worker(event) => self.apply_worker_event(event),
            Command::Force => {
                self.mark(Trigger::Full);
                self.debounce_until = None;
                self.fire();
            }
            Command::SolveDone { generation, plan } => self.finish_solve(generation, plan),
            Command::Shutdown => unreachable!("handled in run loop"),
        }
    }

    fn apply_fix(&mut self, fix: LocationFix) {
        self.clock = self.clock.max(fix.timestamp);

        let Some(worker) = self.workers.get_mut(&fix.worker) else {
            warn!(worker = %fix.worker, "fix for unknown worker discarded");
            return;
        };
        if fix.timestamp <= worker.fix_timestamp {
            debug!(worker = %fix.worker, timestamp = fix.timestamp, "stale fix discarded");
            return;
        }
        let location = match Location::new(fix.lat, fix.lon) {
            Ok(location) => location,
            Err(err) => {
                warn!(worker = %fix.worker, error = %err, "fix rejected");
                return;
            }
        };

        worker.fix_timestamp = fix.timestamp;
        match self.geo.observe(&fix.worker, location) {
            Some(adopted) => {
                worker.location = adopted;
                self.mark(Trigger::Patch);
            }
            // Within jitter range: position stands, nothing to re-plan.
            None => {}
        }
    }

    fn apply_task_event(&mut self, event: TaskEvent) {
        match event {
            TaskEvent::Created(spec) | TaskEvent::Updated(spec) => {
                let location = match Location::new(spec.lat, spec.lon) {
                    Ok(location) => location,
                    Err(err) => {
                        warn!(task = %spec.id, error = %err, "task rejected");
                        return;
                    }
                };
                let task = match Task::new(
                    spec.id.clone(),
                    location,
                    spec.demand,
                    spec.window,
                    spec.service_secs,
                    spec.required_skills,
                ) {
                    Ok(task) => task,
                    Err(err) => {
                        warn!(task = %spec.id, error = %err, "task rejected");
                        return;
                    }
                };
                self.tasks.insert(task.id.clone(), task);
                self.mark(Trigger::Full);
            }
            TaskEvent::Cancelled(id) => {
                if self.tasks.remove(&id).is_some() {
                    info!(task = %id, "task cancelled");
                    self.mark(Trigger::Full);
                } else {
                    debug!(task = %id, "cancel for unknown task ignored");
                }
            }
            TaskEvent::Completed(id) => self.finish_task(id, TaskStatus::Completed),
            TaskEvent::Failed(id) => self.finish_task(id, TaskStatus::Failed),
        }
    }

    fn finish_task(&mut self, id: TaskId, status: TaskStatus) {
        let Some(task) = self.tasks.get_mut(&id) else {
            debug!(task = %id, "completion for unknown task ignored");
            return;
        };
        if matches!(task.status, TaskStatus::Completed | TaskStatus::Failed) {
            // At-least-once delivery: duplicate terminal events are expected.
            return;
        }
        task.status = status;
        // Dropping a finished stop only re-times the rest.
        self.mark(Trigger::Patch);
    }

    fn apply_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Registered(spec) => {
                self.clock = self.clock.max(spec.timestamp);
                let location = match Location::new(spec.lat, spec.lon) {
                    Ok(location) => location,
                    Err(err) => {
                        warn!(worker = %spec.id, error = %err, "registration rejected");
                        return;
                    }
                };
                let worker = match Worker::new(
                    spec.id.clone(),
                    location,
                    spec.timestamp,
                    spec.capacity,
                    spec.shift,
                    spec.skills,
                ) {
                    Ok(worker) => worker,
                    Err(err) => {
                        warn!(worker = %spec.id, error = %err, "registration rejected");
                        return;
                    }
                };
                self.geo.observe(&worker.id, worker.location);
                self.workers.insert(worker.id.clone(), worker);
                self.mark(Trigger::Full);
            }
            WorkerEvent::Deregistered(id) => {
                if self.workers.remove(&id).is_some() {
                    self.geo.forget(&id);
                    info!(worker = %id, "worker deregistered");
                    self.mark(Trigger::Full);
                }
            }
        }
    }

    /// Record a trigger and arm the debounce timer. A full trigger
    /// landing mid-solve asks the running search to wrap up.
    fn mark(&mut self, trigger: Trigger) {
        self.pending = Some(self.pending.map_or(trigger, |pending| pending.max(trigger)));
        if self.debounce_until.is_none() {
            self.debounce_until = Some(Instant::now() + self.config.debounce);
        }
        if trigger == Trigger::Full {
            if let Some(in_flight) = &self.in_flight {
                in_flight.cancel.store(true, Ordering::Relaxed);
            }
        }
    }

    /// Act on the coalesced trigger. Called when the debounce window
    /// closes or a solve finishes with a trigger queued behind it.
    fn fire(&mut self) {
        if self.in_flight.is_some() {
            return;
        }
        let Some(mut trigger) = self.pending.take() else {
            return;
        };

        if trigger == Trigger::Patch && self.window_near_expiry() {
            debug!("task window near expiry, escalating to full re-solve");
            trigger = Trigger::Full;
        }

        match trigger {
            Trigger::Patch => {
                if !self.try_patch() {
                    self.start_solve();
                }
            }
            Trigger::Full => self.start_solve(),
        }
    }

    fn window_near_expiry(&self) -> bool {
        self.tasks
            .values()
            .filter(|task| is_pending(task))
            .any(|task| task.window.end - self.clock <= self.expiry_horizon())
    }

    fn expiry_horizon(&self) -> i64 {
        self.config.expiry_horizon_secs
    }

    /// Location-drift path: fresh matrix, same stop sequences, new ETAs.
    /// Falls back to a full solve when the plan no longer holds.
    fn try_patch(&mut self) -> bool {
        let Some(plan) = self.current_plan() else {
            return false;
        };
        let Some(model) = self.build_model() else {
            return false;
        };
        let Some(patched) = solver::reschedule(&model, &plan, &self.config.solve_options) else {
            debug!("published plan no longer admissible, escalating");
            return false;
        };
        if !model.plan_satisfies(&patched, self.config.solve_options.lateness_tolerance_secs) {
            debug!("patched plan violates hard constraints, escalating");
            return false;
        }
        debug!("plan re-timed without search");
        self.publish(patched);
        true
    }

    fn start_solve(&mut self) {
        let Some(model) = self.build_model() else {
            return;
        };
        self.generation += 1;
        let generation = self.generation;
        let cancel = Arc::new(AtomicBool::new(false));
        let options = self.config.solve_options.clone();
        let tx = self.tx.clone();
        let cancel_for_solve = Arc::clone(&cancel);

        let handle = thread::Builder::new()
            .name("solver".to_string())
            .spawn(move || {
                let plan = solver::solve_cancellable(&model, &options, &cancel_for_solve);
                let _ = tx.send(Command::SolveDone { generation, plan });
            })
            .expect("spawn solver thread");

        self.in_flight = Some(InFlight {
            cancel,
            generation,
            handle,
        });
        self.state = Lifecycle::Solving;
        debug!(generation, "solve started");
    }

    fn finish_solve(&mut self, generation: u64, plan: Plan) {
        match self.in_flight.take() {
            Some(in_flight) if in_flight.generation == generation => {
                let _ = in_flight.handle.join();
            }
            other => {
                // Stale result from a superseded solve.
                self.in_flight = other;
                return;
            }
        }

        self.publish(plan);

        if self.pending.is_some() {
            self.debounce_until = None;
            self.fire();
        }
    }

    /// Atomically replace the owned plan and hand it to the sink.
    fn publish(&mut self, plan: Plan) {
        for route in &plan.routes {
            for stop in &route.stops {
                if let Some(task) = self.tasks.get_mut(&stop.task) {
                    if task.status == TaskStatus::Unassigned {
                        task.status = TaskStatus::Assigned;
                    }
                }
            }
        }
        for unassigned in &plan.unassigned {
            if let Some(task) = self.tasks.get_mut(&unassigned.task) {
                if task.status == TaskStatus::Assigned {
                    task.status = TaskStatus::Unassigned;
                }
            }
        }

        debug!(from = ?self.state, "lifecycle -> Published");
        info!(
            routes = plan.routes.len(),
            assigned = plan.assigned_count(),
            unassigned = plan.unassigned.len(),
            objective = plan.objective.weighted,
            "plan accepted"
        );
        let plan = Arc::new(plan);
        if let Ok(mut guard) = self.current.write() {
            *guard = Some(Arc::clone(&plan));
        }
        self.state = Lifecycle::Published;
        self.sink.publish(&plan);
    }

    fn current_plan(&self) -> Option<Arc<Plan>> {
        self.current.read().ok().and_then(|guard| guard.clone())
    }

    /// Snapshot the stores into a model. Sorted by id so an identical
    /// state always produces an identical model (and, with a fixed seed,
    /// an identical plan).
    fn build_model(&self) -> Option<ConstraintModel> {
        let mut workers: Vec<Worker> = self.workers.values().cloned().collect();
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        let mut tasks: Vec<Task> = self
            .tasks
            .values()
            .filter(|task| is_pending(task))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));

        let mut locations: Vec<Location> = workers.iter().map(|worker| worker.location).collect();
        locations.extend(tasks.iter().map(|task| task.location));

        match self.geo.snapshot(&locations) {
            Ok(matrix) => Some(ConstraintModel::build(&workers, &tasks, matrix)),
            Err(err) => {
                warn!(error = %err, "matrix snapshot failed, trigger dropped");
                None
            }
        }
    }
}

fn is_pending(task: &Task) -> bool {
    !matches!(task.status, TaskStatus::Completed | TaskStatus::Failed)
}
