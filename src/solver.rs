//! Assignment solver: greedy construction plus seeded local search.
//!
//! Construction inserts tasks in deadline order at their cheapest
//! feasible position. Improvement runs relocate, inter-route swap,
//! intra-route 2-opt, and reinsertion moves under simulated-annealing
//! acceptance, keeping the best plan seen. The loop polls a deadline and
//! a cancellation flag at a bounded interval and returns best-so-far
//! tagged [`PlanStatus::Partial`] when either trips — a timeout is not
//! an error. Given the same model and seed the result is identical.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::model::ConstraintModel;
use crate::plan::{
    Objective, Plan, PlanStatus, Route, ScheduledStop, Unassigned, UnassignedReason,
};

/// How many search iterations pass between deadline/cancellation polls.
const CANCEL_CHECK_INTERVAL: usize = 64;

#[derive(Debug, Clone)]
pub struct SolveOptions {
    /// Weight per second of travel.
    pub travel_weight: i64,
    /// Weight per second of time-window violation.
    pub lateness_weight: i64,
    /// Flat penalty per task left unassigned.
    pub unassigned_penalty: i64,
    /// Max seconds past a window end a stop may be scheduled before the
    /// insertion is rejected outright.
    pub lateness_tolerance_secs: i64,
    /// Local search iteration bound.
    pub max_iterations: usize,
    /// Seed for the improvement phase. Same model + same seed = same plan.
    pub seed: u64,
    /// Wall-clock budget; `None` runs to the iteration bound.
    pub deadline: Option<Duration>,
    pub initial_temperature: f64,
    pub cooling: f64,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            travel_weight: 1,
            lateness_weight: 3,
            unassigned_penalty: 7200, // two hours of travel equivalent
            lateness_tolerance_secs: 900,
            max_iterations: 20_000,
            seed: 0,
            deadline: None,
            initial_temperature: 600.0,
            cooling: 0.9995,
        }
    }
}

/// Solve to completion (or the iteration bound).
pub fn solve(model: &ConstraintModel, options: &SolveOptions) -> Plan {
    solve_cancellable(model, options, &AtomicBool::new(false))
}

/// Solve with a cooperative cancellation flag. When the flag is set (or
/// the deadline passes) the search returns the best plan found so far.
pub fn solve_cancellable(
    model: &ConstraintModel,
    options: &SolveOptions,
    cancel: &AtomicBool,
) -> Plan {
    let started = Instant::now();
    let deadline = options.deadline.map(|budget| started + budget);

    let greedy = construct(model, options);
    let mut current = greedy.clone();
    let mut best = greedy;
    let mut status = PlanStatus::Complete;

    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut temperature = options.initial_temperature;

    for iteration in 0..options.max_iterations {
        if iteration % CANCEL_CHECK_INTERVAL == 0 {
            let expired = deadline.is_some_and(|at| Instant::now() >= at);
            if expired || cancel.load(Ordering::Relaxed) {
                status = PlanStatus::Partial;
                break;
            }
        }

        if let Some(candidate) = propose(&current, model, options, &mut rng) {
            let (cur_total, cur_max) = score(&current, model, options);
            let (cand_total, cand_max) = score(&candidate, model, options);
            let delta = cand_total - cur_total;

            let accept = if delta < 0 {
                true
            } else if delta == 0 {
                // Load-balancing tie-break: smaller worst route wins.
                cand_max < cur_max
            } else {
                let p = (-(delta as f64) / temperature.max(1e-6)).exp();
                rng.gen_range(0.0..1.0) < p
            };

            if accept {
                current = candidate;
                if better(&current, &best, model, options) {
                    best = current.clone();
                }
            }
        }

        temperature *= options.cooling;
    }

    let plan = into_plan(best, model, options, status);
    debug!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        assigned = plan.assigned_count(),
        unassigned = plan.unassigned.len(),
        objective = plan.objective.weighted,
        partial = plan.status == PlanStatus::Partial,
        "solve finished"
    );
    plan
}

/// Recompute ETAs for an existing plan against a (possibly patched)
/// model, keeping the stop sequences. Stops whose task left the model
/// are dropped. Returns `None` when a route's worker is gone or a hard
/// constraint no longer holds — the caller escalates to a full solve.
pub fn reschedule(model: &ConstraintModel, plan: &Plan, options: &SolveOptions) -> Option<Plan> {
    let mut routes = vec![Vec::new(); model.workers.len()];
    for route in &plan.routes {
        let worker_idx = model.worker_index(&route.worker)?;
        for stop in &route.stops {
            if let Some(task_idx) = model.task_index(&stop.task) {
                routes[worker_idx].push(task_idx);
            }
        }
    }

    let mut schedules = Vec::with_capacity(routes.len());
    for (worker_idx, tasks) in routes.iter().enumerate() {
        schedules.push(schedule_route(model, worker_idx, tasks, options)?);
    }

    let placed: std::collections::HashSet<usize> = routes.iter().flatten().copied().collect();
    let unplaced = (0..model.tasks.len())
        .filter(|idx| !placed.contains(idx))
        .collect();

    let state = SearchState {
        routes,
        schedules,
        unplaced,
    };
    let mut patched = into_plan(state, model, options, plan.status);
    // Keep previously reported reasons where we still know them.
    for unassigned in &mut patched.unassigned {
        if let Some(previous) = plan
            .unassigned
            .iter()
            .find(|entry| entry.task == unassigned.task)
        {
            unassigned.reason = previous.reason;
        }
    }
    patched.seed = plan.seed;
    Some(patched)
}

// ---------------------------------------------------------------------------
// Search state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StopTiming {
    task_idx: usize,
    eta: i64,
    service_start: i64,
    departure: i64,
    violation_secs: i64,
}

#[derive(Debug, Clone)]
struct RouteSchedule {
    stops: Vec<StopTiming>,
    travel_secs: i64,
    distance_m: f64,
    load: i32,
    lateness_secs: i64,
}

impl RouteSchedule {
    fn empty() -> Self {
        Self {
            stops: Vec::new(),
            travel_secs: 0,
            distance_m: 0.0,
            load: 0,
            lateness_secs: 0,
        }
    }
}

#[derive(Debug, Clone)]
struct SearchState {
    /// Task indices per worker, in service order.
    routes: Vec<Vec<usize>>,
    schedules: Vec<RouteSchedule>,
    /// Solvable tasks currently on no route.
    unplaced: Vec<usize>,
}

/// Simulate one route. `None` when the sequence is inadmissible: load
/// over capacity, a stop later than the lateness tolerance, or service
/// running past the shift end.
fn schedule_route(
    model: &ConstraintModel,
    worker_idx: usize,
    tasks: &[usize],
    options: &SolveOptions,
) -> Option<RouteSchedule> {
    let worker = &model.workers[worker_idx];
    let mut time = worker.shift.start;
    let mut position = worker.matrix_idx;
    let mut schedule = RouteSchedule::empty();

    for &task_idx in tasks {
        let task = &model.tasks[task_idx];
        let leg = model.matrix.leg(position, task.matrix_idx);

        let eta = time + leg.duration_secs;
        let violation_secs = (eta - task.window.end).max(0);
        if violation_secs > options.lateness_tolerance_secs {
            return None;
        }
        let service_start = eta.max(task.window.start);
        let departure = service_start + task.service_secs;
        if departure > worker.shift.end {
            return None;
        }

        schedule.load += task.demand;
        if schedule.load > worker.capacity {
            return None;
        }
        schedule.travel_secs += leg.duration_secs;
        schedule.distance_m += leg.distance_m;
        schedule.lateness_secs += violation_secs;
        schedule.stops.push(StopTiming {
            task_idx,
            eta,
            service_start,
            departure,
            violation_secs,
        });

        time = departure;
        position = task.matrix_idx;
    }

    Some(schedule)
}

fn score(state: &SearchState, model: &ConstraintModel, options: &SolveOptions) -> (i64, i64) {
    let mut total = 0;
    let mut max_travel = 0;
    for schedule in &state.schedules {
        total += schedule.travel_secs * options.travel_weight
            + schedule.lateness_secs * options.lateness_weight;
        max_travel = max_travel.max(schedule.travel_secs);
    }
    total +=
        (state.unplaced.len() + model.unassignable.len()) as i64 * options.unassigned_penalty;
    (total, max_travel)
}

fn better(a: &SearchState, b: &SearchState, model: &ConstraintModel, options: &SolveOptions) -> bool {
    let (a_total, a_max) = score(a, model, options);
    let (b_total, b_max) = score(b, model, options);
    a_total < b_total || (a_total == b_total && a_max < b_max)
}

// ---------------------------------------------------------------------------
// Greedy construction
// ---------------------------------------------------------------------------

/// Deadline-ordered cheapest insertion. Tasks that fit nowhere stay
/// unplaced and carry the per-task penalty.
fn construct(model: &ConstraintModel, options: &SolveOptions) -> SearchState {
    let mut state = SearchState {
        routes: vec![Vec::new(); model.workers.len()],
        schedules: vec![RouteSchedule::empty(); model.workers.len()],
        unplaced: Vec::new(),
    };

    let mut order: Vec<usize> = (0..model.tasks.len()).collect();
    order.sort_by(|&a, &b| {
        let ta = &model.tasks[a];
        let tb = &model.tasks[b];
        ta.window.end.cmp(&tb.window.end).then(ta.id.cmp(&tb.id))
    });

    for task_idx in order {
        match cheapest_insertion(&state, model, task_idx, options) {
            Some((worker_idx, position, schedule)) => {
                state.routes[worker_idx].insert(position, task_idx);
                state.schedules[worker_idx] = schedule;
            }
            None => state.unplaced.push(task_idx),
        }
    }

    state
}

/// Best admissible (worker, position) for a task, by weighted route cost
/// increase. Candidate order is deterministic, so equal costs resolve to
/// the first candidate.
fn cheapest_insertion(
    state: &SearchState,
    model: &ConstraintModel,
    task_idx: usize,
    options: &SolveOptions,
) -> Option<(usize, usize, RouteSchedule)> {
    let task = &model.tasks[task_idx];
    let mut best: Option<(i64, usize, usize, RouteSchedule)> = None;

    for &worker_idx in &task.candidates {
        let current = &state.schedules[worker_idx];
        let current_cost = current.travel_secs * options.travel_weight
            + current.lateness_secs * options.lateness_weight;

        for position in 0..=state.routes[worker_idx].len() {
            let mut tasks = state.routes[worker_idx].clone();
            tasks.insert(position, task_idx);
            let Some(schedule) = schedule_route(model, worker_idx, &tasks, options) else {
                continue;
            };
            let cost = schedule.travel_secs * options.travel_weight
                + schedule.lateness_secs * options.lateness_weight
                - current_cost;
            if best.as_ref().is_none_or(|(best_cost, ..)| cost < *best_cost) {
                best = Some((cost, worker_idx, position, schedule));
            }
        }
    }

    best.map(|(_, worker_idx, position, schedule)| (worker_idx, position, schedule))
}

// ---------------------------------------------------------------------------
// Local search moves
// ---------------------------------------------------------------------------

/// Generate one candidate neighbour, or `None` when the drawn move is
/// inapplicable or inadmissible.
fn propose(
    state: &SearchState,
    model: &ConstraintModel,
    options: &SolveOptions,
    rng: &mut StdRng,
) -> Option<SearchState> {
    match rng.gen_range(0..4u8) {
        0 => relocate(state, model, options, rng),
        1 => swap(state, model, options, rng),
        2 => two_opt(state, model, options, rng),
        _ => reinsert(state, model, options, rng),
    }
}

fn random_loaded_route(state: &SearchState, rng: &mut StdRng) -> Option<usize> {
    let loaded: Vec<usize> = state
        .routes
        .iter()
        .enumerate()
        .filter(|(_, route)| !route.is_empty())
        .map(|(idx, _)| idx)
        .collect();
    if loaded.is_empty() {
        return None;
    }
    Some(loaded[rng.gen_range(0..loaded.len())])
}

/// Move one task to another admissible position (possibly on another
/// worker's route).
fn relocate(
    state: &SearchState,
    model: &ConstraintModel,
    options: &SolveOptions,
    rng: &mut StdRng,
) -> Option<SearchState> {
    let from = random_loaded_route(state, rng)?;
    let position = rng.gen_range(0..state.routes[from].len());
    let task_idx = state.routes[from][position];
    let task = &model.tasks[task_idx];

    let to = task.candidates[rng.gen_range(0..task.candidates.len())];

    let mut next = state.clone();
    next.routes[from].remove(position);
    let insert_at = rng.gen_range(0..=next.routes[to].len());
    if from == to && insert_at == position {
        return None;
    }
    next.routes[to].insert(insert_at, task_idx);

    next.schedules[from] = schedule_route(model, from, &next.routes[from], options)?;
    if to != from {
        next.schedules[to] = schedule_route(model, to, &next.routes[to], options)?;
    }
    Some(next)
}

/// Exchange two tasks between two routes.
fn swap(
    state: &SearchState,
    model: &ConstraintModel,
    options: &SolveOptions,
    rng: &mut StdRng,
) -> Option<SearchState> {
    let r1 = random_loaded_route(state, rng)?;
    let r2 = random_loaded_route(state, rng)?;
    if r1 == r2 {
        return None;
    }
    let p1 = rng.gen_range(0..state.routes[r1].len());
    let p2 = rng.gen_range(0..state.routes[r2].len());
    let t1 = state.routes[r1][p1];
    let t2 = state.routes[r2][p2];

    if !model.tasks[t1].candidates.contains(&r2) || !model.tasks[t2].candidates.contains(&r1) {
        return None;
    }

    let mut next = state.clone();
    next.routes[r1][p1] = t2;
    next.routes[r2][p2] = t1;
    next.schedules[r1] = schedule_route(model, r1, &next.routes[r1], options)?;
    next.schedules[r2] = schedule_route(model, r2, &next.routes[r2], options)?;
    Some(next)
}

/// Reverse a segment within one route.
fn two_opt(
    state: &SearchState,
    model: &ConstraintModel,
    options: &SolveOptions,
    rng: &mut StdRng,
) -> Option<SearchState> {
    let route_idx = random_loaded_route(state, rng)?;
    let len = state.routes[route_idx].len();
    if len < 3 {
        return None;
    }
    let i = rng.gen_range(0..len - 1);
    let j = rng.gen_range(i + 1..len);

    let mut next = state.clone();
    next.routes[route_idx][i..=j].reverse();
    next.schedules[route_idx] = schedule_route(model, route_idx, &next.routes[route_idx], options)?;
    Some(next)
}

/// Try to place an unplaced task at its cheapest admissible position.
fn reinsert(
    state: &SearchState,
    model: &ConstraintModel,
    options: &SolveOptions,
    rng: &mut StdRng,
) -> Option<SearchState> {
    if state.unplaced.is_empty() {
        return None;
    }
    let pick = rng.gen_range(0..state.unplaced.len());
    let task_idx = state.unplaced[pick];

    let (worker_idx, position, schedule) = cheapest_insertion(state, model, task_idx, options)?;
    let mut next = state.clone();
    next.routes[worker_idx].insert(position, task_idx);
    next.schedules[worker_idx] = schedule;
    next.unplaced.remove(pick);
    Some(next)
}

// ---------------------------------------------------------------------------
// Plan assembly
// ---------------------------------------------------------------------------

fn into_plan(
    state: SearchState,
    model: &ConstraintModel,
    options: &SolveOptions,
    status: PlanStatus,
) -> Plan {
    let (weighted, _) = score(&state, model, options);

    let mut travel_secs = 0;
    let mut lateness_secs = 0;
    let routes = state
        .schedules
        .iter()
        .enumerate()
        .map(|(worker_idx, schedule)| {
            travel_secs += schedule.travel_secs;
            lateness_secs += schedule.lateness_secs;
            Route {
                worker: model.workers[worker_idx].id.clone(),
                stops: schedule
                    .stops
                    .iter()
                    .map(|stop| ScheduledStop {
                        task: model.tasks[stop.task_idx].id.clone(),
                        eta: stop.eta,
                        service_start: stop.service_start,
                        departure: stop.departure,
                        violation_secs: stop.violation_secs,
                    })
                    .collect(),
                travel_secs: schedule.travel_secs,
                distance_m: schedule.distance_m,
                load: schedule.load,
            }
        })
        .collect();

    let mut unassigned = model.unassignable.clone();
    for &task_idx in &state.unplaced {
        unassigned.push(Unassigned {
            task: model.tasks[task_idx].id.clone(),
            reason: UnassignedReason::CapacitySaturated,
        });
    }

    Plan {
        routes,
        unassigned: unassigned.clone(),
        status,
        objective: Objective {
            travel_secs,
            lateness_secs,
            unassigned_tasks: unassigned.len(),
            weighted,
        },
        seed: options.seed,
    }
}
