//! Test fixtures for dispatch-planner.
//!
//! Builders for workers, tasks, and feed payloads with sensible
//! defaults, plus a helper that assembles a model over the fast
//! great-circle matrix.

#![allow(dead_code)]

use std::sync::Arc;

use dispatch_planner::domain::{Location, Task, TaskId, TimeWindow, Worker, WorkerId};
use dispatch_planner::geo::{GeoConfig, GeoIndex};
use dispatch_planner::model::ConstraintModel;
use dispatch_planner::sync::{TaskSpec, WorkerSpec};

pub fn loc(lat: f64, lon: f64) -> Location {
    Location::new(lat, lon).expect("fixture coordinates are valid")
}

/// Builder for test workers with sensible defaults.
#[derive(Clone, Debug)]
pub struct WorkerBuilder {
    id: String,
    lat: f64,
    lon: f64,
    fix_timestamp: i64,
    capacity: i32,
    shift: (i64, i64),
    skills: Vec<String>,
}

impl WorkerBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            lat: 36.10,
            lon: -115.10,
            fix_timestamp: 0,
            capacity: 4,
            shift: (0, 10 * 3600),
            skills: Vec::new(),
        }
    }

    pub fn at(mut self, lat: f64, lon: f64) -> Self {
        self.lat = lat;
        self.lon = lon;
        self
    }

    pub fn capacity(mut self, capacity: i32) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn shift(mut self, start: i64, end: i64) -> Self {
        self.shift = (start, end);
        self
    }

    pub fn skill(mut self, skill: &str) -> Self {
        self.skills.push(skill.to_string());
        self
    }

    pub fn build(self) -> Worker {
        Worker::new(
            WorkerId::new(self.id),
            loc(self.lat, self.lon),
            self.fix_timestamp,
            self.capacity,
            TimeWindow::new(self.shift.0, self.shift.1),
            self.skills,
        )
        .expect("fixture worker is valid")
    }

    pub fn spec(self) -> WorkerSpec {
        WorkerSpec {
            id: WorkerId::new(self.id),
            lat: self.lat,
            lon: self.lon,
            timestamp: self.fix_timestamp,
            capacity: self.capacity,
            shift: TimeWindow::new(self.shift.0, self.shift.1),
            skills: self.skills,
        }
    }
}

/// Builder for test tasks with sensible defaults.
#[derive(Clone, Debug)]
pub struct TaskBuilder {
    id: String,
    lat: f64,
    lon: f64,
    demand: i32,
    window: (i64, i64),
    service_secs: i64,
    required_skills: Vec<String>,
}

impl TaskBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            lat: 36.11,
            lon: -115.10,
            demand: 1,
            window: (0, 8 * 3600),
            service_secs: 300,
            required_skills: Vec::new(),
        }
    }

    pub fn at(mut self, lat: f64, lon: f64) -> Self {
        self.lat = lat;
        self.lon = lon;
        self
    }

    pub fn demand(mut self, demand: i32) -> Self {
        self.demand = demand;
        self
    }

    pub fn window(mut self, start: i64, end: i64) -> Self {
        self.window = (start, end);
        self
    }

    pub fn service(mut self, secs: i64) -> Self {
        self.service_secs = secs;
        self
    }

    pub fn requires(mut self, skill: &str) -> Self {
        self.required_skills.push(skill.to_string());
        self
    }

    pub fn build(self) -> Task {
        Task::new(
            TaskId::new(self.id),
            loc(self.lat, self.lon),
            self.demand,
            TimeWindow::new(self.window.0, self.window.1),
            self.service_secs,
            self.required_skills,
        )
        .expect("fixture task is valid")
    }

    pub fn spec(self) -> TaskSpec {
        TaskSpec {
            id: TaskId::new(self.id),
            lat: self.lat,
            lon: self.lon,
            demand: self.demand,
            window: TimeWindow::new(self.window.0, self.window.1),
            service_secs: self.service_secs,
            required_skills: self.required_skills,
        }
    }
}

/// Model over the fast great-circle matrix.
pub fn model_for(workers: &[Worker], tasks: &[Task]) -> ConstraintModel {
    let mut locations: Vec<Location> = workers.iter().map(|worker| worker.location).collect();
    locations.extend(tasks.iter().map(|task| task.location));
    let matrix: Arc<_> = GeoIndex::fast(GeoConfig::default())
        .snapshot(&locations)
        .expect("great-circle snapshot cannot fail");
    ConstraintModel::build(workers, tasks, matrix)
}
