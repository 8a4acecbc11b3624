//! Core domain records: workers, tasks, locations, time windows.
//!
//! Records are validated at construction so the model and solver can
//! assume well-formed data. A rejected record never halts the manager;
//! the error carries the offending id for operator reporting.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for a worker or vehicle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(pub String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for a task (a stop to be serviced).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated coordinate pair (latitude, longitude) in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    lat: f64,
    lon: f64,
}

impl Location {
    /// Build a location, rejecting out-of-range or non-finite coordinates.
    pub fn new(lat: f64, lon: f64) -> Result<Self, InvalidCoordinate> {
        if !lat.is_finite() || !lon.is_finite() || !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(InvalidCoordinate { lat, lon });
        }
        Ok(Self { lat, lon })
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lon(&self) -> f64 {
        self.lon
    }
}

/// Malformed input coordinate. Rejects the single update that carried it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InvalidCoordinate {
    pub lat: f64,
    pub lon: f64,
}

impl fmt::Display for InvalidCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid coordinate ({}, {})", self.lat, self.lon)
    }
}

impl std::error::Error for InvalidCoordinate {}

/// `[start, end]` interval in seconds. Used for task service windows and
/// worker shifts alike; the epoch is whatever the feed uses, the planner
/// only compares and adds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: i64,
    pub end: i64,
}

impl TimeWindow {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, t: i64) -> bool {
        self.start <= t && t <= self.end
    }

    pub fn duration(&self) -> i64 {
        self.end - self.start
    }
}

/// Task lifecycle status. Transitions are driven by the plan manager and
/// by external completion events only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Unassigned,
    Assigned,
    InProgress,
    Completed,
    Failed,
}

/// A mobile worker or vehicle that services tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub location: Location,
    /// Timestamp of the last applied location fix.
    pub fix_timestamp: i64,
    pub capacity: i32,
    pub shift: TimeWindow,
    pub skills: Vec<String>,
}

impl Worker {
    pub fn new(
        id: WorkerId,
        location: Location,
        fix_timestamp: i64,
        capacity: i32,
        shift: TimeWindow,
        skills: Vec<String>,
    ) -> Result<Self, ModelBuildError> {
        if capacity < 0 {
            return Err(ModelBuildError::NegativeCapacity {
                worker: id,
                capacity,
            });
        }
        if shift.end < shift.start {
            return Err(ModelBuildError::InvertedShift { worker: id, shift });
        }
        Ok(Self {
            id,
            location,
            fix_timestamp,
            capacity,
            shift,
            skills,
        })
    }
}

/// A single stop to be serviced by one worker within a time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub location: Location,
    /// Capacity this task consumes on the worker that serves it.
    pub demand: i32,
    pub window: TimeWindow,
    /// On-site service duration in seconds.
    pub service_secs: i64,
    pub required_skills: Vec<String>,
    pub status: TaskStatus,
}

impl Task {
    pub fn new(
        id: TaskId,
        location: Location,
        demand: i32,
        window: TimeWindow,
        service_secs: i64,
        required_skills: Vec<String>,
    ) -> Result<Self, ModelBuildError> {
        if demand < 0 {
            return Err(ModelBuildError::NegativeDemand { task: id, demand });
        }
        if window.end < window.start {
            return Err(ModelBuildError::InvertedWindow { task: id, window });
        }
        if service_secs < 0 {
            return Err(ModelBuildError::NegativeServiceTime {
                task: id,
                service_secs,
            });
        }
        Ok(Self {
            id,
            location,
            demand,
            window,
            service_secs,
            required_skills,
            status: TaskStatus::Unassigned,
        })
    }
}

/// Malformed worker/task data. The offending record is rejected and
/// reported; the rest of the model still builds.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelBuildError {
    NegativeCapacity { worker: WorkerId, capacity: i32 },
    InvertedShift { worker: WorkerId, shift: TimeWindow },
    NegativeDemand { task: TaskId, demand: i32 },
    InvertedWindow { task: TaskId, window: TimeWindow },
    NegativeServiceTime { task: TaskId, service_secs: i64 },
}

impl fmt::Display for ModelBuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NegativeCapacity { worker, capacity } => {
                write!(f, "worker {worker}: negative capacity {capacity}")
            }
            Self::InvertedShift { worker, shift } => {
                write!(f, "worker {worker}: shift ends ({}) before it starts ({})", shift.end, shift.start)
            }
            Self::NegativeDemand { task, demand } => {
                write!(f, "task {task}: negative demand {demand}")
            }
            Self::InvertedWindow { task, window } => {
                write!(f, "task {task}: window ends ({}) before it starts ({})", window.end, window.start)
            }
            Self::NegativeServiceTime { task, service_secs } => {
                write!(f, "task {task}: negative service time {service_secs}s")
            }
        }
    }
}

impl std::error::Error for ModelBuildError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_latitude() {
        assert!(Location::new(91.0, 0.0).is_err());
        assert!(Location::new(-90.5, 0.0).is_err());
    }

    #[test]
    fn rejects_non_finite_coordinates() {
        assert!(Location::new(f64::NAN, 0.0).is_err());
        assert!(Location::new(0.0, f64::INFINITY).is_err());
    }

    #[test]
    fn accepts_boundary_coordinates() {
        assert!(Location::new(90.0, -180.0).is_ok());
        assert!(Location::new(-90.0, 180.0).is_ok());
    }

    #[test]
    fn rejects_negative_capacity() {
        let loc = Location::new(36.1, -115.1).unwrap();
        let err = Worker::new(
            WorkerId::new("w1"),
            loc,
            0,
            -1,
            TimeWindow::new(0, 3600),
            Vec::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ModelBuildError::NegativeCapacity { .. }));
    }

    #[test]
    fn rejects_inverted_task_window() {
        let loc = Location::new(36.1, -115.1).unwrap();
        let err = Task::new(
            TaskId::new("t1"),
            loc,
            1,
            TimeWindow::new(3600, 0),
            300,
            Vec::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ModelBuildError::InvertedWindow { .. }));
    }
}
