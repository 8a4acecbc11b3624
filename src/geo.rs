//! Travel matrix computation and caching between worker and task locations.
//!
//! Two providers implement [`DistanceMatrixProvider`]: a great-circle
//! estimate ([`crate::haversine::HaversineMatrix`], the fast path) and a
//! road-network client ([`crate::osrm::OsrmClient`], the precise path).
//! The index keeps an LRU cache of per-pair legs keyed by rounded
//! coordinates, and tracks per-worker positions so that GPS jitter below
//! the movement threshold never invalidates cached legs.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{InvalidCoordinate, Location, WorkerId};
use crate::haversine::{self, HaversineMatrix};

/// Travel estimate for one directed location pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Leg {
    pub duration_secs: i64,
    pub distance_m: f64,
}

impl Leg {
    pub const ZERO: Leg = Leg {
        duration_secs: 0,
        distance_m: 0.0,
    };
}

/// Provides a full travel matrix for a list of locations.
///
/// The result is indexed by the provided location order and must be
/// square. Entries are non-negative; the diagonal is zero.
pub trait DistanceMatrixProvider: Send + Sync {
    fn legs_for(&self, locations: &[Location]) -> Result<Vec<Vec<Leg>>, GeoError>;
}

/// Which provider backs the index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatrixKind {
    /// Great-circle estimate at an assumed speed.
    #[default]
    Fast,
    /// Road-network durations/distances from an OSRM endpoint
    /// (e.g. `"http://localhost:5000"`).
    Precise { endpoint: String },
}

#[derive(Debug, Clone)]
pub struct GeoConfig {
    /// Movement below this distance is treated as GPS jitter and does not
    /// update the tracked position.
    pub movement_threshold_m: f64,
    pub cache_capacity: usize,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            movement_threshold_m: 50.0,
            cache_capacity: 50_000,
        }
    }
}

/// Geo-layer failure. Never fatal to the manager: a bad record is
/// rejected, a backend failure falls back to the great-circle estimate.
#[derive(Debug)]
pub enum GeoError {
    InvalidCoordinate(InvalidCoordinate),
    /// The routed backend failed or returned an unusable response.
    MatrixFetch(String),
    /// Provider returned a matrix of the wrong shape.
    Shape { expected: usize, got: usize },
}

impl From<InvalidCoordinate> for GeoError {
    fn from(err: InvalidCoordinate) -> Self {
        GeoError::InvalidCoordinate(err)
    }
}

impl fmt::Display for GeoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeoError::InvalidCoordinate(err) => err.fmt(f),
            GeoError::MatrixFetch(msg) => write!(f, "matrix fetch failed: {msg}"),
            GeoError::Shape { expected, got } => {
                write!(f, "matrix shape mismatch: expected {expected} rows, got {got}")
            }
        }
    }
}

impl std::error::Error for GeoError {}

/// Cache key: coordinates rounded to ~1 meter.
type CoordKey = (i64, i64);

const KEY_SCALE: f64 = 1e5;

fn coord_key(location: Location) -> CoordKey {
    (
        (location.lat() * KEY_SCALE).round() as i64,
        (location.lon() * KEY_SCALE).round() as i64,
    )
}

/// Immutable travel matrix over a deduplicated location list.
///
/// One snapshot is taken at solve start and shared (`Arc`) with the
/// solver, so a concurrent refresh never changes a matrix mid-search.
#[derive(Debug, Clone)]
pub struct DistanceMatrix {
    locations: Vec<Location>,
    index: HashMap<CoordKey, usize>,
    legs: Vec<Vec<Leg>>,
}

impl DistanceMatrix {
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    pub fn index_of(&self, location: Location) -> Option<usize> {
        self.index.get(&coord_key(location)).copied()
    }

    pub fn leg(&self, from: usize, to: usize) -> Leg {
        self.legs[from][to]
    }
}

/// Distance/time index over live worker positions and task locations.
pub struct GeoIndex {
    provider: Box<dyn DistanceMatrixProvider>,
    /// Great-circle fallback when the primary provider fails.
    fallback: HaversineMatrix,
    config: GeoConfig,
    tracked: HashMap<WorkerId, Location>,
    cache: Mutex<LruCache<(CoordKey, CoordKey), Leg>>,
}

impl GeoIndex {
    pub fn new(provider: Box<dyn DistanceMatrixProvider>, config: GeoConfig) -> Self {
        let capacity = NonZeroUsize::new(config.cache_capacity.max(1)).expect("capacity >= 1");
        Self {
            provider,
            fallback: HaversineMatrix::default(),
            config,
            tracked: HashMap::new(),
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Index backed by the great-circle fast path.
    pub fn fast(config: GeoConfig) -> Self {
        Self::new(Box::new(HaversineMatrix::default()), config)
    }

    /// Index backed by the provider the configuration selects.
    pub fn for_kind(kind: MatrixKind, config: GeoConfig) -> Result<Self, GeoError> {
        match kind {
            MatrixKind::Fast => Ok(Self::fast(config)),
            MatrixKind::Precise { endpoint } => {
                let client = crate::osrm::OsrmClient::new(crate::osrm::OsrmConfig {
                    base_url: endpoint,
                    ..crate::osrm::OsrmConfig::default()
                })
                .map_err(|err| GeoError::MatrixFetch(err.to_string()))?;
                Ok(Self::new(Box::new(client), config))
            }
        }
    }

    /// Feed one location fix into the tracker.
    ///
    /// Returns `Some(adopted)` when the position actually changed (first
    /// fix, or moved beyond the movement threshold); `None` when the fix
    /// is within jitter range and the previous position stands.
    pub fn observe(&mut self, worker: &WorkerId, location: Location) -> Option<Location> {
        match self.tracked.get(worker) {
            Some(&previous) => {
                let moved_m = haversine::great_circle_m(previous, location);
                if moved_m < self.config.movement_threshold_m {
                    return None;
                }
                debug!(worker = %worker, moved_m = moved_m.round(), "position updated");
                self.tracked.insert(worker.clone(), location);
                Some(location)
            }
            None => {
                self.tracked.insert(worker.clone(), location);
                Some(location)
            }
        }
    }

    /// Feed a batch of fixes; returns the workers whose tracked position
    /// actually moved.
    pub fn refresh(&mut self, fixes: &[(WorkerId, Location)]) -> Vec<WorkerId> {
        fixes
            .iter()
            .filter_map(|(worker, location)| {
                self.observe(worker, *location).map(|_| worker.clone())
            })
            .collect()
    }

    pub fn tracked_location(&self, worker: &WorkerId) -> Option<Location> {
        self.tracked.get(worker).copied()
    }

    pub fn forget(&mut self, worker: &WorkerId) {
        self.tracked.remove(worker);
    }

    /// Travel estimate for a single pair, cache-first.
    pub fn leg_between(&self, from: Location, to: Location) -> Result<Leg, GeoError> {
        let key = (coord_key(from), coord_key(to));
        if key.0 == key.1 {
            return Ok(Leg::ZERO);
        }
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(leg) = cache.get(&key) {
                return Ok(*leg);
            }
        }
        let legs = self.compute([from, to].as_slice())?;
        let leg = legs[0][1];
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(key, leg);
            cache.put((key.1, key.0), legs[1][0]);
        }
        Ok(leg)
    }

    /// Build an immutable matrix snapshot over the given locations.
    ///
    /// Duplicate coordinates (same rounded key) collapse to one entry.
    /// Assembles from cache when every pair is present, otherwise asks
    /// the provider for the full matrix in one call and refills the
    /// cache from it.
    pub fn snapshot(&self, locations: &[Location]) -> Result<Arc<DistanceMatrix>, GeoError> {
        let mut index = HashMap::new();
        let mut unique = Vec::new();
        for &location in locations {
            let key = coord_key(location);
            if !index.contains_key(&key) {
                index.insert(key, unique.len());
                unique.push(location);
            }
        }

        let n = unique.len();
        if let Some(legs) = self.assemble_from_cache(&unique) {
            return Ok(Arc::new(DistanceMatrix {
                locations: unique,
                index,
                legs,
            }));
        }

        let legs = self.compute(&unique)?;
        if let Ok(mut cache) = self.cache.lock() {
            for (i, row) in legs.iter().enumerate() {
                for (j, leg) in row.iter().enumerate() {
                    if i != j {
                        cache.put((coord_key(unique[i]), coord_key(unique[j])), *leg);
                    }
                }
            }
        }
        debug!(locations = n, "matrix snapshot rebuilt");

        Ok(Arc::new(DistanceMatrix {
            locations: unique,
            index,
            legs,
        }))
    }

    fn assemble_from_cache(&self, unique: &[Location]) -> Option<Vec<Vec<Leg>>> {
        let mut cache = self.cache.lock().ok()?;
        let n = unique.len();
        let mut legs = vec![vec![Leg::ZERO; n]; n];
        for i in 0..n {
            for j in 0..n {
                if i == j {
                    continue;
                }
                let key = (coord_key(unique[i]), coord_key(unique[j]));
                legs[i][j] = *cache.get(&key)?;
            }
        }
        Some(legs)
    }

    fn compute(&self, locations: &[Location]) -> Result<Vec<Vec<Leg>>, GeoError> {
        let legs = match self.provider.legs_for(locations) {
            Ok(legs) => legs,
            Err(err) => {
                warn!(error = %err, "matrix provider failed, using great-circle fallback");
                self.fallback.legs_for(locations)?
            }
        };
        if legs.len() != locations.len() || legs.iter().any(|row| row.len() != locations.len()) {
            return Err(GeoError::Shape {
                expected: locations.len(),
                got: legs.len(),
            });
        }
        Ok(legs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(lat: f64, lon: f64) -> Location {
        Location::new(lat, lon).unwrap()
    }

    #[test]
    fn jitter_below_threshold_keeps_previous_position() {
        let mut geo = GeoIndex::fast(GeoConfig::default());
        let worker = WorkerId::new("w1");
        let first = loc(36.1000, -115.1000);
        assert!(geo.observe(&worker, first).is_some());

        // ~11 m north, well under the 50 m threshold
        let jitter = loc(36.1001, -115.1000);
        assert!(geo.observe(&worker, jitter).is_none());
        assert_eq!(geo.tracked_location(&worker), Some(first));
    }

    #[test]
    fn movement_beyond_threshold_is_adopted() {
        let mut geo = GeoIndex::fast(GeoConfig::default());
        let worker = WorkerId::new("w1");
        geo.observe(&worker, loc(36.1000, -115.1000));

        // ~1.1 km north
        let moved = loc(36.1100, -115.1000);
        assert_eq!(geo.observe(&worker, moved), Some(moved));
        assert_eq!(geo.tracked_location(&worker), Some(moved));
    }

    #[test]
    fn refresh_reports_only_moved_workers() {
        let mut geo = GeoIndex::fast(GeoConfig::default());
        let a = WorkerId::new("a");
        let b = WorkerId::new("b");
        geo.observe(&a, loc(36.10, -115.10));
        geo.observe(&b, loc(36.20, -115.20));

        let moved = geo.refresh(&[
            (a.clone(), loc(36.1001, -115.10)), // jitter
            (b.clone(), loc(36.30, -115.20)),   // real move
        ]);
        assert_eq!(moved, vec![b]);
    }

    #[test]
    fn snapshot_collapses_duplicate_coordinates() {
        let geo = GeoIndex::fast(GeoConfig::default());
        let a = loc(36.10, -115.10);
        let b = loc(36.20, -115.20);
        let matrix = geo.snapshot(&[a, b, a]).unwrap();
        assert_eq!(matrix.len(), 2);
        assert_eq!(matrix.index_of(a), Some(0));
        assert_eq!(matrix.index_of(b), Some(1));
    }

    #[test]
    fn snapshot_diagonal_is_zero_and_entries_non_negative() {
        let geo = GeoIndex::fast(GeoConfig::default());
        let locations = vec![loc(36.10, -115.10), loc(36.20, -115.20), loc(36.15, -115.05)];
        let matrix = geo.snapshot(&locations).unwrap();
        for i in 0..matrix.len() {
            assert_eq!(matrix.leg(i, i).duration_secs, 0);
            for j in 0..matrix.len() {
                assert!(matrix.leg(i, j).duration_secs >= 0);
                assert!(matrix.leg(i, j).distance_m >= 0.0);
            }
        }
    }

    #[test]
    fn second_snapshot_is_served_from_cache() {
        let geo = GeoIndex::fast(GeoConfig::default());
        let locations = vec![loc(36.10, -115.10), loc(36.20, -115.20)];
        let first = geo.snapshot(&locations).unwrap();
        let second = geo.snapshot(&locations).unwrap();
        assert_eq!(first.leg(0, 1), second.leg(0, 1));
    }

    #[test]
    fn leg_between_same_point_is_zero() {
        let geo = GeoIndex::fast(GeoConfig::default());
        let a = loc(36.10, -115.10);
        let leg = geo.leg_between(a, a).unwrap();
        assert_eq!(leg.duration_secs, 0);
    }
}
