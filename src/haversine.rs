//! Great-circle distance matrix provider (fast path, and fallback when
//! the routed backend is unavailable).
//!
//! Estimates travel time from straight-line distance at an assumed
//! average speed. Less accurate than a road network but always available
//! and cheap enough to rebuild on every solve.

use rayon::prelude::*;

use crate::domain::Location;
use crate::geo::{DistanceMatrixProvider, GeoError, Leg};

/// Average driving speed assumption for time estimation.
const DEFAULT_SPEED_KMH: f64 = 40.0;

/// Earth radius in meters.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two locations in meters.
pub fn great_circle_m(from: Location, to: Location) -> f64 {
    let lat1 = from.lat().to_radians();
    let lat2 = to.lat().to_radians();
    let delta_lat = (to.lat() - from.lat()).to_radians();
    let delta_lon = (to.lon() - from.lon()).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_M * c
}

/// Haversine-based matrix provider.
#[derive(Debug, Clone)]
pub struct HaversineMatrix {
    /// Assumed average driving speed in km/h.
    pub speed_kmh: f64,
}

impl Default for HaversineMatrix {
    fn default() -> Self {
        Self {
            speed_kmh: DEFAULT_SPEED_KMH,
        }
    }
}

impl HaversineMatrix {
    pub fn new(speed_kmh: f64) -> Self {
        Self { speed_kmh }
    }

    fn leg(&self, from: Location, to: Location) -> Leg {
        let distance_m = great_circle_m(from, to);
        let hours = distance_m / 1000.0 / self.speed_kmh;
        Leg {
            duration_secs: (hours * 3600.0).round() as i64,
            distance_m,
        }
    }
}

impl DistanceMatrixProvider for HaversineMatrix {
    fn legs_for(&self, locations: &[Location]) -> Result<Vec<Vec<Leg>>, GeoError> {
        let legs = locations
            .par_iter()
            .map(|&from| {
                locations
                    .iter()
                    .map(|&to| self.leg(from, to))
                    .collect::<Vec<_>>()
            })
            .collect();
        Ok(legs)
    }
}
