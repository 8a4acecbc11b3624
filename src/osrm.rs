//! OSRM HTTP adapter: the precise, road-network matrix path.

use serde::Deserialize;
use tracing::debug;

use crate::domain::Location;
use crate::geo::{DistanceMatrixProvider, GeoError, Leg};

#[derive(Debug, Clone)]
pub struct OsrmConfig {
    pub base_url: String,
    pub profile: String,
    pub timeout_secs: u64,
}

impl Default for OsrmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            profile: "car".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OsrmClient {
    config: OsrmConfig,
    client: reqwest::blocking::Client,
}

impl OsrmClient {
    pub fn new(config: OsrmConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }
}

impl DistanceMatrixProvider for OsrmClient {
    fn legs_for(&self, locations: &[Location]) -> Result<Vec<Vec<Leg>>, GeoError> {
        if locations.is_empty() {
            return Ok(Vec::new());
        }

        let coords = locations
            .iter()
            .map(|location| format!("{:.6},{:.6}", location.lon(), location.lat()))
            .collect::<Vec<_>>()
            .join(";");

        let url = format!(
            "{}/table/v1/{}/{}?annotations=duration,distance",
            self.config.base_url, self.config.profile, coords
        );

        let body = self
            .client
            .get(&url)
            .send()
            .and_then(|resp| resp.error_for_status())
            .and_then(|resp| resp.json::<OsrmTableResponse>())
            .map_err(|err| GeoError::MatrixFetch(err.to_string()))?;

        let durations = body
            .durations
            .ok_or_else(|| GeoError::MatrixFetch("table response missing durations".to_string()))?;
        let distances = body
            .distances
            .ok_or_else(|| GeoError::MatrixFetch("table response missing distances".to_string()))?;
        debug!(locations = locations.len(), "fetched OSRM table");

        let legs = durations
            .into_iter()
            .zip(distances)
            .map(|(duration_row, distance_row)| {
                duration_row
                    .into_iter()
                    .zip(distance_row)
                    .map(|(duration, distance)| Leg {
                        duration_secs: duration.round() as i64,
                        distance_m: distance,
                    })
                    .collect()
            })
            .collect();

        Ok(legs)
    }
}

#[derive(Debug, Deserialize)]
struct OsrmTableResponse {
    durations: Option<Vec<Vec<f64>>>,
    distances: Option<Vec<Vec<f64>>>,
}
