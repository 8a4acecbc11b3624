//! Road-network matrix integration tests.
//!
//! These need a running OSRM instance (e.g. `osrm/osrm-backend` with a
//! Nevada extract) and are skipped unless `OSRM_BASE_URL` is set:
//!
//! ```sh
//! OSRM_BASE_URL=http://127.0.0.1:5000 cargo test --test osrm_integration
//! ```

use std::env;

use dispatch_planner::domain::Location;
use dispatch_planner::geo::{DistanceMatrixProvider, GeoConfig, GeoIndex, MatrixKind};
use dispatch_planner::osrm::{OsrmClient, OsrmConfig};

fn client() -> Option<OsrmClient> {
    let base_url = match env::var("OSRM_BASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("OSRM_BASE_URL not set, skipping OSRM integration test");
            return None;
        }
    };
    let config = OsrmConfig {
        base_url,
        ..OsrmConfig::default()
    };
    Some(OsrmClient::new(config).expect("build OSRM client"))
}

fn vegas_locations() -> Vec<Location> {
    vec![
        Location::new(36.1147, -115.1728).unwrap(),
        Location::new(36.1727, -115.1580).unwrap(),
        Location::new(36.1215, -115.1739).unwrap(),
    ]
}

#[test]
fn osrm_table_returns_square_matrix() {
    let Some(client) = client() else { return };
    let locations = vegas_locations();

    let legs = client.legs_for(&locations).expect("table request");
    assert_eq!(legs.len(), locations.len());
    for (i, row) in legs.iter().enumerate() {
        assert_eq!(row.len(), locations.len());
        assert_eq!(legs[i][i].duration_secs, 0);
        for leg in row {
            assert!(leg.duration_secs >= 0);
            assert!(leg.distance_m >= 0.0);
        }
    }
}

#[test]
fn geo_index_snapshot_over_routed_backend() {
    let Ok(endpoint) = env::var("OSRM_BASE_URL") else {
        eprintln!("OSRM_BASE_URL not set, skipping OSRM integration test");
        return;
    };
    let geo = GeoIndex::for_kind(MatrixKind::Precise { endpoint }, GeoConfig::default())
        .expect("build routed index");

    let locations = vegas_locations();
    let matrix = geo.snapshot(&locations).expect("snapshot");
    assert_eq!(matrix.len(), locations.len());
    // Road distance can never beat the straight line.
    let straight = dispatch_planner::haversine::great_circle_m(locations[0], locations[1]);
    assert!(matrix.leg(0, 1).distance_m >= straight * 0.9);
}
