//! Coordinates and the great-circle fallback estimator.
//!
//! Great-circle distance ignores roads, so it is only used when the routing
//! provider cannot answer. It is always available.

use serde::{Deserialize, Serialize};

/// Average urban driving speed used to turn fallback distances into time.
pub const DEFAULT_URBAN_SPEED_KMH: f64 = 30.0;

/// Earth radius in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// A WGS84 point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Rounded key used for caching; nearby GPS fixes collapse to one key.
    pub fn key(&self, decimals: u32) -> CoordKey {
        let scale = 10f64.powi(decimals as i32);
        CoordKey {
            lat: (self.lat * scale).round() as i64,
            lng: (self.lng * scale).round() as i64,
        }
    }
}

impl From<(f64, f64)> for Coordinate {
    fn from((lat, lng): (f64, f64)) -> Self {
        Self { lat, lng }
    }
}

/// Coordinate rounded to a fixed number of decimals, scaled to integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoordKey {
    lat: i64,
    lng: i64,
}

/// Great-circle distance between two points in kilometers.
pub fn haversine_km(from: Coordinate, to: Coordinate) -> f64 {
    let lat1_rad = from.lat.to_radians();
    let lat2_rad = to.lat.to_radians();
    let delta_lat = (to.lat - from.lat).to_radians();
    let delta_lng = (to.lng - from.lng).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_KM * c
}

/// Great-circle estimator: straight-line distance at an assumed speed.
#[derive(Debug, Clone, Copy)]
pub struct GreatCircle {
    /// Assumed average driving speed in km/h.
    pub speed_kmh: f64,
}

impl Default for GreatCircle {
    fn default() -> Self {
        Self {
            speed_kmh: DEFAULT_URBAN_SPEED_KMH,
        }
    }
}

impl GreatCircle {
    pub fn new(speed_kmh: f64) -> Self {
        Self { speed_kmh }
    }

    pub fn distance_km(&self, from: Coordinate, to: Coordinate) -> f64 {
        haversine_km(from, to)
    }

    /// Convert distance in km to travel time in seconds.
    pub fn km_to_seconds(&self, km: f64) -> i32 {
        let hours = km / self.speed_kmh;
        (hours * 3600.0).round() as i32
    }

    pub fn duration_secs(&self, from: Coordinate, to: Coordinate) -> i32 {
        self.km_to_seconds(self.distance_km(from, to))
    }
}
