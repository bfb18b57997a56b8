//! OSRM HTTP adapter.
//!
//! Batch distances come from the Table service (restricted to the requested
//! sources and destinations), directions from the Trip service with the first
//! and last waypoint fixed.
//!
//! See: <http://project-osrm.org/docs/v5.24.0/api/>

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::geo::Coordinate;
use crate::polyline::Polyline;
use crate::traits::{Directions, LegEstimate, RoutingBackend};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OsrmConfig {
    pub base_url: String,
    pub profile: String,
    pub timeout_secs: u64,
    /// Origin/destination pairs per table request.
    pub batch_limit: usize,
    /// Waypoints per trip request.
    pub waypoint_limit: usize,
}

impl Default for OsrmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            profile: "car".to_string(),
            timeout_secs: 10,
            batch_limit: 25,
            waypoint_limit: 25,
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
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &OsrmConfig {
        &self.config
    }

    fn get<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, ProviderError> {
        self.client
            .get(url)
            .send()
            .and_then(|resp| resp.error_for_status())
            .and_then(|resp| resp.json::<T>())
            .map_err(|err| ProviderError::from_reqwest(&err, self.config.timeout_secs))
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }
}

impl RoutingBackend for OsrmClient {
    fn max_elements(&self) -> usize {
        self.config.batch_limit.max(1)
    }

    fn max_waypoints(&self) -> usize {
        self.config.waypoint_limit.max(2)
    }

    fn leg_estimates(
        &self,
        pairs: &[(Coordinate, Coordinate)],
        _departure: DateTime<Utc>,
    ) -> Result<Vec<Option<LegEstimate>>, ProviderError> {
        if pairs.is_empty() {
            return Ok(Vec::new());
        }

        let request = TableRequest::from_pairs(pairs);
        let url = format!(
            "{}/table/v1/{}/{}?sources={}&destinations={}&annotations=duration,distance",
            self.base(),
            self.config.profile,
            format_coords(&request.coordinates),
            join_indices(0..request.source_count),
            join_indices(request.source_count..request.coordinates.len()),
        );

        let body: TableResponse = self.get(&url)?;
        request.extract(body)
    }

    fn directions(
        &self,
        waypoints: &[Coordinate],
        _departure: DateTime<Utc>,
    ) -> Result<Directions, ProviderError> {
        if waypoints.len() < 2 {
            return Err(ProviderError::Malformed("directions need at least two waypoints".into()));
        }

        let url = format!(
            "{}/trip/v1/{}/{}?source=first&destination=last&roundtrip=false&overview=full&geometries=polyline",
            self.base(),
            self.config.profile,
            format_coords(waypoints),
        );

        let body: TripResponse = self.get(&url)?;
        body.into_directions(waypoints.len())
    }
}

fn format_coords(coords: &[Coordinate]) -> String {
    coords
        .iter()
        .map(|c| format!("{:.6},{:.6}", c.lng, c.lat))
        .collect::<Vec<_>>()
        .join(";")
}

fn join_indices(range: std::ops::Range<usize>) -> String {
    range.map(|i| i.to_string()).collect::<Vec<_>>().join(";")
}

/// Table request layout: unique origins first, then unique destinations.
#[derive(Debug)]
struct TableRequest {
    coordinates: Vec<Coordinate>,
    source_count: usize,
    /// (row, column) in the response matrix for each requested pair.
    cells: Vec<(usize, usize)>,
}

impl TableRequest {
    fn from_pairs(pairs: &[(Coordinate, Coordinate)]) -> Self {
        let mut sources: Vec<Coordinate> = Vec::new();
        let mut destinations: Vec<Coordinate> = Vec::new();
        let mut cells = Vec::with_capacity(pairs.len());

        for (from, to) in pairs {
            let row = position_or_push(&mut sources, *from);
            let col = position_or_push(&mut destinations, *to);
            cells.push((row, col));
        }

        let source_count = sources.len();
        sources.extend(destinations);
        Self {
            coordinates: sources,
            source_count,
            cells,
        }
    }

    fn extract(&self, body: TableResponse) -> Result<Vec<Option<LegEstimate>>, ProviderError> {
        if !body.is_ok() {
            return Err(ProviderError::Status {
                status: body.code,
                message: body.message.unwrap_or_default(),
            });
        }
        let durations = body
            .durations
            .ok_or_else(|| ProviderError::Malformed("table response has no durations".into()))?;
        let distances = body.distances.unwrap_or_default();

        let rows = self.source_count;
        let cols = self.coordinates.len() - self.source_count;
        if durations.len() != rows || durations.iter().any(|row| row.len() != cols) {
            return Err(ProviderError::Malformed(format!(
                "expected {rows}x{cols} duration table"
            )));
        }

        Ok(self
            .cells
            .iter()
            .map(|&(row, col)| {
                let duration = durations[row][col]?;
                // OSRM omits distances on older builds; keep the element failed then.
                let meters = distances.get(row).and_then(|r| r.get(col)).copied().flatten()?;
                Some(LegEstimate {
                    distance_km: meters / 1000.0,
                    duration_secs: duration.round() as i32,
                    duration_in_traffic_secs: None,
                })
            })
            .collect())
    }
}

fn position_or_push(list: &mut Vec<Coordinate>, coord: Coordinate) -> usize {
    if let Some(pos) = list.iter().position(|c| *c == coord) {
        pos
    } else {
        list.push(coord);
        list.len() - 1
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TableResponse {
    code: String,
    message: Option<String>,
    durations: Option<Vec<Vec<Option<f64>>>>,
    distances: Option<Vec<Vec<Option<f64>>>>,
}

impl TableResponse {
    fn is_ok(&self) -> bool {
        self.code == "Ok"
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TripResponse {
    code: String,
    message: Option<String>,
    #[serde(default)]
    trips: Vec<Trip>,
    #[serde(default)]
    waypoints: Vec<TripWaypoint>,
}

#[derive(Debug, Deserialize)]
struct Trip {
    distance: f64,
    duration: f64,
    geometry: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TripWaypoint {
    waypoint_index: usize,
}

impl TripResponse {
    fn into_directions(self, expected: usize) -> Result<Directions, ProviderError> {
        if self.code != "Ok" {
            return Err(ProviderError::Status {
                status: self.code,
                message: self.message.unwrap_or_default(),
            });
        }
        let trip = self
            .trips
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Malformed("trip response has no trips".into()))?;
        if self.waypoints.len() != expected {
            return Err(ProviderError::Malformed(format!(
                "expected {expected} waypoints, got {}",
                self.waypoints.len()
            )));
        }

        // waypoints come back in input order; waypoint_index is the trip position
        let mut visit_order: Vec<usize> = (0..expected).collect();
        visit_order.sort_by_key(|&input| self.waypoints[input].waypoint_index);

        let polyline = match trip.geometry {
            Some(encoded) => Polyline::decode(&encoded)
                .ok_or_else(|| ProviderError::Malformed("undecodable trip geometry".into()))?,
            None => Polyline::new(Vec::new()),
        };

        Ok(Directions {
            distance_km: trip.distance / 1000.0,
            duration_secs: trip.duration.round() as i32,
            duration_in_traffic_secs: None,
            visit_order,
            polyline,
        })
    }
}
