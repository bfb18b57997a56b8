//! Dense travel matrix over depot + job locations.
//!
//! The route constructor works from a fixed matrix so that identical inputs
//! always give the same routes, whatever the provider's state was when the
//! matrix was built.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::distance::{DistanceProvider, Source};
use crate::geo::{Coordinate, GreatCircle};
use crate::traits::RoutingBackend;

#[derive(Debug, Clone, PartialEq)]
pub struct TravelMatrix {
    locations: Vec<Coordinate>,
    distance_km: Vec<Vec<f64>>,
    /// Expected travel time at departure, traffic included.
    duration_secs: Vec<Vec<i32>>,
    free_flow_secs: Vec<Vec<i32>>,
    fallback_pairs: usize,
}

impl TravelMatrix {
    /// Fetch every unordered pair once through the provider and mirror it.
    pub fn build<B: RoutingBackend>(
        provider: &DistanceProvider<B>,
        locations: &[Coordinate],
        departure: DateTime<Utc>,
    ) -> Self {
        let n = locations.len();
        let mut pairs = Vec::with_capacity(n * n.saturating_sub(1) / 2);
        let mut cells = Vec::with_capacity(pairs.capacity());
        for i in 0..n {
            for j in (i + 1)..n {
                pairs.push((locations[i], locations[j]));
                cells.push((i, j));
            }
        }

        let results = provider.get_distances(&pairs, departure);
        let mut distance_km = vec![vec![0.0; n]; n];
        let mut duration_secs = vec![vec![0; n]; n];
        let mut free_flow_secs = vec![vec![0; n]; n];
        let mut fallback_pairs = 0;
        for (&(i, j), result) in cells.iter().zip(&results) {
            distance_km[i][j] = result.distance_km;
            distance_km[j][i] = result.distance_km;
            duration_secs[i][j] = result.duration_in_traffic_secs;
            duration_secs[j][i] = result.duration_in_traffic_secs;
            free_flow_secs[i][j] = result.duration_secs;
            free_flow_secs[j][i] = result.duration_secs;
            if result.source == Source::Fallback {
                fallback_pairs += 1;
            }
        }

        debug!(locations = n, pairs = pairs.len(), fallback_pairs, "travel matrix built");
        Self {
            locations: locations.to_vec(),
            distance_km,
            duration_secs,
            free_flow_secs,
            fallback_pairs,
        }
    }

    /// Straight-line matrix at a fixed speed, without any provider.
    pub fn great_circle(locations: &[Coordinate], estimator: GreatCircle) -> Self {
        let n = locations.len();
        let mut distance_km = vec![vec![0.0; n]; n];
        let mut duration_secs = vec![vec![0; n]; n];
        for (i, from) in locations.iter().enumerate() {
            for (j, to) in locations.iter().enumerate() {
                if i != j {
                    let km = estimator.distance_km(*from, *to);
                    distance_km[i][j] = km;
                    duration_secs[i][j] = estimator.km_to_seconds(km);
                }
            }
        }
        Self {
            locations: locations.to_vec(),
            distance_km,
            free_flow_secs: duration_secs.clone(),
            duration_secs,
            fallback_pairs: n * n.saturating_sub(1) / 2,
        }
    }

    /// Matrix from explicit square tables (row = origin). The durations are
    /// taken as traffic-free.
    pub fn from_parts(locations: Vec<Coordinate>, distance_km: Vec<Vec<f64>>, duration_secs: Vec<Vec<i32>>) -> Self {
        Self {
            locations,
            distance_km,
            free_flow_secs: duration_secs.clone(),
            duration_secs,
            fallback_pairs: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn locations(&self) -> &[Coordinate] {
        &self.locations
    }

    pub fn distance(&self, from: usize, to: usize) -> f64 {
        self.distance_km[from][to]
    }

    pub fn duration(&self, from: usize, to: usize) -> i32 {
        self.duration_secs[from][to]
    }

    /// Travel time without congestion.
    pub fn free_flow_duration(&self, from: usize, to: usize) -> i32 {
        self.free_flow_secs[from][to]
    }

    /// Unordered pairs that came from the great-circle fallback.
    pub fn fallback_pairs(&self) -> usize {
        self.fallback_pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn great_circle_matrix_is_symmetric_with_zero_diagonal() {
        let locations = vec![
            Coordinate::new(36.1, -115.1),
            Coordinate::new(36.2, -115.2),
            Coordinate::new(36.3, -115.3),
        ];
        let matrix = TravelMatrix::great_circle(&locations, GreatCircle::default());
        for i in 0..3 {
            assert_eq!(matrix.distance(i, i), 0.0);
            for j in 0..3 {
                assert_eq!(matrix.distance(i, j), matrix.distance(j, i));
                assert_eq!(matrix.duration(i, j), matrix.duration(j, i));
                assert_eq!(matrix.free_flow_duration(i, j), matrix.duration(i, j));
            }
        }
        assert_eq!(matrix.fallback_pairs(), 3);
    }
}
