//! Distance provider: cache, budget, dispatch and fallback around a
//! [`RoutingBackend`].
//!
//! Callers never see a provider error. Every lookup returns a usable answer,
//! tagged with the [`Source`] it came from, so degraded results can be told
//! apart from provider-verified ones.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::{CacheEntry, DistanceCache};
use crate::clock::{Clock, SystemClock};
use crate::error::ProviderError;
use crate::geo::{CoordKey, Coordinate, GreatCircle, DEFAULT_URBAN_SPEED_KMH};
use crate::polyline::Polyline;
use crate::traffic::{TrafficCondition, TrafficProfile};
use crate::traits::{LegEstimate, RoutingBackend};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistanceConfig {
    pub cache_ttl_minutes: i64,
    /// Decimal places kept when keying the cache.
    pub key_decimals: u32,
    /// Backend requests allowed per UTC day.
    pub daily_request_budget: u32,
    /// Minimum spacing between two backend requests.
    pub min_batch_interval_ms: u64,
    pub fallback_speed_kmh: f64,
    /// Applied to fallback durations to approximate traffic.
    pub fallback_congestion: f64,
    pub traffic: TrafficProfile,
}

impl Default for DistanceConfig {
    fn default() -> Self {
        Self {
            cache_ttl_minutes: 30,
            key_decimals: 4,
            daily_request_budget: 2_500,
            min_batch_interval_ms: 100,
            fallback_speed_kmh: DEFAULT_URBAN_SPEED_KMH,
            fallback_congestion: 1.25,
            traffic: TrafficProfile::default(),
        }
    }
}

/// Where a distance answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    Provider,
    Cache,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistanceResult {
    pub distance_km: f64,
    pub duration_secs: i32,
    pub duration_in_traffic_secs: i32,
    pub traffic: TrafficCondition,
    pub source: Source,
}

/// Traffic-aware directions through a waypoint list.
#[derive(Debug, Clone, PartialEq)]
pub struct TrafficRoute {
    pub total_distance_km: f64,
    pub total_duration_secs: i32,
    pub total_duration_in_traffic_secs: i32,
    /// Visiting order as indices into the caller's waypoints.
    pub ordered_waypoint_indices: Vec<usize>,
    pub polyline: Polyline,
    pub estimated_arrival: DateTime<Utc>,
    pub traffic: TrafficCondition,
    pub source: Source,
    pub warnings: Vec<String>,
}

impl TrafficRoute {
    pub fn is_fallback(&self) -> bool {
        self.source == Source::Fallback
    }
}

/// Counters since the provider was built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub backend_calls: u64,
    pub fallbacks: u64,
}

#[derive(Debug, Default)]
struct Counters {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    backend_calls: AtomicU64,
    fallbacks: AtomicU64,
}

/// Daily request allowance; resets when the clock crosses a UTC day.
#[derive(Debug)]
struct RequestBudget {
    limit: u32,
    used: u32,
    day: Option<NaiveDate>,
}

impl RequestBudget {
    fn roll(&mut self, today: NaiveDate) {
        if self.day != Some(today) {
            self.day = Some(today);
            self.used = 0;
        }
    }

    fn try_consume(&mut self, today: NaiveDate) -> Result<(), ProviderError> {
        self.roll(today);
        if self.used >= self.limit {
            return Err(ProviderError::BudgetExhausted { limit: self.limit });
        }
        self.used += 1;
        Ok(())
    }

    fn remaining(&mut self, today: NaiveDate) -> u32 {
        self.roll(today);
        self.limit.saturating_sub(self.used)
    }
}

/// Serializes backend calls and spaces them out.
#[derive(Debug)]
struct Dispatcher {
    budget: RequestBudget,
    last_call: Option<Instant>,
}

type PairKey = (CoordKey, CoordKey);

pub struct DistanceProvider<B> {
    backend: B,
    cache: DistanceCache,
    clock: Arc<dyn Clock>,
    config: DistanceConfig,
    fallback: GreatCircle,
    dispatcher: Mutex<Dispatcher>,
    counters: Counters,
}

impl<B: RoutingBackend> DistanceProvider<B> {
    pub fn new(backend: B, config: DistanceConfig) -> Self {
        Self::with_clock(backend, config, Arc::new(SystemClock))
    }

    pub fn with_clock(backend: B, config: DistanceConfig, clock: Arc<dyn Clock>) -> Self {
        let cache = DistanceCache::new(Duration::minutes(config.cache_ttl_minutes), config.key_decimals);
        let dispatcher = Dispatcher {
            budget: RequestBudget {
                limit: config.daily_request_budget,
                used: 0,
                day: None,
            },
            last_call: None,
        };
        Self {
            backend,
            cache,
            clock,
            fallback: GreatCircle::new(config.fallback_speed_kmh),
            config,
            dispatcher: Mutex::new(dispatcher),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &DistanceConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn cache(&self) -> &DistanceCache {
        &self.cache
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn budget_remaining(&self) -> u32 {
        let today = self.clock.now().date_naive();
        let mut dispatcher = self.dispatcher.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        dispatcher.budget.remaining(today)
    }

    pub fn stats(&self) -> ProviderStats {
        ProviderStats {
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.counters.cache_misses.load(Ordering::Relaxed),
            backend_calls: self.counters.backend_calls.load(Ordering::Relaxed),
            fallbacks: self.counters.fallbacks.load(Ordering::Relaxed),
        }
    }

    /// Distance, duration and traffic for each (origin, destination) pair,
    /// in input order.
    pub fn get_distances(
        &self,
        pairs: &[(Coordinate, Coordinate)],
        departure: DateTime<Utc>,
    ) -> Vec<DistanceResult> {
        let now = self.clock.now();
        let mut results: Vec<Option<DistanceResult>> = vec![None; pairs.len()];
        let mut misses: BTreeMap<PairKey, (Coordinate, Coordinate, Vec<usize>)> = BTreeMap::new();

        for (i, &(from, to)) in pairs.iter().enumerate() {
            if let Some(entry) = self.cache.get(from, to, now) {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                results[i] = Some(DistanceResult {
                    distance_km: entry.distance_km,
                    duration_secs: entry.duration_secs,
                    duration_in_traffic_secs: entry.duration_in_traffic_secs,
                    traffic: entry.traffic,
                    source: Source::Cache,
                });
            } else {
                misses
                    .entry(self.cache.key(from, to))
                    .or_insert_with(|| (from, to, Vec::new()))
                    .2
                    .push(i);
            }
        }

        self.counters
            .cache_misses
            .fetch_add(misses.len() as u64, Ordering::Relaxed);

        // Pairs from the same origin cell land in the same chunk, so one table
        // request covers neighbouring legs. Shorter legs lead within an origin.
        let mut unique: Vec<(Coordinate, Coordinate, Vec<usize>)> = misses.into_values().collect();
        unique.sort_by(|a, b| {
            a.0.key(self.config.key_decimals)
                .cmp(&b.0.key(self.config.key_decimals))
                .then_with(|| {
                    self.fallback
                        .distance_km(a.0, a.1)
                        .total_cmp(&self.fallback.distance_km(b.0, b.1))
                })
        });

        for chunk in unique.chunks(self.backend.max_elements().max(1)) {
            let request: Vec<(Coordinate, Coordinate)> = chunk.iter().map(|(f, t, _)| (*f, *t)).collect();
            let answers = match self.dispatch(|backend| backend.leg_estimates(&request, departure)) {
                Ok(legs) if legs.len() == request.len() => legs,
                Ok(legs) => {
                    warn!(expected = request.len(), got = legs.len(), "routing batch returned wrong element count, using great-circle fallback");
                    vec![None; request.len()]
                }
                Err(err) => {
                    warn!(error = %err, pairs = request.len(), "routing batch failed, using great-circle fallback");
                    vec![None; request.len()]
                }
            };

            for ((from, to, indices), answer) in chunk.iter().zip(answers) {
                let result = match answer {
                    Some(leg) => self.accept(*from, *to, leg, departure, now),
                    None => self.fallback_result(*from, *to),
                };
                for &i in indices {
                    results[i] = Some(result);
                }
            }
        }

        results
            .into_iter()
            .zip(pairs)
            .map(|(result, &(from, to))| result.unwrap_or_else(|| self.fallback_result(from, to)))
            .collect()
    }

    /// Directions through `waypoints` starting at `departure`. The first and
    /// last waypoint stay fixed; the provider may reorder the rest.
    pub fn get_traffic_aware_route(&self, waypoints: &[Coordinate], departure: DateTime<Utc>) -> TrafficRoute {
        let mut warnings = Vec::new();
        let limit = self.backend.max_waypoints().max(2);

        // Indices into the caller's waypoints that are actually sent.
        let kept: Vec<usize> = if waypoints.len() > limit {
            let message = format!(
                "{} waypoints exceed the provider limit of {}; {} dropped",
                waypoints.len(),
                limit,
                waypoints.len() - limit
            );
            warn!(waypoints = waypoints.len(), limit, "truncating waypoints for directions request");
            warnings.push(message);
            (0..limit - 1).chain(std::iter::once(waypoints.len() - 1)).collect()
        } else {
            (0..waypoints.len()).collect()
        };

        if kept.len() < 2 {
            return self.fallback_route(waypoints, &kept, departure, warnings);
        }

        let request: Vec<Coordinate> = kept.iter().map(|&i| waypoints[i]).collect();
        match self.dispatch(|backend| backend.directions(&request, departure)) {
            Ok(directions) if is_anchored_permutation(&directions.visit_order, request.len()) => {
                let in_traffic = directions
                    .duration_in_traffic_secs
                    .unwrap_or_else(|| self.config.traffic.in_traffic_secs(directions.duration_secs, departure));
                TrafficRoute {
                    total_distance_km: directions.distance_km,
                    total_duration_secs: directions.duration_secs,
                    total_duration_in_traffic_secs: in_traffic,
                    ordered_waypoint_indices: directions.visit_order.iter().map(|&i| kept[i]).collect(),
                    polyline: directions.polyline,
                    estimated_arrival: departure + Duration::seconds(in_traffic as i64),
                    traffic: TrafficCondition::classify(directions.duration_secs, in_traffic),
                    source: Source::Provider,
                    warnings,
                }
            }
            Ok(_) => {
                warn!("directions returned an invalid visiting order, using great-circle fallback");
                self.fallback_route(waypoints, &kept, departure, warnings)
            }
            Err(err) => {
                warn!(error = %err, "directions request failed, using great-circle fallback");
                self.fallback_route(waypoints, &kept, departure, warnings)
            }
        }
    }

    /// Great-circle answer for one pair.
    pub fn fallback_result(&self, from: Coordinate, to: Coordinate) -> DistanceResult {
        self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
        let distance_km = self.fallback.distance_km(from, to);
        let duration_secs = self.fallback.km_to_seconds(distance_km);
        DistanceResult {
            distance_km,
            duration_secs,
            duration_in_traffic_secs: (duration_secs as f64 * self.config.fallback_congestion).round() as i32,
            traffic: TrafficCondition::Unknown,
            source: Source::Fallback,
        }
    }

    fn accept(
        &self,
        from: Coordinate,
        to: Coordinate,
        leg: LegEstimate,
        departure: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DistanceResult {
        let in_traffic = leg
            .duration_in_traffic_secs
            .unwrap_or_else(|| self.config.traffic.in_traffic_secs(leg.duration_secs, departure));
        let traffic = TrafficCondition::classify(leg.duration_secs, in_traffic);
        self.cache.insert(
            from,
            to,
            CacheEntry {
                distance_km: leg.distance_km,
                duration_secs: leg.duration_secs,
                duration_in_traffic_secs: in_traffic,
                traffic,
                computed_at: now,
            },
        );
        DistanceResult {
            distance_km: leg.distance_km,
            duration_secs: leg.duration_secs,
            duration_in_traffic_secs: in_traffic,
            traffic,
            source: Source::Provider,
        }
    }

    fn fallback_route(
        &self,
        waypoints: &[Coordinate],
        kept: &[usize],
        departure: DateTime<Utc>,
        warnings: Vec<String>,
    ) -> TrafficRoute {
        self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
        let distance_km: f64 = kept
            .windows(2)
            .map(|leg| self.fallback.distance_km(waypoints[leg[0]], waypoints[leg[1]]))
            .sum();
        let duration_secs = self.fallback.km_to_seconds(distance_km);
        let in_traffic = (duration_secs as f64 * self.config.fallback_congestion).round() as i32;
        let stops: Vec<Coordinate> = kept.iter().map(|&i| waypoints[i]).collect();

        TrafficRoute {
            total_distance_km: distance_km,
            total_duration_secs: duration_secs,
            total_duration_in_traffic_secs: in_traffic,
            ordered_waypoint_indices: kept.to_vec(),
            polyline: Polyline::straight(&stops),
            estimated_arrival: departure + Duration::seconds(in_traffic as i64),
            traffic: TrafficCondition::Unknown,
            source: Source::Fallback,
            warnings,
        }
    }

    /// Run one backend call through the budget and rate limiter.
    fn dispatch<T>(&self, call: impl FnOnce(&B) -> Result<T, ProviderError>) -> Result<T, ProviderError> {
        let today = self.clock.now().date_naive();
        let mut dispatcher = self.dispatcher.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        dispatcher.budget.try_consume(today)?;

        let interval = StdDuration::from_millis(self.config.min_batch_interval_ms);
        if let Some(last) = dispatcher.last_call {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }

        self.counters.backend_calls.fetch_add(1, Ordering::Relaxed);
        let result = call(&self.backend);
        dispatcher.last_call = Some(Instant::now());
        debug!(remaining = dispatcher.budget.limit.saturating_sub(dispatcher.budget.used), ok = result.is_ok(), "routing request dispatched");
        result
    }
}

/// A permutation of `0..len` that keeps the first and last position.
fn is_anchored_permutation(order: &[usize], len: usize) -> bool {
    if len == 0 || order.len() != len || order.first() != Some(&0) || order.last() != Some(&(len - 1)) {
        return false;
    }
    let mut seen = vec![false; len];
    order.iter().all(|&i| i < len && !std::mem::replace(&mut seen[i], true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::traits::Directions;
    use chrono::TimeZone;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    struct FlakyBackend {
        fail: bool,
        calls: AtomicUsize,
        /// Origin latitudes of each table request.
        origins: Mutex<Vec<Vec<f64>>>,
    }

    impl RoutingBackend for FlakyBackend {
        fn max_elements(&self) -> usize {
            2
        }

        fn max_waypoints(&self) -> usize {
            4
        }

        fn leg_estimates(
            &self,
            pairs: &[(Coordinate, Coordinate)],
            _departure: DateTime<Utc>,
        ) -> Result<Vec<Option<LegEstimate>>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut origins) = self.origins.lock() {
                origins.push(pairs.iter().map(|(from, _)| from.lat).collect());
            }
            if self.fail {
                return Err(ProviderError::Unavailable("connection refused".into()));
            }
            Ok(pairs
                .iter()
                .map(|_| Some(LegEstimate { distance_km: 1.0, duration_secs: 60, duration_in_traffic_secs: Some(90) }))
                .collect())
        }

        fn directions(&self, waypoints: &[Coordinate], _departure: DateTime<Utc>) -> Result<Directions, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ProviderError::Timeout { timeout_secs: 10 });
            }
            Ok(Directions {
                distance_km: 5.0,
                duration_secs: 600,
                duration_in_traffic_secs: None,
                visit_order: (0..waypoints.len()).collect(),
                polyline: Polyline::straight(waypoints),
            })
        }
    }

    fn provider(fail: bool, budget: u32) -> (DistanceProvider<FlakyBackend>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 3, 22, 0, 0).unwrap()));
        let config = DistanceConfig {
            daily_request_budget: budget,
            min_batch_interval_ms: 0,
            traffic: TrafficProfile::free_flow(),
            ..DistanceConfig::default()
        };
        let backend = FlakyBackend {
            fail,
            calls: AtomicUsize::new(0),
            origins: Mutex::new(Vec::new()),
        };
        (DistanceProvider::with_clock(backend, config, clock.clone()), clock)
    }

    fn points(n: usize) -> Vec<Coordinate> {
        (0..n).map(|i| Coordinate::new(36.0 + i as f64 * 0.01, -115.0)).collect()
    }

    #[test]
    fn budget_exhaustion_falls_back_then_resets_next_day() {
        let (provider, clock) = provider(false, 1);
        let p = points(4);
        let departure = clock.now();
        let results = provider.get_distances(&[(p[0], p[1]), (p[1], p[2]), (p[2], p[3])], departure);

        // batch limit 2 → two chunks, only the first within budget
        assert_eq!(provider.backend().calls.load(Ordering::SeqCst), 1);
        assert_eq!(results.iter().filter(|r| r.source == Source::Provider).count(), 2);
        assert_eq!(results.iter().filter(|r| r.source == Source::Fallback).count(), 1);
        assert_eq!(provider.budget_remaining(), 0);

        clock.advance(Duration::hours(3));
        assert_eq!(provider.budget_remaining(), 1);
    }

    #[test]
    fn same_origin_pairs_share_a_request() {
        let (provider, clock) = provider(false, 100);
        let p = points(6);
        // interleaved origins p0, p1, p0, p1
        provider.get_distances(&[(p[0], p[2]), (p[1], p[3]), (p[0], p[4]), (p[1], p[5])], clock.now());

        let origins = provider.backend().origins.lock().unwrap().clone();
        assert_eq!(origins.len(), 2);
        for request in &origins {
            assert!(request.iter().all(|&lat| lat == request[0]), "mixed origins {request:?}");
        }
    }

    #[test]
    fn failure_never_raises() {
        let (provider, clock) = provider(true, 100);
        let p = points(3);
        let results = provider.get_distances(&[(p[0], p[1]), (p[1], p[2])], clock.now());
        assert!(results.iter().all(|r| r.source == Source::Fallback && r.distance_km > 0.0));

        let route = provider.get_traffic_aware_route(&[p[0], p[1], p[2], p[0]], clock.now());
        assert!(route.is_fallback());
        assert_eq!(route.ordered_waypoint_indices, vec![0, 1, 2, 3]);
        assert_eq!(route.total_duration_in_traffic_secs, (route.total_duration_secs as f64 * 1.25).round() as i32);
    }

    #[test]
    fn duplicate_pairs_cost_one_lookup() {
        let (provider, clock) = provider(false, 100);
        let p = points(2);
        let results = provider.get_distances(&[(p[0], p[1]), (p[0], p[1])], clock.now());
        assert_eq!(results[0], results[1]);
        assert_eq!(provider.stats().cache_misses, 1);
    }

    #[test]
    fn oversized_route_is_truncated_with_warning() {
        let (provider, clock) = provider(false, 100);
        let p = points(6);
        let route = provider.get_traffic_aware_route(&p, clock.now());
        assert_eq!(route.ordered_waypoint_indices, vec![0, 1, 2, 5]);
        assert_eq!(route.warnings.len(), 1);
        assert_eq!(route.source, Source::Provider);
    }

    #[test]
    fn anchored_permutation_check() {
        assert!(is_anchored_permutation(&[0, 2, 1, 3], 4));
        assert!(!is_anchored_permutation(&[1, 0, 2, 3], 4));
        assert!(!is_anchored_permutation(&[0, 1, 1, 3], 4));
        assert!(!is_anchored_permutation(&[0, 3], 4));
    }
}
