//! Traffic-aware route refinement and fleet cost analysis.
//!
//! Each planned route is sent to the provider as depot → jobs → depot. A
//! provider answer replaces the visiting order, distance and timing; a
//! fallback answer keeps the constructor's order and distance and inflates
//! its free-flow driving time by a fixed congestion multiplier. Routes are handled one at
//! a time and a failure on one never affects another.

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::distance::DistanceProvider;
use crate::geo::Coordinate;
use crate::model::{Job, JobId, RouteId, Vehicle, VehicleId};
use crate::polyline::Polyline;
use crate::savings::PlannedRoute;
use crate::traffic::TrafficCondition;
use crate::traits::RoutingBackend;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineOptions {
    pub fuel_price_per_litre: f64,
    /// Applied to free-flow driving time when the provider gave no answer.
    pub congestion_multiplier: f64,
}

impl Default for RefineOptions {
    fn default() -> Self {
        Self {
            fuel_price_per_litre: 1.65,
            congestion_multiplier: 1.25,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefinementStatus {
    Optimized,
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefinedRoute {
    pub route_id: RouteId,
    pub vehicle_id: VehicleId,
    pub job_ids: Vec<JobId>,
    pub total_volume: f64,
    pub distance_km: f64,
    /// Free-flow driving time.
    pub duration_secs: i32,
    pub duration_in_traffic_secs: i32,
    /// On-site time summed over jobs.
    pub service_secs: i32,
    pub fuel_cost: f64,
    pub co2_kg: f64,
    pub traffic: TrafficCondition,
    pub polyline: Polyline,
    pub departure: DateTime<Utc>,
    /// Expected return to the depot.
    pub estimated_arrival: DateTime<Utc>,
    pub status: RefinementStatus,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SustainabilityRating {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl SustainabilityRating {
    pub fn from_gain(efficiency_gain_pct: f64) -> Self {
        if efficiency_gain_pct >= 40.0 {
            SustainabilityRating::Excellent
        } else if efficiency_gain_pct >= 25.0 {
            SustainabilityRating::Good
        } else if efficiency_gain_pct >= 10.0 {
            SustainabilityRating::Fair
        } else {
            SustainabilityRating::Poor
        }
    }
}

/// Fleet totals against a one-trip-per-job baseline.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CostAnalysis {
    pub total_distance_km: f64,
    pub total_fuel_cost: f64,
    pub total_co2_kg: f64,
    pub naive_distance_km: f64,
    pub naive_fuel_cost: f64,
    pub naive_co2_kg: f64,
    pub distance_saved_km: f64,
    pub fuel_saved: f64,
    pub co2_saved_kg: f64,
    pub efficiency_gain_pct: f64,
    pub rating: Option<SustainabilityRating>,
    pub fallback_routes: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefinementResult {
    pub routes: Vec<RefinedRoute>,
    pub analysis: CostAnalysis,
}

pub fn route_id(date: NaiveDate, vehicle_id: &VehicleId) -> RouteId {
    RouteId::new(format!("{date}/{vehicle_id}"))
}

pub fn fuel_cost(distance_km: f64, vehicle: &Vehicle, fuel_price: f64) -> f64 {
    distance_km / 100.0 * vehicle.fuel_consumption * fuel_price
}

pub fn co2_kg(distance_km: f64, vehicle: &Vehicle) -> f64 {
    distance_km * vehicle.emission_factor
}

#[allow(clippy::too_many_arguments)]
pub fn refine_routes<B: RoutingBackend>(
    provider: &DistanceProvider<B>,
    date: NaiveDate,
    planned: &[PlannedRoute],
    jobs: &[Job],
    fleet: &[Vehicle],
    depot: Coordinate,
    departure: DateTime<Utc>,
    options: &RefineOptions,
) -> RefinementResult {
    let jobs_by_id: HashMap<&JobId, &Job> = jobs.iter().map(|job| (&job.id, job)).collect();
    let vehicles: HashMap<&VehicleId, &Vehicle> = fleet.iter().map(|v| (&v.id, v)).collect();

    let mut routes = Vec::with_capacity(planned.len());
    for route in planned {
        if route.job_ids.is_empty() {
            continue;
        }
        let Some(vehicle) = vehicles.get(&route.vehicle_id) else {
            warn!(vehicle = %route.vehicle_id, "planned route references unknown vehicle, skipping refinement");
            continue;
        };
        let route_jobs: Option<Vec<&Job>> = route.job_ids.iter().map(|id| jobs_by_id.get(id).copied()).collect();
        let Some(route_jobs) = route_jobs else {
            warn!(vehicle = %route.vehicle_id, "planned route references unknown job, skipping refinement");
            continue;
        };

        routes.push(refine_one(provider, date, route, &route_jobs, vehicle, depot, departure, options));
    }

    let analysis = analyze_costs(provider, &routes, jobs, fleet, depot, departure, options);
    info!(
        routes = routes.len(),
        fallback_routes = analysis.fallback_routes,
        efficiency_gain_pct = analysis.efficiency_gain_pct,
        "routes refined"
    );
    RefinementResult { routes, analysis }
}

#[allow(clippy::too_many_arguments)]
fn refine_one<B: RoutingBackend>(
    provider: &DistanceProvider<B>,
    date: NaiveDate,
    route: &PlannedRoute,
    route_jobs: &[&Job],
    vehicle: &Vehicle,
    depot: Coordinate,
    departure: DateTime<Utc>,
    options: &RefineOptions,
) -> RefinedRoute {
    let service_secs: i32 = route_jobs.iter().map(|job| job.service_secs()).sum();
    let mut waypoints = Vec::with_capacity(route_jobs.len() + 2);
    waypoints.push(depot);
    waypoints.extend(route_jobs.iter().map(|job| job.location));
    waypoints.push(depot);

    let answer = provider.get_traffic_aware_route(&waypoints, departure);
    let id = route_id(date, &route.vehicle_id);

    // A truncated request does not cover every job; treat it as a failure.
    if !answer.is_fallback() && answer.ordered_waypoint_indices.len() == waypoints.len() {
        let last = waypoints.len() - 1;
        let job_ids = answer
            .ordered_waypoint_indices
            .iter()
            .filter(|&&i| i != 0 && i != last)
            .map(|&i| route_jobs[i - 1].id.clone())
            .collect();
        return RefinedRoute {
            route_id: id,
            vehicle_id: route.vehicle_id.clone(),
            job_ids,
            total_volume: route.total_volume,
            distance_km: answer.total_distance_km,
            duration_secs: answer.total_duration_secs,
            duration_in_traffic_secs: answer.total_duration_in_traffic_secs,
            service_secs,
            fuel_cost: fuel_cost(answer.total_distance_km, vehicle, options.fuel_price_per_litre),
            co2_kg: co2_kg(answer.total_distance_km, vehicle),
            traffic: answer.traffic,
            polyline: answer.polyline,
            departure,
            estimated_arrival: answer.estimated_arrival + Duration::seconds(service_secs as i64),
            status: RefinementStatus::Optimized,
            warnings: answer.warnings,
        };
    }

    warn!(route = %id, "traffic-aware directions unavailable, keeping constructed order");
    let nominal = route.driving_secs.max(0);
    let in_traffic = (nominal as f64 * options.congestion_multiplier).round() as i32;
    RefinedRoute {
        route_id: id,
        vehicle_id: route.vehicle_id.clone(),
        job_ids: route.job_ids.clone(),
        total_volume: route.total_volume,
        distance_km: route.total_distance_km,
        duration_secs: nominal,
        duration_in_traffic_secs: in_traffic,
        service_secs,
        fuel_cost: fuel_cost(route.total_distance_km, vehicle, options.fuel_price_per_litre),
        co2_kg: co2_kg(route.total_distance_km, vehicle),
        traffic: TrafficCondition::Unknown,
        polyline: Polyline::straight(&waypoints),
        departure,
        estimated_arrival: departure + Duration::seconds((in_traffic + service_secs) as i64),
        status: RefinementStatus::Fallback,
        warnings: answer.warnings,
    }
}

fn analyze_costs<B: RoutingBackend>(
    provider: &DistanceProvider<B>,
    routes: &[RefinedRoute],
    jobs: &[Job],
    fleet: &[Vehicle],
    depot: Coordinate,
    departure: DateTime<Utc>,
    options: &RefineOptions,
) -> CostAnalysis {
    let mut analysis = CostAnalysis {
        total_distance_km: routes.iter().map(|r| r.distance_km).sum(),
        total_fuel_cost: routes.iter().map(|r| r.fuel_cost).sum(),
        total_co2_kg: routes.iter().map(|r| r.co2_kg).sum(),
        fallback_routes: routes.iter().filter(|r| r.status == RefinementStatus::Fallback).count(),
        ..CostAnalysis::default()
    };

    let used: Vec<&Vehicle> = fleet
        .iter()
        .filter(|v| routes.iter().any(|r| r.vehicle_id == v.id))
        .collect();
    if used.is_empty() {
        return analysis;
    }
    let avg_consumption = used.iter().map(|v| v.fuel_consumption).sum::<f64>() / used.len() as f64;
    let avg_emission = used.iter().map(|v| v.emission_factor).sum::<f64>() / used.len() as f64;

    let locations: HashMap<&JobId, Coordinate> = jobs.iter().map(|job| (&job.id, job.location)).collect();
    let pairs: Vec<(Coordinate, Coordinate)> = routes
        .iter()
        .flat_map(|r| r.job_ids.iter())
        .filter_map(|id| locations.get(id).map(|&loc| (depot, loc)))
        .collect();
    let one_way: f64 = provider.get_distances(&pairs, departure).iter().map(|r| r.distance_km).sum();

    analysis.naive_distance_km = 2.0 * one_way;
    analysis.naive_fuel_cost = analysis.naive_distance_km / 100.0 * avg_consumption * options.fuel_price_per_litre;
    analysis.naive_co2_kg = analysis.naive_distance_km * avg_emission;
    analysis.distance_saved_km = analysis.naive_distance_km - analysis.total_distance_km;
    analysis.fuel_saved = analysis.naive_fuel_cost - analysis.total_fuel_cost;
    analysis.co2_saved_kg = analysis.naive_co2_kg - analysis.total_co2_kg;
    if analysis.naive_distance_km > 0.0 {
        analysis.efficiency_gain_pct = analysis.distance_saved_km / analysis.naive_distance_km * 100.0;
    }
    analysis.rating = Some(SustainabilityRating::from_gain(analysis.efficiency_gain_pct));
    analysis
}
