//! Route refinement timing when directions are unavailable.

mod fixtures;

use chrono::Duration;

use dispatch_planner::geo::GreatCircle;
use dispatch_planner::refine::{refine_routes, RefineOptions, RefinementStatus};
use dispatch_planner::savings::{build_routes, ConstructionOptions};
use dispatch_planner::{Coordinate, DistanceProvider};

use fixtures::*;

const DEPOT: Coordinate = Coordinate::new(36.10, -115.15);

#[test]
fn fallback_applies_congestion_once() {
    let provider = DistanceProvider::with_clock(StubBackend::failing(), test_distance_config(), clock());
    let job = TestJob::new("north").at(36.20, -115.15).minutes(30).build();
    let jobs = vec![job.clone()];
    let fleet = vec![vehicle("van", 20.0)];

    let planned = build_routes(&provider, &jobs, DEPOT, &fleet, morning(), &ConstructionOptions::default());
    let options = RefineOptions::default();
    let refined = refine_routes(&provider, date(), &planned.routes, &jobs, &fleet, DEPOT, morning(), &options);

    let route = &refined.routes[0];
    assert_eq!(route.status, RefinementStatus::Fallback);

    let one_way = GreatCircle::default().duration_secs(DEPOT, job.location);
    assert!((route.duration_secs - 2 * one_way).abs() <= 2, "free-flow {} vs {}", route.duration_secs, 2 * one_way);

    let ratio = route.duration_in_traffic_secs as f64 / route.duration_secs as f64;
    assert!((ratio - options.congestion_multiplier).abs() < 0.01, "ratio {ratio}");
    assert_eq!(
        route.estimated_arrival,
        morning() + Duration::seconds((route.duration_in_traffic_secs + route.service_secs) as i64)
    );
}

#[test]
fn waiting_for_a_window_is_not_driving() {
    let provider = DistanceProvider::with_clock(StubBackend::failing(), test_distance_config(), clock());
    let jobs = vec![TestJob::new("late").at(36.20, -115.15).window(12, 14).build()];
    let fleet = vec![vehicle("van", 20.0)];

    let planned = build_routes(&provider, &jobs, DEPOT, &fleet, morning(), &ConstructionOptions::default());
    let plan = &planned.routes[0];
    // arrives around 08:30, waits until noon
    assert!(plan.total_duration_secs > 4 * 3600);
    assert!(plan.driving_secs < 3600);

    let refined = refine_routes(&provider, date(), &planned.routes, &jobs, &fleet, DEPOT, morning(), &RefineOptions::default());
    assert_eq!(refined.routes[0].duration_secs, plan.driving_secs);
    assert!(refined.routes[0].duration_in_traffic_secs < 3600);
}
