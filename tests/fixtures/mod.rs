//! Shared fixtures for integration tests.
//!
//! - Builders for jobs, vehicles and staff with sensible defaults
//! - A routing backend stub that counts calls and fails on demand
//! - A notifier that records what it is sent
#![allow(dead_code)]

pub mod locations;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use dispatch_planner::clock::ManualClock;
use dispatch_planner::coordinator::ReoptimizationAnalytics;
use dispatch_planner::error::ProviderError;
use dispatch_planner::geo::{haversine_km, Coordinate};
use dispatch_planner::model::{
    AssignmentId, AssignmentStatus, Job, JobId, JobStatus, Notification, RouteId, ServiceCategory, StaffId,
    TeamAssignment, TimeWindow, Vehicle, VehicleId,
};
use dispatch_planner::polyline::Polyline;
use dispatch_planner::staff::{
    Availability, PerformanceRecord, Skill, SkillVector, StaffMember, StaffRole, WorkloadSnapshot,
};
use dispatch_planner::team::RouteProfile;
use dispatch_planner::traffic::TrafficProfile;
use dispatch_planner::traits::{Directions, LegEstimate, Notifier, RoutingBackend};
use dispatch_planner::DistanceConfig;

pub fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 3).unwrap()
}

pub fn morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 3, 8, 0, 0).unwrap()
}

pub fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(morning()))
}

/// No rate limiting and no rush-hour scaling, so numbers are predictable.
pub fn test_distance_config() -> DistanceConfig {
    DistanceConfig {
        min_batch_interval_ms: 0,
        traffic: TrafficProfile::free_flow(),
        ..DistanceConfig::default()
    }
}

// ============================================================================
// Builders
// ============================================================================

#[derive(Clone, Debug)]
pub struct TestJob {
    id: String,
    location: Coordinate,
    volume: f64,
    minutes: i32,
    priority: u8,
    window: Option<TimeWindow>,
    category: ServiceCategory,
}

impl TestJob {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            location: Coordinate::new(36.1, -115.1),
            volume: 5.0,
            minutes: 30,
            priority: 3,
            window: None,
            category: ServiceCategory::Standard,
        }
    }

    pub fn at(mut self, lat: f64, lng: f64) -> Self {
        self.location = Coordinate::new(lat, lng);
        self
    }

    pub fn at_location(mut self, location: &locations::Location) -> Self {
        self.location = location.coordinate();
        self
    }

    pub fn volume(mut self, volume: f64) -> Self {
        self.volume = volume;
        self
    }

    pub fn minutes(mut self, minutes: i32) -> Self {
        self.minutes = minutes;
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn window(mut self, start_hour: i32, end_hour: i32) -> Self {
        self.window = Some(TimeWindow::new(start_hour * 3600, end_hour * 3600));
        self
    }

    pub fn category(mut self, category: ServiceCategory) -> Self {
        self.category = category;
        self
    }

    pub fn build(self) -> Job {
        Job {
            id: JobId::new(self.id),
            location: self.location,
            volume: self.volume,
            duration_minutes: self.minutes,
            priority: self.priority,
            time_window: self.window,
            category: self.category,
            status: JobStatus::Pending,
        }
    }
}

pub fn vehicle(id: &str, capacity: f64) -> Vehicle {
    Vehicle {
        id: VehicleId::new(id),
        capacity,
        fuel_consumption: 12.0,
        emission_factor: 0.25,
    }
}

#[derive(Clone, Debug)]
pub struct TestStaff {
    member: StaffMember,
}

impl TestStaff {
    pub fn new(id: &str) -> Self {
        Self {
            member: StaffMember {
                id: StaffId::new(id),
                name: id.to_uppercase(),
                skills: SkillVector::uniform(0.5),
                certifications: Vec::new(),
                availability: Availability::Available,
                experience_years: 3.0,
                collaboration_rating: 0.6,
                role: StaffRole::Generalist,
                performance: None,
                workload: WorkloadSnapshot::default(),
            },
        }
    }

    pub fn level(mut self, level: f64) -> Self {
        self.member.skills = SkillVector::uniform(level);
        self
    }

    pub fn skill(mut self, skill: Skill, level: f64) -> Self {
        self.member.skills[skill] = level;
        self
    }

    pub fn certified(mut self, skill: Skill) -> Self {
        self.member.certifications.push(skill);
        self
    }

    pub fn role(mut self, role: StaffRole) -> Self {
        self.member.role = role;
        self
    }

    pub fn experience(mut self, years: f64) -> Self {
        self.member.experience_years = years;
        self
    }

    pub fn availability(mut self, availability: Availability) -> Self {
        self.member.availability = availability;
        self
    }

    pub fn fatigue(mut self, fatigue: f64) -> Self {
        self.member.workload = WorkloadSnapshot {
            fatigue,
            overtime: fatigue / 2.0,
            intensity: fatigue / 2.0,
        };
        self
    }

    pub fn performance(mut self, score: f64) -> Self {
        self.member.performance = Some(PerformanceRecord {
            efficiency: score,
            customer_satisfaction: score,
            punctuality: score,
            quality: score,
        });
        self
    }

    pub fn build(self) -> StaffMember {
        self.member
    }
}

/// `n` staff with staggered skill, one leader in every four.
pub fn roster(n: usize) -> Vec<StaffMember> {
    (0..n)
        .map(|i| {
            let role = match i % 4 {
                0 => StaffRole::Leader,
                1 => StaffRole::Specialist,
                _ => StaffRole::Generalist,
            };
            TestStaff::new(&format!("s{i}"))
                .level(0.4 + 0.04 * (i % 10) as f64)
                .experience((i % 8) as f64)
                .role(role)
                .build()
        })
        .collect()
}

pub fn profile(route: &str, team_size: usize, requirement: f64) -> RouteProfile {
    RouteProfile {
        route_id: RouteId::new(route),
        required: SkillVector::uniform(requirement),
        team_size,
        complexity: 0.5,
        total_volume: 12.0,
        job_count: 3,
    }
}

pub fn assignment(id: u64, route: &str, members: &[&str]) -> TeamAssignment {
    TeamAssignment {
        id: AssignmentId(id),
        route_id: RouteId::new(route),
        date: date(),
        members: members.iter().map(|m| StaffId::new(*m)).collect(),
        lead: StaffId::new(members[0]),
        predicted_performance: 0.6,
        status: AssignmentStatus::Active,
        created_at: morning(),
        superseded_at: None,
    }
}

// ============================================================================
// Routing backend stub
// ============================================================================

/// Road distance as 1.2 × great-circle at 40 km/h.
pub struct StubBackend {
    pub calls: AtomicUsize,
    pub elements: AtomicUsize,
    /// 1-based call numbers that fail.
    pub failing_calls: Vec<usize>,
    pub fail_all: bool,
    pub batch_limit: usize,
    pub waypoint_limit: usize,
    /// Answer directions with the middle waypoints reversed.
    pub reverse_middle: bool,
}

impl Default for StubBackend {
    fn default() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            elements: AtomicUsize::new(0),
            failing_calls: Vec::new(),
            fail_all: false,
            batch_limit: 100,
            waypoint_limit: 25,
            reverse_middle: false,
        }
    }
}

impl StubBackend {
    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn elements(&self) -> usize {
        self.elements.load(Ordering::SeqCst)
    }

    fn begin(&self) -> Result<(), ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_all || self.failing_calls.contains(&call) {
            return Err(ProviderError::Status {
                status: "503 Service Unavailable".into(),
                message: format!("stub failure on call {call}"),
            });
        }
        Ok(())
    }

    pub fn road_km(from: Coordinate, to: Coordinate) -> f64 {
        haversine_km(from, to) * 1.2
    }

    pub fn road_secs(km: f64) -> i32 {
        (km / 40.0 * 3600.0).round() as i32
    }
}

impl RoutingBackend for StubBackend {
    fn max_elements(&self) -> usize {
        self.batch_limit
    }

    fn max_waypoints(&self) -> usize {
        self.waypoint_limit
    }

    fn leg_estimates(
        &self,
        pairs: &[(Coordinate, Coordinate)],
        _departure: DateTime<Utc>,
    ) -> Result<Vec<Option<LegEstimate>>, ProviderError> {
        self.begin()?;
        self.elements.fetch_add(pairs.len(), Ordering::SeqCst);
        Ok(pairs
            .iter()
            .map(|&(from, to)| {
                let km = Self::road_km(from, to);
                Some(LegEstimate {
                    distance_km: km,
                    duration_secs: Self::road_secs(km),
                    duration_in_traffic_secs: None,
                })
            })
            .collect())
    }

    fn directions(&self, waypoints: &[Coordinate], _departure: DateTime<Utc>) -> Result<Directions, ProviderError> {
        self.begin()?;
        let mut order: Vec<usize> = (0..waypoints.len()).collect();
        if self.reverse_middle && waypoints.len() > 3 {
            let last = waypoints.len() - 1;
            order[1..last].reverse();
        }
        let km: f64 = order
            .windows(2)
            .map(|leg| Self::road_km(waypoints[leg[0]], waypoints[leg[1]]))
            .sum();
        let stops: Vec<Coordinate> = order.iter().map(|&i| waypoints[i]).collect();
        Ok(Directions {
            distance_km: km,
            duration_secs: Self::road_secs(km),
            duration_in_traffic_secs: None,
            visit_order: order,
            polyline: Polyline::straight(&stops),
        })
    }
}

// ============================================================================
// Notifier
// ============================================================================

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Notification>>,
    pub analytics: Mutex<Vec<ReoptimizationAnalytics>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn analytics(&self) -> Vec<ReoptimizationAnalytics> {
        self.analytics.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notifications: &[Notification]) {
        self.sent.lock().unwrap().extend_from_slice(notifications);
    }

    fn record(&self, analytics: &ReoptimizationAnalytics) {
        self.analytics.lock().unwrap().push(analytics.clone());
    }
}
