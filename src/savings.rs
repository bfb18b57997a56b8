//! Route construction with the Clarke-Wright savings heuristic.
//!
//! ```text
//! s(i, j) = d(0, i) + d(0, j) - d(i, j)
//! ```
//!
//! Pairs are processed in decreasing saving order against a fixed fleet: one
//! (initially empty) route per vehicle. Jobs left over after the merge phase
//! go through cheapest-marginal-distance insertion. A job that fits nowhere is
//! reported with a reason, never dropped.
//!
//! Matrix layout: index 0 is the depot, job `k` is index `k + 1`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::distance::DistanceProvider;
use crate::geo::{Coordinate, GreatCircle};
use crate::matrix::TravelMatrix;
use crate::model::{Job, JobId, Vehicle, VehicleId};
use crate::traits::RoutingBackend;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstructionOptions {
    /// Longest a route may take, depot to depot, in seconds.
    pub working_ceiling_secs: i32,
    /// Departure from the depot, seconds from midnight.
    pub day_start_secs: i32,
}

impl Default for ConstructionOptions {
    fn default() -> Self {
        Self {
            working_ceiling_secs: 8 * 3600,
            day_start_secs: 8 * 3600,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnassignedReason {
    /// Volume exceeds every vehicle's capacity.
    ExceedsCapacity,
    /// Even a dedicated trip breaks the working-hours ceiling.
    ExceedsWorkingHours,
    /// Its time window cannot be met from the depot.
    NoFeasibleWindow,
    /// Feasible alone, but every vehicle is already full.
    NoVehicleAvailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnassignedJob {
    pub job_id: JobId,
    pub reason: UnassignedReason,
}

/// A feasible route for one vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedRoute {
    pub vehicle_id: VehicleId,
    pub job_ids: Vec<JobId>,
    pub total_volume: f64,
    /// Depot to depot, including service time and waiting.
    pub total_duration_secs: i32,
    pub total_distance_km: f64,
    /// Driving time at free flow, without service or waiting.
    #[serde(default)]
    pub driving_secs: i32,
    /// Estimated (start, end) of service per job, seconds from midnight.
    pub estimated_windows: Vec<(i32, i32)>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConstructionResult {
    pub routes: Vec<PlannedRoute>,
    pub unassigned: Vec<UnassignedJob>,
}

/// Depot first, then jobs in input order.
pub fn matrix_locations(depot: Coordinate, jobs: &[Job]) -> Vec<Coordinate> {
    std::iter::once(depot).chain(jobs.iter().map(|job| job.location)).collect()
}

/// Build the travel matrix through `provider`, then construct routes.
pub fn build_routes<B: RoutingBackend>(
    provider: &DistanceProvider<B>,
    jobs: &[Job],
    depot: Coordinate,
    fleet: &[Vehicle],
    departure: DateTime<Utc>,
    options: &ConstructionOptions,
) -> ConstructionResult {
    let matrix = TravelMatrix::build(provider, &matrix_locations(depot, jobs), departure);
    if matrix.fallback_pairs() > 0 {
        warn!(fallback_pairs = matrix.fallback_pairs(), "constructing routes on partially estimated distances");
    }
    construct_routes(jobs, depot, fleet, &matrix, options)
}

/// Construct routes from a precomputed matrix. Deterministic for a given
/// job list, fleet and matrix.
pub fn construct_routes(
    jobs: &[Job],
    depot: Coordinate,
    fleet: &[Vehicle],
    matrix: &TravelMatrix,
    options: &ConstructionOptions,
) -> ConstructionResult {
    let fallback_matrix;
    let matrix = if matrix.len() == jobs.len() + 1 {
        matrix
    } else {
        warn!(expected = jobs.len() + 1, got = matrix.len(), "matrix does not match job list, using great-circle estimates");
        fallback_matrix = TravelMatrix::great_circle(&matrix_locations(depot, jobs), GreatCircle::default());
        &fallback_matrix
    };

    let mut builder = Builder::new(jobs, fleet, matrix, options);
    builder.merge_by_savings();
    builder.insert_leftovers();
    let result = builder.finish();

    info!(
        jobs = jobs.len(),
        routes = result.routes.len(),
        unassigned = result.unassigned.len(),
        "routes constructed"
    );
    result
}

#[derive(Debug)]
struct Saving {
    i: usize,
    j: usize,
    value: f64,
}

#[derive(Debug, Clone)]
struct Schedule {
    windows: Vec<(i32, i32)>,
    duration_secs: i32,
}

#[derive(Debug, Clone, Default)]
struct RouteState {
    jobs: Vec<usize>,
    volume: f64,
}

struct Builder<'a> {
    jobs: &'a [Job],
    fleet: &'a [Vehicle],
    matrix: &'a TravelMatrix,
    options: &'a ConstructionOptions,
    /// One slot per vehicle, same index as `fleet`.
    routes: Vec<RouteState>,
    route_of: Vec<Option<usize>>,
    unassigned: Vec<UnassignedJob>,
}

impl<'a> Builder<'a> {
    fn new(jobs: &'a [Job], fleet: &'a [Vehicle], matrix: &'a TravelMatrix, options: &'a ConstructionOptions) -> Self {
        Self {
            jobs,
            fleet,
            matrix,
            options,
            routes: vec![RouteState::default(); fleet.len()],
            route_of: vec![None; jobs.len()],
            unassigned: Vec::new(),
        }
    }

    fn node(job: usize) -> usize {
        job + 1
    }

    fn savings(&self) -> Vec<Saving> {
        let n = self.jobs.len();
        let mut savings = Vec::with_capacity(n * n.saturating_sub(1) / 2);
        for i in 0..n {
            for j in (i + 1)..n {
                let value = self.matrix.distance(0, Self::node(i)) + self.matrix.distance(0, Self::node(j))
                    - self.matrix.distance(Self::node(i), Self::node(j));
                savings.push(Saving { i, j, value });
            }
        }
        // stable: ties keep (i, j) generation order
        savings.sort_by(|a, b| b.value.total_cmp(&a.value));
        savings
    }

    fn merge_by_savings(&mut self) {
        for saving in self.savings() {
            // Non-positive savings never help; leftovers go to insertion.
            if saving.value <= 0.0 {
                break;
            }
            let (i, j) = (saving.i, saving.j);
            match (self.route_of[i], self.route_of[j]) {
                (None, None) => self.seed(i, j),
                (Some(r), None) => self.extend(r, i, j),
                (None, Some(r)) => self.extend(r, j, i),
                (Some(ri), Some(rj)) if ri != rj => self.merge(ri, i, rj, j),
                _ => {}
            }
        }
    }

    /// Start a route with both jobs on the smallest empty vehicle that fits.
    fn seed(&mut self, i: usize, j: usize) {
        let mut empty: Vec<usize> = (0..self.routes.len()).filter(|&r| self.routes[r].jobs.is_empty()).collect();
        empty.sort_by(|&a, &b| self.fleet[a].capacity.total_cmp(&self.fleet[b].capacity));

        for slot in empty {
            for seq in [[i, j], [j, i]] {
                if self.evaluate(slot, &seq).is_some() {
                    self.assign(slot, seq.to_vec());
                    return;
                }
            }
        }
    }

    /// Attach `new` next to `routed` if `routed` sits at an end of its route.
    fn extend(&mut self, slot: usize, routed: usize, new: usize) {
        let current = &self.routes[slot].jobs;
        let mut candidates = Vec::with_capacity(2);
        if current.last() == Some(&routed) {
            let mut seq = current.clone();
            seq.push(new);
            candidates.push(seq);
        }
        if current.first() == Some(&routed) {
            let mut seq = Vec::with_capacity(current.len() + 1);
            seq.push(new);
            seq.extend_from_slice(current);
            candidates.push(seq);
        }

        for seq in candidates {
            if self.evaluate(slot, &seq).is_some() {
                self.assign(slot, seq);
                return;
            }
        }
    }

    /// Join two routes end to end on the larger of their vehicles.
    fn merge(&mut self, ri: usize, i: usize, rj: usize, j: usize) {
        let a = &self.routes[ri].jobs;
        let b = &self.routes[rj].jobs;
        let i_first = a.first() == Some(&i);
        let i_last = a.last() == Some(&i);
        let j_first = b.first() == Some(&j);
        let j_last = b.last() == Some(&j);

        let merged: Vec<usize> = if i_last && j_first {
            a.iter().chain(b.iter()).copied().collect()
        } else if j_last && i_first {
            b.iter().chain(a.iter()).copied().collect()
        } else if i_last && j_last {
            a.iter().chain(b.iter().rev()).copied().collect()
        } else if i_first && j_first {
            a.iter().rev().chain(b.iter()).copied().collect()
        } else {
            return;
        };

        let (keep, drop) = if self.fleet[rj].capacity > self.fleet[ri].capacity {
            (rj, ri)
        } else {
            (ri, rj)
        };

        if self.evaluate(keep, &merged).is_some() {
            self.routes[drop] = RouteState::default();
            self.assign(keep, merged);
        }
    }

    fn assign(&mut self, slot: usize, seq: Vec<usize>) {
        for &job in &seq {
            self.route_of[job] = Some(slot);
        }
        self.routes[slot] = RouteState {
            volume: seq.iter().map(|&job| self.jobs[job].volume).sum(),
            jobs: seq,
        };
    }

    /// Cheapest-marginal-distance insertion, highest priority first.
    fn insert_leftovers(&mut self) {
        let mut leftovers: Vec<usize> = (0..self.jobs.len()).filter(|&job| self.route_of[job].is_none()).collect();
        leftovers.sort_by(|&a, &b| self.jobs[b].priority.cmp(&self.jobs[a].priority));

        for job in leftovers {
            let mut best: Option<(usize, Vec<usize>, f64)> = None;
            for slot in 0..self.routes.len() {
                let current = &self.routes[slot].jobs;
                let base = self.route_distance(current);
                for position in 0..=current.len() {
                    let mut seq = current.clone();
                    seq.insert(position, job);
                    if self.evaluate(slot, &seq).is_none() {
                        continue;
                    }
                    let marginal = self.route_distance(&seq) - base;
                    if best.as_ref().is_none_or(|(_, _, cost)| marginal < *cost) {
                        best = Some((slot, seq, marginal));
                    }
                }
            }

            match best {
                Some((slot, seq, marginal)) => {
                    debug!(job = %self.jobs[job].id, vehicle = %self.fleet[slot].id, marginal_km = marginal, "inserted leftover job");
                    self.assign(slot, seq);
                }
                None => {
                    let reason = self.diagnose(job);
                    warn!(job = %self.jobs[job].id, ?reason, "job could not be routed");
                    self.unassigned.push(UnassignedJob {
                        job_id: self.jobs[job].id.clone(),
                        reason,
                    });
                }
            }
        }
    }

    fn diagnose(&self, job: usize) -> UnassignedReason {
        let max_capacity = self.fleet.iter().map(|v| v.capacity).fold(f64::NEG_INFINITY, f64::max);
        if self.fleet.is_empty() || self.jobs[job].volume > max_capacity {
            return UnassignedReason::ExceedsCapacity;
        }
        let solo = [job];
        match self.simulate(&solo) {
            Err(reason) => reason,
            Ok(_) => UnassignedReason::NoVehicleAvailable,
        }
    }

    /// Schedule for `seq` on the vehicle in `slot`, if every constraint holds.
    fn evaluate(&self, slot: usize, seq: &[usize]) -> Option<Schedule> {
        let volume: f64 = seq.iter().map(|&job| self.jobs[job].volume).sum();
        if volume > self.fleet[slot].capacity {
            return None;
        }
        self.simulate(seq).ok()
    }

    /// Drive the sequence from the depot at day start: travel, wait for the
    /// window to open, serve, return.
    fn simulate(&self, seq: &[usize]) -> Result<Schedule, UnassignedReason> {
        let start = self.options.day_start_secs;
        let mut time = start;
        let mut prev = 0;
        let mut windows = Vec::with_capacity(seq.len());

        for &job in seq {
            let node = Self::node(job);
            time += self.matrix.duration(prev, node);
            if let Some(window) = self.jobs[job].time_window {
                if time > window.end {
                    return Err(UnassignedReason::NoFeasibleWindow);
                }
                time = time.max(window.start);
            }
            let service_end = time + self.jobs[job].service_secs();
            windows.push((time, service_end));
            time = service_end;
            prev = node;
        }
        time += self.matrix.duration(prev, 0);

        let duration_secs = time - start;
        if duration_secs > self.options.working_ceiling_secs {
            return Err(UnassignedReason::ExceedsWorkingHours);
        }
        Ok(Schedule { windows, duration_secs })
    }

    fn route_distance(&self, seq: &[usize]) -> f64 {
        if seq.is_empty() {
            return 0.0;
        }
        let mut total = self.matrix.distance(0, Self::node(seq[0]));
        for pair in seq.windows(2) {
            total += self.matrix.distance(Self::node(pair[0]), Self::node(pair[1]));
        }
        total + self.matrix.distance(Self::node(seq[seq.len() - 1]), 0)
    }

    fn route_driving_secs(&self, seq: &[usize]) -> i32 {
        let mut prev = 0;
        let mut total = 0;
        for &job in seq {
            let node = Self::node(job);
            total += self.matrix.free_flow_duration(prev, node);
            prev = node;
        }
        total + self.matrix.free_flow_duration(prev, 0)
    }

    fn finish(self) -> ConstructionResult {
        let mut routes = Vec::new();
        for (slot, state) in self.routes.iter().enumerate() {
            if state.jobs.is_empty() {
                continue;
            }
            let Ok(schedule) = self.simulate(&state.jobs) else {
                // every assignment went through evaluate()
                continue;
            };
            routes.push(PlannedRoute {
                vehicle_id: self.fleet[slot].id.clone(),
                job_ids: state.jobs.iter().map(|&job| self.jobs[job].id.clone()).collect(),
                total_volume: state.volume,
                total_duration_secs: schedule.duration_secs,
                total_distance_km: self.route_distance(&state.jobs),
                driving_secs: self.route_driving_secs(&state.jobs),
                estimated_windows: schedule.windows,
            });
        }

        ConstructionResult {
            routes,
            unassigned: self.unassigned,
        }
    }
}
