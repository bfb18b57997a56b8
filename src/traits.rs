//! Collaborator seams.
//!
//! The planner owns no persistence and no network protocol details beyond the
//! OSRM adapter. Host applications implement these traits for their own
//! storage and messaging; tests implement them with stubs.

use chrono::{DateTime, NaiveDate, Utc};

use crate::coordinator::ReoptimizationAnalytics;
use crate::error::{ProviderError, StoreError};
use crate::geo::Coordinate;
use crate::model::{AssignmentDraft, AssignmentId, Notification, RouteId, StaffId, TeamAssignment};
use crate::polyline::Polyline;
use crate::staff::{Availability, StaffMember, TeamHistory};
use crate::team::RouteProfile;

/// One origin/destination answer from a routing backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LegEstimate {
    pub distance_km: f64,
    pub duration_secs: i32,
    /// Set when the backend itself models traffic.
    pub duration_in_traffic_secs: Option<i32>,
}

/// Directions through an ordered waypoint list.
#[derive(Debug, Clone, PartialEq)]
pub struct Directions {
    pub distance_km: f64,
    pub duration_secs: i32,
    pub duration_in_traffic_secs: Option<i32>,
    /// Visiting order as indices into the submitted waypoints.
    pub visit_order: Vec<usize>,
    pub polyline: Polyline,
}

/// A batch-distance and directions service.
pub trait RoutingBackend: Send + Sync {
    /// Maximum origin/destination pairs per `leg_estimates` call.
    fn max_elements(&self) -> usize;

    /// Maximum waypoints per `directions` call.
    fn max_waypoints(&self) -> usize;

    /// One entry per pair, in order. `None` marks a per-element failure.
    fn leg_estimates(
        &self,
        pairs: &[(Coordinate, Coordinate)],
        departure: DateTime<Utc>,
    ) -> Result<Vec<Option<LegEstimate>>, ProviderError>;

    fn directions(
        &self,
        waypoints: &[Coordinate],
        departure: DateTime<Utc>,
    ) -> Result<Directions, ProviderError>;
}

/// Write access inside one assignment transaction.
pub trait AssignmentWriter {
    /// Active assignments for a route, as seen by this transaction.
    fn active_for_route(&self, route_id: &RouteId) -> Vec<TeamAssignment>;

    /// Mark an assignment superseded. Archived rows are never deleted.
    fn archive(&mut self, id: AssignmentId) -> Result<(), StoreError>;

    fn insert(&mut self, draft: AssignmentDraft) -> Result<AssignmentId, StoreError>;
}

/// Persistent team-assignment storage.
pub trait AssignmentStore: Send + Sync {
    fn active_assignments(&self, date: NaiveDate) -> Result<Vec<TeamAssignment>, StoreError>;

    fn record_availability(&self, staff_id: &StaffId, availability: Availability) -> Result<(), StoreError>;

    /// Run `work` atomically over `routes` for `date`.
    ///
    /// Implementations serialize transactions that share a route, commit only
    /// when `work` returns `Ok`, and leave storage untouched otherwise.
    fn transaction(
        &self,
        date: NaiveDate,
        routes: &[RouteId],
        work: &mut dyn FnMut(&mut dyn AssignmentWriter) -> Result<(), StoreError>,
    ) -> Result<(), StoreError>;
}

/// Routes and workforce for an operating day.
pub trait PlanSource: Send + Sync {
    fn routes(&self, date: NaiveDate) -> Result<Vec<RouteProfile>, StoreError>;

    fn roster(&self, date: NaiveDate) -> Result<Vec<StaffMember>, StoreError>;

    fn team_history(&self) -> Result<TeamHistory, StoreError>;
}

/// Outbound messaging and analytics.
pub trait Notifier: Send + Sync {
    fn notify(&self, notifications: &[Notification]);

    fn record(&self, _analytics: &ReoptimizationAnalytics) {}
}
