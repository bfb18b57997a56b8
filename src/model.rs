//! Planner records: jobs, vehicles, team assignments, notifications.
//!
//! These are supplied by (or handed back to) the host application's
//! persistence layer. The planner only reads jobs and vehicles.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::Coordinate;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Identifier of a job.
    JobId
);
string_id!(
    /// Identifier of a vehicle.
    VehicleId
);
string_id!(
    /// Identifier of a planned route (one vehicle on one date).
    RouteId
);
string_id!(
    /// Identifier of a staff member.
    StaffId
);

/// Store-assigned identifier of a persisted team assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssignmentId(pub u64);

impl fmt::Display for AssignmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What kind of work a job involves; drives skill requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceCategory {
    Standard,
    Fragile,
    HeavyItems,
    Commercial,
    Packing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Routed,
    InProgress,
    Completed,
    Cancelled,
}

/// Committed service window, seconds from midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: i32,
    pub end: i32,
}

impl TimeWindow {
    pub fn new(start: i32, end: i32) -> Self {
        Self { start, end }
    }
}

/// A single service job to be routed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub location: Coordinate,
    /// Estimated load volume, in the same unit as vehicle capacity.
    pub volume: f64,
    /// Estimated on-site service duration in minutes.
    pub duration_minutes: i32,
    /// 1 (lowest) to 5 (highest).
    pub priority: u8,
    pub time_window: Option<TimeWindow>,
    pub category: ServiceCategory,
    pub status: JobStatus,
}

impl Job {
    pub fn service_secs(&self) -> i32 {
        self.duration_minutes * 60
    }
}

/// Fleet reference data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: VehicleId,
    pub capacity: f64,
    /// Litres per 100 km.
    pub fuel_consumption: f64,
    /// Kilograms of CO2 per km.
    pub emission_factor: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignmentStatus {
    Active,
    Superseded,
}

/// A team bound to a route for one date; members are ordered lead first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamAssignment {
    pub id: AssignmentId,
    pub route_id: RouteId,
    pub date: NaiveDate,
    pub members: Vec<StaffId>,
    pub lead: StaffId,
    pub predicted_performance: f64,
    pub status: AssignmentStatus,
    pub created_at: DateTime<Utc>,
    pub superseded_at: Option<DateTime<Utc>>,
}

impl TeamAssignment {
    pub fn is_active(&self) -> bool {
        self.status == AssignmentStatus::Active
    }

    pub fn contains(&self, staff_id: &StaffId) -> bool {
        self.members.contains(staff_id)
    }
}

/// An assignment not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentDraft {
    pub route_id: RouteId,
    pub date: NaiveDate,
    pub members: Vec<StaffId>,
    pub lead: StaffId,
    pub predicted_performance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NotificationPriority {
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationReason {
    /// Newly placed on the route.
    AddedToRoute,
    /// Taken off the route.
    RemovedFromRoute,
    /// Still on the route, but the team around them changed.
    TeamChanged,
}

/// A message for the host's messaging layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: StaffId,
    pub priority: NotificationPriority,
    pub reason: NotificationReason,
    pub date: NaiveDate,
    pub route_id: RouteId,
    pub summary: String,
}
