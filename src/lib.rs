//! Daily route and crew planning for a field-service fleet.
//!
//! Jobs are grouped into vehicle routes with a savings heuristic, the routes
//! are refined against a traffic-aware routing service, and a genetic search
//! picks a team for each route. A [`Coordinator`] keeps the teams valid as
//! staff availability changes during the day.
//!
//! Every stage degrades instead of failing: distances fall back to
//! great-circle estimates, refinement keeps the constructed order, and team
//! search falls back to round-robin slicing. Degraded results are tagged.

pub mod cache;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod distance;
pub mod error;
pub mod geo;
pub mod matrix;
pub mod model;
pub mod osrm;
pub mod plan;
pub mod polyline;
pub mod refine;
pub mod savings;
pub mod staff;
pub mod store;
pub mod team;
pub mod traffic;
pub mod traits;

pub use config::PlannerConfig;
pub use coordinator::{Coordinator, CoordinatorOptions, Decision, ReoptimizationAnalytics, ReoptimizationOutcome};
pub use distance::{DistanceConfig, DistanceProvider, DistanceResult, Source, TrafficRoute};
pub use error::{PlannerError, ProviderError, StoreError};
pub use geo::Coordinate;
pub use plan::{DailyPlan, DailyPlanner, StaticPlanSource};
pub use store::InMemoryAssignmentStore;
pub use team::{GeneticOptions, TeamOptimizer, TeamPlan};
pub use traits::{AssignmentStore, Notifier, PlanSource, RoutingBackend};
