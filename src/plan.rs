//! One operating day, end to end: construct, refine, staff.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use tracing::info;

use crate::clock::Clock;
use crate::distance::{DistanceProvider, ProviderStats};
use crate::error::{PlannerError, StoreError};
use crate::geo::Coordinate;
use crate::model::{AssignmentDraft, Job, Vehicle};
use crate::osrm::OsrmClient;
use crate::refine::{refine_routes, CostAnalysis, RefinedRoute};
use crate::savings::{build_routes, UnassignedJob};
use crate::staff::{StaffMember, TeamHistory};
use crate::team::{RouteProfile, TeamOptimizer, TeamPlan};
use crate::traits::{PlanSource, RoutingBackend};
use crate::PlannerConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct DailyPlan {
    pub date: NaiveDate,
    pub routes: Vec<RefinedRoute>,
    pub unassigned: Vec<UnassignedJob>,
    /// Demand profile per route, same order as `routes`.
    pub profiles: Vec<RouteProfile>,
    pub teams: TeamPlan,
    pub cost: CostAnalysis,
    pub provider_stats: ProviderStats,
}

impl DailyPlan {
    /// Drafts to persist for `date`; empty for any other day.
    pub fn assignments_for(&self, date: NaiveDate) -> Vec<AssignmentDraft> {
        if date != self.date {
            return Vec::new();
        }
        self.teams.drafts(date)
    }
}

pub struct DailyPlanner<B> {
    provider: DistanceProvider<B>,
    config: PlannerConfig,
}

impl<B: RoutingBackend> DailyPlanner<B> {
    pub fn new(backend: B, config: PlannerConfig) -> Self {
        let provider = DistanceProvider::new(backend, config.distance.clone());
        Self { provider, config }
    }

    pub fn with_clock(backend: B, config: PlannerConfig, clock: Arc<dyn Clock>) -> Self {
        let provider = DistanceProvider::with_clock(backend, config.distance.clone(), clock);
        Self { provider, config }
    }

    pub fn provider(&self) -> &DistanceProvider<B> {
        &self.provider
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Depot departure on `date`, read as UTC.
    pub fn departure(&self, date: NaiveDate) -> DateTime<Utc> {
        date.and_time(NaiveTime::MIN).and_utc() + Duration::seconds(self.config.construction.day_start_secs as i64)
    }

    pub fn plan_day(
        &self,
        date: NaiveDate,
        jobs: &[Job],
        fleet: &[Vehicle],
        depot: Coordinate,
        roster: &[StaffMember],
        history: &TeamHistory,
    ) -> DailyPlan {
        let departure = self.departure(date);
        let constructed = build_routes(&self.provider, jobs, depot, fleet, departure, &self.config.construction);
        let refined = refine_routes(
            &self.provider,
            date,
            &constructed.routes,
            jobs,
            fleet,
            depot,
            departure,
            &self.config.refine,
        );

        let profiles: Vec<RouteProfile> = refined
            .routes
            .iter()
            .map(|route| RouteProfile::from_refined(route, jobs))
            .collect();
        let teams = TeamOptimizer::new(self.config.genetic.clone()).optimize(&profiles, roster, history);

        info!(
            %date,
            routes = refined.routes.len(),
            unassigned = constructed.unassigned.len(),
            team_fitness = teams.fitness,
            efficiency_gain_pct = refined.analysis.efficiency_gain_pct,
            "day planned"
        );
        DailyPlan {
            date,
            routes: refined.routes,
            unassigned: constructed.unassigned,
            profiles,
            teams,
            cost: refined.analysis,
            provider_stats: self.provider.stats(),
        }
    }
}

impl DailyPlanner<OsrmClient> {
    /// Planner backed by the OSRM server named in `config.osrm`.
    pub fn with_osrm(config: PlannerConfig) -> Result<Self, PlannerError> {
        let backend = OsrmClient::new(config.osrm.clone())?;
        Ok(Self::new(backend, config))
    }
}

/// Fixed routes and roster, for hosts that hold the day in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticPlanSource {
    routes: HashMap<NaiveDate, Vec<RouteProfile>>,
    roster: Vec<StaffMember>,
    history: TeamHistory,
}

impl StaticPlanSource {
    pub fn new(roster: Vec<StaffMember>, history: TeamHistory) -> Self {
        Self {
            routes: HashMap::new(),
            roster,
            history,
        }
    }

    pub fn with_routes(mut self, date: NaiveDate, routes: Vec<RouteProfile>) -> Self {
        self.routes.insert(date, routes);
        self
    }

    pub fn from_plan(plan: &DailyPlan, roster: Vec<StaffMember>, history: TeamHistory) -> Self {
        Self::new(roster, history).with_routes(plan.date, plan.profiles.clone())
    }
}

impl PlanSource for StaticPlanSource {
    fn routes(&self, date: NaiveDate) -> Result<Vec<RouteProfile>, StoreError> {
        Ok(self.routes.get(&date).cloned().unwrap_or_default())
    }

    fn roster(&self, _date: NaiveDate) -> Result<Vec<StaffMember>, StoreError> {
        Ok(self.roster.clone())
    }

    fn team_history(&self) -> Result<TeamHistory, StoreError> {
        Ok(self.history.clone())
    }
}
