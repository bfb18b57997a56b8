//! Team-to-route assignment.
//!
//! [`TeamOptimizer::optimize`] always returns a plan. When the genetic
//! search cannot run (no usable staff, bad skill data, pool failure) it falls
//! back to round-robin slicing and tags the plan [`OptimizationStatus::Fallback`].

mod demand;
mod fallback;
mod fitness;
mod genetic;
mod report;

use std::collections::HashMap;

use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::PlannerError;
use crate::model::{AssignmentDraft, RouteId, StaffId};
use crate::staff::{StaffMember, TeamHistory};

pub use demand::{RouteProfile, MAX_TEAM_SIZE, MIN_TEAM_SIZE};
pub use fallback::FALLBACK_SCORE;
pub use fitness::RouteScore;
pub use genetic::{GeneticOptions, StopReason};
pub use report::{coverage_report, training_recommendations, SkillCoverage, TrainingPriority, TrainingRecommendation};

use fitness::{staff_index, Evaluator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizationStatus {
    Optimized,
    Fallback,
}

/// The crew chosen for one route, lead first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteTeam {
    pub route_id: RouteId,
    pub members: Vec<StaffId>,
    pub lead: Option<StaffId>,
    pub predicted_performance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TeamPlan {
    pub teams: Vec<RouteTeam>,
    /// Solution fitness in `[0, 1]`.
    pub fitness: f64,
    /// Fitness as a percentage, for reporting.
    pub efficiency_score: f64,
    pub coverage: Vec<SkillCoverage>,
    pub recommendations: Vec<TrainingRecommendation>,
    pub status: OptimizationStatus,
    pub stop: Option<StopReason>,
    /// Best-ever fitness per generation; empty for fallback plans.
    pub fitness_history: Vec<f64>,
}

impl TeamPlan {
    pub fn team_for(&self, route_id: &RouteId) -> Option<&RouteTeam> {
        self.teams.iter().find(|team| &team.route_id == route_id)
    }

    /// Routes the roster could not staff.
    pub fn unstaffed(&self) -> Vec<&RouteId> {
        self.teams
            .iter()
            .filter(|team| team.members.is_empty())
            .map(|team| &team.route_id)
            .collect()
    }

    /// Persistable drafts for every staffed route.
    pub fn drafts(&self, date: NaiveDate) -> Vec<AssignmentDraft> {
        self.teams
            .iter()
            .filter_map(|team| {
                let lead = team.lead.clone()?;
                Some(AssignmentDraft {
                    route_id: team.route_id.clone(),
                    date,
                    members: team.members.clone(),
                    lead,
                    predicted_performance: team.predicted_performance,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TeamOptimizer {
    options: GeneticOptions,
}

impl TeamOptimizer {
    pub fn new(options: GeneticOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &GeneticOptions {
        &self.options
    }

    /// Best plan the search finds, or the round-robin plan if it fails.
    pub fn optimize(&self, routes: &[RouteProfile], roster: &[StaffMember], history: &TeamHistory) -> TeamPlan {
        match self.try_optimize(routes, roster, history) {
            Ok(plan) => plan,
            Err(err) => {
                let staff = available(roster);
                warn!(error = %err, routes = routes.len(), staff = staff.len(), "team search failed, using round-robin assignment");
                fallback_plan(routes, &staff)
            }
        }
    }

    /// Run the genetic search over available members of `roster`.
    pub fn try_optimize(
        &self,
        routes: &[RouteProfile],
        roster: &[StaffMember],
        history: &TeamHistory,
    ) -> Result<TeamPlan, PlannerError> {
        let staff = available(roster);
        if routes.is_empty() {
            return Ok(TeamPlan {
                teams: Vec::new(),
                fitness: 0.0,
                efficiency_score: 0.0,
                coverage: Vec::new(),
                recommendations: Vec::new(),
                status: OptimizationStatus::Optimized,
                stop: None,
                fitness_history: Vec::new(),
            });
        }
        if staff.is_empty() {
            return Err(PlannerError::OptimizationFailure("no available staff".into()));
        }
        if let Some(bad) = staff.iter().find(|m| !m.skills.is_valid()) {
            return Err(PlannerError::OptimizationFailure(format!("invalid skill data for {}", bad.id)));
        }
        if let Some(bad) = routes.iter().find(|r| !r.required.is_valid()) {
            return Err(PlannerError::OptimizationFailure(format!("invalid requirements for {}", bad.route_id)));
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(self.options.workers.max(1))
            .build()
            .map_err(|err| PlannerError::OptimizationFailure(format!("cannot build worker pool: {err}")))?;
        let mut rng = match self.options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let eval = Evaluator::new(routes, &staff, history);
        let outcome = genetic::search(&eval, &self.options, &mut rng, &pool);

        let teams: Vec<RouteTeam> = routes
            .iter()
            .zip(&outcome.best.teams)
            .map(|(profile, team)| RouteTeam {
                route_id: profile.route_id.clone(),
                members: team.iter().map(|&i| staff[i].id.clone()).collect(),
                lead: team.first().map(|&i| staff[i].id.clone()),
                predicted_performance: eval.route_score(profile, team).total,
            })
            .collect();

        let ids: Vec<Vec<StaffId>> = teams.iter().map(|t| t.members.clone()).collect();
        let coverage = coverage_report(routes, &ids, &staff);
        let recommendations = training_recommendations(&coverage);

        info!(
            routes = routes.len(),
            staff = staff.len(),
            fitness = outcome.best.fitness,
            generations = outcome.history.len(),
            stop = ?outcome.stop,
            "team search finished"
        );
        Ok(TeamPlan {
            teams,
            fitness: outcome.best.fitness,
            efficiency_score: outcome.best.fitness * 100.0,
            coverage,
            recommendations,
            status: OptimizationStatus::Optimized,
            stop: Some(outcome.stop),
            fitness_history: outcome.history,
        })
    }

    /// Fitness of existing teams. Unknown or unavailable members are
    /// dropped, so teams that lost someone score as understaffed.
    pub fn score_teams(
        &self,
        routes: &[RouteProfile],
        teams: &[Vec<StaffId>],
        roster: &[StaffMember],
        history: &TeamHistory,
    ) -> f64 {
        let staff = available(roster);
        let index = staff_index(&staff);
        let resolved: Vec<Vec<usize>> = teams
            .iter()
            .map(|team| team.iter().filter_map(|id| index.get(id).copied()).collect())
            .collect();
        Evaluator::new(routes, &staff, history).fitness(&resolved)
    }

    /// Per-route scores of existing teams.
    pub fn route_scores(
        &self,
        routes: &[RouteProfile],
        teams: &[Vec<StaffId>],
        roster: &[StaffMember],
        history: &TeamHistory,
    ) -> Vec<RouteScore> {
        let staff = available(roster);
        let index: HashMap<&StaffId, usize> = staff_index(&staff);
        let eval = Evaluator::new(routes, &staff, history);
        routes
            .iter()
            .zip(teams)
            .map(|(profile, team)| {
                let resolved: Vec<usize> = team.iter().filter_map(|id| index.get(id).copied()).collect();
                eval.route_score(profile, &resolved)
            })
            .collect()
    }
}

fn available(roster: &[StaffMember]) -> Vec<StaffMember> {
    roster.iter().filter(|m| m.availability.is_available()).cloned().collect()
}

fn fallback_plan(routes: &[RouteProfile], staff: &[StaffMember]) -> TeamPlan {
    let ids = fallback::round_robin(routes, staff);
    let coverage = coverage_report(routes, &ids, staff);
    let recommendations = training_recommendations(&coverage);
    let teams = routes
        .iter()
        .zip(ids)
        .map(|(profile, members)| RouteTeam {
            route_id: profile.route_id.clone(),
            lead: members.first().cloned(),
            predicted_performance: if members.is_empty() { 0.0 } else { FALLBACK_SCORE },
            members,
        })
        .collect();
    TeamPlan {
        teams,
        fitness: FALLBACK_SCORE,
        efficiency_score: FALLBACK_SCORE * 100.0,
        coverage,
        recommendations,
        status: OptimizationStatus::Fallback,
        stop: None,
        fitness_history: Vec::new(),
    }
}
