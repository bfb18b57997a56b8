//! What a route asks of its crew.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::{Job, JobId, RouteId, ServiceCategory};
use crate::refine::RefinedRoute;
use crate::staff::{Skill, SkillVector};

pub const MIN_TEAM_SIZE: usize = 2;
pub const MAX_TEAM_SIZE: usize = 4;

/// Skill requirements and team size for one route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteProfile {
    pub route_id: RouteId,
    /// Required proficiency per skill, `[0, 1]`.
    pub required: SkillVector,
    pub team_size: usize,
    /// `[0, 1]`, grows with volume, special handling and stop count.
    pub complexity: f64,
    pub total_volume: f64,
    pub job_count: usize,
}

impl RouteProfile {
    pub fn from_jobs(route_id: RouteId, jobs: &[&Job]) -> Self {
        let total_volume: f64 = jobs.iter().map(|job| job.volume).sum();
        let mut required = SkillVector::new([0.3, 0.2, 0.4, 0.3, 0.3, 0.3]);

        for job in jobs {
            for &(skill, level) in category_demand(job.category) {
                required[skill] = required[skill].max(level);
            }
            if job.priority >= 4 {
                required[Skill::CustomerService] = required[Skill::CustomerService].max(0.6);
            }
            if job.time_window.is_some() {
                required[Skill::Speed] = required[Skill::Speed].max(0.5);
            }
        }
        // bulky routes need lifting whatever the category
        required[Skill::HeavyLifting] = required[Skill::HeavyLifting].max((total_volume / 40.0).min(0.9));
        if jobs.len() > 4 {
            required[Skill::Leadership] = required[Skill::Leadership].max(0.5);
        }

        let special = jobs.iter().filter(|job| job.category != ServiceCategory::Standard).count();
        let special_share = if jobs.is_empty() { 0.0 } else { special as f64 / jobs.len() as f64 };
        let complexity = (0.5 * (total_volume / 40.0).min(1.0)
            + 0.3 * special_share
            + 0.2 * (jobs.len() as f64 / 8.0).min(1.0))
        .clamp(0.0, 1.0);

        let mut team_size = if complexity < 0.35 {
            2
        } else if complexity < 0.7 {
            3
        } else {
            4
        };
        if total_volume > 30.0 {
            team_size = team_size.max(3);
        }

        Self {
            route_id,
            required,
            team_size: team_size.clamp(MIN_TEAM_SIZE, MAX_TEAM_SIZE),
            complexity,
            total_volume,
            job_count: jobs.len(),
        }
    }

    /// Profile of a refined route; job ids missing from `jobs` are skipped.
    pub fn from_refined(route: &RefinedRoute, jobs: &[Job]) -> Self {
        let by_id: HashMap<&JobId, &Job> = jobs.iter().map(|job| (&job.id, job)).collect();
        let route_jobs: Vec<&Job> = route.job_ids.iter().filter_map(|id| by_id.get(id).copied()).collect();
        Self::from_jobs(route.route_id.clone(), &route_jobs)
    }
}

fn category_demand(category: ServiceCategory) -> &'static [(Skill, f64)] {
    match category {
        ServiceCategory::Standard => &[(Skill::CustomerService, 0.5)],
        ServiceCategory::Fragile => &[(Skill::FragileHandling, 0.8), (Skill::ProblemSolving, 0.4)],
        ServiceCategory::HeavyItems => &[(Skill::HeavyLifting, 0.85), (Skill::ProblemSolving, 0.5)],
        ServiceCategory::Commercial => &[(Skill::CustomerService, 0.7), (Skill::ProblemSolving, 0.6), (Skill::Leadership, 0.5)],
        ServiceCategory::Packing => &[(Skill::Speed, 0.6), (Skill::FragileHandling, 0.5)],
    }
}
