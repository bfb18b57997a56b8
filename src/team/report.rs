//! Skill coverage across a team plan and training suggestions.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::StaffId;
use crate::staff::{Skill, StaffMember};
use crate::team::demand::RouteProfile;
use crate::team::fitness::coverage;

/// A route counts as short on a skill below this coverage.
const GAP_THRESHOLD: f64 = 0.9;
/// Share of routes short on a skill before training is suggested.
const SYSTEMATIC_SHARE: f64 = 0.3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillCoverage {
    pub skill: Skill,
    /// Routes that require the skill at all.
    pub routes_requiring: usize,
    pub routes_short: usize,
    /// Mean best-member coverage over routes requiring it, capped at 1.
    pub average_coverage: f64,
    /// Mean shortfall below full coverage.
    pub average_gap: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TrainingPriority {
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRecommendation {
    pub skill: Skill,
    pub priority: TrainingPriority,
    pub routes_short: usize,
    pub message: String,
}

pub fn coverage_report(routes: &[RouteProfile], teams: &[Vec<StaffId>], staff: &[StaffMember]) -> Vec<SkillCoverage> {
    let by_id: HashMap<&StaffId, &StaffMember> = staff.iter().map(|m| (&m.id, m)).collect();
    let members: Vec<Vec<&StaffMember>> = teams
        .iter()
        .map(|team| team.iter().filter_map(|id| by_id.get(id).copied()).collect())
        .collect();

    Skill::ALL
        .iter()
        .map(|&skill| {
            let ratios: Vec<f64> = routes
                .iter()
                .zip(&members)
                .filter_map(|(profile, team)| coverage(profile, team, skill))
                .map(|ratio| ratio.min(1.0))
                .collect();
            let routes_requiring = ratios.len();
            let routes_short = ratios.iter().filter(|&&r| r < GAP_THRESHOLD).count();
            let average_coverage = if ratios.is_empty() {
                1.0
            } else {
                ratios.iter().sum::<f64>() / ratios.len() as f64
            };
            SkillCoverage {
                skill,
                routes_requiring,
                routes_short,
                average_coverage,
                average_gap: 1.0 - average_coverage,
            }
        })
        .collect()
}

/// Skills that fall short on a large share of routes.
pub fn training_recommendations(report: &[SkillCoverage]) -> Vec<TrainingRecommendation> {
    let mut recommendations: Vec<TrainingRecommendation> = report
        .iter()
        .filter(|c| c.routes_requiring > 0)
        .filter(|c| c.routes_short as f64 / c.routes_requiring as f64 >= SYSTEMATIC_SHARE)
        .map(|c| {
            let priority = if c.average_gap >= 0.25 {
                TrainingPriority::High
            } else {
                TrainingPriority::Medium
            };
            TrainingRecommendation {
                skill: c.skill,
                priority,
                routes_short: c.routes_short,
                message: format!(
                    "{:?} is below requirement on {} of {} routes (average gap {:.0}%)",
                    c.skill,
                    c.routes_short,
                    c.routes_requiring,
                    c.average_gap * 100.0
                ),
            }
        })
        .collect();
    recommendations.sort_by(|a, b| b.priority.cmp(&a.priority).then(b.routes_short.cmp(&a.routes_short)));
    recommendations
}
