//! Team fitness.
//!
//! A team is a list of indices into the staff slice, lead first. A solution
//! has one team per route, in route order.

use std::collections::{HashMap, HashSet};

use crate::model::StaffId;
use crate::staff::{Skill, StaffMember, StaffRole, TeamHistory};
use crate::team::demand::RouteProfile;

const SKILL_WEIGHT: f64 = 0.35;
const CHEMISTRY_WEIGHT: f64 = 0.25;
const WORKLOAD_WEIGHT: f64 = 0.25;
const PERFORMANCE_WEIGHT: f64 = 0.15;

pub(crate) const CERTIFICATION_MULTIPLIER: f64 = 1.15;
/// Coverage beyond this share of the requirement earns nothing more.
const COVERAGE_CAP: f64 = 1.2;
const NEUTRAL_PERFORMANCE: f64 = 0.6;
const DIVERSITY_BONUS: f64 = 0.05;
const IMBALANCE_PENALTY: f64 = 0.2;

/// Sub-scores of one route's team.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RouteScore {
    pub skill_match: f64,
    pub chemistry: f64,
    pub workload: f64,
    pub performance: f64,
    /// Weighted sum, scaled down for understaffed teams.
    pub total: f64,
}

pub(crate) struct Evaluator<'a> {
    routes: &'a [RouteProfile],
    staff: &'a [StaffMember],
    history: &'a TeamHistory,
}

impl<'a> Evaluator<'a> {
    pub(crate) fn new(routes: &'a [RouteProfile], staff: &'a [StaffMember], history: &'a TeamHistory) -> Self {
        Self { routes, staff, history }
    }

    pub(crate) fn routes(&self) -> &'a [RouteProfile] {
        self.routes
    }

    pub(crate) fn staff(&self) -> &'a [StaffMember] {
        self.staff
    }

    /// Solution fitness in `[0, 1]`.
    pub(crate) fn fitness(&self, teams: &[Vec<usize>]) -> f64 {
        if self.routes.is_empty() {
            return 0.0;
        }
        let scores: Vec<RouteScore> = self
            .routes
            .iter()
            .zip(teams)
            .map(|(profile, team)| self.route_score(profile, team))
            .collect();
        let mean = scores.iter().map(|s| s.total).sum::<f64>() / self.routes.len() as f64;

        let diversity = teams.iter().map(|team| self.role_diversity(team)).sum::<f64>() / self.routes.len() as f64;
        let imbalance = std_dev(scores.iter().map(|s| s.workload));

        let mut fitness = mean + DIVERSITY_BONUS * diversity - IMBALANCE_PENALTY * imbalance;
        if has_duplicates(teams) {
            fitness *= 0.5;
        }
        fitness.clamp(0.0, 1.0)
    }

    pub(crate) fn route_score(&self, profile: &RouteProfile, team: &[usize]) -> RouteScore {
        if team.is_empty() {
            return RouteScore::default();
        }
        let members: Vec<&StaffMember> = team.iter().map(|&i| &self.staff[i]).collect();
        let skill_match = skill_match(profile, &members);
        let chemistry = self.chemistry(&members);
        let workload = workload_balance(&members);
        let performance = performance_history(&members);
        let staffing = (members.len() as f64 / profile.team_size.max(1) as f64).min(1.0);
        let total = staffing
            * (SKILL_WEIGHT * skill_match
                + CHEMISTRY_WEIGHT * chemistry
                + WORKLOAD_WEIGHT * workload
                + PERFORMANCE_WEIGHT * performance);
        RouteScore {
            skill_match,
            chemistry,
            workload,
            performance,
            total,
        }
    }

    /// Likelihood weight for sampling a member onto a route.
    pub(crate) fn affinity(&self, profile: &RouteProfile, member: usize) -> f64 {
        let member = &self.staff[member];
        let score: f64 = Skill::ALL
            .iter()
            .map(|&skill| {
                let level = effective_level(member, skill).min(1.0);
                skill.weight() * level * (0.5 + profile.required[skill])
            })
            .sum();
        score.max(0.01)
    }

    fn chemistry(&self, members: &[&StaffMember]) -> f64 {
        if members.len() < 2 {
            return members.first().map_or(0.0, |m| m.collaboration_rating);
        }
        let ids: HashSet<&StaffId> = members.iter().map(|m| &m.id).collect();
        let mut weighted = 0.0;
        let mut weights = 0.0;
        for past in &self.history.teams {
            let shared = past.members.iter().filter(|id| ids.contains(id)).count();
            if shared < 2 {
                continue;
            }
            let overlap = shared as f64 / members.len() as f64;
            weighted += past.outcome * overlap * overlap;
            weights += overlap * overlap;
        }
        if weights > 0.0 {
            return (weighted / weights).clamp(0.0, 1.0);
        }

        let collaboration = members.iter().map(|m| m.collaboration_rating).sum::<f64>() / members.len() as f64;
        0.7 * collaboration + 0.3 * role_balance(members)
    }

    fn role_diversity(&self, team: &[usize]) -> f64 {
        let mut roles = Vec::with_capacity(3);
        for &i in team {
            let role = self.staff[i].role;
            if !roles.contains(&role) {
                roles.push(role);
            }
        }
        roles.len() as f64 / 3.0
    }
}

pub(crate) fn effective_level(member: &StaffMember, skill: Skill) -> f64 {
    let level = member.skills[skill];
    if member.is_certified(skill) {
        level * CERTIFICATION_MULTIPLIER
    } else {
        level
    }
}

/// Best member's level over the requirement, per skill. `None` when the
/// skill is not required.
pub(crate) fn coverage(profile: &RouteProfile, members: &[&StaffMember], skill: Skill) -> Option<f64> {
    let required = profile.required[skill];
    if required <= 0.0 {
        return None;
    }
    let best = members.iter().map(|m| effective_level(m, skill)).fold(0.0, f64::max);
    Some(best / required)
}

fn skill_match(profile: &RouteProfile, members: &[&StaffMember]) -> f64 {
    let mut score = 0.0;
    let mut weights = 0.0;
    for skill in Skill::ALL {
        let Some(ratio) = coverage(profile, members, skill) else {
            continue;
        };
        // full credit at the requirement, a little more up to the cap
        let value = if ratio <= 1.0 {
            ratio
        } else {
            1.0 + 0.5 * (ratio.min(COVERAGE_CAP) - 1.0)
        };
        score += skill.weight() * value / (1.0 + 0.5 * (COVERAGE_CAP - 1.0));
        weights += skill.weight();
    }
    if weights == 0.0 { 1.0 } else { score / weights }
}

/// One leader, one or two specialists, generalists for the rest.
fn role_balance(members: &[&StaffMember]) -> f64 {
    let leaders = members.iter().filter(|m| m.role == StaffRole::Leader).count();
    let specialists = members.iter().filter(|m| m.role == StaffRole::Specialist).count();
    let leader_term = match leaders {
        1 => 1.0,
        0 => 0.4,
        _ => 0.6,
    };
    let specialist_term = match specialists {
        1 | 2 => 1.0,
        0 => 0.6,
        _ => 0.7,
    };
    0.5 * leader_term + 0.5 * specialist_term
}

fn workload_balance(members: &[&StaffMember]) -> f64 {
    let loads: Vec<f64> = members.iter().map(|m| m.workload.load()).collect();
    let freshness = 1.0 - loads.iter().sum::<f64>() / loads.len() as f64;
    (freshness - 2.0 * variance(loads.iter().copied())).clamp(0.0, 1.0)
}

fn performance_history(members: &[&StaffMember]) -> f64 {
    members
        .iter()
        .map(|m| m.performance.map_or(NEUTRAL_PERFORMANCE, |p| p.blended()))
        .sum::<f64>()
        / members.len() as f64
}

fn variance(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let n = values.clone().count();
    if n < 2 {
        return 0.0;
    }
    let mean = values.clone().sum::<f64>() / n as f64;
    values.map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64
}

fn std_dev(values: impl Iterator<Item = f64> + Clone) -> f64 {
    variance(values).sqrt()
}

fn has_duplicates(teams: &[Vec<usize>]) -> bool {
    let mut seen = HashSet::new();
    teams.iter().flatten().any(|&i| !seen.insert(i))
}

/// Staff index by id.
pub(crate) fn staff_index(staff: &[StaffMember]) -> HashMap<&StaffId, usize> {
    staff.iter().enumerate().map(|(i, m)| (&m.id, i)).collect()
}
