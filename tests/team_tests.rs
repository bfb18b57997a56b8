//! Team optimizer through its public surface.

mod fixtures;

use std::collections::HashSet;

use dispatch_planner::model::{RouteId, StaffId};
use dispatch_planner::staff::{Availability, PastTeam, Skill, StaffRole, TeamHistory};
use dispatch_planner::team::{
    OptimizationStatus, RouteProfile, StopReason, TrainingPriority, FALLBACK_SCORE, MAX_TEAM_SIZE, MIN_TEAM_SIZE,
};
use dispatch_planner::{GeneticOptions, TeamOptimizer};

use fixtures::*;

fn options(seed: u64) -> GeneticOptions {
    GeneticOptions {
        population_size: 20,
        max_generations: 25,
        time_limit_ms: None,
        ..GeneticOptions::default()
    }
    .with_seed(seed)
}

/// A route that needs more of one skill than the rest.
fn demanding(route: &str, skill: Skill, level: f64) -> RouteProfile {
    let mut route = profile(route, 2, 0.3);
    route.required = route.required.with(skill, level);
    route
}

fn routes() -> Vec<RouteProfile> {
    vec![profile("r1", 3, 0.6), profile("r2", 2, 0.4), profile("r3", 4, 0.7)]
}

// ============================================================================
// Search invariants
// ============================================================================

#[test]
fn best_fitness_never_decreases() {
    let plan = TeamOptimizer::new(options(7)).optimize(&routes(), &roster(14), &TeamHistory::default());

    assert_eq!(plan.status, OptimizationStatus::Optimized);
    assert!(!plan.fitness_history.is_empty());
    for pair in plan.fitness_history.windows(2) {
        assert!(pair[1] >= pair[0], "history went down: {:?}", plan.fitness_history);
    }
    assert_eq!(plan.fitness, *plan.fitness_history.last().unwrap());
    assert!((0.0..=1.0).contains(&plan.fitness));
}

#[test]
fn nobody_works_two_routes() {
    let plan = TeamOptimizer::new(options(11)).optimize(&routes(), &roster(14), &TeamHistory::default());

    let mut seen = HashSet::new();
    for team in &plan.teams {
        assert!(team.members.len() >= MIN_TEAM_SIZE && team.members.len() <= MAX_TEAM_SIZE);
        for member in &team.members {
            assert!(seen.insert(member.clone()), "{member} assigned twice");
        }
        assert_eq!(team.lead.as_ref(), team.members.first());
    }
}

#[test]
fn unavailable_staff_are_never_picked() {
    let mut staff = roster(12);
    for member in staff.iter_mut().step_by(3) {
        member.availability = Availability::Sick;
    }
    staff[1].availability = Availability::Emergency;
    staff[2].availability = Availability::Busy;
    let excluded: HashSet<StaffId> = staff
        .iter()
        .filter(|m| !m.availability.is_available())
        .map(|m| m.id.clone())
        .collect();

    let plan = TeamOptimizer::new(options(3)).optimize(&routes()[..2], &staff, &TeamHistory::default());

    for team in &plan.teams {
        assert!(team.members.iter().all(|id| !excluded.contains(id)));
    }
}

#[test]
fn same_seed_gives_same_plan() {
    let staff = roster(14);
    let first = TeamOptimizer::new(options(42)).optimize(&routes(), &staff, &TeamHistory::default());
    let second = TeamOptimizer::new(options(42)).optimize(&routes(), &staff, &TeamHistory::default());

    assert_eq!(first.teams, second.teams);
    assert_eq!(first.fitness_history, second.fitness_history);
}

#[test]
fn reachable_target_stops_early() {
    let staff: Vec<_> = (0..6).map(|i| TestStaff::new(&format!("s{i}")).level(1.0).build()).collect();
    let opts = GeneticOptions {
        target_fitness: 0.1,
        ..options(5)
    };

    let plan = TeamOptimizer::new(opts).optimize(&[profile("r1", 2, 0.2)], &staff, &TeamHistory::default());

    assert_eq!(plan.stop, Some(StopReason::TargetReached));
    assert_eq!(plan.fitness_history.len(), 1);
}

// ============================================================================
// Scoring
// ============================================================================

#[test]
fn skilled_team_outscores_weak_team() {
    let optimizer = TeamOptimizer::new(options(1));
    let staff = vec![
        TestStaff::new("strong-1").level(0.9).role(StaffRole::Leader).experience(8.0).build(),
        TestStaff::new("strong-2").level(0.9).build(),
        TestStaff::new("weak-1").level(0.2).build(),
        TestStaff::new("weak-2").level(0.2).build(),
    ];
    let route = [profile("r1", 2, 0.7)];
    let strong = [vec![StaffId::new("strong-1"), StaffId::new("strong-2")]];
    let weak = [vec![StaffId::new("weak-1"), StaffId::new("weak-2")]];
    let history = TeamHistory::default();

    assert!(optimizer.score_teams(&route, &strong, &staff, &history) > optimizer.score_teams(&route, &weak, &staff, &history));
    let scores = optimizer.route_scores(&route, &strong, &staff, &history);
    assert_eq!(scores.len(), 1);
    assert!(scores[0].skill_match > 0.9);
}

#[test]
fn proven_pairing_raises_chemistry() {
    let optimizer = TeamOptimizer::new(options(1));
    let staff = roster(4);
    let route = [profile("r1", 2, 0.5)];
    let team = [vec![StaffId::new("s0"), StaffId::new("s1")]];
    let history = TeamHistory::new(vec![PastTeam {
        members: vec![StaffId::new("s0"), StaffId::new("s1")],
        outcome: 1.0,
    }]);

    let fresh = optimizer.route_scores(&route, &team, &staff, &TeamHistory::default())[0];
    let proven = optimizer.route_scores(&route, &team, &staff, &history)[0];

    assert!(proven.chemistry > fresh.chemistry);
}

#[test]
fn certification_lifts_specialist_coverage() {
    let optimizer = TeamOptimizer::new(options(1));
    let mut route = [profile("r1", 2, 0.5)];
    route[0].required = route[0].required.with(Skill::FragileHandling, 0.9);
    let plain = vec![
        TestStaff::new("a").skill(Skill::FragileHandling, 0.8).build(),
        TestStaff::new("b").build(),
    ];
    let certified = vec![
        TestStaff::new("a").skill(Skill::FragileHandling, 0.8).certified(Skill::FragileHandling).build(),
        TestStaff::new("b").build(),
    ];
    let team = [vec![StaffId::new("a"), StaffId::new("b")]];
    let history = TeamHistory::default();

    let without = optimizer.route_scores(&route, &team, &plain, &history)[0];
    let with = optimizer.route_scores(&route, &team, &certified, &history)[0];

    assert!(with.skill_match > without.skill_match);
}

// ============================================================================
// Fallback and reporting
// ============================================================================

#[test]
fn empty_roster_falls_back_with_unstaffed_routes() {
    let plan = TeamOptimizer::new(options(1)).optimize(&routes(), &[], &TeamHistory::default());

    assert_eq!(plan.status, OptimizationStatus::Fallback);
    assert_eq!(plan.fitness, FALLBACK_SCORE);
    assert_eq!(plan.unstaffed().len(), 3);
    assert!(plan.drafts(date()).is_empty());
}

#[test]
fn corrupt_skill_data_falls_back_to_round_robin() {
    let mut staff = roster(8);
    staff[3].skills[Skill::Leadership] = f64::NAN;

    let optimizer = TeamOptimizer::new(options(1));
    assert!(optimizer.try_optimize(&routes(), &staff, &TeamHistory::default()).is_err());

    let plan = optimizer.optimize(&routes(), &staff, &TeamHistory::default());
    assert_eq!(plan.status, OptimizationStatus::Fallback);
    assert!(plan.fitness_history.is_empty());
    let staffed: Vec<&RouteId> = plan.teams.iter().filter(|t| !t.members.is_empty()).map(|t| &t.route_id).collect();
    assert_eq!(staffed.len(), 3);
    for team in &plan.teams {
        assert!(team.members.len() <= 3);
        assert_eq!(team.predicted_performance, FALLBACK_SCORE);
    }
}

#[test]
fn missing_skill_is_flagged_for_training() {
    let staff: Vec<_> = (0..6)
        .map(|i| TestStaff::new(&format!("s{i}")).level(0.6).skill(Skill::HeavyLifting, 0.1).build())
        .collect();
    let heavy: Vec<RouteProfile> = (1..=3)
        .map(|i| demanding(&format!("r{i}"), Skill::HeavyLifting, 0.8))
        .collect();

    let plan = TeamOptimizer::new(options(9)).optimize(&heavy, &staff, &TeamHistory::default());

    let lifting = plan.recommendations.iter().find(|r| r.skill == Skill::HeavyLifting).unwrap();
    assert_eq!(lifting.priority, TrainingPriority::High);
    assert_eq!(lifting.routes_short, 3);
}
