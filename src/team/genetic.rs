//! Population search over team assignments.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::team::demand::{MAX_TEAM_SIZE, MIN_TEAM_SIZE};
use crate::team::fitness::Evaluator;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneticOptions {
    pub population_size: usize,
    pub max_generations: usize,
    /// Share of the ranked population carried over unchanged.
    pub elitism_rate: f64,
    pub tournament_size: usize,
    /// Chance, per route, of inheriting the fitter parent's team.
    pub crossover_rate: f64,
    pub min_mutation_rate: f64,
    pub max_mutation_rate: f64,
    /// Generations without improvement before stopping.
    pub stagnation_limit: usize,
    pub target_fitness: f64,
    pub workers: usize,
    pub seed: Option<u64>,
    pub time_limit_ms: Option<u64>,
}

impl Default for GeneticOptions {
    fn default() -> Self {
        Self {
            population_size: 30,
            max_generations: 50,
            elitism_rate: 0.5,
            tournament_size: 3,
            crossover_rate: 0.7,
            min_mutation_rate: 0.05,
            max_mutation_rate: 0.3,
            stagnation_limit: 10,
            target_fitness: 0.97,
            workers: 4,
            seed: None,
            time_limit_ms: Some(30_000),
        }
    }
}

impl GeneticOptions {
    /// Smaller search for reacting to an availability change.
    pub fn reoptimization() -> Self {
        Self {
            population_size: 16,
            max_generations: 20,
            stagnation_limit: 6,
            time_limit_ms: Some(5_000),
            ..Self::default()
        }
    }

    /// Smallest search, for emergencies.
    pub fn urgent() -> Self {
        Self {
            population_size: 10,
            max_generations: 10,
            stagnation_limit: 4,
            time_limit_ms: Some(2_000),
            ..Self::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    TargetReached,
    Stagnated,
    GenerationLimit,
    TimeLimit,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Candidate {
    pub teams: Vec<Vec<usize>>,
    pub fitness: f64,
}

#[derive(Debug, Clone)]
pub(crate) struct SearchOutcome {
    pub best: Candidate,
    /// Best-ever fitness after each generation.
    pub history: Vec<f64>,
    pub stop: StopReason,
}

pub(crate) fn search(
    eval: &Evaluator<'_>,
    options: &GeneticOptions,
    rng: &mut StdRng,
    pool: &ThreadPool,
) -> SearchOutcome {
    let started = Instant::now();
    let size = options.population_size.max(2);
    let mut population: Vec<Candidate> = (0..size).map(|_| random_candidate(eval, rng)).collect();

    let mut best: Option<Candidate> = None;
    let mut history = Vec::new();
    let mut stagnant = 0;
    let mut generation = 0;

    let stop = loop {
        // workers only read the candidates; scores come back in index order
        let scores: Vec<f64> = pool.install(|| population.par_iter().map(|c| eval.fitness(&c.teams)).collect());
        for (candidate, score) in population.iter_mut().zip(scores) {
            candidate.fitness = score;
        }
        population.sort_by(|a, b| b.fitness.total_cmp(&a.fitness));

        if best.as_ref().is_none_or(|current| population[0].fitness > current.fitness) {
            best = Some(population[0].clone());
            stagnant = 0;
        } else {
            stagnant += 1;
        }
        let best_fitness = best.as_ref().map_or(0.0, |c| c.fitness);
        history.push(best_fitness);
        generation += 1;

        debug!(generation, best = best_fitness, leader = population[0].fitness, stagnant, "generation evaluated");

        if best_fitness > options.target_fitness {
            break StopReason::TargetReached;
        }
        if stagnant >= options.stagnation_limit {
            break StopReason::Stagnated;
        }
        if generation >= options.max_generations.max(1) {
            break StopReason::GenerationLimit;
        }
        if options
            .time_limit_ms
            .is_some_and(|limit| started.elapsed() >= Duration::from_millis(limit))
        {
            break StopReason::TimeLimit;
        }

        population = next_generation(eval, options, &population, rng);
    };

    SearchOutcome {
        best: best.unwrap_or_else(|| population[0].clone()),
        history,
        stop,
    }
}

fn next_generation(
    eval: &Evaluator<'_>,
    options: &GeneticOptions,
    ranked: &[Candidate],
    rng: &mut StdRng,
) -> Vec<Candidate> {
    let survivors = ((ranked.len() as f64 * options.elitism_rate).ceil() as usize).clamp(1, ranked.len());
    let rate = (0.1 / diversity(ranked).max(1e-6)).clamp(options.min_mutation_rate, options.max_mutation_rate);

    let mut next: Vec<Candidate> = ranked[..survivors].to_vec();
    while next.len() < ranked.len() {
        let first = tournament(ranked, options.tournament_size, rng);
        let second = tournament(ranked, options.tournament_size, rng);
        let mut teams = crossover(first, second, options.crossover_rate, rng);
        mutate(eval, &mut teams, rate, rng);
        repair(eval, &mut teams);
        next.push(Candidate { teams, fitness: 0.0 });
    }
    next
}

/// One team per route, sampled by skill affinity without reuse. Routes take
/// turns picking one member at a time, so a short roster is spread over all
/// routes instead of filling the first ones.
fn random_candidate(eval: &Evaluator<'_>, rng: &mut StdRng) -> Candidate {
    let routes = eval.routes();
    let mut used = vec![false; eval.staff().len()];
    let mut teams: Vec<Vec<usize>> = routes.iter().map(|p| Vec::with_capacity(p.team_size)).collect();

    let mut order: Vec<usize> = (0..routes.len()).collect();
    order.shuffle(rng);
    'rounds: loop {
        let mut grew = false;
        for &r in &order {
            if teams[r].len() >= routes[r].team_size {
                continue;
            }
            let Some(pick) = sample_member(eval, r, &used, rng) else {
                break 'rounds;
            };
            used[pick] = true;
            teams[r].push(pick);
            grew = true;
        }
        if !grew {
            break;
        }
    }
    for team in &mut teams {
        put_lead_first(eval, team);
    }
    Candidate { teams, fitness: 0.0 }
}

/// Roulette over unused staff weighted by affinity.
fn sample_member(eval: &Evaluator<'_>, route: usize, used: &[bool], rng: &mut StdRng) -> Option<usize> {
    let profile = &eval.routes()[route];
    let weights: Vec<(usize, f64)> = used
        .iter()
        .enumerate()
        .filter(|(_, taken)| !**taken)
        .map(|(i, _)| (i, eval.affinity(profile, i)))
        .collect();
    if weights.is_empty() {
        return None;
    }
    let total: f64 = weights.iter().map(|(_, w)| w).sum();
    let mut ticket = rng.gen_range(0.0..total);
    for &(i, weight) in &weights {
        if ticket < weight {
            return Some(i);
        }
        ticket -= weight;
    }
    weights.last().map(|&(i, _)| i)
}

fn put_lead_first(eval: &Evaluator<'_>, team: &mut [usize]) {
    let staff = eval.staff();
    let lead = team
        .iter()
        .enumerate()
        .max_by(|a, b| {
            staff[*a.1]
                .lead_score()
                .total_cmp(&staff[*b.1].lead_score())
                .then(b.0.cmp(&a.0))
        })
        .map(|(pos, _)| pos);
    if let Some(pos) = lead {
        team[..=pos].rotate_right(1);
    }
}

fn tournament<'p>(ranked: &'p [Candidate], size: usize, rng: &mut StdRng) -> &'p Candidate {
    let mut winner = &ranked[rng.gen_range(0..ranked.len())];
    for _ in 1..size.max(1) {
        let challenger = &ranked[rng.gen_range(0..ranked.len())];
        if challenger.fitness > winner.fitness {
            winner = challenger;
        }
    }
    winner
}

fn crossover(first: &Candidate, second: &Candidate, rate: f64, rng: &mut StdRng) -> Vec<Vec<usize>> {
    let (fitter, other) = if first.fitness >= second.fitness {
        (first, second)
    } else {
        (second, first)
    };
    fitter
        .teams
        .iter()
        .zip(&other.teams)
        .map(|(a, b)| if rng.gen_bool(rate.clamp(0.0, 1.0)) { a.clone() } else { b.clone() })
        .collect()
}

fn mutate(eval: &Evaluator<'_>, teams: &mut [Vec<usize>], rate: f64, rng: &mut StdRng) {
    for r in 0..teams.len() {
        if teams[r].is_empty() || !rng.gen_bool(rate) {
            continue;
        }
        match rng.gen_range(0..3) {
            0 if teams.len() > 1 => swap_between(teams, r, rng),
            1 if teams.len() > 1 => move_member(teams, r, rng),
            _ => replace_member(eval, teams, r, rng),
        }
    }
}

/// Exchange one member of route `r` with one member of another route.
fn swap_between(teams: &mut [Vec<usize>], r: usize, rng: &mut StdRng) {
    let other = pick_other(teams.len(), r, rng);
    if teams[other].is_empty() {
        return;
    }
    let a = rng.gen_range(0..teams[r].len());
    let b = rng.gen_range(0..teams[other].len());
    let taken = teams[r][a];
    teams[r][a] = teams[other][b];
    teams[other][b] = taken;
}

fn move_member(teams: &mut [Vec<usize>], r: usize, rng: &mut StdRng) {
    let other = pick_other(teams.len(), r, rng);
    if teams[other].len() >= MAX_TEAM_SIZE {
        return;
    }
    // below the minimum a member only moves to a smaller team
    if teams[r].len() <= MIN_TEAM_SIZE && teams[r].len() <= teams[other].len() + 1 {
        return;
    }
    let pos = rng.gen_range(0..teams[r].len());
    let member = teams[r].remove(pos);
    teams[other].push(member);
}

fn replace_member(eval: &Evaluator<'_>, teams: &mut [Vec<usize>], r: usize, rng: &mut StdRng) {
    let used: HashSet<usize> = teams.iter().flatten().copied().collect();
    let idle: Vec<usize> = (0..eval.staff().len()).filter(|i| !used.contains(i)).collect();
    let Some(&replacement) = idle.choose(rng) else {
        return;
    };
    let pos = rng.gen_range(0..teams[r].len());
    teams[r][pos] = replacement;
}

fn pick_other(len: usize, r: usize, rng: &mut StdRng) -> usize {
    let offset = rng.gen_range(1..len);
    (r + offset) % len
}

/// Drop repeated members and refill short teams from idle staff, one member
/// per short route per round.
fn repair(eval: &Evaluator<'_>, teams: &mut [Vec<usize>]) {
    let routes = eval.routes();
    let mut seen = HashSet::new();
    for team in teams.iter_mut() {
        team.retain(|&member| seen.insert(member));
    }

    'rounds: loop {
        let mut grew = false;
        for (r, team) in teams.iter_mut().enumerate() {
            if team.len() >= routes[r].team_size {
                continue;
            }
            let best = (0..eval.staff().len())
                .filter(|i| !seen.contains(i))
                .max_by(|&a, &b| {
                    eval.affinity(&routes[r], a)
                        .total_cmp(&eval.affinity(&routes[r], b))
                        .then(b.cmp(&a))
                });
            let Some(pick) = best else {
                break 'rounds;
            };
            seen.insert(pick);
            team.push(pick);
            grew = true;
        }
        if !grew {
            break;
        }
    }
    for team in teams.iter_mut() {
        put_lead_first(eval, team);
    }
}

/// Mean share of routes whose team differs, over all candidate pairs.
fn diversity(population: &[Candidate]) -> f64 {
    let mut total = 0.0;
    let mut pairs = 0usize;
    for (i, a) in population.iter().enumerate() {
        for b in &population[i + 1..] {
            let routes = a.teams.len().max(1);
            let differing = a
                .teams
                .iter()
                .zip(&b.teams)
                .filter(|(x, y)| !same_members(x, y))
                .count();
            total += differing as f64 / routes as f64;
            pairs += 1;
        }
    }
    if pairs == 0 { 0.0 } else { total / pairs as f64 }
}

fn same_members(a: &[usize], b: &[usize]) -> bool {
    a.len() == b.len() && a.iter().all(|m| b.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RouteId, StaffId};
    use crate::staff::{Availability, SkillVector, StaffMember, StaffRole, TeamHistory, WorkloadSnapshot};
    use crate::team::demand::RouteProfile;
    use rand::SeedableRng;
    use rayon::ThreadPoolBuilder;

    fn staff(n: usize) -> Vec<StaffMember> {
        (0..n)
            .map(|i| StaffMember {
                id: StaffId::new(format!("s{i}")),
                name: format!("Staff {i}"),
                skills: SkillVector::uniform(0.3 + 0.05 * i as f64),
                certifications: Vec::new(),
                availability: Availability::Available,
                experience_years: i as f64,
                collaboration_rating: 0.6,
                role: if i % 4 == 0 { StaffRole::Leader } else { StaffRole::Generalist },
                performance: None,
                workload: WorkloadSnapshot::default(),
            })
            .collect()
    }

    fn routes(n: usize) -> Vec<RouteProfile> {
        (0..n)
            .map(|i| RouteProfile {
                route_id: RouteId::new(format!("r{i}")),
                required: SkillVector::uniform(0.6),
                team_size: 3,
                complexity: 0.5,
                total_volume: 15.0,
                job_count: 3,
            })
            .collect()
    }

    fn run(seed: u64, workers: usize) -> SearchOutcome {
        let staff = staff(12);
        let routes = routes(3);
        let history = TeamHistory::default();
        let eval = Evaluator::new(&routes, &staff, &history);
        let options = GeneticOptions {
            workers,
            ..GeneticOptions::default().with_seed(seed)
        };
        let pool = ThreadPoolBuilder::new().num_threads(workers).build().unwrap();
        let mut rng = StdRng::seed_from_u64(seed);
        search(&eval, &options, &mut rng, &pool)
    }

    #[test]
    fn best_ever_never_decreases() {
        let outcome = run(7, 4);
        assert!(outcome.history.windows(2).all(|w| w[1] >= w[0]));
        assert_eq!(outcome.history.last().copied(), Some(outcome.best.fitness));
    }

    #[test]
    fn no_member_serves_two_routes() {
        let outcome = run(11, 2);
        let mut seen = HashSet::new();
        assert!(outcome.best.teams.iter().flatten().all(|m| seen.insert(*m)));
    }

    #[test]
    fn ranking_ignores_worker_count() {
        let single = run(3, 1);
        let many = run(3, 4);
        assert_eq!(single.best, many.best);
        assert_eq!(single.history, many.history);
    }

    #[test]
    fn lead_goes_first() {
        let staff = staff(4);
        let routes = routes(1);
        let history = TeamHistory::default();
        let eval = Evaluator::new(&routes, &staff, &history);
        let mut team = vec![1, 3, 2];
        put_lead_first(&eval, &mut team);
        assert_eq!(team, vec![3, 1, 2]);
    }

    #[test]
    fn repair_removes_duplicates_and_refills() {
        let staff = staff(8);
        let routes = routes(2);
        let history = TeamHistory::default();
        let eval = Evaluator::new(&routes, &staff, &history);
        let mut teams = vec![vec![0, 1, 2], vec![2, 3, 4]];
        repair(&eval, &mut teams);
        assert_eq!(teams[1].len(), 3);
        let mut seen = HashSet::new();
        assert!(teams.iter().flatten().all(|m| seen.insert(*m)));
    }

    #[test]
    fn short_roster_is_spread_over_routes() {
        let staff = staff(2);
        let routes = routes(2);
        let history = TeamHistory::default();
        let eval = Evaluator::new(&routes, &staff, &history);
        for seed in 0..20 {
            let candidate = random_candidate(&eval, &mut StdRng::seed_from_u64(seed));
            assert!(candidate.teams.iter().all(|team| team.len() == 1), "seed {seed}: {:?}", candidate.teams);
        }
    }

    #[test]
    fn move_fills_an_empty_team() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut teams = vec![vec![0, 1], Vec::new()];
        move_member(&mut teams, 0, &mut rng);
        assert_eq!((teams[0].len(), teams[1].len()), (1, 1));

        let mut balanced = vec![vec![0, 1], vec![2]];
        move_member(&mut balanced, 0, &mut rng);
        assert_eq!((balanced[0].len(), balanced[1].len()), (2, 1));
    }

    #[test]
    fn identical_population_has_zero_diversity() {
        let c = Candidate { teams: vec![vec![0, 1]], fitness: 0.5 };
        assert_eq!(diversity(&[c.clone(), c]), 0.0);
    }
}
