//! Reoptimization after staff availability changes.
//!
//! Each call to [`Coordinator::handle_availability_change`] runs its own
//! state machine, so calls for different dates never share state. Calls for
//! the same date serialize on route id inside the store transaction, and the
//! transaction re-reads the routes it is about to replace so a stale plan is
//! rejected rather than written.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Instant;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{PlannerError, StoreError};
use crate::model::{
    AssignmentDraft, AssignmentId, Notification, NotificationPriority, NotificationReason, RouteId, StaffId,
    TeamAssignment,
};
use crate::staff::{Availability, SkillVector, StaffMember};
use crate::team::{GeneticOptions, OptimizationStatus, RouteProfile, TeamOptimizer, MAX_TEAM_SIZE, MIN_TEAM_SIZE};
use crate::traits::{AssignmentStore, Notifier, PlanSource};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorOptions {
    /// Minimum fitness change to replace teams on a normal run.
    pub normal_threshold: f64,
    /// Minimum fitness change on an urgent run.
    pub urgent_threshold: f64,
    pub reoptimization: GeneticOptions,
    pub urgent: GeneticOptions,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            normal_threshold: 0.10,
            urgent_threshold: 0.05,
            reoptimization: GeneticOptions::reoptimization(),
            urgent: GeneticOptions::urgent(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinatorState {
    Idle,
    EvaluatingChange,
    Reoptimizing,
    NoActionNeeded,
    Applying,
}

impl CoordinatorState {
    pub fn as_str(self) -> &'static str {
        match self {
            CoordinatorState::Idle => "idle",
            CoordinatorState::EvaluatingChange => "evaluating_change",
            CoordinatorState::Reoptimizing => "reoptimizing",
            CoordinatorState::NoActionNeeded => "no_action_needed",
            CoordinatorState::Applying => "applying",
        }
    }

    pub fn can_transition(self, to: CoordinatorState) -> bool {
        use CoordinatorState::*;
        matches!(
            (self, to),
            (Idle, EvaluatingChange)
                | (EvaluatingChange, Reoptimizing)
                | (EvaluatingChange, NoActionNeeded)
                | (Reoptimizing, NoActionNeeded)
                | (Reoptimizing, Applying)
                | (NoActionNeeded, Idle)
                | (Applying, Idle)
        )
    }
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// States visited by one run, starting at `Idle`.
#[derive(Debug, Clone, PartialEq)]
struct StateMachine {
    state: CoordinatorState,
    trace: Vec<CoordinatorState>,
}

impl StateMachine {
    fn new() -> Self {
        Self {
            state: CoordinatorState::Idle,
            trace: vec![CoordinatorState::Idle],
        }
    }

    fn advance(&mut self, to: CoordinatorState) -> Result<(), PlannerError> {
        if !self.state.can_transition(to) {
            return Err(PlannerError::InvalidTransition {
                from: self.state.as_str(),
                to: to.as_str(),
            });
        }
        debug!(from = %self.state, %to, "coordinator transition");
        self.state = to;
        self.trace.push(to);
        Ok(())
    }

    /// Close out a run that decided to do nothing.
    fn settle(&mut self) -> Result<(), PlannerError> {
        self.advance(CoordinatorState::NoActionNeeded)?;
        self.advance(CoordinatorState::Idle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    /// The member was not on any active team that day.
    NoAffectedRoutes,
    /// New teams were found but did not beat the threshold.
    BelowThreshold,
    Applied,
    /// Opportunities were found and left for a manual decision.
    SuggestionsOnly,
}

/// A route that would gain from adding a newly available member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub route_id: RouteId,
    pub assignment_id: AssignmentId,
    pub skill_gain: f64,
    pub workload_gain: f64,
    pub combined: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReoptimizationAnalytics {
    pub date: NaiveDate,
    pub staff_id: StaffId,
    pub availability: Availability,
    pub urgent: bool,
    pub affected_routes: usize,
    pub members_notified: usize,
    pub efficiency_change: f64,
    pub applied: bool,
    pub optimizer_fallback: bool,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReoptimizationOutcome {
    pub decision: Decision,
    pub urgent: bool,
    pub affected_routes: Vec<RouteId>,
    /// `predicted(new) - estimated(old)`.
    pub efficiency_change: f64,
    pub new_assignments: Vec<AssignmentId>,
    /// Routes whose team was archived with nobody left to replace it.
    pub unstaffed_routes: Vec<RouteId>,
    pub notifications: Vec<Notification>,
    pub opportunities: Vec<Opportunity>,
    pub analytics: Option<ReoptimizationAnalytics>,
    pub trace: Vec<CoordinatorState>,
}

impl ReoptimizationOutcome {
    fn idle(decision: Decision, urgent: bool, machine: StateMachine) -> Self {
        Self {
            decision,
            urgent,
            affected_routes: Vec::new(),
            efficiency_change: 0.0,
            new_assignments: Vec::new(),
            unstaffed_routes: Vec::new(),
            notifications: Vec::new(),
            opportunities: Vec::new(),
            analytics: None,
            trace: machine.trace,
        }
    }
}

pub struct Coordinator<S, P, N> {
    store: S,
    source: P,
    notifier: N,
    options: CoordinatorOptions,
}

impl<S, P, N> Coordinator<S, P, N>
where
    S: AssignmentStore,
    P: PlanSource,
    N: Notifier,
{
    pub fn new(store: S, source: P, notifier: N, options: CoordinatorOptions) -> Self {
        Self {
            store,
            source,
            notifier,
            options,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn options(&self) -> &CoordinatorOptions {
        &self.options
    }

    pub fn handle_availability_change(
        &self,
        staff_id: &StaffId,
        availability: Availability,
        date: NaiveDate,
    ) -> Result<ReoptimizationOutcome, PlannerError> {
        info!(staff = %staff_id, availability = availability.as_str(), %date, "availability change received");
        if availability.is_available() {
            self.handle_available(staff_id, date)
        } else {
            self.handle_unavailable(staff_id, availability, date, availability.is_emergency_class())
        }
    }

    fn handle_unavailable(
        &self,
        staff_id: &StaffId,
        availability: Availability,
        date: NaiveDate,
        urgent: bool,
    ) -> Result<ReoptimizationOutcome, PlannerError> {
        let started = Instant::now();
        let mut machine = StateMachine::new();
        machine.advance(CoordinatorState::EvaluatingChange)?;

        let active = self.store.active_assignments(date)?;
        let affected: Vec<TeamAssignment> = active.iter().filter(|a| a.contains(staff_id)).cloned().collect();
        if affected.is_empty() {
            debug!(staff = %staff_id, %date, "member holds no active assignment");
            machine.settle()?;
            return Ok(ReoptimizationOutcome::idle(Decision::NoAffectedRoutes, urgent, machine));
        }
        self.store.record_availability(staff_id, availability)?;

        let route_ids: Vec<RouteId> = affected.iter().map(|a| a.route_id.clone()).collect();
        let profiles = self.profiles_for(date, &affected)?;
        let mut roster = self.source.roster(date)?;
        for member in roster.iter_mut().filter(|m| &m.id == staff_id) {
            member.availability = availability;
        }
        // Members busy on routes outside this run stay where they are.
        let elsewhere: HashSet<&StaffId> = active
            .iter()
            .filter(|a| !route_ids.contains(&a.route_id))
            .flat_map(|a| a.members.iter())
            .collect();
        let pool: Vec<StaffMember> = roster
            .iter()
            .filter(|m| m.availability.is_available() && !elsewhere.contains(&m.id))
            .cloned()
            .collect();
        let history = self.source.team_history()?;

        machine.advance(CoordinatorState::Reoptimizing)?;
        let genetic = if urgent { &self.options.urgent } else { &self.options.reoptimization };
        let optimizer = TeamOptimizer::new(genetic.clone());
        let plan = optimizer.optimize(&profiles, &pool, &history);

        let old_teams: Vec<Vec<StaffId>> = affected.iter().map(|a| a.members.clone()).collect();
        let new_teams: Vec<Vec<StaffId>> = plan.teams.iter().map(|t| t.members.clone()).collect();
        let estimated_old = optimizer.score_teams(&profiles, &old_teams, &pool, &history);
        let predicted_new = optimizer.score_teams(&profiles, &new_teams, &pool, &history);
        let efficiency_change = predicted_new - estimated_old;
        let threshold = if urgent {
            self.options.urgent_threshold
        } else {
            self.options.normal_threshold
        };

        let mut outcome = ReoptimizationOutcome {
            decision: Decision::BelowThreshold,
            urgent,
            affected_routes: route_ids.clone(),
            efficiency_change,
            new_assignments: Vec::new(),
            unstaffed_routes: Vec::new(),
            notifications: Vec::new(),
            opportunities: Vec::new(),
            analytics: None,
            trace: Vec::new(),
        };

        // Compared by magnitude, so a large drop also replaces the teams.
        if efficiency_change.abs() <= threshold {
            info!(staff = %staff_id, %date, efficiency_change, threshold, "reoptimization below threshold, keeping current teams");
            machine.settle()?;
            outcome.trace = machine.trace;
            return Ok(outcome);
        }

        machine.advance(CoordinatorState::Applying)?;
        let claimed: HashSet<&StaffId> = plan.teams.iter().flat_map(|t| t.members.iter()).collect();
        let mut replacements = Vec::new();
        let mut unstaffed = Vec::new();
        for ((old, team), profile) in affected.iter().zip(&plan.teams).zip(&profiles) {
            let draft = match &team.lead {
                Some(lead) => Some(AssignmentDraft {
                    route_id: old.route_id.clone(),
                    date,
                    members: team.members.clone(),
                    lead: lead.clone(),
                    predicted_performance: team.predicted_performance,
                }),
                // The search left this route empty: keep whoever of the old
                // team is still free, or stand the route down.
                None => {
                    let members: Vec<StaffId> = old
                        .members
                        .iter()
                        .filter(|m| !claimed.contains(m) && pool.iter().any(|p| &p.id == *m))
                        .cloned()
                        .collect();
                    match members.first() {
                        Some(first) => {
                            let lead = if members.contains(&old.lead) { old.lead.clone() } else { first.clone() };
                            let predicted_performance = optimizer.score_teams(
                                std::slice::from_ref(profile),
                                std::slice::from_ref(&members),
                                &pool,
                                &history,
                            );
                            Some(AssignmentDraft {
                                route_id: old.route_id.clone(),
                                date,
                                members,
                                lead,
                                predicted_performance,
                            })
                        }
                        None => {
                            warn!(route = %old.route_id, %date, "no staff left for route, archiving its team");
                            unstaffed.push(old.route_id.clone());
                            None
                        }
                    }
                }
            };
            replacements.push((old.clone(), draft));
        }
        let applied_routes: Vec<RouteId> = replacements.iter().map(|(old, _)| old.route_id.clone()).collect();

        let new_ids = match self.apply(date, &applied_routes, &replacements) {
            Ok(ids) => ids,
            Err(source) => {
                warn!(staff = %staff_id, %date, error = %source, "reoptimization rolled back, current teams remain");
                machine.advance(CoordinatorState::Idle)?;
                return Err(PlannerError::PersistenceConflict {
                    routes: applied_routes,
                    source,
                });
            }
        };

        let priority = if urgent {
            NotificationPriority::High
        } else {
            NotificationPriority::Normal
        };
        let notifications = notify_all(&replacements, priority);
        self.notifier.notify(&notifications);

        let analytics = ReoptimizationAnalytics {
            date,
            staff_id: staff_id.clone(),
            availability,
            urgent,
            affected_routes: applied_routes.len(),
            members_notified: notifications.len(),
            efficiency_change,
            applied: true,
            optimizer_fallback: plan.status == OptimizationStatus::Fallback,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        self.notifier.record(&analytics);
        machine.advance(CoordinatorState::Idle)?;

        info!(
            staff = %staff_id,
            %date,
            routes = applied_routes.len(),
            efficiency_change,
            urgent,
            "reoptimization applied"
        );
        outcome.decision = Decision::Applied;
        outcome.affected_routes = applied_routes;
        outcome.new_assignments = new_ids;
        outcome.unstaffed_routes = unstaffed;
        outcome.notifications = notifications;
        outcome.analytics = Some(analytics);
        outcome.trace = machine.trace;
        Ok(outcome)
    }

    fn handle_available(&self, staff_id: &StaffId, date: NaiveDate) -> Result<ReoptimizationOutcome, PlannerError> {
        let started = Instant::now();
        let mut machine = StateMachine::new();
        machine.advance(CoordinatorState::EvaluatingChange)?;
        self.store.record_availability(staff_id, Availability::Available)?;

        let active = self.store.active_assignments(date)?;
        if active.iter().any(|a| a.contains(staff_id)) {
            machine.settle()?;
            return Ok(ReoptimizationOutcome::idle(Decision::NoAffectedRoutes, false, machine));
        }
        let mut roster = self.source.roster(date)?;
        let Some(member) = roster.iter_mut().find(|m| &m.id == staff_id) else {
            warn!(staff = %staff_id, %date, "available member missing from roster");
            machine.settle()?;
            return Ok(ReoptimizationOutcome::idle(Decision::NoAffectedRoutes, false, machine));
        };
        member.availability = Availability::Available;

        let open: Vec<TeamAssignment> = active.into_iter().filter(|a| a.members.len() < MAX_TEAM_SIZE).collect();
        let profiles = self.profiles_for(date, &open)?;
        let history = self.source.team_history()?;
        let optimizer = TeamOptimizer::new(self.options.reoptimization.clone());

        let current: Vec<Vec<StaffId>> = open.iter().map(|a| a.members.clone()).collect();
        let extended: Vec<Vec<StaffId>> = current
            .iter()
            .map(|team| team.iter().cloned().chain(std::iter::once(staff_id.clone())).collect())
            .collect();
        let before = optimizer.route_scores(&profiles, &current, &roster, &history);
        let after = optimizer.route_scores(&profiles, &extended, &roster, &history);

        let mut opportunities: Vec<Opportunity> = open
            .iter()
            .zip(before.iter().zip(&after))
            .map(|(assignment, (b, a))| {
                let skill_gain = a.skill_match - b.skill_match;
                let workload_gain = a.workload - b.workload;
                Opportunity {
                    route_id: assignment.route_id.clone(),
                    assignment_id: assignment.id,
                    skill_gain,
                    workload_gain,
                    combined: skill_gain + workload_gain,
                }
            })
            .filter(|o| o.combined > 0.0)
            .collect();
        opportunities.sort_by(|a, b| b.combined.total_cmp(&a.combined).then_with(|| a.route_id.cmp(&b.route_id)));

        let best = opportunities.first().cloned();
        let Some(best) = best.filter(|o| o.combined > self.options.normal_threshold) else {
            debug!(staff = %staff_id, %date, suggestions = opportunities.len(), "no opportunity above threshold");
            machine.settle()?;
            let mut outcome = ReoptimizationOutcome::idle(Decision::SuggestionsOnly, false, machine);
            outcome.opportunities = opportunities;
            return Ok(outcome);
        };

        machine.advance(CoordinatorState::Reoptimizing)?;
        machine.advance(CoordinatorState::Applying)?;
        let Some(old) = open.iter().find(|a| a.id == best.assignment_id).cloned() else {
            machine.advance(CoordinatorState::Idle)?;
            return Err(PlannerError::OptimizationFailure(format!("assignment {} vanished", best.assignment_id)));
        };
        let mut members = old.members.clone();
        members.push(staff_id.clone());
        let draft = AssignmentDraft {
            route_id: old.route_id.clone(),
            date,
            members,
            lead: old.lead.clone(),
            predicted_performance: old.predicted_performance + best.combined,
        };
        let routes = vec![old.route_id.clone()];
        let replacements = vec![(old, Some(draft))];
        let new_ids = match self.apply(date, &routes, &replacements) {
            Ok(ids) => ids,
            Err(source) => {
                warn!(staff = %staff_id, %date, error = %source, "auto-apply rolled back");
                machine.advance(CoordinatorState::Idle)?;
                return Err(PlannerError::PersistenceConflict { routes, source });
            }
        };

        let notifications = notify_all(&replacements, NotificationPriority::Normal);
        self.notifier.notify(&notifications);
        let analytics = ReoptimizationAnalytics {
            date,
            staff_id: staff_id.clone(),
            availability: Availability::Available,
            urgent: false,
            affected_routes: 1,
            members_notified: notifications.len(),
            efficiency_change: best.combined,
            applied: true,
            optimizer_fallback: false,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        self.notifier.record(&analytics);
        machine.advance(CoordinatorState::Idle)?;
        info!(staff = %staff_id, route = %routes[0], gain = best.combined, "available member added to route");

        Ok(ReoptimizationOutcome {
            decision: Decision::Applied,
            urgent: false,
            affected_routes: routes,
            efficiency_change: best.combined,
            new_assignments: new_ids,
            unstaffed_routes: Vec::new(),
            notifications,
            opportunities,
            analytics: Some(analytics),
            trace: machine.trace,
        })
    }

    /// Archive each old assignment and insert its replacement, if any, atomically.
    fn apply(
        &self,
        date: NaiveDate,
        routes: &[RouteId],
        replacements: &[(TeamAssignment, Option<AssignmentDraft>)],
    ) -> Result<Vec<AssignmentId>, StoreError> {
        let mut ids = Vec::with_capacity(replacements.len());
        self.store.transaction(date, routes, &mut |writer| {
            ids.clear();
            for (old, _) in replacements {
                let current = writer.active_for_route(&old.route_id);
                if current.len() != 1 || current[0].id != old.id {
                    return Err(StoreError::Conflict(format!(
                        "route {} changed since it was evaluated",
                        old.route_id
                    )));
                }
                writer.archive(old.id)?;
            }
            for draft in replacements.iter().filter_map(|(_, draft)| draft.as_ref()) {
                ids.push(writer.insert(draft.clone())?);
            }
            Ok(())
        })?;
        Ok(ids)
    }

    /// Profiles for the given assignments' routes, in the same order.
    fn profiles_for(&self, date: NaiveDate, assignments: &[TeamAssignment]) -> Result<Vec<RouteProfile>, PlannerError> {
        let mut known: HashMap<RouteId, RouteProfile> = self
            .source
            .routes(date)?
            .into_iter()
            .map(|p| (p.route_id.clone(), p))
            .collect();
        Ok(assignments
            .iter()
            .map(|a| {
                known.remove(&a.route_id).unwrap_or_else(|| {
                    warn!(route = %a.route_id, %date, "no demand profile for route, using a generic one");
                    RouteProfile {
                        route_id: a.route_id.clone(),
                        required: SkillVector::uniform(0.5),
                        team_size: a.members.len().clamp(MIN_TEAM_SIZE, MAX_TEAM_SIZE),
                        complexity: 0.5,
                        total_volume: 0.0,
                        job_count: 0,
                    }
                })
            })
            .collect())
    }
}

fn notify_all(
    replacements: &[(TeamAssignment, Option<AssignmentDraft>)],
    priority: NotificationPriority,
) -> Vec<Notification> {
    replacements
        .iter()
        .flat_map(|(old, draft)| match draft {
            Some(draft) => notifications_for(old, draft, priority),
            None => stand_down(old, priority),
        })
        .collect()
}

/// The whole old team is taken off a route that has nobody left.
fn stand_down(old: &TeamAssignment, priority: NotificationPriority) -> Vec<Notification> {
    let summary = format!("Route {} on {}: no team available, route unstaffed", old.route_id, old.date);
    old.members
        .iter()
        .map(|member| Notification {
            recipient: member.clone(),
            priority,
            reason: NotificationReason::RemovedFromRoute,
            date: old.date,
            route_id: old.route_id.clone(),
            summary: summary.clone(),
        })
        .collect()
}

/// Everyone on the old or new team hears about the change.
fn notifications_for(
    old: &TeamAssignment,
    draft: &AssignmentDraft,
    priority: NotificationPriority,
) -> Vec<Notification> {
    let summary = format!(
        "Route {} on {}: team is now {} (lead {})",
        draft.route_id,
        draft.date,
        draft.members.iter().map(StaffId::as_str).collect::<Vec<_>>().join(", "),
        draft.lead
    );
    let mut recipients: Vec<(&StaffId, NotificationReason)> = Vec::new();
    for member in &old.members {
        let reason = if draft.members.contains(member) {
            NotificationReason::TeamChanged
        } else {
            NotificationReason::RemovedFromRoute
        };
        recipients.push((member, reason));
    }
    for member in draft.members.iter().filter(|m| !old.members.contains(m)) {
        recipients.push((member, NotificationReason::AddedToRoute));
    }
    recipients
        .into_iter()
        .map(|(recipient, reason)| Notification {
            recipient: recipient.clone(),
            priority,
            reason,
            date: draft.date,
            route_id: draft.route_id.clone(),
            summary: summary.clone(),
        })
        .collect()
}
