//! In-process [`AssignmentStore`].
//!
//! Transactions lock their (date, route) keys up front, work against a
//! private view, and publish their changes in one step on success. A failed
//! transaction leaves nothing behind. Archived assignments stay in the store
//! with an audit entry; nothing is ever deleted.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;
use crate::model::{AssignmentDraft, AssignmentId, AssignmentStatus, RouteId, StaffId, TeamAssignment};
use crate::staff::Availability;
use crate::traits::{AssignmentStore, AssignmentWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    Inserted,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub action: AuditAction,
    pub assignment: AssignmentId,
    pub route_id: RouteId,
    pub date: NaiveDate,
}

#[derive(Debug, Default)]
struct StoreState {
    assignments: Vec<TeamAssignment>,
    availability: HashMap<StaffId, Availability>,
    audit: Vec<AuditEntry>,
}

type RouteKey = (NaiveDate, RouteId);

/// Route-level mutual exclusion. All keys of a transaction are taken at
/// once, so two transactions can never hold each other's keys.
#[derive(Debug, Default)]
struct RouteLocks {
    held: Mutex<HashSet<RouteKey>>,
    released: Condvar,
}

impl RouteLocks {
    fn acquire(&self, keys: Vec<RouteKey>) -> RouteGuard<'_> {
        let mut held = lock(&self.held);
        while keys.iter().any(|key| held.contains(key)) {
            held = self.released.wait(held).unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        held.extend(keys.iter().cloned());
        RouteGuard { locks: self, keys }
    }
}

struct RouteGuard<'a> {
    locks: &'a RouteLocks,
    keys: Vec<RouteKey>,
}

impl Drop for RouteGuard<'_> {
    fn drop(&mut self) {
        let mut held = lock(&self.locks.held);
        for key in &self.keys {
            held.remove(key);
        }
        self.locks.released.notify_all();
    }
}

enum Change {
    Archive(AssignmentId),
    Insert(TeamAssignment),
}

/// Writer handed to transaction work.
struct Transaction<'a> {
    date: NaiveDate,
    routes: &'a HashSet<RouteId>,
    view: Vec<TeamAssignment>,
    changes: Vec<Change>,
    next_id: &'a AtomicU64,
    now: DateTime<Utc>,
}

impl Transaction<'_> {
    fn check_route(&self, route_id: &RouteId) -> Result<(), StoreError> {
        if self.routes.contains(route_id) {
            Ok(())
        } else {
            Err(StoreError::Conflict(format!("route {route_id} is not locked by this transaction")))
        }
    }
}

impl AssignmentWriter for Transaction<'_> {
    fn active_for_route(&self, route_id: &RouteId) -> Vec<TeamAssignment> {
        self.view
            .iter()
            .filter(|a| a.is_active() && a.date == self.date && &a.route_id == route_id)
            .cloned()
            .collect()
    }

    fn archive(&mut self, id: AssignmentId) -> Result<(), StoreError> {
        let position = self
            .view
            .iter()
            .position(|a| a.id == id && a.is_active())
            .ok_or_else(|| StoreError::NotFound(format!("active assignment {id}")))?;
        self.check_route(&self.view[position].route_id)?;
        let assignment = &mut self.view[position];
        assignment.status = AssignmentStatus::Superseded;
        assignment.superseded_at = Some(self.now);
        self.changes.push(Change::Archive(id));
        Ok(())
    }

    fn insert(&mut self, draft: AssignmentDraft) -> Result<AssignmentId, StoreError> {
        if draft.date != self.date {
            return Err(StoreError::Conflict(format!(
                "draft for {} inside a transaction for {}",
                draft.date, self.date
            )));
        }
        self.check_route(&draft.route_id)?;
        validate_draft(&draft)?;
        check_conflicts(&self.view, &draft)?;

        let assignment = TeamAssignment {
            id: AssignmentId(self.next_id.fetch_add(1, Ordering::SeqCst)),
            route_id: draft.route_id,
            date: draft.date,
            members: draft.members,
            lead: draft.lead,
            predicted_performance: draft.predicted_performance,
            status: AssignmentStatus::Active,
            created_at: self.now,
            superseded_at: None,
        };
        let id = assignment.id;
        self.view.push(assignment.clone());
        self.changes.push(Change::Insert(assignment));
        Ok(id)
    }
}

fn validate_draft(draft: &AssignmentDraft) -> Result<(), StoreError> {
    if draft.members.is_empty() {
        return Err(StoreError::Conflict(format!("empty team for route {}", draft.route_id)));
    }
    if !draft.members.contains(&draft.lead) {
        return Err(StoreError::Conflict(format!(
            "lead {} is not a member of the team for route {}",
            draft.lead, draft.route_id
        )));
    }
    let unique: HashSet<&StaffId> = draft.members.iter().collect();
    if unique.len() != draft.members.len() {
        return Err(StoreError::Conflict(format!("repeated member on route {}", draft.route_id)));
    }
    Ok(())
}

/// One active assignment per route, one active assignment per member, per day.
fn check_conflicts(assignments: &[TeamAssignment], draft: &AssignmentDraft) -> Result<(), StoreError> {
    for existing in assignments.iter().filter(|a| a.is_active() && a.date == draft.date) {
        if existing.route_id == draft.route_id {
            return Err(StoreError::Conflict(format!(
                "route {} already has active assignment {}",
                draft.route_id, existing.id
            )));
        }
        if let Some(member) = draft.members.iter().find(|m| existing.contains(m)) {
            return Err(StoreError::Conflict(format!(
                "{member} is already active on route {} for {}",
                existing.route_id, draft.date
            )));
        }
    }
    Ok(())
}

pub struct InMemoryAssignmentStore {
    clock: Arc<dyn Clock>,
    state: Mutex<StoreState>,
    locks: RouteLocks,
    next_id: AtomicU64,
}

impl Default for InMemoryAssignmentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAssignmentStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(StoreState::default()),
            locks: RouteLocks::default(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Load existing rows as-is, without invariant checks.
    pub fn with_assignments(self, assignments: Vec<TeamAssignment>) -> Self {
        let max_id = assignments.iter().map(|a| a.id.0).max().unwrap_or(0);
        self.next_id.fetch_max(max_id + 1, Ordering::SeqCst);
        lock(&self.state).assignments.extend(assignments);
        self
    }

    /// Persist a day's drafts in one transaction.
    pub fn insert_all(&self, date: NaiveDate, drafts: &[AssignmentDraft]) -> Result<Vec<AssignmentId>, StoreError> {
        let routes: Vec<RouteId> = drafts.iter().map(|d| d.route_id.clone()).collect();
        let mut ids = Vec::with_capacity(drafts.len());
        self.transaction(date, &routes, &mut |writer| {
            ids.clear();
            for draft in drafts {
                ids.push(writer.insert(draft.clone())?);
            }
            Ok(())
        })?;
        Ok(ids)
    }

    /// Every row, archived ones included, ordered by id.
    pub fn all_assignments(&self) -> Vec<TeamAssignment> {
        let mut all = lock(&self.state).assignments.clone();
        all.sort_by_key(|a| a.id);
        all
    }

    /// All rows ever written for a route on a date, oldest first.
    pub fn route_history(&self, date: NaiveDate, route_id: &RouteId) -> Vec<TeamAssignment> {
        let mut rows: Vec<TeamAssignment> = lock(&self.state)
            .assignments
            .iter()
            .filter(|a| a.date == date && &a.route_id == route_id)
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.id);
        rows
    }

    pub fn audit_log(&self) -> Vec<AuditEntry> {
        lock(&self.state).audit.clone()
    }

    pub fn availability(&self, staff_id: &StaffId) -> Option<Availability> {
        lock(&self.state).availability.get(staff_id).copied()
    }
}

impl AssignmentStore for InMemoryAssignmentStore {
    fn active_assignments(&self, date: NaiveDate) -> Result<Vec<TeamAssignment>, StoreError> {
        let mut active: Vec<TeamAssignment> = lock(&self.state)
            .assignments
            .iter()
            .filter(|a| a.is_active() && a.date == date)
            .cloned()
            .collect();
        active.sort_by_key(|a| a.id);
        Ok(active)
    }

    fn record_availability(&self, staff_id: &StaffId, availability: Availability) -> Result<(), StoreError> {
        lock(&self.state).availability.insert(staff_id.clone(), availability);
        Ok(())
    }

    fn transaction(
        &self,
        date: NaiveDate,
        routes: &[RouteId],
        work: &mut dyn FnMut(&mut dyn AssignmentWriter) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let locked: HashSet<RouteId> = routes.iter().cloned().collect();
        let _guard = self.locks.acquire(locked.iter().map(|r| (date, r.clone())).collect());

        let view = lock(&self.state)
            .assignments
            .iter()
            .filter(|a| a.date == date)
            .cloned()
            .collect();
        let mut tx = Transaction {
            date,
            routes: &locked,
            view,
            changes: Vec::new(),
            next_id: &self.next_id,
            now: self.clock.now(),
        };
        work(&mut tx)?;

        // Other routes of the same date may have moved on; replay against live rows.
        let mut state = lock(&self.state);
        let mut next = state.assignments.clone();
        let mut audit = Vec::with_capacity(tx.changes.len());
        for change in tx.changes {
            match change {
                Change::Archive(id) => {
                    let row = next
                        .iter_mut()
                        .find(|a| a.id == id && a.is_active())
                        .ok_or_else(|| StoreError::Conflict(format!("assignment {id} changed concurrently")))?;
                    row.status = AssignmentStatus::Superseded;
                    row.superseded_at = Some(tx.now);
                    audit.push(entry(tx.now, AuditAction::Archived, row));
                }
                Change::Insert(assignment) => {
                    let draft = AssignmentDraft {
                        route_id: assignment.route_id.clone(),
                        date: assignment.date,
                        members: assignment.members.clone(),
                        lead: assignment.lead.clone(),
                        predicted_performance: assignment.predicted_performance,
                    };
                    check_conflicts(&next, &draft)?;
                    audit.push(entry(tx.now, AuditAction::Inserted, &assignment));
                    next.push(assignment);
                }
            }
        }
        state.assignments = next;
        debug!(%date, routes = routes.len(), changes = audit.len(), "assignment transaction committed");
        state.audit.extend(audit);
        Ok(())
    }
}

fn entry(at: DateTime<Utc>, action: AuditAction, assignment: &TeamAssignment) -> AuditEntry {
    AuditEntry {
        at,
        action,
        assignment: assignment.id,
        route_id: assignment.route_id.clone(),
        date: assignment.date,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 3).unwrap()
    }

    fn draft(route: &str, members: &[&str]) -> AssignmentDraft {
        AssignmentDraft {
            route_id: RouteId::new(route),
            date: date(),
            members: members.iter().map(|m| StaffId::new(*m)).collect(),
            lead: StaffId::new(members[0]),
            predicted_performance: 0.7,
        }
    }

    #[test]
    fn member_cannot_be_active_twice_a_day() {
        let store = InMemoryAssignmentStore::new();
        store.insert_all(date(), &[draft("r1", &["a", "b"])]).unwrap();
        let err = store.insert_all(date(), &[draft("r2", &["c", "a"])]).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.active_assignments(date()).unwrap().len(), 1);
    }

    #[test]
    fn failed_work_leaves_store_untouched() {
        let store = InMemoryAssignmentStore::new();
        let ids = store.insert_all(date(), &[draft("r1", &["a", "b"])]).unwrap();
        let result = store.transaction(date(), &[RouteId::new("r1")], &mut |writer| {
            writer.archive(ids[0])?;
            Err(StoreError::Backend("disk full".into()))
        });
        assert!(result.is_err());
        let active = store.active_assignments(date()).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, ids[0]);
    }

    #[test]
    fn archive_then_insert_keeps_audit_trail() {
        let store = InMemoryAssignmentStore::new();
        let ids = store.insert_all(date(), &[draft("r1", &["a", "b"])]).unwrap();
        store
            .transaction(date(), &[RouteId::new("r1")], &mut |writer| {
                writer.archive(ids[0])?;
                writer.insert(draft("r1", &["b", "c"]))?;
                Ok(())
            })
            .unwrap();

        let history = store.route_history(date(), &RouteId::new("r1"));
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, AssignmentStatus::Superseded);
        assert!(history[0].superseded_at.is_some());
        assert!(history[1].is_active());
        let actions: Vec<AuditAction> = store.audit_log().iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![AuditAction::Inserted, AuditAction::Archived, AuditAction::Inserted]);
    }

    #[test]
    fn writes_outside_locked_routes_are_rejected() {
        let store = InMemoryAssignmentStore::new();
        let result = store.transaction(date(), &[RouteId::new("r1")], &mut |writer| {
            writer.insert(draft("r2", &["a", "b"]))?;
            Ok(())
        });
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[test]
    fn lead_must_be_a_member() {
        let mut bad = draft("r1", &["a", "b"]);
        bad.lead = StaffId::new("z");
        assert!(validate_draft(&bad).is_err());
    }

    #[test]
    fn same_route_transactions_serialize() {
        let store = Arc::new(InMemoryAssignmentStore::new());
        let inside = Arc::new(AtomicU64::new(0));
        let overlap = Arc::new(AtomicU64::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                let inside = inside.clone();
                let overlap = overlap.clone();
                thread::spawn(move || {
                    store
                        .transaction(date(), &[RouteId::new("r1")], &mut |_writer| {
                            if inside.fetch_add(1, Ordering::SeqCst) > 0 {
                                overlap.fetch_add(1, Ordering::SeqCst);
                            }
                            thread::sleep(Duration::from_millis(5));
                            inside.fetch_sub(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(overlap.load(Ordering::SeqCst), 0);
    }
}
