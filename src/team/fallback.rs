//! Round-robin assignment used when the search cannot run.

use crate::model::StaffId;
use crate::staff::StaffMember;
use crate::team::demand::RouteProfile;

/// Score reported for round-robin teams.
pub const FALLBACK_SCORE: f64 = 0.6;

/// Slice the roster in order into teams of 2 or 3, lead first by lead
/// score. Routes left once the roster runs out get no team.
pub(crate) fn round_robin(routes: &[RouteProfile], staff: &[StaffMember]) -> Vec<Vec<StaffId>> {
    let mut cursor = 0;
    routes
        .iter()
        .map(|profile| {
            let size = profile.team_size.clamp(2, 3);
            let end = (cursor + size).min(staff.len());
            let mut slice: Vec<&StaffMember> = staff[cursor..end].iter().collect();
            cursor = end;
            if let Some(pos) = slice
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.lead_score().total_cmp(&b.1.lead_score()).then(b.0.cmp(&a.0)))
                .map(|(pos, _)| pos)
            {
                slice[..=pos].rotate_right(1);
            }
            slice.into_iter().map(|m| m.id.clone()).collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RouteId;
    use crate::staff::{Availability, SkillVector, StaffRole, WorkloadSnapshot};

    fn member(i: usize) -> StaffMember {
        StaffMember {
            id: StaffId::new(format!("s{i}")),
            name: format!("s{i}"),
            skills: SkillVector::uniform(0.5),
            certifications: Vec::new(),
            availability: Availability::Available,
            experience_years: i as f64,
            collaboration_rating: 0.5,
            role: StaffRole::Generalist,
            performance: None,
            workload: WorkloadSnapshot::default(),
        }
    }

    fn profile(i: usize, team_size: usize) -> RouteProfile {
        RouteProfile {
            route_id: RouteId::new(format!("r{i}")),
            required: SkillVector::uniform(0.5),
            team_size,
            complexity: 0.5,
            total_volume: 10.0,
            job_count: 2,
        }
    }

    #[test]
    fn slices_sequentially_and_caps_at_three() {
        let staff: Vec<StaffMember> = (0..5).map(member).collect();
        let teams = round_robin(&[profile(0, 4), profile(1, 2)], &staff);
        assert_eq!(teams[0], vec![StaffId::new("s2"), StaffId::new("s0"), StaffId::new("s1")]);
        assert_eq!(teams[1], vec![StaffId::new("s4"), StaffId::new("s3")]);
    }

    #[test]
    fn exhausted_roster_leaves_routes_empty() {
        let staff: Vec<StaffMember> = (0..2).map(member).collect();
        let teams = round_robin(&[profile(0, 2), profile(1, 2)], &staff);
        assert_eq!(teams[0].len(), 2);
        assert!(teams[1].is_empty());
    }
}
