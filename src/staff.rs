//! Workforce records: skills, availability, history.
//!
//! Fatigue, overtime and intensity come from the workforce-management
//! collaborator already normalized to `[0, 1]`; they are opaque here.

use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

use crate::model::StaffId;

/// Skills a team is scored on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Skill {
    HeavyLifting,
    FragileHandling,
    CustomerService,
    Speed,
    Leadership,
    ProblemSolving,
}

impl Skill {
    pub const ALL: [Skill; 6] = [
        Skill::HeavyLifting,
        Skill::FragileHandling,
        Skill::CustomerService,
        Skill::Speed,
        Skill::Leadership,
        Skill::ProblemSolving,
    ];

    /// Relative importance used for skill-match scoring.
    pub fn weight(self) -> f64 {
        match self {
            Skill::HeavyLifting => 0.25,
            Skill::FragileHandling => 0.20,
            Skill::CustomerService => 0.20,
            Skill::Speed => 0.15,
            Skill::Leadership => 0.10,
            Skill::ProblemSolving => 0.10,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// One value in `[0, 1]` per [`Skill`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SkillVector([f64; 6]);

impl SkillVector {
    pub fn new(values: [f64; 6]) -> Self {
        Self(values)
    }

    pub fn uniform(value: f64) -> Self {
        Self([value; 6])
    }

    pub fn with(mut self, skill: Skill, value: f64) -> Self {
        self[skill] = value;
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (Skill, f64)> + '_ {
        Skill::ALL.iter().map(move |&skill| (skill, self[skill]))
    }

    pub fn is_valid(&self) -> bool {
        self.0.iter().all(|value| value.is_finite() && *value >= 0.0)
    }
}

impl Index<Skill> for SkillVector {
    type Output = f64;

    fn index(&self, skill: Skill) -> &f64 {
        &self.0[skill.index()]
    }
}

impl IndexMut<Skill> for SkillVector {
    fn index_mut(&mut self, skill: Skill) -> &mut f64 {
        &mut self.0[skill.index()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Availability {
    Available,
    Busy,
    Sick,
    Emergency,
}

impl Availability {
    pub fn is_available(self) -> bool {
        self == Availability::Available
    }

    /// Statuses that make a reoptimization run urgent.
    pub fn is_emergency_class(self) -> bool {
        self == Availability::Emergency
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Availability::Available => "available",
            Availability::Busy => "busy",
            Availability::Sick => "sick",
            Availability::Emergency => "emergency",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StaffRole {
    Leader,
    Specialist,
    Generalist,
}

/// Recent performance, each metric in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub efficiency: f64,
    pub customer_satisfaction: f64,
    pub punctuality: f64,
    pub quality: f64,
}

impl PerformanceRecord {
    pub fn blended(&self) -> f64 {
        0.3 * self.efficiency + 0.3 * self.customer_satisfaction + 0.2 * self.punctuality + 0.2 * self.quality
    }
}

/// Workload snapshot, each value normalized to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkloadSnapshot {
    pub fatigue: f64,
    pub overtime: f64,
    pub intensity: f64,
}

impl WorkloadSnapshot {
    /// Combined load; higher means more tired.
    pub fn load(&self) -> f64 {
        (0.5 * self.fatigue + 0.3 * self.overtime + 0.2 * self.intensity).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaffMember {
    pub id: StaffId,
    pub name: String,
    pub skills: SkillVector,
    #[serde(default)]
    pub certifications: Vec<Skill>,
    pub availability: Availability,
    pub experience_years: f64,
    /// Peer-rated collaboration in `[0, 1]`.
    pub collaboration_rating: f64,
    pub role: StaffRole,
    #[serde(default)]
    pub performance: Option<PerformanceRecord>,
    #[serde(default)]
    pub workload: WorkloadSnapshot,
}

impl StaffMember {
    pub fn is_certified(&self, skill: Skill) -> bool {
        self.certifications.contains(&skill)
    }

    /// Composite used to nominate the team lead.
    pub fn lead_score(&self) -> f64 {
        let experience = (self.experience_years / 10.0).clamp(0.0, 1.0);
        0.5 * self.skills[Skill::Leadership] + 0.3 * experience + 0.2 * self.skills[Skill::CustomerService]
    }
}

/// One past team and how well it did, outcome in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PastTeam {
    pub members: Vec<StaffId>,
    pub outcome: f64,
}

/// Historical co-assignment outcomes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TeamHistory {
    pub teams: Vec<PastTeam>,
}

impl TeamHistory {
    pub fn new(teams: Vec<PastTeam>) -> Self {
        Self { teams }
    }

    pub fn is_empty(&self) -> bool {
        self.teams.is_empty()
    }
}
