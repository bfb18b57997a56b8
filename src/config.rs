//! Planner configuration.
//!
//! Every section has working defaults; a JSON document only needs the keys
//! it wants to override.

use serde::{Deserialize, Serialize};

use crate::coordinator::CoordinatorOptions;
use crate::distance::DistanceConfig;
use crate::error::PlannerError;
use crate::osrm::OsrmConfig;
use crate::refine::RefineOptions;
use crate::savings::ConstructionOptions;
use crate::team::GeneticOptions;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub osrm: OsrmConfig,
    pub distance: DistanceConfig,
    pub construction: ConstructionOptions,
    pub refine: RefineOptions,
    pub genetic: GeneticOptions,
    pub coordinator: CoordinatorOptions,
}

impl PlannerConfig {
    pub fn from_json(json: &str) -> Result<Self, PlannerError> {
        serde_json::from_str(json).map_err(|err| PlannerError::Config(err.to_string()))
    }
}
