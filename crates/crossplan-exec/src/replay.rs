//! Provenance hashes for run manifests.
//!
//! Identical plans lowered the same way hash identically, so two manifests
//! can be compared to tell whether a re-run took the same decisions.

use crossplan_core::error::Result;
use crossplan_core::hash::{digest, Hash256, HashDomain};
use crossplan_planner::PlanImplementation;

use crate::stage::ExecutionPlan;

/// Digest of the stage graph together with the chosen implementation.
pub fn hash_execution(plan: &ExecutionPlan, implementation: &PlanImplementation) -> Result<Hash256> {
    let stages = digest(HashDomain::StageGraph, plan)?;
    let cost = digest(HashDomain::Implementation, &implementation.cost())?;
    Ok(stages.combine(cost))
}
