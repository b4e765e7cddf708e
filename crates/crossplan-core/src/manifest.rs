//! Run manifest for audit/replay of one optimized job.
//!
//! The coordinator emits a manifest after the job completes: which logical
//! plan ran, which stage graph it was finally lowered to, and how many
//! re-optimization passes happened in between.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hash::Hash256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestId(pub Uuid);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub id: ManifestId,

    /// Stable hash of the logical plan.
    pub plan_hash: Hash256,

    /// Stable hash of the last stage graph that was executed.
    pub stages_hash: Hash256,

    /// Engine version string for provenance.
    pub engine_version: String,

    /// Number of optimize-and-lower passes after the first one.
    pub reoptimizations: usize,

    /// Stage executions, counting every loop iteration.
    pub stages_executed: usize,

    /// Milliseconds since Unix epoch (UTC).
    pub started_ms: u64,
    pub finished_ms: u64,
}

impl RunManifest {
    pub fn new(plan_hash: Hash256, started_ms: u64) -> Self {
        Self {
            id: ManifestId(Uuid::new_v4()),
            plan_hash,
            stages_hash: plan_hash,
            engine_version: crate::VERSION.to_string(),
            reoptimizations: 0,
            stages_executed: 0,
            started_ms,
            finished_ms: started_ms,
        }
    }

    pub fn finish(mut self, finished_ms: u64, stages_hash: Hash256) -> Self {
        self.finished_ms = finished_ms;
        self.stages_hash = stages_hash;
        self
    }
}
