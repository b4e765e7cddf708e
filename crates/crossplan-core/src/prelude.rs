//! Convenient re-exports for downstream crates.

pub use crate::cardinality::CardinalityEstimate;
pub use crate::config::{DefaultEstimator, OptimizerConfig};
pub use crate::cost::{CostRange, LoadProfile};
pub use crate::error::{Error, Result};
pub use crate::id::{ChannelId, LoopId, OperatorId, StageId, TaskId};
pub use crate::manifest::{ManifestId, RunManifest};
pub use crate::plan::{
    EstimatorSpec, InputRef, InputSlot, LoopRegion, Operator, OperatorKind, OperatorRole,
    OutputRef, OutputSlot, Plan, PlanBuilder,
};
pub use crate::platform::{ChannelDescriptor, ChannelKind, PlatformId};
