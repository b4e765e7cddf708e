#![forbid(unsafe_code)]
//! crossplan-exec: from a chosen plan implementation to executed stages.
//!
//! - `lower` fuses same-platform, non-materializing runs of operators into
//!   stages and turns every other edge into a channel.
//! - `IterationCoordinator` hands stages to per-platform executors one at a
//!   time, drives loop heads through their state machine, and re-optimizes
//!   with measured cardinalities whenever the breakpoint policy asks for it.
//!
//! Stages run sequentially; `ExecutionPlan::ready_stages` exposes the set of
//! independent stages for callers that schedule them in parallel.

pub mod breakpoint;
pub mod channel;
pub mod coordinator;
pub mod executor;
pub mod loops;
pub mod lower;
pub mod metrics;
pub mod replay;
pub mod stage;

pub use breakpoint::{
    Breakpoint, ConjunctiveBreakpoint, NestedLoopBreakpoint, NeverBreak, NoIterationBreakpoint,
};
pub use channel::{ChannelInstance, ExecutionState, Payload};
pub use coordinator::{IterationCoordinator, RunReport};
pub use executor::{Executor, ExecutorRegistry, LineageNode, StageContext, StageOutcome};
pub use loops::{LoopOutput, LoopState, RepeatLoop};
pub use lower::lower;
pub use stage::{Channel, ChannelConsumer, ExecutionPlan, ExecutionStage, ExecutionStageLoop, ExecutionTask};
