//! Policies deciding whether the coordinator may run a stage under the
//! current plan or must re-optimize first.

use crate::stage::{ExecutionPlan, ExecutionStage};

pub trait Breakpoint: Send + Sync {
    /// `false` asks the coordinator to re-optimize before running `stage`.
    fn permits_execution_of(&self, stage: &ExecutionStage, plan: &ExecutionPlan) -> bool;
}

/// Never interrupts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverBreak;

impl Breakpoint for NeverBreak {
    fn permits_execution_of(&self, _stage: &ExecutionStage, _plan: &ExecutionPlan) -> bool {
        true
    }
}

/// Stops before any loop stage that follows another loop stage, so every
/// iteration runs on a freshly optimized plan.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIterationBreakpoint;

impl Breakpoint for NoIterationBreakpoint {
    fn permits_execution_of(&self, stage: &ExecutionStage, plan: &ExecutionPlan) -> bool {
        if stage.loop_region.is_none() {
            return true;
        }
        !plan
            .predecessors(stage.id)
            .iter()
            .filter_map(|p| plan.stage(*p))
            .any(|p| p.loop_region.is_some())
    }
}

/// Stops when a stage consumes the result of a different loop, i.e. once a
/// loop has been left or a nested loop entered.
#[derive(Debug, Clone, Copy, Default)]
pub struct NestedLoopBreakpoint;

impl Breakpoint for NestedLoopBreakpoint {
    fn permits_execution_of(&self, stage: &ExecutionStage, plan: &ExecutionPlan) -> bool {
        !plan
            .predecessors(stage.id)
            .iter()
            .filter_map(|p| plan.stage(*p))
            .any(|p| p.loop_region.is_some() && p.loop_region != stage.loop_region)
    }
}

/// Permits a stage only if every member policy does.
#[derive(Default)]
pub struct ConjunctiveBreakpoint {
    members: Vec<Box<dyn Breakpoint>>,
}

impl ConjunctiveBreakpoint {
    pub fn new(members: Vec<Box<dyn Breakpoint>>) -> Self {
        Self { members }
    }

    pub fn with(mut self, member: impl Breakpoint + 'static) -> Self {
        self.members.push(Box::new(member));
        self
    }
}

impl Breakpoint for ConjunctiveBreakpoint {
    fn permits_execution_of(&self, stage: &ExecutionStage, plan: &ExecutionPlan) -> bool {
        self.members
            .iter()
            .all(|b| b.permits_execution_of(stage, plan))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crossplan_core::id::{ChannelId, LoopId, StageId};
    use crossplan_core::platform::ChannelDescriptor;
    use crossplan_core::plan::{InputRef, OutputRef};
    use crossplan_core::id::OperatorId;

    use crate::stage::{Channel, ChannelConsumer};

    fn stage(id: u64, loop_region: Option<u64>) -> ExecutionStage {
        ExecutionStage {
            id: StageId::new(id),
            platform: "p".into(),
            tasks: vec![],
            loop_region: loop_region.map(LoopId::new),
            loop_head: false,
        }
    }

    fn edge(id: u64, from: u64, to: u64, feedback: bool) -> Channel {
        Channel {
            id: ChannelId::new(id),
            output: OutputRef::new(OperatorId::new(from), 0),
            producer: StageId::new(from),
            consumers: vec![ChannelConsumer {
                input: InputRef::new(OperatorId::new(to), 0),
                stage: StageId::new(to),
                feedback,
            }],
            descriptor: ChannelDescriptor::new("c", true, true),
            conversions: vec![],
        }
    }

    /// 0 (outside) -> 1 (loop 0) -> 2 (loop 0) -> 3 (outside), 2 -> 1 feedback.
    fn looped() -> ExecutionPlan {
        ExecutionPlan {
            stages: vec![stage(0, None), stage(1, Some(0)), stage(2, Some(0)), stage(3, None)],
            channels: vec![
                edge(0, 0, 1, false),
                edge(1, 1, 2, false),
                edge(2, 2, 1, true),
                edge(3, 1, 3, false),
            ],
            loops: vec![],
            stage_of: BTreeMap::new(),
        }
    }

    fn permits(b: &dyn Breakpoint, plan: &ExecutionPlan, id: u64) -> bool {
        b.permits_execution_of(&plan.stages()[id as usize], plan)
    }

    #[test]
    fn nested_loop_breaks_on_loop_exit_only() {
        let plan = looped();
        let b = NestedLoopBreakpoint;
        assert!(permits(&b, &plan, 0));
        assert!(permits(&b, &plan, 1));
        assert!(permits(&b, &plan, 2));
        assert!(!permits(&b, &plan, 3));
    }

    #[test]
    fn no_iteration_breaks_inside_loops() {
        let plan = looped();
        let b = NoIterationBreakpoint;
        assert!(permits(&b, &plan, 1));
        assert!(!permits(&b, &plan, 2));
        assert!(permits(&b, &plan, 3));
    }

    #[test]
    fn conjunction_requires_all() {
        let plan = looped();
        let all = ConjunctiveBreakpoint::default()
            .with(NeverBreak)
            .with(NestedLoopBreakpoint);
        assert!(permits(&all, &plan, 2));
        assert!(!permits(&all, &plan, 3));
        assert!(permits(&ConjunctiveBreakpoint::default(), &plan, 3));
    }
}
