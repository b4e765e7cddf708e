//! Lowering of a plan implementation into an execution plan.
//!
//! Operators are visited in topological order. An operator joins the stage
//! of a producer when both sit on the same platform and in the same loop, the
//! producer does not materialize, the edge needs no conversion, and both are
//! equally completed. Loop heads always get a stage of their own. A fusion
//! that would close a cycle in the stage graph is refused.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crossplan_core::error::{Error, Result};
use crossplan_core::id::{ChannelId, OperatorId, StageId, TaskId};
use crossplan_core::plan::{InputRef, OutputRef, Plan};
use crossplan_core::platform::ChannelDescriptor;
use crossplan_planner::{ConversionGraph, PlanImplementation, RealizedOperator};

use crate::stage::{
    Channel, ChannelConsumer, ExecutionPlan, ExecutionStage, ExecutionStageLoop, ExecutionTask,
};

struct Lowering<'a> {
    plan: &'a Plan,
    implementation: &'a PlanImplementation,
    completed: &'a BTreeSet<OperatorId>,
    stages: Vec<ExecutionStage>,
    /// Forward stage edges, for cycle checks.
    edges: Vec<BTreeSet<usize>>,
    stage_of: BTreeMap<OperatorId, usize>,
}

impl<'a> Lowering<'a> {
    fn realized(&self, op: OperatorId) -> Result<&'a RealizedOperator> {
        self.implementation.realized(op).ok_or_else(|| {
            Error::Invariant(format!("{} has no realization", self.plan.op(op)))
        })
    }

    fn direct_edge(&self, output: OutputRef, input: InputRef) -> bool {
        self.implementation.junction(output).is_some_and(|j| {
            j.trunk.is_direct()
                && j.branches
                    .iter()
                    .any(|(i, path)| *i == input && path.is_direct())
        })
    }

    fn reaches(&self, from: usize, to: usize) -> bool {
        let mut stack = vec![from];
        let mut seen = BTreeSet::new();
        while let Some(s) = stack.pop() {
            if s == to {
                return true;
            }
            if seen.insert(s) {
                stack.extend(self.edges[s].iter().copied());
            }
        }
        false
    }

    fn fusion_target(&self, op: OperatorId, realized: &RealizedOperator) -> Result<Option<usize>> {
        let operator = self.plan.op(op);
        if operator.is_loop_head() {
            return Ok(None);
        }
        let done = self.completed.contains(&op);

        let mut candidate = None;
        let mut producer_stages = BTreeSet::new();
        for (i, slot) in operator.inputs.iter().enumerate() {
            if slot.feedback {
                continue;
            }
            let input = InputRef::new(op, i);
            let Some(output) = self.plan.producer(input) else {
                continue;
            };
            let p = output.operator;
            let ps = self.stage_of[&p];
            producer_stages.insert(ps);

            let producer = self.realized(p)?;
            let fusable = !self.plan.op(p).is_loop_head()
                && producer.platform == realized.platform
                && !producer.materializes
                && self.completed.contains(&p) == done
                && self.plan.op(p).loop_region == operator.loop_region
                && self.direct_edge(output, input);
            if !fusable {
                continue;
            }
            match candidate {
                None => candidate = Some(ps),
                Some(c) if c == ps => {}
                Some(_) => return Ok(None),
            }
        }

        let Some(target) = candidate else {
            return Ok(None);
        };
        let closes_cycle = producer_stages
            .iter()
            .any(|&ps| ps != target && self.reaches(target, ps));
        Ok((!closes_cycle).then_some(target))
    }

    fn run(mut self) -> Result<ExecutionPlan> {
        let mut next_task = 0u64;
        for &op in self.plan.topological_order() {
            let realized = self.realized(op)?;
            let operator = self.plan.op(op);
            let idx = match self.fusion_target(op, realized)? {
                Some(idx) => idx,
                None => {
                    let idx = self.stages.len();
                    self.stages.push(ExecutionStage {
                        id: StageId::from_index(idx),
                        platform: realized.platform.clone(),
                        tasks: vec![],
                        loop_region: operator.loop_region,
                        loop_head: operator.is_loop_head(),
                    });
                    self.edges.push(BTreeSet::new());
                    idx
                }
            };
            self.stages[idx].tasks.push(ExecutionTask {
                id: TaskId::new(next_task),
                operator: op,
                realized: realized.clone(),
            });
            next_task += 1;
            self.stage_of.insert(op, idx);

            for p in self.plan.predecessors(op, false) {
                let ps = self.stage_of[&p];
                if ps != idx {
                    self.edges[ps].insert(idx);
                }
            }
        }
        Ok(self.finish())
    }

    fn finish(self) -> ExecutionPlan {
        ExecutionPlan {
            stages: self.stages,
            channels: vec![],
            loops: vec![],
            stage_of: self
                .stage_of
                .into_iter()
                .map(|(op, s)| (op, StageId::from_index(s)))
                .collect(),
        }
    }
}

/// Lower `implementation` into stages and channels. Operators in `completed`
/// already ran; they are kept in stages of their own so that nothing pending
/// is fused with them. `conversions` supplies channel descriptors.
pub fn lower(
    plan: &Plan,
    implementation: &PlanImplementation,
    completed: &BTreeSet<OperatorId>,
    conversions: &ConversionGraph,
) -> Result<ExecutionPlan> {
    let mut exec = Lowering {
        plan,
        implementation,
        completed,
        stages: vec![],
        edges: vec![],
        stage_of: BTreeMap::new(),
    }
    .run()?;

    for output in plan.outputs() {
        let Some(producer) = exec.stage_of(output.operator) else {
            continue;
        };
        let mut consumers = vec![];
        for &input in plan.consumers(output) {
            let stage = exec.stage_of(input.operator).ok_or_else(|| {
                Error::Invariant(format!("{} was not lowered", input.operator))
            })?;
            if stage != producer {
                consumers.push(ChannelConsumer {
                    input,
                    stage,
                    feedback: plan.is_feedback(input),
                });
            }
        }
        if consumers.is_empty() {
            continue;
        }
        let junction = implementation
            .junction(output)
            .ok_or_else(|| Error::Invariant(format!("no junction for {output}")))?;
        let kind = junction.hub().clone();
        let descriptor = conversions
            .descriptor(&kind)
            .cloned()
            .unwrap_or_else(|| ChannelDescriptor::new(kind, false, false));
        exec.channels.push(Channel {
            id: ChannelId::next_in(&exec.channels),
            output,
            producer,
            consumers,
            descriptor,
            conversions: junction.conversions().cloned().collect(),
        });
    }

    for region in plan.loops() {
        let head = exec.stage_of(region.head).ok_or_else(|| {
            Error::Invariant(format!("loop head of {} was not lowered", region.id))
        })?;
        let stages = exec
            .stages
            .iter()
            .filter(|s| s.operators().any(|op| plan.in_loop(op, region.id)))
            .map(|s| s.id)
            .collect();
        exec.loops.push(ExecutionStageLoop {
            loop_id: region.id,
            head,
            stages,
        });
    }

    debug!(
        stages = exec.stages.len(),
        channels = exec.channels.len(),
        loops = exec.loops.len(),
        "lowered execution plan"
    );
    Ok(exec)
}
