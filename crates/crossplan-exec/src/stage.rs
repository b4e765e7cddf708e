//! Lowered stage graph.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crossplan_core::id::{ChannelId, LoopId, OperatorId, StageId, TaskId};
use crossplan_core::plan::{InputRef, OutputRef};
use crossplan_core::platform::{ChannelDescriptor, PlatformId};
use crossplan_planner::{ChannelConversion, RealizedOperator};

/// One realized operator inside a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTask {
    pub id: TaskId,
    pub operator: OperatorId,
    pub realized: RealizedOperator,
}

/// Maximal single-platform run of tasks; tasks are in topological order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStage {
    pub id: StageId,
    pub platform: PlatformId,
    pub tasks: Vec<ExecutionTask>,
    pub loop_region: Option<LoopId>,
    /// The stage holds exactly one loop head.
    pub loop_head: bool,
}

impl ExecutionStage {
    pub fn contains(&self, op: OperatorId) -> bool {
        self.tasks.iter().any(|t| t.operator == op)
    }

    pub fn operators(&self) -> impl Iterator<Item = OperatorId> + '_ {
        self.tasks.iter().map(|t| t.operator)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConsumer {
    pub input: InputRef,
    pub stage: StageId,
    /// Loop back-edge into a loop head.
    pub feedback: bool,
}

/// Cross-stage edge for one output slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub output: OutputRef,
    pub producer: StageId,
    pub consumers: Vec<ChannelConsumer>,
    pub descriptor: ChannelDescriptor,
    /// Conversions applied between producer and consumers.
    pub conversions: Vec<ChannelConversion>,
}

/// Stages making up one loop; the head stage is re-entered per iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStageLoop {
    pub loop_id: LoopId,
    pub head: StageId,
    pub stages: BTreeSet<StageId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub(crate) stages: Vec<ExecutionStage>,
    pub(crate) channels: Vec<Channel>,
    pub(crate) loops: Vec<ExecutionStageLoop>,
    pub(crate) stage_of: BTreeMap<OperatorId, StageId>,
}

impl ExecutionPlan {
    pub fn stage(&self, id: StageId) -> Option<&ExecutionStage> {
        self.stages.get(id.index())
    }

    pub fn stages(&self) -> &[ExecutionStage] {
        &self.stages
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn loops(&self) -> &[ExecutionStageLoop] {
        &self.loops
    }

    pub fn stage_of(&self, op: OperatorId) -> Option<StageId> {
        self.stage_of.get(&op).copied()
    }

    pub fn channel_for(&self, output: OutputRef) -> Option<&Channel> {
        self.channels.iter().find(|c| c.output == output)
    }

    /// Channels feeding `stage`, paired with the consuming input.
    pub fn inbound(&self, stage: StageId) -> impl Iterator<Item = (&Channel, &ChannelConsumer)> {
        self.channels.iter().flat_map(move |c| {
            c.consumers
                .iter()
                .filter(move |k| k.stage == stage)
                .map(move |k| (c, k))
        })
    }

    pub fn outbound(&self, stage: StageId) -> impl Iterator<Item = &Channel> {
        self.channels.iter().filter(move |c| c.producer == stage)
    }

    /// Producer stages of `stage`, ignoring loop back-edges.
    pub fn predecessors(&self, stage: StageId) -> Vec<StageId> {
        let set: BTreeSet<StageId> = self
            .inbound(stage)
            .filter(|(_, k)| !k.feedback)
            .map(|(c, _)| c.producer)
            .collect();
        set.into_iter().collect()
    }

    pub fn successors(&self, stage: StageId) -> Vec<StageId> {
        let set: BTreeSet<StageId> = self
            .outbound(stage)
            .flat_map(|c| c.consumers.iter().filter(|k| !k.feedback).map(|k| k.stage))
            .collect();
        set.into_iter().collect()
    }

    /// Stages not in `done` whose forward predecessors all are.
    pub fn ready_stages(&self, done: &BTreeSet<StageId>) -> Vec<StageId> {
        self.stages
            .iter()
            .map(|s| s.id)
            .filter(|id| !done.contains(id))
            .filter(|id| self.predecessors(*id).iter().all(|p| done.contains(p)))
            .collect()
    }

    pub fn loop_of_head(&self, stage: StageId) -> Option<&ExecutionStageLoop> {
        self.loops.iter().find(|l| l.head == stage)
    }

    /// One line per stage and channel, for `explain`.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for s in &self.stages {
            let ops: Vec<String> = s
                .tasks
                .iter()
                .map(|t| format!("{}:{}", t.operator.get(), t.realized.name))
                .collect();
            let _ = write!(out, "stage {} on {}: [{}]", s.id.get(), s.platform, ops.join(", "));
            if let Some(l) = s.loop_region {
                let _ = write!(out, " loop={}", l.get());
            }
            if s.loop_head {
                out.push_str(" head");
            }
            out.push('\n');
        }
        for c in &self.channels {
            let to: Vec<String> = c
                .consumers
                .iter()
                .map(|k| {
                    let mark = if k.feedback { "*" } else { "" };
                    format!("{}{}", k.stage.get(), mark)
                })
                .collect();
            let _ = writeln!(
                out,
                "channel {} {} -> [{}] kind={} conversions={}",
                c.id.get(),
                c.producer.get(),
                to.join(", "),
                c.descriptor.kind,
                c.conversions.len()
            );
        }
        out
    }
}
