//! Per-platform executors and the context they run stages in.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crossplan_core::error::{Error, Result};
use crossplan_core::id::{OperatorId, StageId};
use crossplan_core::plan::{InputRef, OutputRef, Plan};
use crossplan_core::platform::PlatformId;
use crossplan_estimate::Estimates;

use crate::channel::{ExecutionState, Payload};
use crate::stage::{ExecutionPlan, ExecutionStage};

/// Runs stages on one platform.
///
/// An executor receives each stage once per loop iteration. It reads its
/// cross-stage inputs from `state` (see [`StageContext::take_inputs`]) and
/// publishes the outputs other stages read with [`StageContext::emit`].
pub trait Executor: Send {
    fn platform(&self) -> &PlatformId;

    fn execute(
        &mut self,
        stage: &ExecutionStage,
        ctx: &StageContext<'_>,
        state: &mut ExecutionState,
    ) -> Result<StageOutcome>;

    /// Release whatever the executor still holds. Called once per run.
    fn dispose(&mut self) {}
}

pub struct StageContext<'a> {
    pub plan: &'a Plan,
    pub execution: &'a ExecutionPlan,
    pub estimates: &'a Estimates,
}

impl<'a> StageContext<'a> {
    /// Whether `input` reads data produced outside the loop it sits in.
    /// Such data stays available for every iteration.
    pub fn is_loop_invariant(&self, input: InputRef, producer: OutputRef) -> bool {
        self.plan
            .op(input.operator)
            .loop_region
            .is_some_and(|l| !self.plan.in_loop(producer.operator, l))
    }

    /// Inputs of `stage`'s tasks that are fed by other stages.
    pub fn external_inputs(&self, stage: &ExecutionStage) -> Vec<(InputRef, OutputRef)> {
        let mut out = vec![];
        for task in &stage.tasks {
            let operator = self.plan.op(task.operator);
            for (i, slot) in operator.inputs.iter().enumerate() {
                if slot.feedback {
                    continue;
                }
                let input = InputRef::new(task.operator, i);
                if let Some(producer) = self.plan.producer(input) {
                    if !stage.contains(producer.operator) {
                        out.push((input, producer));
                    }
                }
            }
        }
        out
    }

    /// Fetch every external input of `stage`.
    pub fn take_inputs(
        &self,
        stage: &ExecutionStage,
        state: &mut ExecutionState,
    ) -> Result<BTreeMap<InputRef, Payload>> {
        let mut inputs = BTreeMap::new();
        for (input, producer) in self.external_inputs(stage) {
            let payload = if self.is_loop_invariant(input, producer) {
                state.read(producer)?
            } else {
                state.consume(producer)?
            };
            inputs.insert(input, payload);
        }
        Ok(inputs)
    }

    /// Publish `payload` for the stages consuming `output`.
    pub fn emit(
        &self,
        state: &mut ExecutionState,
        outcome: &mut StageOutcome,
        output: OutputRef,
        payload: Payload,
        measured: Option<u64>,
    ) {
        let consumers = self
            .execution
            .channel_for(output)
            .map_or(0, |c| c.consumers.len());
        state.register(output, payload, consumers, measured);
        if let Some(n) = measured {
            outcome.measured.insert(output, n);
        }
    }
}

/// What an executor reports back for one stage run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageOutcome {
    pub measured: BTreeMap<OutputRef, u64>,
}

/// One executed stage, in execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageNode {
    pub stage: StageId,
    pub platform: PlatformId,
    pub operators: Vec<OperatorId>,
    /// Number of optimize-and-lower passes before this stage ran.
    pub pass: usize,
    /// Loop-head evaluation count when the stage is a loop head.
    pub evaluation: Option<u32>,
    pub measured: Vec<(OutputRef, u64)>,
}

#[derive(Default)]
pub struct ExecutorRegistry {
    executors: BTreeMap<PlatformId, Box<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, executor: Box<dyn Executor>) -> Result<()> {
        let id = executor.platform().clone();
        if self.executors.contains_key(&id) {
            return Err(Error::Config(format!("executor for {id} registered twice")));
        }
        self.executors.insert(id, executor);
        Ok(())
    }

    pub fn with(mut self, executor: impl Executor + 'static) -> Result<Self> {
        self.register(Box::new(executor))?;
        Ok(self)
    }

    pub fn get_mut(&mut self, platform: &PlatformId) -> Result<&mut Box<dyn Executor>> {
        self.executors
            .get_mut(platform)
            .ok_or_else(|| Error::Executor(format!("no executor for platform {platform}")))
    }

    pub fn platforms(&self) -> BTreeSet<PlatformId> {
        self.executors.keys().cloned().collect()
    }

    pub fn dispose_all(&mut self) {
        for executor in self.executors.values_mut() {
            executor.dispose();
        }
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("platforms", &self.executors.keys().collect::<Vec<_>>())
            .finish()
    }
}
