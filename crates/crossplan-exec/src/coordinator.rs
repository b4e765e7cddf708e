//! Iteration coordinator: optimize, lower, execute stage by stage, and
//! re-optimize with measured cardinalities when the breakpoint says so.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, trace, warn};

use crossplan_core::cardinality::CardinalityEstimate;
use crossplan_core::config::OptimizerConfig;
use crossplan_core::error::{Error, Result};
use crossplan_core::hash::{digest, HashDomain};
use crossplan_core::id::{LoopId, OperatorId};
use crossplan_core::manifest::RunManifest;
use crossplan_core::plan::{
    InputRef, OperatorKind, OutputRef, Plan, LOOP_FEEDBACK_INPUT, LOOP_FINAL_OUTPUT,
    LOOP_INITIAL_INPUT, LOOP_ITERATION_OUTPUT,
};
use crossplan_estimate::{CardinalityEstimator, Estimates};
use crossplan_planner::{JobContext, PlanEnumerator, PlanImplementation, RealizedOperator};

use crate::breakpoint::{Breakpoint, NestedLoopBreakpoint};
use crate::channel::ExecutionState;
use crate::executor::{ExecutorRegistry, LineageNode, StageContext};
use crate::loops::{LoopState, RepeatLoop};
use crate::lower::lower;
use crate::metrics;
use crate::replay;
use crate::stage::{ExecutionPlan, ExecutionStage};

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub manifest: RunManifest,
    /// Implementation in force when the run ended.
    pub implementation: PlanImplementation,
    pub execution_plan: ExecutionPlan,
    /// Estimates the final implementation was chosen from.
    pub estimates: Estimates,
    pub lineage: Vec<LineageNode>,
    /// Latest measured record count per output.
    pub measured: BTreeMap<OutputRef, u64>,
}

/// One optimize-and-lower pass.
struct Pass {
    estimates: Estimates,
    implementation: PlanImplementation,
    execution: ExecutionPlan,
}

/// Progress of a run, keyed by logical ids so it survives re-lowering.
struct Progress {
    state: ExecutionState,
    /// Operators with nothing left to do in the current iteration.
    done: BTreeSet<OperatorId>,
    /// Form each operator ran with; pinned on re-optimization.
    executed: BTreeMap<OperatorId, RealizedOperator>,
    loops: BTreeMap<LoopId, RepeatLoop>,
    lineage: Vec<LineageNode>,
    reoptimizations: usize,
}

impl Progress {
    fn new(plan: &Plan) -> Self {
        let loops = plan
            .loops()
            .iter()
            .map(|region| {
                let iterations = match plan.op(region.head).kind {
                    OperatorKind::LoopHead { iterations } => iterations,
                    _ => 1,
                };
                (region.id, RepeatLoop::new(iterations))
            })
            .collect();
        Self {
            state: ExecutionState::new(),
            done: BTreeSet::new(),
            executed: BTreeMap::new(),
            loops,
            lineage: vec![],
            reoptimizations: 0,
        }
    }

    fn stage_done(&self, stage: &ExecutionStage) -> bool {
        stage.operators().all(|op| self.done.contains(&op))
    }

    fn is_ready(&self, plan: &Plan, exec: &ExecutionPlan, stage: &ExecutionStage) -> bool {
        if self.stage_done(stage) {
            return false;
        }
        if stage.loop_head {
            let Some(head) = stage.operators().next() else {
                return false;
            };
            let Some(lp) = head_loop(plan, head).and_then(|l| self.loops.get(&l)) else {
                return false;
            };
            let slot = match lp.state() {
                LoopState::NotStarted => LOOP_INITIAL_INPUT,
                LoopState::Running => LOOP_FEEDBACK_INPUT,
                LoopState::Finished => return false,
            };
            return plan
                .producer(InputRef::new(head, slot))
                .is_some_and(|o| self.state.contains(o));
        }
        exec.inbound(stage.id)
            .filter(|(_, k)| !k.feedback)
            .all(|(c, _)| self.state.contains(c.output))
    }

    fn evaluate_head(
        &mut self,
        plan: &Plan,
        exec: &ExecutionPlan,
        stage: &ExecutionStage,
    ) -> Result<LineageNode> {
        let task = stage
            .tasks
            .first()
            .ok_or_else(|| Error::Invariant(format!("loop stage {} is empty", stage.id)))?;
        let head = task.operator;
        let loop_id = head_loop(plan, head)
            .ok_or_else(|| Error::Invariant(format!("{} heads no loop", plan.op(head))))?;
        let lp = self
            .loops
            .get_mut(&loop_id)
            .ok_or_else(|| Error::Invariant(format!("no state for {loop_id}")))?;

        let slot = if lp.wants_initial() {
            LOOP_INITIAL_INPUT
        } else {
            LOOP_FEEDBACK_INPUT
        };
        let source = plan.producer(InputRef::new(head, slot)).ok_or_else(|| {
            Error::Plan(format!("{} has nothing connected to input {slot}", plan.op(head)))
        })?;
        let payload = self.state.consume(source)?;
        let out = if slot == LOOP_INITIAL_INPUT {
            lp.evaluate(Some(payload), None)?
        } else {
            lp.evaluate(None, Some(payload))?
        };
        let evaluation = lp.evaluations();
        let measured = self.state.measured().get(&source).copied();
        let readers = |o: OutputRef| exec.channel_for(o).map_or(0, |c| c.consumers.len());

        let mut emitted = vec![];
        if let Some(p) = out.iteration {
            let o = OutputRef::new(head, LOOP_ITERATION_OUTPUT);
            self.state.register(o, p, readers(o), measured);
            emitted.push(o);
            self.restart_body(plan, loop_id);
        }
        if let Some(p) = out.final_output {
            let o = OutputRef::new(head, LOOP_FINAL_OUTPUT);
            self.state.register(o, p, readers(o), measured);
            emitted.push(o);
            // A loop can finish before its body ever ran (one iteration).
            self.done.extend(
                plan.operators()
                    .map(|op| op.id)
                    .filter(|&op| plan.in_loop(op, loop_id)),
            );
            self.release_invariants(plan, exec, loop_id);
        }
        self.executed.insert(head, task.realized.clone());
        debug!(loop_id = %loop_id, evaluation, "loop head evaluated");

        Ok(LineageNode {
            stage: stage.id,
            platform: stage.platform.clone(),
            operators: vec![head],
            pass: self.reoptimizations,
            evaluation: Some(evaluation),
            measured: measured
                .map(|n| emitted.iter().map(|o| (*o, n)).collect())
                .unwrap_or_default(),
        })
    }

    /// The outermost loop currently iterating, when there is exactly one.
    fn running_loop(&self, plan: &Plan) -> Option<LoopId> {
        let running = |l: LoopId| {
            self.loops
                .get(&l)
                .is_some_and(|s| s.state() == LoopState::Running)
        };
        let mut outermost = plan.loops().iter().map(|r| r.id).filter(|&l| {
            if !running(l) {
                return false;
            }
            let mut cur = plan.loop_region(l).and_then(|r| r.parent);
            while let Some(outer) = cur {
                if running(outer) {
                    return false;
                }
                cur = plan.loop_region(outer).and_then(|r| r.parent);
            }
            true
        });
        let first = outermost.next()?;
        outermost.next().is_none().then_some(first)
    }

    /// Make the body of `loop_id` runnable again and rewind nested loops.
    fn restart_body(&mut self, plan: &Plan, loop_id: LoopId) {
        self.done.retain(|op| !plan.in_loop(*op, loop_id));
        for region in plan.loops() {
            if region.id != loop_id && plan.in_loop(region.head, loop_id) {
                if let Some(lp) = self.loops.get_mut(&region.id) {
                    lp.reset();
                }
            }
        }
    }

    /// Drop data read by a finished loop that no further iteration needs.
    fn release_invariants(&mut self, plan: &Plan, exec: &ExecutionPlan, loop_id: LoopId) {
        for channel in exec.channels() {
            let producer = channel.output.operator;
            if plan.in_loop(producer, loop_id) {
                continue;
            }
            let feeds_loop = channel
                .consumers
                .iter()
                .any(|k| plan.in_loop(k.input.operator, loop_id));
            let pending_outside = channel.consumers.iter().any(|k| {
                !plan.in_loop(k.input.operator, loop_id) && !self.done.contains(&k.input.operator)
            });
            let mut needed_again = false;
            let mut cur = plan.loop_region(loop_id).and_then(|r| r.parent);
            while let Some(outer) = cur {
                let running = self
                    .loops
                    .get(&outer)
                    .is_some_and(|l| l.state() != LoopState::Finished);
                needed_again |= running && !plan.in_loop(producer, outer);
                cur = plan.loop_region(outer).and_then(|r| r.parent);
            }
            if feeds_loop && !pending_outside && !needed_again && self.state.release(channel.output)
            {
                trace!(output = %channel.output, "released loop-invariant input");
            }
        }
    }
}

fn head_loop(plan: &Plan, head: OperatorId) -> Option<LoopId> {
    plan.loops().iter().find(|r| r.head == head).map(|r| r.id)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub struct IterationCoordinator<'a> {
    plan: &'a Plan,
    context: &'a JobContext,
    config: &'a OptimizerConfig,
    breakpoint: Box<dyn Breakpoint>,
    executors: ExecutorRegistry,
}

impl<'a> IterationCoordinator<'a> {
    pub fn new(
        plan: &'a Plan,
        context: &'a JobContext,
        config: &'a OptimizerConfig,
        executors: ExecutorRegistry,
    ) -> Self {
        Self {
            plan,
            context,
            config,
            breakpoint: Box::new(NestedLoopBreakpoint),
            executors,
        }
    }

    pub fn with_breakpoint(mut self, breakpoint: impl Breakpoint + 'static) -> Self {
        self.breakpoint = Box::new(breakpoint);
        self
    }

    /// Fresh estimates for the next pass. Inside a running loop only its body
    /// is re-walked; everything else keeps the `previous` estimates.
    fn estimate(&self, progress: &Progress, previous: Option<&Estimates>) -> Estimates {
        let estimator = CardinalityEstimator::new(self.plan, self.config)
            .with_measurements(progress.state.measured().iter().map(|(o, n)| (*o, *n)));
        let scoped = previous.zip(progress.running_loop(self.plan));
        if let Some((previous, loop_id)) = scoped {
            let head_input = self.plan.loop_region(loop_id).and_then(|r| {
                let iteration = OutputRef::new(r.head, LOOP_ITERATION_OUTPUT);
                progress
                    .state
                    .measured()
                    .get(&iteration)
                    .map(|&n| CardinalityEstimate::exact(n))
                    .or_else(|| previous.output(iteration))
            });
            if let Some(head_input) = head_input {
                match estimator.estimate_loop(loop_id, previous, head_input) {
                    Ok(estimates) => return estimates,
                    Err(e) => warn!(loop_id = %loop_id, error = %e, "loop re-estimation failed"),
                }
            }
        }
        estimator.estimate_or_fallback()
    }

    fn optimize(&self, progress: &Progress, previous: Option<&Estimates>) -> Result<Pass> {
        let estimates = self.estimate(progress, previous);
        let implementation = PlanEnumerator::new(self.plan, self.context, &estimates, self.config)
            .with_fixed(
                progress
                    .executed
                    .iter()
                    .map(|(op, realized)| (*op, realized.clone())),
            )
            .optimize()?;
        let execution = lower(
            self.plan,
            &implementation,
            &progress.done,
            &self.context.conversions,
        )?;
        Ok(Pass {
            estimates,
            implementation,
            execution,
        })
    }

    /// Execute the plan to completion. Executors are disposed and every
    /// remaining channel instance released whether or not the run succeeds.
    pub fn run(&mut self) -> Result<RunReport> {
        let started_ms = now_millis();
        let plan_hash = digest(HashDomain::LogicalPlan, self.plan)?;
        let mut progress = Progress::new(self.plan);

        let result = self.drive(&mut progress);
        self.executors.dispose_all();
        let leftover = progress.state.dispose_all();
        if leftover > 0 {
            debug!(leftover, "released unread channel instances");
        }
        let (pass, stages_executed) = result?;

        let stages_hash = replay::hash_execution(&pass.execution, &pass.implementation)?;
        let mut manifest = RunManifest::new(plan_hash, started_ms).finish(now_millis(), stages_hash);
        manifest.reoptimizations = progress.reoptimizations;
        manifest.stages_executed = stages_executed;
        info!(
            stages = stages_executed,
            reoptimizations = progress.reoptimizations,
            cost = %pass.implementation.cost(),
            "run complete"
        );

        Ok(RunReport {
            manifest,
            implementation: pass.implementation,
            execution_plan: pass.execution,
            estimates: pass.estimates,
            lineage: std::mem::take(&mut progress.lineage),
            measured: progress.state.measured().clone(),
        })
    }

    fn drive(&mut self, progress: &mut Progress) -> Result<(Pass, usize)> {
        let mut pass = self.optimize(progress, None)?;
        let mut fresh = true;
        let mut executed = 0usize;

        loop {
            let next = pass
                .execution
                .stages()
                .iter()
                .find(|s| progress.is_ready(self.plan, &pass.execution, s))
                .cloned();
            let Some(stage) = next else {
                if pass.execution.stages().iter().all(|s| progress.stage_done(s)) {
                    return Ok((pass, executed));
                }
                return Err(Error::Invariant(
                    "execution stalled: pending stages have no input".into(),
                ));
            };

            if !fresh
                && progress.reoptimizations < self.config.max_reoptimizations
                && !self.breakpoint.permits_execution_of(&stage, &pass.execution)
            {
                progress.reoptimizations += 1;
                info!(
                    stage = %stage.id,
                    pass = progress.reoptimizations,
                    "breakpoint reached; re-optimizing with measured cardinalities"
                );
                pass = self.optimize(progress, Some(&pass.estimates))?;
                fresh = true;
                continue;
            }
            fresh = false;

            let timer = Instant::now();
            let node = if stage.loop_head {
                progress.evaluate_head(self.plan, &pass.execution, &stage)?
            } else {
                self.execute_stage(progress, &pass, &stage)?
            };
            metrics::emit_span(
                "stage",
                &[
                    ("stage", stage.id.get().to_string()),
                    ("platform", stage.platform.to_string()),
                    ("micros", timer.elapsed().as_micros().to_string()),
                ],
            );
            progress.lineage.push(node);
            executed += 1;
        }
    }

    fn execute_stage(
        &mut self,
        progress: &mut Progress,
        pass: &Pass,
        stage: &ExecutionStage,
    ) -> Result<LineageNode> {
        let ctx = StageContext {
            plan: self.plan,
            execution: &pass.execution,
            estimates: &pass.estimates,
        };
        let executor = self.executors.get_mut(&stage.platform)?;
        let outcome = executor.execute(stage, &ctx, &mut progress.state)?;

        for task in &stage.tasks {
            progress.done.insert(task.operator);
            progress.executed.insert(task.operator, task.realized.clone());
        }
        for (output, n) in &outcome.measured {
            progress.state.record_measured(*output, *n);
        }
        debug!(stage = %stage.id, platform = %stage.platform, tasks = stage.tasks.len(), "stage executed");

        Ok(LineageNode {
            stage: stage.id,
            platform: stage.platform.clone(),
            operators: stage.operators().collect(),
            pass: progress.reoptimizations,
            evaluation: None,
            measured: outcome.measured.into_iter().collect(),
        })
    }
}
