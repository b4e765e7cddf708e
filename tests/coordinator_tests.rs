//! Iteration coordinator driving in-memory executors over YAML jobs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crossplan_core::prelude::*;
use crossplan_exec::{
    ExecutionStage, ExecutionState, Executor, ExecutorRegistry, IterationCoordinator,
    NeverBreak, NoIterationBreakpoint, Payload, StageContext, StageOutcome,
};
use crossplan_planner::parse_job;

/// Interprets operators by name over `Vec<i64>` payloads.
struct VecExecutor {
    platform: PlatformId,
    results: Arc<Mutex<Vec<Vec<i64>>>>,
    stages: Arc<Mutex<Vec<String>>>,
}

impl VecExecutor {
    fn apply(name: &str, input: Vec<i64>) -> Vec<i64> {
        match name {
            "square" => input.iter().map(|v| v * v).collect(),
            "halve" => input.iter().map(|v| v / 2).collect(),
            "keep_even" => input.into_iter().filter(|v| v % 2 == 0).collect(),
            _ => input,
        }
    }
}

impl Executor for VecExecutor {
    fn platform(&self) -> &PlatformId {
        &self.platform
    }

    fn execute(
        &mut self,
        stage: &ExecutionStage,
        ctx: &StageContext<'_>,
        state: &mut ExecutionState,
    ) -> Result<StageOutcome> {
        let external = ctx.take_inputs(stage, state)?;
        let mut local: HashMap<OutputRef, Payload> = HashMap::new();
        let mut outcome = StageOutcome::default();
        let mut names = vec![];

        for task in &stage.tasks {
            let op = ctx.plan.op(task.operator);
            names.push(op.name.clone());
            let input = InputRef::new(task.operator, 0);
            let incoming = external.get(&input).cloned().or_else(|| {
                ctx.plan
                    .producer(input)
                    .and_then(|o| local.get(&o).cloned())
            });
            let data = match incoming {
                Some(p) => p
                    .downcast_ref::<Vec<i64>>()
                    .cloned()
                    .ok_or_else(|| Error::Executor("unexpected payload".into()))?,
                None => (1..=8).collect(),
            };
            if op.kind == OperatorKind::Sink {
                self.results.lock().unwrap().push(data);
                continue;
            }
            let data = Self::apply(&op.name, data);
            let output = OutputRef::new(task.operator, 0);
            let n = data.len() as u64;
            let payload: Payload = Arc::new(data);
            local.insert(output, payload.clone());
            ctx.emit(state, &mut outcome, output, payload, Some(n));
        }
        self.stages
            .lock()
            .unwrap()
            .push(format!("{}:{}", self.platform, names.join("+")));
        Ok(outcome)
    }
}

struct Harness {
    results: Arc<Mutex<Vec<Vec<i64>>>>,
    stages: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    fn new() -> Self {
        Self {
            results: Arc::default(),
            stages: Arc::default(),
        }
    }

    fn registry(&self, platforms: &[&str]) -> ExecutorRegistry {
        let mut registry = ExecutorRegistry::new();
        for p in platforms {
            registry
                .register(Box::new(VecExecutor {
                    platform: PlatformId::new(*p),
                    results: self.results.clone(),
                    stages: self.stages.clone(),
                }))
                .unwrap();
        }
        registry
    }
}

const PIPELINE: &str = r#"
platforms:
  - id: local
    load: { fixed: 1.0, per_record: 0.01 }
    channels: [ { kind: local.vec, reusable: true, multi_consumer: true } ]
  - id: remote
    load: { fixed: 2.0, per_record: 0.0 }
    channels: [ { kind: remote.vec, reusable: true, multi_consumer: true } ]
conversions:
  - { source: local.vec, target: remote.vec, load: { fixed: 1.0, per_record: 0.0 } }
operators:
  - { name: numbers, op: source, type: int, estimator: { fixed: 8 },
      realizations: [ { platform: local } ] }
  - { name: keep_even, op: unary, type: int, inputs: [numbers], estimator: { selectivity: 0.5 },
      realizations: [ { platform: local } ] }
  - { name: square, op: unary, type: int, inputs: [keep_even],
      realizations: [ { platform: local } ] }
  - { name: store, op: sink, type: int, inputs: [square],
      realizations: [ { platform: remote } ] }
"#;

#[test]
fn test_pipeline_fuses_local_work_and_ships_the_result() {
    let job = parse_job(PIPELINE).unwrap();
    let h = Harness::new();
    let report = IterationCoordinator::new(&job.plan, &job.context, &job.config, h.registry(&["local", "remote"]))
        .run()
        .unwrap();

    assert_eq!(*h.results.lock().unwrap(), vec![vec![4, 16, 36, 64]]);
    assert_eq!(
        *h.stages.lock().unwrap(),
        vec!["local:numbers+keep_even+square".to_string(), "remote:store".to_string()]
    );
    assert_eq!(report.execution_plan.channels().len(), 1);
    assert_eq!(report.measured[&OutputRef::new(job.names["keep_even"], 0)], 4);
    assert_eq!(report.manifest.stages_executed, 2);
}

#[test]
fn test_manifest_hashes_are_stable_across_runs() {
    let job = parse_job(PIPELINE).unwrap();
    let run = || {
        let h = Harness::new();
        IterationCoordinator::new(&job.plan, &job.context, &job.config, h.registry(&["local", "remote"]))
            .run()
            .unwrap()
            .manifest
    };
    let a = run();
    let b = run();
    assert_eq!(a.plan_hash, b.plan_hash);
    assert_eq!(a.stages_hash, b.stages_hash);
    assert_ne!(a.id, b.id);
    assert!(a.finished_ms >= a.started_ms);
}

const LOOP_JOB: &str = r#"
platforms:
  - id: local
    load: { fixed: 1.0, per_record: 0.0 }
    channels: [ { kind: local.vec, reusable: true, multi_consumer: true } ]
operators:
  - { name: numbers, op: source, type: int, estimator: { fixed: 8 },
      realizations: [ { platform: local } ] }
  - { name: repeat, op: loop, type: int, iterations: 3, inputs: [numbers], feedback: halve,
      realizations: [ { platform: local } ] }
  - { name: halve, op: unary, type: int, loop: repeat, inputs: [repeat],
      realizations: [ { platform: local } ] }
  - { name: store, op: sink, type: int, inputs: [repeat.final],
      realizations: [ { platform: local } ] }
"#;

#[test]
fn test_three_iteration_loop_halves_twice() {
    let job = parse_job(LOOP_JOB).unwrap();
    let h = Harness::new();
    let report = IterationCoordinator::new(&job.plan, &job.context, &job.config, h.registry(&["local"]))
        .with_breakpoint(NeverBreak)
        .run()
        .unwrap();

    assert_eq!(*h.results.lock().unwrap(), vec![vec![0, 0, 0, 1, 1, 1, 1, 2]]);
    let halves = h
        .stages
        .lock()
        .unwrap()
        .iter()
        .filter(|s| s.ends_with("halve"))
        .count();
    assert_eq!(halves, 2);
    let evaluations: Vec<u32> = report.lineage.iter().filter_map(|n| n.evaluation).collect();
    assert_eq!(evaluations, vec![1, 2, 3]);
}

#[test]
fn test_single_iteration_loop_skips_its_body() {
    let job = parse_job(&LOOP_JOB.replace("iterations: 3", "iterations: 1")).unwrap();
    let h = Harness::new();
    let report = IterationCoordinator::new(&job.plan, &job.context, &job.config, h.registry(&["local"]))
        .run()
        .unwrap();

    assert_eq!(*h.results.lock().unwrap(), vec![(1..=8).collect::<Vec<i64>>()]);
    assert!(h.stages.lock().unwrap().iter().all(|s| !s.ends_with("halve")));
    let evaluations: Vec<u32> = report.lineage.iter().filter_map(|n| n.evaluation).collect();
    assert_eq!(evaluations, vec![1]);
    assert_eq!(report.manifest.stages_executed, 3);
}

#[test]
fn test_reoptimization_keeps_executed_operators_pinned() {
    let job = parse_job(LOOP_JOB).unwrap();
    let h = Harness::new();
    let report = IterationCoordinator::new(&job.plan, &job.context, &job.config, h.registry(&["local"]))
        .with_breakpoint(NoIterationBreakpoint)
        .run()
        .unwrap();

    assert_eq!(report.manifest.reoptimizations, 2);
    assert_eq!(*h.results.lock().unwrap(), vec![vec![0, 0, 0, 1, 1, 1, 1, 2]]);
    let passes: Vec<usize> = report.lineage.iter().map(|n| n.pass).collect();
    assert!(passes.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(passes.last(), Some(&2));
}

#[test]
fn test_reoptimizing_inside_a_loop_only_re_estimates_its_body() {
    let job = parse_job(LOOP_JOB).unwrap();
    let h = Harness::new();
    let report = IterationCoordinator::new(&job.plan, &job.context, &job.config, h.registry(&["local"]))
        .with_breakpoint(NoIterationBreakpoint)
        .run()
        .unwrap();

    let (repeat, halve) = (job.names["repeat"], job.names["halve"]);
    assert_eq!(report.estimates.visits(), &[repeat, halve]);
    // The second re-optimization saw the once-halved data: 8 records in.
    assert_eq!(
        report.estimates.output(OutputRef::new(halve, 0)),
        Some(CardinalityEstimate::exact(8))
    );
    assert_eq!(
        report.estimates.output(OutputRef::new(job.names["numbers"], 0)),
        Some(CardinalityEstimate::exact(8))
    );
}
