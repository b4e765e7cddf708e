//! Push-based topological traversal.
//!
//! Before an operator is processed, every predecessor feeding one of its
//! *required* inputs has been processed; each operator is processed at most
//! once per traversal. Which inputs are required is up to the work item, so
//! loop feedback (and, if configured, broadcast) inputs can be optional on the
//! first pass. Activators live in an arena indexed by `OperatorId`; an
//! activation names its target by `InputRef` rather than by reference.

use std::collections::{BTreeSet, VecDeque};

use tracing::{debug, trace};

use crossplan_core::error::{Error, Result};
use crossplan_core::id::OperatorId;
use crossplan_core::plan::{InputRef, OutputRef, Plan};

/// A payload delivered to one input slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Activation<P> {
    pub target: InputRef,
    pub payload: P,
}

impl<P> Activation<P> {
    pub fn new(target: InputRef, payload: P) -> Self {
        Self { target, payload }
    }
}

/// Result of processing one eligible operator.
#[derive(Debug, Clone, PartialEq)]
pub enum Step<P> {
    /// Payloads per output slot; the traversal fans them out to consumers.
    Continue(Vec<(OutputRef, P)>),
    /// Stop the whole traversal.
    Abort(String),
}

/// The work performed at each operator.
pub trait TraversalWork {
    type Payload: Clone;

    /// Whether `input` must be activated before its operator is eligible.
    fn requires(&self, plan: &Plan, input: InputRef) -> bool;

    fn process(
        &mut self,
        plan: &Plan,
        op: OperatorId,
        inputs: &[Option<Self::Payload>],
    ) -> Step<Self::Payload>;
}

/// Per-operator accumulator of activations.
#[derive(Debug, Clone)]
pub struct Activator<P> {
    operator: OperatorId,
    inputs: Vec<Option<P>>,
    required: Vec<bool>,
    queued: bool,
    processed: bool,
}

impl<P> Activator<P> {
    fn new(operator: OperatorId, required: Vec<bool>) -> Self {
        Self {
            operator,
            inputs: required.iter().map(|_| None).collect(),
            required,
            queued: false,
            processed: false,
        }
    }

    pub fn operator(&self) -> OperatorId {
        self.operator
    }

    fn accept(&mut self, index: usize, payload: P) {
        if let Some(slot) = self.inputs.get_mut(index) {
            *slot = Some(payload);
        }
    }

    /// Every required input has been activated.
    pub fn is_complete(&self) -> bool {
        self.required
            .iter()
            .zip(&self.inputs)
            .all(|(req, got)| !*req || got.is_some())
    }
}

pub struct Traversal<'p, W: TraversalWork> {
    plan: &'p Plan,
    work: W,
    activators: Vec<Activator<W::Payload>>,
    scope: Option<BTreeSet<OperatorId>>,
    visits: Vec<OperatorId>,
    boundary: Vec<Activation<W::Payload>>,
}

impl<'p, W: TraversalWork> Traversal<'p, W> {
    /// Traverse the whole plan.
    pub fn new(plan: &'p Plan, work: W) -> Self {
        let activators = plan
            .operators()
            .map(|op| {
                let required = (0..op.inputs.len())
                    .map(|i| work.requires(plan, InputRef::new(op.id, i)))
                    .collect();
                Activator::new(op.id, required)
            })
            .collect();
        Self {
            plan,
            work,
            activators,
            scope: None,
            visits: vec![],
            boundary: vec![],
        }
    }

    /// Traverse only `scope`; activations leaving it are collected in
    /// `boundary()` instead of being processed.
    pub fn scoped(plan: &'p Plan, work: W, scope: BTreeSet<OperatorId>) -> Self {
        let mut t = Self::new(plan, work);
        t.scope = Some(scope);
        t
    }

    fn in_scope(&self, op: OperatorId) -> bool {
        self.scope.as_ref().map_or(true, |s| s.contains(&op))
    }

    /// Run to completion. Operators without required inputs start eligible;
    /// `initial` carries externally supplied payloads (e.g. loop re-entry).
    pub fn traverse(&mut self, initial: Vec<Activation<W::Payload>>) -> Result<()> {
        let mut queue = VecDeque::new();

        for op in self.plan.topological_order() {
            let a = &mut self.activators[op.index()];
            if self.scope.as_ref().map_or(true, |s| s.contains(op))
                && a.required.iter().all(|r| !r)
            {
                a.queued = true;
                queue.push_back(*op);
            }
        }
        for activation in initial {
            self.deliver(activation, &mut queue);
        }

        while let Some(op) = queue.pop_front() {
            let inputs = self.activators[op.index()].inputs.clone();
            let step = self.work.process(self.plan, op, &inputs);
            self.activators[op.index()].processed = true;
            self.visits.push(op);
            trace!(operator = %op, "traversal processed operator");

            let outputs = match step {
                Step::Continue(outputs) => outputs,
                Step::Abort(reason) => {
                    debug!(operator = %op, %reason, "traversal aborted");
                    return Err(Error::Aborted {
                        operator: op,
                        reason,
                    });
                }
            };

            for (output, payload) in outputs {
                for &target in self.plan.consumers(output) {
                    self.deliver(Activation::new(target, payload.clone()), &mut queue);
                }
            }
        }
        Ok(())
    }

    fn deliver(&mut self, activation: Activation<W::Payload>, queue: &mut VecDeque<OperatorId>) {
        let op = activation.target.operator;
        if !self.in_scope(op) {
            self.boundary.push(activation);
            return;
        }
        let Some(activator) = self.activators.get_mut(op.index()) else {
            return;
        };
        activator.accept(activation.target.index, activation.payload);
        // Late activations (loop feedback) are recorded but never re-queue.
        if !activator.processed && !activator.queued && activator.is_complete() {
            activator.queued = true;
            queue.push_back(op);
        }
    }

    /// Operators in the order they were processed.
    pub fn visits(&self) -> &[OperatorId] {
        &self.visits
    }

    /// Activations that targeted operators outside the scope.
    pub fn boundary(&self) -> &[Activation<W::Payload>] {
        &self.boundary
    }

    /// Payload last delivered to `input` (including late feedback).
    pub fn input_payload(&self, input: InputRef) -> Option<&W::Payload> {
        self.activators
            .get(input.operator.index())
            .and_then(|a| a.inputs.get(input.index))
            .and_then(|p| p.as_ref())
    }

    pub fn work(&self) -> &W {
        &self.work
    }

    pub fn into_work(self) -> W {
        self.work
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossplan_core::plan::{PlanBuilder, LOOP_FEEDBACK_INPUT, LOOP_INITIAL_INPUT};

    /// Counts paths: each operator emits the sum of its inputs (sources 1).
    struct PathCount;

    impl TraversalWork for PathCount {
        type Payload = u64;

        fn requires(&self, plan: &Plan, input: InputRef) -> bool {
            !plan.is_feedback(input)
        }

        fn process(&mut self, plan: &Plan, op: OperatorId, inputs: &[Option<u64>]) -> Step<u64> {
            let total = if inputs.is_empty() {
                1
            } else {
                inputs.iter().flatten().sum()
            };
            let n = plan.op(op).outputs.len();
            Step::Continue((0..n).map(|i| (OutputRef::new(op, i), total)).collect())
        }
    }

    #[test]
    fn diamond_is_visited_once_after_predecessors() {
        let mut b = PlanBuilder::new();
        let src = b.add_source("src", "t", None);
        let l = b.add_unary("l", "t", "t", None);
        let r = b.add_unary("r", "t", "t", None);
        let join = b.add_binary("join", ("t", "t"), "t", None);
        b.connect(src, 0, l, 0);
        b.connect(src, 0, r, 0);
        b.connect(l, 0, join, 0);
        b.connect(r, 0, join, 1);
        let plan = b.build().unwrap();

        let mut t = Traversal::new(&plan, PathCount);
        t.traverse(vec![]).unwrap();
        assert_eq!(t.visits(), &[src, l, r, join]);
    }

    #[test]
    fn feedback_does_not_gate_and_does_not_requeue() {
        let mut b = PlanBuilder::new();
        let src = b.add_source("src", "t", None);
        let (head, lp) = b.add_loop_head("loop", "t", 2);
        let body = b.add_unary("body", "t", "t", None);
        b.add_to_loop(lp, body).unwrap();
        b.connect(src, 0, head, LOOP_INITIAL_INPUT);
        b.connect(head, 0, body, 0);
        b.connect(body, 0, head, LOOP_FEEDBACK_INPUT);
        let plan = b.build().unwrap();

        let mut t = Traversal::new(&plan, PathCount);
        t.traverse(vec![]).unwrap();
        assert_eq!(t.visits(), &[src, head, body]);
        assert_eq!(
            t.input_payload(InputRef::new(head, LOOP_FEEDBACK_INPUT)),
            Some(&1)
        );
    }

    struct AbortAt(OperatorId);

    impl TraversalWork for AbortAt {
        type Payload = ();

        fn requires(&self, _plan: &Plan, _input: InputRef) -> bool {
            true
        }

        fn process(&mut self, plan: &Plan, op: OperatorId, _inputs: &[Option<()>]) -> Step<()> {
            if op == self.0 {
                return Step::Abort("malformed".into());
            }
            let n = plan.op(op).outputs.len();
            Step::Continue((0..n).map(|i| (OutputRef::new(op, i), ())).collect())
        }
    }

    #[test]
    fn abort_reports_the_operator() {
        let mut b = PlanBuilder::new();
        let src = b.add_source("src", "t", None);
        let map = b.add_unary("map", "t", "t", None);
        let sink = b.add_sink("sink", "t");
        b.connect(src, 0, map, 0);
        b.connect(map, 0, sink, 0);
        let plan = b.build().unwrap();

        let mut t = Traversal::new(&plan, AbortAt(map));
        match t.traverse(vec![]) {
            Err(Error::Aborted { operator, .. }) => assert_eq!(operator, map),
            other => panic!("expected abort, got {other:?}"),
        }
        assert!(!t.visits().contains(&sink));
    }

    #[test]
    fn scoped_traversal_collects_boundary() {
        let mut b = PlanBuilder::new();
        let src = b.add_source("src", "t", None);
        let map = b.add_unary("map", "t", "t", None);
        let sink = b.add_sink("sink", "t");
        b.connect(src, 0, map, 0);
        b.connect(map, 0, sink, 0);
        let plan = b.build().unwrap();

        let mut t = Traversal::scoped(&plan, PathCount, BTreeSet::from([map]));
        t.traverse(vec![Activation::new(InputRef::new(map, 0), 7)])
            .unwrap();
        assert_eq!(t.visits(), &[map]);
        assert_eq!(t.boundary(), &[Activation::new(InputRef::new(sink, 0), 7)]);
    }
}
