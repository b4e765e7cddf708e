//! Cardinality estimation pass.
//!
//! Runs the activation traversal with a work item that applies each
//! operator's `EstimatorSpec`, overridden by measured counts when the run
//! time has observed them. Loops are estimated once on the way in; a caller
//! that learns more about the loop input re-estimates only the loop body via
//! `estimate_loop`.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crossplan_core::cardinality::CardinalityEstimate;
use crossplan_core::config::{DefaultEstimator, OptimizerConfig};
use crossplan_core::error::{Error, Result};
use crossplan_core::id::{LoopId, OperatorId};
use crossplan_core::plan::{EstimatorSpec, InputRef, OutputRef, Plan, LOOP_INITIAL_INPUT};

use crate::traversal::{Activation, Step, Traversal, TraversalWork};

/// Result of an estimation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Estimates {
    outputs: BTreeMap<OutputRef, CardinalityEstimate>,
    /// Inputs processed before their (ungated broadcast) producer.
    assumed: BTreeMap<InputRef, CardinalityEstimate>,
    visits: Vec<OperatorId>,
}

impl Estimates {
    pub fn output(&self, output: OutputRef) -> Option<CardinalityEstimate> {
        self.outputs.get(&output).copied()
    }

    /// Estimate arriving at `input`: the producer's output estimate, or the
    /// value assumed while the producer was still pending.
    pub fn input(&self, plan: &Plan, input: InputRef) -> Option<CardinalityEstimate> {
        plan.producer(input)
            .and_then(|p| self.output(p))
            .or_else(|| self.assumed.get(&input).copied())
    }

    pub fn outputs(&self) -> impl Iterator<Item = (&OutputRef, &CardinalityEstimate)> {
        self.outputs.iter()
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Operators in the order the pass visited them.
    pub fn visits(&self) -> &[OperatorId] {
        &self.visits
    }

    pub fn set(&mut self, output: OutputRef, estimate: CardinalityEstimate) {
        self.outputs.insert(output, estimate);
    }

    /// Overwrite entries with those of `newer`; visits are replaced.
    fn merge(&mut self, newer: Estimates) {
        self.outputs.extend(newer.outputs);
        self.assumed.extend(newer.assumed);
        self.visits = newer.visits;
    }
}

struct CardinalityWork<'a> {
    config: &'a OptimizerConfig,
    measured: &'a BTreeMap<OutputRef, u64>,
    /// Operators whose declared estimator is ignored in favor of the default.
    overridden: &'a BTreeSet<OperatorId>,
    out: Estimates,
}

impl<'a> CardinalityWork<'a> {
    fn apply(
        &self,
        spec: EstimatorSpec,
        regular: &[CardinalityEstimate],
    ) -> std::result::Result<CardinalityEstimate, String> {
        match spec {
            EstimatorSpec::Fixed(n) => Ok(CardinalityEstimate::exact(n)),
            EstimatorSpec::Interval(c) => Ok(c),
            EstimatorSpec::Identity => regular
                .first()
                .copied()
                .ok_or_else(|| "identity estimator without inputs".to_string()),
            EstimatorSpec::Selectivity(f) => {
                if !f.is_finite() || f < 0.0 {
                    return Err(format!("invalid selectivity {f}"));
                }
                regular
                    .first()
                    .map(|c| c.scale(f))
                    .ok_or_else(|| "selectivity estimator without inputs".to_string())
            }
            EstimatorSpec::Union => {
                let (first, rest) = regular
                    .split_first()
                    .ok_or_else(|| "union estimator without inputs".to_string())?;
                Ok(rest.iter().fold(*first, |acc, c| acc.plus(c)))
            }
            EstimatorSpec::Cartesian => match regular {
                [l, r] => Ok(l.product(r)),
                _ => Err(format!("cartesian estimator needs 2 inputs, got {}", regular.len())),
            },
            EstimatorSpec::Join { selectivity } => {
                if !selectivity.is_finite() || selectivity < 0.0 {
                    return Err(format!("invalid join selectivity {selectivity}"));
                }
                match regular {
                    [l, r] => Ok(l.product(r).scale(selectivity)),
                    _ => Err(format!("join estimator needs 2 inputs, got {}", regular.len())),
                }
            }
        }
    }

    fn fallback(&self, regular: &[CardinalityEstimate]) -> CardinalityEstimate {
        match self.config.default_estimator {
            DefaultEstimator::Fixed(n) => CardinalityEstimate::exact(n),
            DefaultEstimator::Identity => regular
                .first()
                .copied()
                .unwrap_or_else(|| CardinalityEstimate::new(0, 0, 0.0)),
        }
    }
}

impl<'a> TraversalWork for CardinalityWork<'a> {
    type Payload = CardinalityEstimate;

    fn requires(&self, plan: &Plan, input: InputRef) -> bool {
        let slot = &plan.op(input.operator).inputs[input.index];
        !slot.feedback && (self.config.broadcasts_gate || !slot.broadcast)
    }

    fn process(
        &mut self,
        plan: &Plan,
        op: OperatorId,
        inputs: &[Option<CardinalityEstimate>],
    ) -> Step<CardinalityEstimate> {
        let operator = plan.op(op);
        let mut regular = Vec::with_capacity(inputs.len());
        for (i, (slot, payload)) in operator.inputs.iter().zip(inputs).enumerate() {
            if slot.feedback {
                continue;
            }
            if slot.broadcast {
                if payload.is_none() {
                    let assumed = CardinalityEstimate::exact(self.config.broadcast_cardinality);
                    self.out.assumed.insert(InputRef::new(op, i), assumed);
                }
                continue;
            }
            match payload {
                Some(c) => regular.push(*c),
                None => return Step::Abort(format!("input '{}' has no estimate", slot.name)),
            }
        }

        let estimate = if operator.is_loop_head() {
            match regular.first() {
                Some(c) => *c,
                None => return Step::Abort("loop head without initial input".into()),
            }
        } else {
            match operator.estimator {
                Some(spec) if !self.overridden.contains(&op) => match self.apply(spec, &regular) {
                    Ok(c) => c,
                    Err(reason) => return Step::Abort(reason),
                },
                _ => self.fallback(&regular),
            }
        };

        let mut emitted = Vec::with_capacity(operator.outputs.len());
        for i in 0..operator.outputs.len() {
            let output = OutputRef::new(op, i);
            let value = match self.measured.get(&output) {
                Some(&n) => CardinalityEstimate::exact(n),
                None => estimate,
            };
            self.out.outputs.insert(output, value);
            emitted.push((output, value));
        }
        Step::Continue(emitted)
    }
}

/// Entry point for estimation over one plan.
pub struct CardinalityEstimator<'a> {
    plan: &'a Plan,
    config: &'a OptimizerConfig,
    measured: BTreeMap<OutputRef, u64>,
}

impl<'a> CardinalityEstimator<'a> {
    pub fn new(plan: &'a Plan, config: &'a OptimizerConfig) -> Self {
        Self {
            plan,
            config,
            measured: BTreeMap::new(),
        }
    }

    /// Counts observed at run time; they replace estimates for their outputs.
    pub fn with_measurements(mut self, measured: impl IntoIterator<Item = (OutputRef, u64)>) -> Self {
        self.measured.extend(measured);
        self
    }

    pub fn measure(&mut self, output: OutputRef, count: u64) {
        self.measured.insert(output, count);
    }

    /// Full pass over the plan. Aborts propagate as `Error::Aborted`.
    pub fn estimate(&self) -> Result<Estimates> {
        self.run(&BTreeSet::new(), None, vec![])
    }

    /// Re-estimate the body of `loop_id` for a new head input, reusing
    /// `previous` for everything outside the loop.
    pub fn estimate_loop(
        &self,
        loop_id: LoopId,
        previous: &Estimates,
        head_input: CardinalityEstimate,
    ) -> Result<Estimates> {
        let region = self
            .plan
            .loop_region(loop_id)
            .ok_or_else(|| Error::Plan(format!("unknown loop {loop_id}")))?;
        let scope: BTreeSet<OperatorId> = self
            .plan
            .operators()
            .filter(|op| self.plan.in_loop(op.id, loop_id))
            .map(|op| op.id)
            .collect();

        let mut initial = vec![Activation::new(
            InputRef::new(region.head, LOOP_INITIAL_INPUT),
            head_input,
        )];
        for &op in &scope {
            for i in 0..self.plan.op(op).inputs.len() {
                let input = InputRef::new(op, i);
                if op == region.head || self.plan.is_feedback(input) {
                    continue;
                }
                let Some(producer) = self.plan.producer(input) else {
                    continue;
                };
                if scope.contains(&producer.operator) {
                    continue;
                }
                if let Some(c) = previous.output(producer) {
                    initial.push(Activation::new(input, c));
                }
            }
        }

        let fresh = self.run(&BTreeSet::new(), Some(scope), initial)?;
        debug!(loop_id = %loop_id, visited = fresh.visits.len(), "re-estimated loop body");
        let mut merged = previous.clone();
        merged.merge(fresh);
        Ok(merged)
    }

    /// Like `estimate`, but an operator whose estimator aborts is retried with
    /// the configured default estimator instead of failing the pass.
    pub fn estimate_or_fallback(&self) -> Estimates {
        let mut overridden = BTreeSet::new();
        loop {
            match self.run(&overridden, None, vec![]) {
                Ok(estimates) => return estimates,
                Err(Error::Aborted { operator, reason }) if overridden.insert(operator) => {
                    warn!(operator = %operator, %reason, "estimator aborted, using default");
                }
                Err(e) => {
                    warn!(error = %e, "estimation failed, using defaults everywhere");
                    let all = self.plan.operators().map(|op| op.id).collect();
                    return self.run(&all, None, vec![]).unwrap_or_default();
                }
            }
        }
    }

    fn run(
        &self,
        overridden: &BTreeSet<OperatorId>,
        scope: Option<BTreeSet<OperatorId>>,
        initial: Vec<Activation<CardinalityEstimate>>,
    ) -> Result<Estimates> {
        let work = CardinalityWork {
            config: self.config,
            measured: &self.measured,
            overridden,
            out: Estimates::default(),
        };
        let mut traversal = match scope {
            Some(scope) => Traversal::scoped(self.plan, work, scope),
            None => Traversal::new(self.plan, work),
        };
        traversal.traverse(initial)?;
        let visits = traversal.visits().to_vec();
        let mut out = traversal.into_work().out;
        out.visits = visits;
        Ok(out)
    }
}
