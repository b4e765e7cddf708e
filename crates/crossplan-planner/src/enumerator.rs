//! Bottom-up plan enumeration.
//!
//! Every operator starts as its own enumeration holding one implementation
//! per catalogue candidate. Outputs are then visited in topological order of
//! their producer; each visit concatenates the enumerations that contain the
//! producer and all consumers, connects them with the cheapest junction, and
//! prunes. Candidates without a feasible junction are dropped. Operators in
//! loops are charged once per expected iteration.
//!
//! After each concatenation only the cheapest implementation survives for
//! every distinct choice on the scope's open operators (those with an edge
//! not yet connected), split by the single platform it stays on, if any.
//! Anything else can never beat it once the remaining edges are added.
//! If pruning leaves no feasible plan, the plan is enumerated again without
//! the pruning strategies.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, trace, warn};

use crossplan_core::cardinality::CardinalityEstimate;
use crossplan_core::config::OptimizerConfig;
use crossplan_core::cost::CostRange;
use crossplan_core::error::{Error, Result};
use crossplan_core::id::OperatorId;
use crossplan_core::plan::{InputRef, OutputRef, Plan};
use crossplan_core::platform::{ChannelKind, PlatformId};
use crossplan_estimate::Estimates;

use crate::catalogue::RealizedOperator;
use crate::context::JobContext;
use crate::cost::CostModel;
use crate::enumeration::{PlanEnumeration, PlanImplementation};
use crate::pruning::{self, PruningStrategy};

pub struct PlanEnumerator<'a> {
    plan: &'a Plan,
    context: &'a JobContext,
    estimates: &'a Estimates,
    config: &'a OptimizerConfig,
    pruning: Vec<Box<dyn PruningStrategy>>,
    fixed: BTreeMap<OperatorId, RealizedOperator>,
}

impl<'a> PlanEnumerator<'a> {
    pub fn new(
        plan: &'a Plan,
        context: &'a JobContext,
        estimates: &'a Estimates,
        config: &'a OptimizerConfig,
    ) -> Self {
        Self {
            plan,
            context,
            estimates,
            config,
            pruning: pruning::from_config(config),
            fixed: BTreeMap::new(),
        }
    }

    /// Replace the strategies derived from the config.
    pub fn with_pruning(mut self, strategies: Vec<Box<dyn PruningStrategy>>) -> Self {
        self.pruning = strategies;
        self
    }

    /// Pin operators that already ran to their executed form; they cost
    /// nothing further.
    pub fn with_fixed(
        mut self,
        fixed: impl IntoIterator<Item = (OperatorId, RealizedOperator)>,
    ) -> Self {
        self.fixed.extend(fixed);
        self
    }

    fn apply_pruning(strategies: &[Box<dyn PruningStrategy>], enumeration: &mut PlanEnumeration) {
        for strategy in strategies {
            enumeration.prune(strategy.as_ref());
        }
    }

    /// Operators of `enumeration`'s scope with an edge whose junction is not
    /// chosen yet. All implementations of a scope share the same junctions.
    fn open_operators(&self, enumeration: &PlanEnumeration) -> Vec<OperatorId> {
        let Some(first) = enumeration.implementations().first() else {
            return vec![];
        };
        let pending = |o: OutputRef| first.junction(o).is_none();
        enumeration
            .scope()
            .iter()
            .copied()
            .filter(|&op| {
                let operator = self.plan.op(op);
                let feeds = (0..operator.outputs.len())
                    .map(|i| OutputRef::new(op, i))
                    .any(|o| !self.plan.consumers(o).is_empty() && pending(o));
                let fed = (0..operator.inputs.len())
                    .filter_map(|i| self.plan.producer(InputRef::new(op, i)))
                    .any(|o| pending(o));
                feeds || fed
            })
            .collect()
    }

    /// Keep the cheapest implementation per open-operator choice and
    /// single-platform footprint.
    fn retain_pareto(&self, enumeration: &mut PlanEnumeration) {
        let open = self.open_operators(enumeration);
        let before = enumeration.len();
        enumeration.retain_distinct(|imp| {
            let choices: Vec<(OperatorId, PlatformId, String)> = open
                .iter()
                .filter_map(|op| {
                    imp.realized(*op)
                        .map(|r| (*op, r.platform.clone(), r.name.clone()))
                })
                .collect();
            let single = if imp.is_single_platform() {
                imp.platforms().iter().next().cloned()
            } else {
                None
            };
            (choices, single)
        });
        if enumeration.len() < before {
            trace!(before, after = enumeration.len(), open = open.len(), "dominated implementations dropped");
        }
    }

    fn unknown() -> CardinalityEstimate {
        CardinalityEstimate::new(0, 0, 0.0)
    }

    /// Cost of running `realized` for `op`, amortized over enclosing loops.
    pub fn operator_cost(&self, op: OperatorId, realized: &RealizedOperator) -> CostRange {
        let operator = self.plan.op(op);
        let inputs: Vec<CardinalityEstimate> = (0..operator.inputs.len())
            .map(|i| InputRef::new(op, i))
            .filter(|input| !self.plan.is_feedback(*input))
            .map(|input| {
                self.estimates
                    .input(self.plan, input)
                    .unwrap_or_else(Self::unknown)
            })
            .collect();
        let outputs: Vec<CardinalityEstimate> = (0..operator.outputs.len())
            .map(|i| {
                self.estimates
                    .output(OutputRef::new(op, i))
                    .unwrap_or_else(Self::unknown)
            })
            .collect();

        let platform_model = self
            .context
            .platforms
            .get(&realized.platform)
            .and_then(|p| p.cost_model());
        let cost = match (&realized.load, platform_model) {
            (Some(load), _) => load.estimate_cost(realized, &inputs, &outputs),
            (None, Some(model)) => model.estimate_cost(realized, &inputs, &outputs),
            (None, None) => self
                .config
                .default_load
                .estimate_cost(realized, &inputs, &outputs),
        };
        cost.scaled(self.factor(op))
    }

    fn factor(&self, op: OperatorId) -> f64 {
        self.plan
            .iteration_factor(op, self.config.default_expected_iterations)
    }

    /// Implementations of a single operator, one per candidate form.
    pub fn enumerate_operator(&self, op: OperatorId) -> PlanEnumeration {
        self.enumerate_operator_with(op, &self.pruning)
    }

    fn enumerate_operator_with(
        &self,
        op: OperatorId,
        strategies: &[Box<dyn PruningStrategy>],
    ) -> PlanEnumeration {
        let scope = BTreeSet::from([op]);
        if let Some(realized) = self.fixed.get(&op) {
            let single = PlanImplementation::single(op, realized.clone(), CostRange::zero());
            return PlanEnumeration::new(scope, vec![single]);
        }

        let operator = self.plan.op(op);
        let mut implementations = vec![];
        for platform in self.context.platforms.ids() {
            for realized in self.context.catalogue().candidates(operator, platform) {
                let cost = self.operator_cost(op, &realized);
                implementations.push(PlanImplementation::single(op, realized, cost));
            }
        }
        let mut enumeration = PlanEnumeration::new(scope, implementations);
        Self::apply_pruning(strategies, &mut enumeration);
        enumeration
    }

    /// Merge `parts`, which together must contain the producer of `output`
    /// and all of its consumers, and connect them through `output`.
    pub fn concatenate(
        &self,
        output: OutputRef,
        parts: Vec<PlanEnumeration>,
    ) -> Result<PlanEnumeration> {
        self.concatenate_with(output, parts, &self.pruning)
    }

    fn concatenate_with(
        &self,
        output: OutputRef,
        parts: Vec<PlanEnumeration>,
        strategies: &[Box<dyn PruningStrategy>],
    ) -> Result<PlanEnumeration> {
        let consumers = self.plan.consumers(output);
        let merged = PlanEnumeration::product(parts);
        let scope = merged.scope().clone();
        let involved = std::iter::once(output.operator).chain(consumers.iter().map(|c| c.operator));
        for op in involved {
            if !scope.contains(&op) {
                return Err(Error::Invariant(format!(
                    "concatenating {output} without {op} in scope"
                )));
            }
        }

        let records = self.estimates.output(output).unwrap_or_else(Self::unknown);
        // Charged as often as the edge runs: the least repeated endpoint.
        let factor = consumers
            .iter()
            .map(|c| self.factor(c.operator))
            .fold(self.factor(output.operator), f64::min);

        let before = merged.len();
        let implementations: Vec<PlanImplementation> = merged
            .into_implementations()
            .into_iter()
            .filter_map(|imp| {
                let source = imp.realized(output.operator)?.produced(output.index)?.clone();
                let junction = {
                    let accepted = consumers
                        .iter()
                        .map(|c| imp.realized(c.operator).map(|r| (*c, r.accepted(c.index))))
                        .collect::<Option<Vec<(InputRef, &[ChannelKind])>>>()?;
                    self.context
                        .conversions
                        .junction(output, &source, &accepted, &records)?
                };
                Some(imp.with_junction(junction.scaled(factor)))
            })
            .collect();
        if implementations.len() < before {
            debug!(
                %output,
                dropped = before - implementations.len(),
                "dropped implementations without a feasible conversion"
            );
        }

        let mut enumeration = PlanEnumeration::new(scope, implementations);
        self.retain_pareto(&mut enumeration);
        Self::apply_pruning(strategies, &mut enumeration);
        Ok(enumeration)
    }

    /// Enumerate the whole plan. Pruning only ever costs optimality: when
    /// the pruned search finds nothing, it is repeated without pruning.
    pub fn enumerate(&self) -> Result<PlanEnumeration> {
        match self.enumerate_with(&self.pruning) {
            Err(Error::NoFeasiblePlan { scope }) if !self.pruning.is_empty() => {
                warn!(%scope, "pruning left no feasible plan, enumerating without it");
                self.enumerate_with(&[])
            }
            other => other,
        }
    }

    fn enumerate_with(&self, strategies: &[Box<dyn PruningStrategy>]) -> Result<PlanEnumeration> {
        let mut parts: Vec<Option<PlanEnumeration>> = Vec::with_capacity(self.plan.len());
        let mut owner: BTreeMap<OperatorId, usize> = BTreeMap::new();

        for &op in self.plan.topological_order() {
            let enumeration = self.enumerate_operator_with(op, strategies);
            if enumeration.is_empty() {
                warn!(operator = %self.plan.op(op), "no candidate on any platform");
                return Err(Error::NoFeasiblePlan {
                    scope: self.plan.op(op).name.clone(),
                });
            }
            owner.insert(op, parts.len());
            parts.push(Some(enumeration));
        }

        for output in self.plan.outputs() {
            let consumers = self.plan.consumers(output);
            if consumers.is_empty() {
                continue;
            }
            let mut slots = BTreeSet::new();
            for op in std::iter::once(output.operator).chain(consumers.iter().map(|c| c.operator)) {
                let slot = owner
                    .get(&op)
                    .ok_or_else(|| Error::Invariant(format!("{op} was never enumerated")))?;
                slots.insert(*slot);
            }
            let taken: Vec<PlanEnumeration> = slots.iter().filter_map(|&i| parts[i].take()).collect();

            let merged = self.concatenate_with(output, taken, strategies)?;
            if merged.is_empty() {
                let scope = merged.scope_label(self.plan);
                warn!(%output, %scope, "no feasible implementation");
                return Err(Error::NoFeasiblePlan { scope });
            }
            let idx = parts.len();
            for op in merged.scope() {
                owner.insert(*op, idx);
            }
            parts.push(Some(merged));
        }

        let mut all = PlanEnumeration::product(parts.into_iter().flatten().collect());
        Self::apply_pruning(strategies, &mut all);
        if all.is_empty() {
            return Err(Error::NoFeasiblePlan {
                scope: all.scope_label(self.plan),
            });
        }
        debug!(implementations = all.len(), "enumeration complete");
        Ok(all)
    }

    /// Cheapest implementation of the whole plan.
    pub fn optimize(&self) -> Result<PlanImplementation> {
        let enumeration = self.enumerate()?;
        let best = enumeration
            .best()
            .cloned()
            .ok_or_else(|| Error::NoFeasiblePlan {
                scope: enumeration.scope_label(self.plan),
            })?;
        info!(
            cost = %best.cost(),
            platforms = best.platforms().len(),
            alternatives = enumeration.len(),
            "selected plan implementation"
        );
        Ok(best)
    }
}
