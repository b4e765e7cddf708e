//! Plan implementations and the enumerations that hold competing ones.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crossplan_core::cost::CostRange;
use crossplan_core::id::OperatorId;
use crossplan_core::plan::{OutputRef, Plan};
use crossplan_core::platform::PlatformId;

use crate::catalogue::RealizedOperator;
use crate::conversion::Junction;
use crate::pruning::PruningStrategy;

/// One costed platform and channel assignment for a set of operators.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanImplementation {
    operators: BTreeMap<OperatorId, RealizedOperator>,
    junctions: BTreeMap<OutputRef, Junction>,
    cost: CostRange,
    platforms: BTreeSet<PlatformId>,
}

impl PlanImplementation {
    /// A single realized operator.
    pub fn single(op: OperatorId, realized: RealizedOperator, cost: CostRange) -> Self {
        let platforms = BTreeSet::from([realized.platform.clone()]);
        Self {
            operators: BTreeMap::from([(op, realized)]),
            junctions: BTreeMap::new(),
            cost,
            platforms,
        }
    }

    pub fn realized(&self, op: OperatorId) -> Option<&RealizedOperator> {
        self.operators.get(&op)
    }

    pub fn operators(&self) -> impl Iterator<Item = (&OperatorId, &RealizedOperator)> {
        self.operators.iter()
    }

    pub fn junction(&self, output: OutputRef) -> Option<&Junction> {
        self.junctions.get(&output)
    }

    pub fn junctions(&self) -> impl Iterator<Item = &Junction> {
        self.junctions.values()
    }

    pub fn cost(&self) -> CostRange {
        self.cost
    }

    pub fn platforms(&self) -> &BTreeSet<PlatformId> {
        &self.platforms
    }

    pub fn is_single_platform(&self) -> bool {
        self.platforms.len() <= 1
    }

    /// Union of two implementations over disjoint scopes.
    pub fn combine(&self, other: &Self) -> Self {
        let mut out = self.clone();
        out.operators
            .extend(other.operators.iter().map(|(k, v)| (*k, v.clone())));
        out.junctions
            .extend(other.junctions.iter().map(|(k, v)| (*k, v.clone())));
        out.platforms.extend(other.platforms.iter().cloned());
        out.cost += other.cost;
        out
    }

    pub fn with_junction(mut self, junction: Junction) -> Self {
        self.cost += junction.cost;
        self.junctions.insert(junction.output, junction);
        self
    }

    /// Cheaper first; ties broken by the assignment itself so the order is
    /// total and deterministic.
    pub fn rank(&self, other: &Self) -> Ordering {
        self.cost.cmp_expected(&other.cost).then_with(|| {
            let a = self.operators.iter().map(|(id, r)| (id, &r.platform, &r.name));
            let b = other.operators.iter().map(|(id, r)| (id, &r.platform, &r.name));
            a.cmp(b)
        })
    }

    /// `operator@platform` list, in id order.
    pub fn describe(&self, plan: &Plan) -> String {
        self.operators
            .iter()
            .map(|(id, r)| match plan.get(*id) {
                Some(op) => format!("{}@{}", op.name, r.platform),
                None => format!("{id}@{}", r.platform),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Competing implementations for one scope (a set of operators), kept
/// sorted by `PlanImplementation::rank`.
#[derive(Debug, Clone, Default)]
pub struct PlanEnumeration {
    scope: BTreeSet<OperatorId>,
    implementations: Vec<PlanImplementation>,
}

impl PlanEnumeration {
    pub fn new(scope: BTreeSet<OperatorId>, mut implementations: Vec<PlanImplementation>) -> Self {
        implementations.sort_by(|a, b| a.rank(b));
        implementations.dedup();
        Self {
            scope,
            implementations,
        }
    }

    pub fn scope(&self) -> &BTreeSet<OperatorId> {
        &self.scope
    }

    pub fn implementations(&self) -> &[PlanImplementation] {
        &self.implementations
    }

    pub fn into_implementations(self) -> Vec<PlanImplementation> {
        self.implementations
    }

    pub fn len(&self) -> usize {
        self.implementations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.implementations.is_empty()
    }

    /// Minimum-cost implementation.
    pub fn best(&self) -> Option<&PlanImplementation> {
        self.implementations.first()
    }

    pub fn prune(&mut self, strategy: &dyn PruningStrategy) {
        strategy.prune(self);
    }

    pub fn retain(&mut self, f: impl FnMut(&PlanImplementation) -> bool) {
        self.implementations.retain(f);
    }

    pub fn truncate(&mut self, k: usize) {
        self.implementations.truncate(k);
    }

    /// Keep only the cheapest implementation for each distinct `key`.
    pub fn retain_distinct<K: Ord>(&mut self, mut key: impl FnMut(&PlanImplementation) -> K) {
        let mut seen = BTreeSet::new();
        self.implementations.retain(|imp| seen.insert(key(imp)));
    }

    /// Cross product of enumerations over disjoint scopes, no junctions.
    pub fn product(parts: Vec<PlanEnumeration>) -> PlanEnumeration {
        let mut scope = BTreeSet::new();
        let mut acc: Vec<PlanImplementation> = vec![];
        for (i, part) in parts.into_iter().enumerate() {
            scope.extend(part.scope.iter().copied());
            acc = if i == 0 {
                part.implementations
            } else {
                acc.iter()
                    .flat_map(|a| part.implementations.iter().map(move |b| a.combine(b)))
                    .collect()
            };
        }
        PlanEnumeration::new(scope, acc)
    }

    /// Operator names in scope, for diagnostics.
    pub fn scope_label(&self, plan: &Plan) -> String {
        self.scope
            .iter()
            .map(|id| plan.get(*id).map_or_else(|| id.to_string(), |op| op.name.clone()))
            .collect::<Vec<_>>()
            .join(",")
    }
}
