//! Channel conversion graph.
//!
//! Nodes are channel kinds, edges are registered conversions with a linear
//! cost in the number of records moved. Costs are non-negative and add up
//! along a path, so plain Dijkstra finds the cheapest chain.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap};

use serde::{Deserialize, Serialize};

use crossplan_core::cardinality::CardinalityEstimate;
use crossplan_core::cost::{CostRange, LoadProfile};
use crossplan_core::error::{Error, Result};
use crossplan_core::plan::{InputRef, OutputRef};
use crossplan_core::platform::{ChannelDescriptor, ChannelKind};

/// Directed capability: turn a `source` channel into a `target` channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConversion {
    pub source: ChannelKind,
    pub target: ChannelKind,
    pub load: LoadProfile,
}

impl ChannelConversion {
    pub fn new(source: impl Into<ChannelKind>, target: impl Into<ChannelKind>, load: LoadProfile) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            load,
        }
    }

    pub fn cost(&self, records: &CardinalityEstimate) -> CostRange {
        self.load.cost(records)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionPath {
    pub source: ChannelKind,
    pub steps: Vec<ChannelConversion>,
    pub cost: CostRange,
}

impl ConversionPath {
    fn direct(kind: ChannelKind) -> Self {
        Self {
            source: kind,
            steps: vec![],
            cost: CostRange::zero(),
        }
    }

    pub fn target(&self) -> &ChannelKind {
        self.steps.last().map(|s| &s.target).unwrap_or(&self.source)
    }

    pub fn is_direct(&self) -> bool {
        self.steps.is_empty()
    }
}

/// How one output reaches all of its consumers: a trunk from the produced
/// kind to a shared hub kind, then one branch per consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Junction {
    pub output: OutputRef,
    pub trunk: ConversionPath,
    pub branches: Vec<(InputRef, ConversionPath)>,
    pub cost: CostRange,
}

impl Junction {
    pub fn hub(&self) -> &ChannelKind {
        self.trunk.target()
    }

    /// No conversion anywhere: producer and consumers share the kind.
    pub fn is_direct(&self) -> bool {
        self.trunk.is_direct() && self.branches.iter().all(|(_, p)| p.is_direct())
    }

    /// Kind arriving at `input`.
    pub fn kind_for(&self, input: InputRef) -> Option<&ChannelKind> {
        self.branches
            .iter()
            .find(|(i, _)| *i == input)
            .map(|(_, p)| p.target())
    }

    pub fn conversions(&self) -> impl Iterator<Item = &ChannelConversion> {
        self.trunk
            .steps
            .iter()
            .chain(self.branches.iter().flat_map(|(_, p)| p.steps.iter()))
    }

    pub fn scaled(mut self, factor: f64) -> Self {
        self.cost = self.cost.scaled(factor);
        self
    }
}

/// Priority for the Dijkstra heap.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Priority(f64);

impl Eq for Priority {}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Settled distance plus the edge that reached the kind (forward search) or
/// leaves it towards an accepted kind (backward search).
type Settled = BTreeMap<ChannelKind, (CostRange, Option<ChannelConversion>)>;

#[derive(Debug, Clone, Default)]
pub struct ConversionGraph {
    channels: BTreeMap<ChannelKind, ChannelDescriptor>,
    outgoing: BTreeMap<ChannelKind, Vec<ChannelConversion>>,
    incoming: BTreeMap<ChannelKind, Vec<ChannelConversion>>,
}

impl ConversionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_channel(&mut self, descriptor: ChannelDescriptor) {
        self.channels.insert(descriptor.kind.clone(), descriptor);
    }

    pub fn register(&mut self, conversion: ChannelConversion) -> Result<()> {
        let LoadProfile { fixed, per_record } = conversion.load;
        if !(fixed.is_finite() && per_record.is_finite()) || fixed < 0.0 || per_record < 0.0 {
            return Err(Error::Config(format!(
                "conversion {} -> {} has a negative or non-finite cost",
                conversion.source, conversion.target
            )));
        }
        self.incoming
            .entry(conversion.target.clone())
            .or_default()
            .push(conversion.clone());
        self.outgoing
            .entry(conversion.source.clone())
            .or_default()
            .push(conversion);
        Ok(())
    }

    pub fn descriptor(&self, kind: &ChannelKind) -> Option<&ChannelDescriptor> {
        self.channels.get(kind)
    }

    pub fn conversions(&self) -> impl Iterator<Item = &ChannelConversion> {
        self.outgoing.values().flatten()
    }

    /// Kinds without a registered descriptor only ever serve one consumer.
    fn serves(&self, kind: &ChannelKind, consumers: usize) -> bool {
        consumers <= 1 || self.channels.get(kind).is_some_and(|d| d.can_serve(consumers))
    }

    fn search(&self, starts: &[ChannelKind], records: &CardinalityEstimate, backward: bool) -> Settled {
        let mut settled: Settled = BTreeMap::new();
        let mut best: BTreeMap<ChannelKind, (CostRange, Option<ChannelConversion>)> = BTreeMap::new();
        let mut heap = BinaryHeap::new();
        for k in starts {
            best.insert(k.clone(), (CostRange::zero(), None));
            heap.push(Reverse((Priority(0.0), k.clone())));
        }

        while let Some(Reverse((Priority(d), kind))) = heap.pop() {
            if settled.contains_key(&kind) {
                continue;
            }
            let Some(entry) = best.get(&kind).cloned() else {
                continue;
            };
            if entry.0.expected() < d {
                continue;
            }
            let reached = entry.0;
            settled.insert(kind.clone(), entry);

            let edges = if backward {
                self.incoming.get(&kind)
            } else {
                self.outgoing.get(&kind)
            };
            for edge in edges.into_iter().flatten() {
                let next = if backward { &edge.source } else { &edge.target };
                if settled.contains_key(next) {
                    continue;
                }
                let cost = reached + edge.cost(records);
                let improves = best
                    .get(next)
                    .map_or(true, |(c, _)| cost.expected() < c.expected());
                if improves {
                    best.insert(next.clone(), (cost, Some(edge.clone())));
                    heap.push(Reverse((Priority(cost.expected()), next.clone())));
                }
            }
        }
        settled
    }

    fn trace_forward(source: &ChannelKind, to: &ChannelKind, settled: &Settled) -> Option<ConversionPath> {
        let cost = settled.get(to)?.0;
        let mut steps = vec![];
        let mut cur = to.clone();
        while let Some((_, Some(edge))) = settled.get(&cur) {
            steps.push(edge.clone());
            cur = edge.source.clone();
        }
        steps.reverse();
        Some(ConversionPath {
            source: source.clone(),
            steps,
            cost,
        })
    }

    fn trace_backward(from: &ChannelKind, settled: &Settled) -> Option<ConversionPath> {
        let cost = settled.get(from)?.0;
        let mut steps = vec![];
        let mut cur = from.clone();
        while let Some((_, Some(edge))) = settled.get(&cur) {
            steps.push(edge.clone());
            cur = edge.target.clone();
        }
        Some(ConversionPath {
            source: from.clone(),
            steps,
            cost,
        })
    }

    /// Cheapest chain from `source` to any of `accepted`, or `None` when no
    /// chain exists. A directly accepted kind costs exactly zero.
    pub fn find_path(
        &self,
        source: &ChannelKind,
        accepted: &[ChannelKind],
        records: &CardinalityEstimate,
    ) -> Option<ConversionPath> {
        if accepted.contains(source) {
            return Some(ConversionPath::direct(source.clone()));
        }
        let settled = self.search(std::slice::from_ref(source), records, false);
        let target = accepted
            .iter()
            .filter(|k| settled.contains_key(*k))
            .min_by(|a, b| settled[*a].0.cmp_expected(&settled[*b].0).then_with(|| a.cmp(b)))?;
        Self::trace_forward(source, target, &settled)
    }

    /// Connect one output to all of its consumers through a hub kind that can
    /// serve every consumer. Minimizes trunk cost plus the sum of branch
    /// costs; `None` when no hub works.
    pub fn junction(
        &self,
        output: OutputRef,
        source: &ChannelKind,
        consumers: &[(InputRef, &[ChannelKind])],
        records: &CardinalityEstimate,
    ) -> Option<Junction> {
        let n = consumers.len();
        let forward = self.search(std::slice::from_ref(source), records, false);
        let backward: Vec<Settled> = consumers
            .iter()
            .map(|(_, accepted)| self.search(accepted, records, true))
            .collect();

        let mut chosen: Option<(CostRange, &ChannelKind)> = None;
        for (hub, (trunk_cost, _)) in &forward {
            if !self.serves(hub, n) {
                continue;
            }
            let mut total = *trunk_cost;
            let mut reachable = true;
            for settled in &backward {
                match settled.get(hub) {
                    Some((c, _)) => total += *c,
                    None => {
                        reachable = false;
                        break;
                    }
                }
            }
            if !reachable {
                continue;
            }
            let better = chosen.map_or(true, |(c, _)| total.cmp_expected(&c) == Ordering::Less);
            if better {
                chosen = Some((total, hub));
            }
        }

        let (cost, hub) = chosen?;
        let trunk = Self::trace_forward(source, hub, &forward)?;
        let mut branches = Vec::with_capacity(n);
        for ((input, _), settled) in consumers.iter().zip(&backward) {
            branches.push((*input, Self::trace_backward(hub, settled)?));
        }
        Some(Junction {
            output,
            trunk,
            branches,
            cost,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossplan_core::id::OperatorId;

    fn kinds(ks: &[&str]) -> Vec<ChannelKind> {
        ks.iter().map(|k| ChannelKind::from(*k)).collect()
    }

    fn graph() -> ConversionGraph {
        let mut g = ConversionGraph::new();
        g.register_channel(ChannelDescriptor::new("stream", false, false));
        g.register_channel(ChannelDescriptor::new("collection", true, true));
        g.register_channel(ChannelDescriptor::new("rdd", false, false));
        g.register(ChannelConversion::new("stream", "collection", LoadProfile::fixed(1.0)))
            .unwrap();
        g.register(ChannelConversion::new("collection", "rdd", LoadProfile::fixed(5.0)))
            .unwrap();
        g.register(ChannelConversion::new("stream", "rdd", LoadProfile::fixed(20.0)))
            .unwrap();
        g
    }

    #[test]
    fn compatible_kinds_cost_nothing() {
        let g = graph();
        let p = g
            .find_path(&"rdd".into(), &kinds(&["rdd"]), &CardinalityEstimate::exact(100))
            .unwrap();
        assert!(p.is_direct());
        assert_eq!(p.cost, CostRange::zero());
    }

    #[test]
    fn picks_cheapest_chain() {
        let g = graph();
        let p = g
            .find_path(&"stream".into(), &kinds(&["rdd"]), &CardinalityEstimate::exact(1))
            .unwrap();
        assert_eq!(p.steps.len(), 2);
        assert_eq!(p.cost, CostRange::exact(6.0));
        assert_eq!(p.target(), &ChannelKind::from("rdd"));
    }

    #[test]
    fn unreachable_kind_is_infeasible() {
        let g = graph();
        assert!(g
            .find_path(&"rdd".into(), &kinds(&["stream"]), &CardinalityEstimate::exact(1))
            .is_none());
    }

    #[test]
    fn rejects_negative_cost() {
        let mut g = ConversionGraph::new();
        assert!(g
            .register(ChannelConversion::new("a", "b", LoadProfile::new(-1.0, 0.0)))
            .is_err());
    }

    #[test]
    fn fan_out_goes_through_a_reusable_hub() {
        let g = graph();
        let out = OutputRef::new(OperatorId::new(0), 0);
        let a = InputRef::new(OperatorId::new(1), 0);
        let b = InputRef::new(OperatorId::new(2), 0);
        let stream = kinds(&["stream"]);
        let rdd = kinds(&["rdd"]);

        // A stream cannot feed two readers, so it is collected first.
        let j = g
            .junction(
                out,
                &"stream".into(),
                &[(a, stream.as_slice()), (b, rdd.as_slice())],
                &CardinalityEstimate::exact(1),
            );
        assert!(j.is_none(), "collection cannot turn back into a stream");

        let coll = kinds(&["collection"]);
        let j = g
            .junction(
                out,
                &"stream".into(),
                &[(a, coll.as_slice()), (b, rdd.as_slice())],
                &CardinalityEstimate::exact(1),
            )
            .unwrap();
        assert_eq!(j.hub(), &ChannelKind::from("collection"));
        assert_eq!(j.cost, CostRange::exact(6.0));
        assert_eq!(j.kind_for(b), Some(&ChannelKind::from("rdd")));
    }
}
