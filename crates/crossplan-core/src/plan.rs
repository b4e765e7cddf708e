//! Logical plan model: operators with typed slots and explicit loop regions.
//!
//! The plan is an arena. Operators are addressed by `OperatorId` (their index)
//! and slots by `(operator, index)` references, so nothing holds references
//! into anything else and the graph has no ownership cycles. Loop back-edges
//! are ordinary connections into an input slot flagged `feedback`; every
//! ordering computed here ignores them, which keeps the scheduling graph a DAG.
//!
//! Plans are built once per job through `PlanBuilder` and are immutable after
//! `build()`.

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};
use std::fmt;

use crate::cardinality::CardinalityEstimate;
use crate::error::{Error, Result};
use crate::id::{LoopId, OperatorId};

/// Index of the initial input of a loop head.
pub const LOOP_INITIAL_INPUT: usize = 0;
/// Index of the feedback input of a loop head.
pub const LOOP_FEEDBACK_INPUT: usize = 1;
/// Index of the output that feeds the loop body.
pub const LOOP_ITERATION_OUTPUT: usize = 0;
/// Index of the output that leaves the loop.
pub const LOOP_FINAL_OUTPUT: usize = 1;

/// Reference to an output slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutputRef {
    pub operator: OperatorId,
    pub index: usize,
}

/// Reference to an input slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InputRef {
    pub operator: OperatorId,
    pub index: usize,
}

impl OutputRef {
    pub const fn new(operator: OperatorId, index: usize) -> Self {
        Self { operator, index }
    }
}

impl InputRef {
    pub const fn new(operator: OperatorId, index: usize) -> Self {
        Self { operator, index }
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.out{}", self.operator, self.index)
    }
}

impl fmt::Display for InputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.in{}", self.operator, self.index)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSlot {
    pub name: String,
    pub element_type: String,
    /// Broadcast inputs are side inputs; they may not gate estimation.
    pub broadcast: bool,
    /// Loop back-edge target; optional on the first estimation pass.
    pub feedback: bool,
}

impl InputSlot {
    pub fn new(name: impl Into<String>, element_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            element_type: element_type.into(),
            broadcast: false,
            feedback: false,
        }
    }

    pub fn broadcast(mut self) -> Self {
        self.broadcast = true;
        self
    }

    pub fn feedback(mut self) -> Self {
        self.feedback = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSlot {
    pub name: String,
    pub element_type: String,
}

impl OutputSlot {
    pub fn new(name: impl Into<String>, element_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            element_type: element_type.into(),
        }
    }
}

/// Structural shape of an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatorKind {
    Source,
    Sink,
    Unary,
    Binary,
    /// Repeat-style loop head: inputs `[initial, feedback]`, outputs
    /// `[iteration, final]`. `iterations` is the configured count.
    LoopHead { iterations: u32 },
}

/// Role of an operator within the plan, derived from its kind, its loop
/// membership, and what feeds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatorRole {
    Source,
    Sink,
    Unary,
    Binary,
    LoopHead,
    LoopBody,
    LoopExit,
}

/// How an operator derives output cardinalities from its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorSpec {
    /// Always `[n, n]` (collection source, count, global reduce).
    Fixed(u64),
    /// An uncertain but known interval, typically a source.
    Interval(CardinalityEstimate),
    /// Output equals the first input (map, sort, projection).
    Identity,
    /// First input scaled by a factor (filter `< 1`, flat-map `> 1`).
    Selectivity(f64),
    /// Sum of all regular inputs.
    Union,
    /// Product of the two regular inputs.
    Cartesian,
    /// Product of the two regular inputs scaled by a selectivity.
    Join { selectivity: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operator {
    pub id: OperatorId,
    pub name: String,
    pub kind: OperatorKind,
    pub inputs: Vec<InputSlot>,
    pub outputs: Vec<OutputSlot>,
    /// `None` falls back to the configured default estimator.
    pub estimator: Option<EstimatorSpec>,
    /// Innermost loop this operator belongs to (a head belongs to its own loop).
    pub loop_region: Option<LoopId>,
}

impl Operator {
    pub fn is_loop_head(&self) -> bool {
        matches!(self.kind, OperatorKind::LoopHead { .. })
    }

    pub fn output(&self, index: usize) -> OutputRef {
        OutputRef::new(self.id, index)
    }

    pub fn input(&self, index: usize) -> InputRef {
        InputRef::new(self.id, index)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.name, self.id.get())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopRegion {
    pub id: LoopId,
    pub head: OperatorId,
    /// Every operator whose innermost loop is this one, head included.
    pub members: BTreeSet<OperatorId>,
    pub parent: Option<LoopId>,
    /// Optimizer hint for amortizing the body cost; the real count is only
    /// known at run time.
    pub expected_iterations: Option<u32>,
}

/// Immutable logical plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    operators: Vec<Operator>,
    loops: Vec<LoopRegion>,
    #[serde(with = "pairs")]
    producers: BTreeMap<InputRef, OutputRef>,
    #[serde(with = "pairs")]
    consumers: BTreeMap<OutputRef, Vec<InputRef>>,
    topo: Vec<OperatorId>,
}

/// Struct-keyed maps serialize as `[key, value]` sequences so they survive
/// formats (JSON) that only allow string keys.
mod pairs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S, K, V>(map: &BTreeMap<K, V>, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        K: Serialize,
        V: Serialize,
    {
        s.collect_seq(map.iter())
    }

    pub fn deserialize<'de, D, K, V>(d: D) -> Result<BTreeMap<K, V>, D::Error>
    where
        D: Deserializer<'de>,
        K: Deserialize<'de> + Ord,
        V: Deserialize<'de>,
    {
        Vec::<(K, V)>::deserialize(d).map(|v| v.into_iter().collect())
    }
}

impl Plan {
    /// Operator by id. Ids are arena indices handed out by this plan's
    /// builder; passing a foreign id is a caller bug and panics.
    pub fn op(&self, id: OperatorId) -> &Operator {
        &self.operators[id.index()]
    }

    pub fn get(&self, id: OperatorId) -> Option<&Operator> {
        self.operators.get(id.index())
    }

    pub fn operators(&self) -> impl Iterator<Item = &Operator> {
        self.operators.iter()
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    pub fn producer(&self, input: InputRef) -> Option<OutputRef> {
        self.producers.get(&input).copied()
    }

    pub fn consumers(&self, output: OutputRef) -> &[InputRef] {
        self.consumers
            .get(&output)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Operators ordered so that every operator comes after all of its
    /// non-feedback predecessors. Ties break on the lower id.
    pub fn topological_order(&self) -> &[OperatorId] {
        &self.topo
    }

    pub fn sources(&self) -> impl Iterator<Item = &Operator> {
        self.operators
            .iter()
            .filter(|op| op.kind == OperatorKind::Source)
    }

    pub fn sinks(&self) -> impl Iterator<Item = &Operator> {
        self.operators
            .iter()
            .filter(|op| op.kind == OperatorKind::Sink)
    }

    pub fn loops(&self) -> &[LoopRegion] {
        &self.loops
    }

    pub fn loop_region(&self, id: LoopId) -> Option<&LoopRegion> {
        self.loops.get(id.index())
    }

    /// Whether `op` sits in `loop_id`, directly or through nested loops.
    pub fn in_loop(&self, op: OperatorId, loop_id: LoopId) -> bool {
        let mut cur = self.op(op).loop_region;
        while let Some(l) = cur {
            if l == loop_id {
                return true;
            }
            cur = self.loop_region(l).and_then(|r| r.parent);
        }
        false
    }

    /// Distinct producing operators of `op`, optionally including feedback.
    pub fn predecessors(&self, op: OperatorId, include_feedback: bool) -> Vec<OperatorId> {
        let operator = self.op(op);
        let mut out = BTreeSet::new();
        for (i, slot) in operator.inputs.iter().enumerate() {
            if slot.feedback && !include_feedback {
                continue;
            }
            if let Some(p) = self.producer(InputRef::new(op, i)) {
                out.insert(p.operator);
            }
        }
        out.into_iter().collect()
    }

    /// Distinct consuming operators of `op` (feedback edges included).
    pub fn successors(&self, op: OperatorId) -> Vec<OperatorId> {
        let operator = self.op(op);
        let mut out = BTreeSet::new();
        for i in 0..operator.outputs.len() {
            for c in self.consumers(OutputRef::new(op, i)) {
                out.insert(c.operator);
            }
        }
        out.into_iter().collect()
    }

    /// Whether the edge into `input` is a loop back-edge.
    pub fn is_feedback(&self, input: InputRef) -> bool {
        self.get(input.operator)
            .and_then(|op| op.inputs.get(input.index))
            .map(|s| s.feedback)
            .unwrap_or(false)
    }

    /// Amortization factor for `op`: the product of the expected iteration
    /// counts of every loop enclosing it.
    pub fn iteration_factor(&self, op: OperatorId, default_iterations: u32) -> f64 {
        let mut factor = 1.0;
        let mut cur = self.op(op).loop_region;
        while let Some(l) = cur {
            let Some(region) = self.loop_region(l) else {
                break;
            };
            factor *= region.expected_iterations.unwrap_or(default_iterations).max(1) as f64;
            cur = region.parent;
        }
        factor
    }

    pub fn role(&self, op: OperatorId) -> OperatorRole {
        let operator = self.op(op);
        match operator.kind {
            OperatorKind::LoopHead { .. } => return OperatorRole::LoopHead,
            _ if operator.loop_region.is_some() => return OperatorRole::LoopBody,
            _ => {}
        }
        let exits_loop = (0..operator.inputs.len()).any(|i| {
            self.producer(InputRef::new(op, i)).is_some_and(|p| {
                p.index == LOOP_FINAL_OUTPUT && self.op(p.operator).is_loop_head()
            })
        });
        if exits_loop {
            return OperatorRole::LoopExit;
        }
        match operator.kind {
            OperatorKind::Source => OperatorRole::Source,
            OperatorKind::Sink => OperatorRole::Sink,
            OperatorKind::Binary => OperatorRole::Binary,
            _ => OperatorRole::Unary,
        }
    }

    /// Every output slot in topological order of its producer.
    pub fn outputs(&self) -> Vec<OutputRef> {
        self.topo
            .iter()
            .flat_map(|&id| (0..self.op(id).outputs.len()).map(move |i| OutputRef::new(id, i)))
            .collect()
    }
}

/// Incremental constructor for `Plan`.
#[derive(Debug, Default)]
pub struct PlanBuilder {
    operators: Vec<Operator>,
    loops: Vec<LoopRegion>,
    edges: Vec<(OutputRef, InputRef)>,
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an operator with explicit slots.
    pub fn add_operator(
        &mut self,
        name: impl Into<String>,
        kind: OperatorKind,
        inputs: Vec<InputSlot>,
        outputs: Vec<OutputSlot>,
        estimator: Option<EstimatorSpec>,
    ) -> OperatorId {
        let id = OperatorId::next_in(&self.operators);
        self.operators.push(Operator {
            id,
            name: name.into(),
            kind,
            inputs,
            outputs,
            estimator,
            loop_region: None,
        });
        id
    }

    pub fn add_source(
        &mut self,
        name: impl Into<String>,
        element_type: &str,
        estimator: Option<EstimatorSpec>,
    ) -> OperatorId {
        self.add_operator(
            name,
            OperatorKind::Source,
            vec![],
            vec![OutputSlot::new("out", element_type)],
            estimator,
        )
    }

    pub fn add_unary(
        &mut self,
        name: impl Into<String>,
        input_type: &str,
        output_type: &str,
        estimator: Option<EstimatorSpec>,
    ) -> OperatorId {
        self.add_operator(
            name,
            OperatorKind::Unary,
            vec![InputSlot::new("in", input_type)],
            vec![OutputSlot::new("out", output_type)],
            estimator,
        )
    }

    pub fn add_binary(
        &mut self,
        name: impl Into<String>,
        input_types: (&str, &str),
        output_type: &str,
        estimator: Option<EstimatorSpec>,
    ) -> OperatorId {
        self.add_operator(
            name,
            OperatorKind::Binary,
            vec![
                InputSlot::new("in0", input_types.0),
                InputSlot::new("in1", input_types.1),
            ],
            vec![OutputSlot::new("out", output_type)],
            estimator,
        )
    }

    pub fn add_sink(&mut self, name: impl Into<String>, element_type: &str) -> OperatorId {
        self.add_operator(
            name,
            OperatorKind::Sink,
            vec![InputSlot::new("in", element_type)],
            vec![],
            None,
        )
    }

    /// Add a loop head and open a loop region around it.
    pub fn add_loop_head(
        &mut self,
        name: impl Into<String>,
        element_type: &str,
        iterations: u32,
    ) -> (OperatorId, LoopId) {
        let head = self.add_operator(
            name,
            OperatorKind::LoopHead { iterations },
            vec![
                InputSlot::new("initial", element_type),
                InputSlot::new("feedback", element_type).feedback(),
            ],
            vec![
                OutputSlot::new("iteration", element_type),
                OutputSlot::new("final", element_type),
            ],
            None,
        );
        let loop_id = LoopId::next_in(&self.loops);
        self.loops.push(LoopRegion {
            id: loop_id,
            head,
            members: BTreeSet::from([head]),
            parent: None,
            expected_iterations: None,
        });
        self.operators[head.index()].loop_region = Some(loop_id);
        (head, loop_id)
    }

    /// Place `op` in the body of `loop_id`.
    pub fn add_to_loop(&mut self, loop_id: LoopId, op: OperatorId) -> Result<()> {
        let region = self
            .loops
            .get_mut(loop_id.index())
            .ok_or_else(|| Error::Plan(format!("unknown loop {loop_id}")))?;
        let operator = self
            .operators
            .get_mut(op.index())
            .ok_or_else(|| Error::Plan(format!("unknown operator {op}")))?;
        if let Some(existing) = operator.loop_region {
            if existing != loop_id {
                return Err(Error::Plan(format!(
                    "{op} already belongs to {existing}"
                )));
            }
        }
        operator.loop_region = Some(loop_id);
        region.members.insert(op);
        Ok(())
    }

    /// Nest `inner` inside `outer`.
    pub fn nest_loop(&mut self, inner: LoopId, outer: LoopId) -> Result<()> {
        if inner == outer || outer.index() >= self.loops.len() {
            return Err(Error::Plan(format!("cannot nest {inner} in {outer}")));
        }
        // `outer` must not already sit somewhere inside `inner`.
        let mut cur = Some(outer);
        while let Some(l) = cur {
            if l == inner {
                return Err(Error::Plan(format!(
                    "nesting {inner} in {outer} would make the loops enclose each other"
                )));
            }
            cur = self.loops.get(l.index()).and_then(|r| r.parent);
        }
        let region = self
            .loops
            .get_mut(inner.index())
            .ok_or_else(|| Error::Plan(format!("unknown loop {inner}")))?;
        region.parent = Some(outer);
        Ok(())
    }

    pub fn expect_iterations(&mut self, loop_id: LoopId, iterations: u32) -> Result<()> {
        let region = self
            .loops
            .get_mut(loop_id.index())
            .ok_or_else(|| Error::Plan(format!("unknown loop {loop_id}")))?;
        region.expected_iterations = Some(iterations);
        Ok(())
    }

    pub fn connect(&mut self, from: OperatorId, output: usize, to: OperatorId, input: usize) {
        self.edges
            .push((OutputRef::new(from, output), InputRef::new(to, input)));
    }

    /// Validate and freeze the plan.
    pub fn build(self) -> Result<Plan> {
        let PlanBuilder {
            operators,
            loops,
            edges,
        } = self;

        let mut producers = BTreeMap::new();
        let mut consumers: BTreeMap<OutputRef, Vec<InputRef>> = BTreeMap::new();
        for (out, inp) in edges {
            let producer = operators
                .get(out.operator.index())
                .ok_or_else(|| Error::Plan(format!("unknown producer {}", out.operator)))?;
            let consumer = operators
                .get(inp.operator.index())
                .ok_or_else(|| Error::Plan(format!("unknown consumer {}", inp.operator)))?;
            let out_slot = producer
                .outputs
                .get(out.index)
                .ok_or_else(|| Error::Plan(format!("{producer} has no output {}", out.index)))?;
            let in_slot = consumer
                .inputs
                .get(inp.index)
                .ok_or_else(|| Error::Plan(format!("{consumer} has no input {}", inp.index)))?;
            if out_slot.element_type != in_slot.element_type {
                return Err(Error::Plan(format!(
                    "type mismatch {out} ({}) -> {inp} ({})",
                    out_slot.element_type, in_slot.element_type
                )));
            }
            if producers.insert(inp, out).is_some() {
                return Err(Error::Plan(format!("{inp} is connected more than once")));
            }
            consumers.entry(out).or_default().push(inp);
        }

        for op in &operators {
            for (i, slot) in op.inputs.iter().enumerate() {
                let inp = InputRef::new(op.id, i);
                let Some(out) = producers.get(&inp) else {
                    return Err(Error::Plan(format!("{op} input '{}' is unconnected", slot.name)));
                };
                if slot.feedback {
                    let loop_id = op.loop_region.ok_or_else(|| {
                        Error::Plan(format!("{op} has a feedback input outside a loop"))
                    })?;
                    if !member_of(&operators, &loops, out.operator, loop_id) {
                        return Err(Error::Plan(format!(
                            "feedback into {op} comes from outside its loop"
                        )));
                    }
                }
            }
        }

        for region in &loops {
            let head = &operators[region.head.index()];
            for c in consumers
                .get(&OutputRef::new(head.id, LOOP_ITERATION_OUTPUT))
                .into_iter()
                .flatten()
            {
                if !member_of(&operators, &loops, c.operator, region.id) {
                    return Err(Error::Plan(format!(
                        "{} consumes the iteration output of {head} but is not in its loop",
                        operators[c.operator.index()]
                    )));
                }
            }
        }

        let topo = topological_sort(&operators, &producers)?;
        Ok(Plan {
            operators,
            loops,
            producers,
            consumers,
            topo,
        })
    }
}

fn member_of(operators: &[Operator], loops: &[LoopRegion], op: OperatorId, target: LoopId) -> bool {
    let mut cur = operators.get(op.index()).and_then(|o| o.loop_region);
    while let Some(l) = cur {
        if l == target {
            return true;
        }
        cur = loops.get(l.index()).and_then(|r| r.parent);
    }
    false
}

/// Kahn's algorithm over non-feedback edges; smallest ready id first.
fn topological_sort(
    operators: &[Operator],
    producers: &BTreeMap<InputRef, OutputRef>,
) -> Result<Vec<OperatorId>> {
    let mut in_degree = vec![0usize; operators.len()];
    let mut dependents: Vec<Vec<OperatorId>> = vec![vec![]; operators.len()];
    for (inp, out) in producers {
        if operators[inp.operator.index()].inputs[inp.index].feedback {
            continue;
        }
        in_degree[inp.operator.index()] += 1;
        dependents[out.operator.index()].push(inp.operator);
    }

    let mut ready: BinaryHeap<Reverse<OperatorId>> = operators
        .iter()
        .filter(|op| in_degree[op.id.index()] == 0)
        .map(|op| Reverse(op.id))
        .collect();
    let mut order = Vec::with_capacity(operators.len());
    while let Some(Reverse(id)) = ready.pop() {
        order.push(id);
        for &d in &dependents[id.index()] {
            in_degree[d.index()] -= 1;
            if in_degree[d.index()] == 0 {
                ready.push(Reverse(d));
            }
        }
    }

    if order.len() != operators.len() {
        return Err(Error::Plan(
            "cycle outside of declared loop feedback edges".into(),
        ));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_builds_in_order() {
        let mut b = PlanBuilder::new();
        let src = b.add_source("src", "int", Some(EstimatorSpec::Fixed(10)));
        let map = b.add_unary("map", "int", "int", Some(EstimatorSpec::Identity));
        let sink = b.add_sink("sink", "int");
        b.connect(src, 0, map, 0);
        b.connect(map, 0, sink, 0);
        let plan = b.build().unwrap();

        assert_eq!(plan.topological_order(), &[src, map, sink]);
        assert_eq!(plan.consumers(OutputRef::new(src, 0)), &[InputRef::new(map, 0)]);
        assert_eq!(plan.role(src), OperatorRole::Source);
        assert_eq!(plan.role(sink), OperatorRole::Sink);
    }

    #[test]
    fn rejects_type_mismatch_and_dangling_inputs() {
        let mut b = PlanBuilder::new();
        let src = b.add_source("src", "int", None);
        let map = b.add_unary("map", "string", "string", None);
        b.connect(src, 0, map, 0);
        assert!(matches!(b.build(), Err(Error::Plan(_))));

        let mut b = PlanBuilder::new();
        b.add_unary("map", "int", "int", None);
        assert!(matches!(b.build(), Err(Error::Plan(_))));
    }

    #[test]
    fn rejects_cycles_without_feedback() {
        let mut b = PlanBuilder::new();
        let a = b.add_binary("a", ("int", "int"), "int", None);
        let c = b.add_unary("c", "int", "int", None);
        let src = b.add_source("src", "int", None);
        b.connect(src, 0, a, 0);
        b.connect(c, 0, a, 1);
        b.connect(a, 0, c, 0);
        assert!(b.build().is_err());
    }

    #[test]
    fn loop_roles_and_feedback() {
        let mut b = PlanBuilder::new();
        let src = b.add_source("src", "int", None);
        let (head, lp) = b.add_loop_head("repeat", "int", 3);
        let body = b.add_unary("step", "int", "int", None);
        let sink = b.add_sink("sink", "int");
        b.add_to_loop(lp, body).unwrap();
        b.connect(src, 0, head, LOOP_INITIAL_INPUT);
        b.connect(head, LOOP_ITERATION_OUTPUT, body, 0);
        b.connect(body, 0, head, LOOP_FEEDBACK_INPUT);
        b.connect(head, LOOP_FINAL_OUTPUT, sink, 0);
        b.expect_iterations(lp, 4).unwrap();
        let plan = b.build().unwrap();

        assert_eq!(plan.role(head), OperatorRole::LoopHead);
        assert_eq!(plan.role(body), OperatorRole::LoopBody);
        assert_eq!(plan.role(sink), OperatorRole::LoopExit);
        assert!(plan.is_feedback(InputRef::new(head, LOOP_FEEDBACK_INPUT)));
        assert_eq!(plan.predecessors(head, false), vec![src]);
        assert_eq!(plan.predecessors(head, true), vec![src, body]);
        assert_eq!(plan.iteration_factor(body, 10), 4.0);
        assert_eq!(plan.iteration_factor(src, 10), 1.0);
    }

    #[test]
    fn loops_cannot_enclose_each_other() {
        let mut b = PlanBuilder::new();
        let (_, a) = b.add_loop_head("a", "int", 2);
        let (_, c) = b.add_loop_head("b", "int", 2);
        let (_, d) = b.add_loop_head("c", "int", 2);
        b.nest_loop(a, c).unwrap();
        assert!(matches!(b.nest_loop(c, a), Err(Error::Plan(_))));
        b.nest_loop(c, d).unwrap();
        assert!(matches!(b.nest_loop(d, a), Err(Error::Plan(_))));
        assert!(matches!(b.nest_loop(a, a), Err(Error::Plan(_))));
    }

    #[test]
    fn iteration_consumers_must_be_inside_the_loop() {
        let mut b = PlanBuilder::new();
        let src = b.add_source("src", "int", None);
        let (head, _) = b.add_loop_head("repeat", "int", 3);
        let outside = b.add_unary("outside", "int", "int", None);
        b.connect(src, 0, head, LOOP_INITIAL_INPUT);
        b.connect(head, LOOP_ITERATION_OUTPUT, outside, 0);
        b.connect(outside, 0, head, LOOP_FEEDBACK_INPUT);
        assert!(b.build().is_err());
    }
}
