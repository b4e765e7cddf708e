//! Property tests over randomly shaped plans and enumerations.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use proptest::prelude::*;
use proptest::sample::Index;

use crossplan_core::prelude::*;
use crossplan_estimate::CardinalityEstimator;
use crossplan_planner::{
    BasicPlatform, ChannelConversion, JobContext, PlanEnumeration, PlanEnumerator,
    PlanImplementation, Plugin, PruningStrategy, RealizedOperator, SinglePlatformPruning,
};

/// Operator `i` reads from zero, one, or two earlier operators.
fn random_dag(shape: &[(Index, Index, usize)]) -> (Plan, Vec<Vec<OperatorId>>) {
    let mut b = PlanBuilder::new();
    let mut ids: Vec<OperatorId> = vec![];
    let mut preds = vec![];
    for (i, (a, c, arity)) in shape.iter().enumerate() {
        let mut from: Vec<OperatorId> = if i == 0 {
            vec![]
        } else {
            [a.index(i), c.index(i)]
                .into_iter()
                .take(*arity)
                .map(|j| ids[j])
                .collect()
        };
        from.dedup();
        let name = format!("op{i}");
        let id = match from.len() {
            0 => b.add_source(name, "t", Some(EstimatorSpec::Fixed(i as u64 + 1))),
            1 => b.add_unary(name, "t", "t", Some(EstimatorSpec::Identity)),
            _ => b.add_binary(name, ("t", "t"), "t", Some(EstimatorSpec::Union)),
        };
        for (slot, p) in from.iter().enumerate() {
            b.connect(*p, 0, id, slot);
        }
        ids.push(id);
        preds.push(from);
    }
    (b.build().unwrap(), preds)
}

fn form(platform: &str, op: &str, inputs: usize, outputs: usize, cost: u32) -> RealizedOperator {
    RealizedOperator::uniform(platform, op, inputs, outputs, format!("{platform}.coll"))
        .with_load(LoadProfile::fixed(cost as f64))
}

fn plugin(name: &str) -> Plugin {
    Plugin::new(Arc::new(
        BasicPlatform::new(name).with_channel(ChannelDescriptor::new(format!("{name}.coll"), true, true)),
    ))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_estimation_visits_each_operator_once_after_its_inputs(
        shape in prop::collection::vec((any::<Index>(), any::<Index>(), 0usize..3), 1..12)
    ) {
        let (plan, preds) = random_dag(&shape);
        let est = CardinalityEstimator::new(&plan, &OptimizerConfig::default())
            .estimate()
            .unwrap();
        let visits = est.visits();
        prop_assert_eq!(visits.len(), plan.len());

        let position: BTreeMap<OperatorId, usize> =
            visits.iter().enumerate().map(|(i, op)| (*op, i)).collect();
        prop_assert_eq!(position.len(), plan.len());
        for (i, from) in preds.iter().enumerate() {
            let me = position[&OperatorId::new(i as u64)];
            for p in from {
                prop_assert!(position[p] < me);
            }
        }
    }

    #[test]
    fn prop_chain_optimum_is_independent_of_merge_order(
        x_costs in prop::collection::vec(1u32..50, 3),
        y_costs in prop::collection::vec(1u32..50, 3),
        x_to_y in 0u32..30,
        y_to_x in 0u32..30,
    ) {
        let mut b = PlanBuilder::new();
        let a = b.add_source("a", "t", Some(EstimatorSpec::Fixed(10)));
        let m = b.add_unary("m", "t", "t", None);
        let z = b.add_sink("z", "t");
        b.connect(a, 0, m, 0);
        b.connect(m, 0, z, 0);
        let plan = b.build().unwrap();

        let arity = [(0, 1), (1, 1), (1, 0)];
        let mut x = plugin("x")
            .convert(ChannelConversion::new("x.coll", "y.coll", LoadProfile::fixed(x_to_y as f64)));
        let mut y = plugin("y")
            .convert(ChannelConversion::new("y.coll", "x.coll", LoadProfile::fixed(y_to_x as f64)));
        for (i, name) in ["a", "m", "z"].iter().enumerate() {
            let (ins, outs) = arity[i];
            x = x.map(*name, form("x", name, ins, outs, x_costs[i]));
            y = y.map(*name, form("y", name, ins, outs, y_costs[i]));
        }
        let ctx = JobContext::from_plugins([x, y]).unwrap();
        let config = OptimizerConfig::default();
        let est = CardinalityEstimator::new(&plan, &config).estimate().unwrap();
        let e = PlanEnumerator::new(&plan, &ctx, &est, &config);

        let a_out = OutputRef::new(a, 0);
        let m_out = OutputRef::new(m, 0);
        let ab = e.concatenate(a_out, vec![e.enumerate_operator(a), e.enumerate_operator(m)]).unwrap();
        let left = e.concatenate(m_out, vec![ab, e.enumerate_operator(z)]).unwrap();
        let bc = e.concatenate(m_out, vec![e.enumerate_operator(m), e.enumerate_operator(z)]).unwrap();
        let right = e.concatenate(a_out, vec![e.enumerate_operator(a), bc]).unwrap();

        let brute = (0u32..8)
            .map(|mask| {
                let on_x = |i: usize| mask & (1 << i) == 0;
                let mut total = 0u32;
                for i in 0..3 {
                    total += if on_x(i) { x_costs[i] } else { y_costs[i] };
                    if i > 0 && on_x(i - 1) != on_x(i) {
                        total += if on_x(i - 1) { x_to_y } else { y_to_x };
                    }
                }
                total
            })
            .min()
            .unwrap() as f64;

        prop_assert_eq!(left.best().unwrap().cost(), right.best().unwrap().cost());
        prop_assert_eq!(left.best().unwrap().cost(), CostRange::exact(brute));
        prop_assert_eq!(e.optimize().unwrap().cost(), CostRange::exact(brute));
    }

    #[test]
    fn prop_single_platform_pruning_never_empties(
        picks in prop::collection::vec((0usize..3, 0usize..3, 1u32..100), 1..8)
    ) {
        let platforms = ["p", "q", "r"];
        let first = OperatorId::new(0);
        let second = OperatorId::new(1);
        let implementations: Vec<PlanImplementation> = picks
            .iter()
            .map(|(i, j, cost)| {
                let a = PlanImplementation::single(
                    first,
                    form(platforms[*i], "a", 0, 1, 0),
                    CostRange::exact(*cost as f64),
                );
                let b = PlanImplementation::single(
                    second,
                    form(platforms[*j], "b", 1, 0, 0),
                    CostRange::zero(),
                );
                a.combine(&b)
            })
            .collect();
        let any_single = implementations.iter().any(|i| i.is_single_platform());

        let mut enumeration = PlanEnumeration::new(BTreeSet::from([first, second]), implementations);
        SinglePlatformPruning.prune(&mut enumeration);

        prop_assert!(!enumeration.is_empty());
        if any_single {
            prop_assert!(enumeration.implementations().iter().all(|i| i.is_single_platform()));
        }
    }
}
