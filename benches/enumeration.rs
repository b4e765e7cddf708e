use std::collections::BTreeSet;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use crossplan_core::prelude::*;
use crossplan_estimate::CardinalityEstimator;
use crossplan_exec::lower;
use crossplan_planner::{
    BasicPlatform, ChannelConversion, JobContext, PlanEnumerator, Plugin, RealizedOperator,
};

/// `width` parallel map chains of `depth` operators, unioned pairwise into
/// one sink.
fn wide_plan(width: usize, depth: usize) -> Plan {
    let mut b = PlanBuilder::new();
    let mut tails = Vec::with_capacity(width);
    for w in 0..width {
        let mut prev = b.add_source(format!("src{w}"), "t", Some(EstimatorSpec::Fixed(1000 * (w as u64 + 1))));
        for d in 0..depth {
            let op = b.add_unary(format!("map{w}_{d}"), "t", "t", Some(EstimatorSpec::Selectivity(0.8)));
            b.connect(prev, 0, op, 0);
            prev = op;
        }
        tails.push(prev);
    }
    let mut acc = tails[0];
    for (i, t) in tails.iter().enumerate().skip(1) {
        let u = b.add_binary(format!("union{i}"), ("t", "t"), "t", Some(EstimatorSpec::Union));
        b.connect(acc, 0, u, 0);
        b.connect(*t, 0, u, 1);
        acc = u;
    }
    let sink = b.add_sink("sink", "t");
    b.connect(acc, 0, sink, 0);
    b.build().expect("valid plan")
}

fn context(plan: &Plan) -> JobContext {
    let platforms = [("x", 1.0, 0.001), ("y", 10.0, 0.0001), ("z", 3.0, 0.0005)];
    let plugins = platforms.iter().map(|(name, fixed, per_record)| {
        let kind = format!("{name}.coll");
        let mut plugin = Plugin::new(Arc::new(
            BasicPlatform::new(*name)
                .with_channel(ChannelDescriptor::new(kind.clone(), true, true))
                .with_load(LoadProfile::new(*fixed, *per_record)),
        ));
        for op in plan.operators() {
            let form = RealizedOperator::uniform(*name, op.name.clone(), op.inputs.len(), op.outputs.len(), kind.clone());
            plugin = plugin.map(op.name.clone(), form);
        }
        for (other, _, _) in platforms.iter().filter(|(o, _, _)| o != name) {
            plugin = plugin.convert(ChannelConversion::new(
                kind.clone(),
                format!("{other}.coll"),
                LoadProfile::new(5.0, 0.002),
            ));
        }
        plugin
    });
    JobContext::from_plugins(plugins).expect("valid context")
}

fn bench_enumeration(c: &mut Criterion) {
    let plan = wide_plan(6, 4);
    let ctx = context(&plan);
    let config = OptimizerConfig {
        top_k: Some(8),
        ..OptimizerConfig::default()
    };
    let estimates = CardinalityEstimator::new(&plan, &config).estimate_or_fallback();

    c.bench_function("estimate_wide_dag", |b| {
        b.iter(|| CardinalityEstimator::new(&plan, &config).estimate_or_fallback())
    });
    c.bench_function("enumerate_wide_dag_top8", |b| {
        b.iter(|| {
            PlanEnumerator::new(&plan, &ctx, &estimates, &config)
                .optimize()
                .expect("feasible")
        })
    });

    let best = PlanEnumerator::new(&plan, &ctx, &estimates, &config)
        .optimize()
        .expect("feasible");
    c.bench_function("lower_wide_dag", |b| {
        b.iter(|| lower(&plan, &best, &BTreeSet::new(), &ctx.conversions).expect("lowered"))
    });
}

criterion_group!(enumeration, bench_enumeration);
criterion_main!(enumeration);
