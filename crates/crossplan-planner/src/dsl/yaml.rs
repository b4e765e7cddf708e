//! YAML job files: platforms, conversions, operators, loops, and the
//! realized forms each operator has.
//!
//! Example:
//! ```yaml
//! config: { top_k: 8 }
//! platforms:
//!   - id: java
//!     load: { fixed: 1.0, per_record: 0.001 }
//!     channels: [ { kind: java.collection, reusable: true, multi_consumer: true } ]
//!   - id: spark
//!     channels: [ { kind: spark.rdd, reusable: false, multi_consumer: false } ]
//! conversions:
//!   - { source: java.collection, target: spark.rdd, load: { fixed: 10.0, per_record: 0.0 } }
//! operators:
//!   - { name: src, op: source, type: int, estimator: { fixed: 1000 },
//!       realizations: [ { platform: java } ] }
//!   - { name: iterate, op: loop, type: int, iterations: 5, inputs: [src], feedback: step }
//!   - { name: step, op: unary, type: int, loop: iterate, inputs: [iterate],
//!       realizations: [ { platform: java }, { platform: spark } ] }
//!   - { name: out, op: sink, type: int, inputs: [iterate.final],
//!       realizations: [ { platform: spark } ] }
//! ```
//!
//! An input names a producer as `op` (output 0), `op.final` / `op.iteration`
//! for loop heads, or `op.<n>`; `{ from: op, broadcast: true }` marks a
//! broadcast input.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crossplan_core::config::OptimizerConfig;
use crossplan_core::cost::LoadProfile;
use crossplan_core::error::{Error, Result};
use crossplan_core::id::{LoopId, OperatorId};
use crossplan_core::plan::{
    EstimatorSpec, InputSlot, OperatorKind, OutputSlot, Plan, PlanBuilder, LOOP_FEEDBACK_INPUT,
    LOOP_FINAL_OUTPUT, LOOP_ITERATION_OUTPUT,
};
use crossplan_core::platform::{ChannelDescriptor, ChannelKind};

use crate::catalogue::RealizedOperator;
use crate::context::{JobContext, Plugin};
use crate::conversion::ChannelConversion;
use crate::platform::BasicPlatform;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDoc {
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub config: Option<OptimizerConfig>,
    #[serde(default)]
    pub platforms: Vec<PlatformDef>,
    #[serde(default)]
    pub conversions: Vec<ChannelConversion>,
    pub operators: Vec<OperatorDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformDef {
    pub id: String,
    #[serde(default)]
    pub load: Option<LoadProfile>,
    #[serde(default)]
    pub channels: Vec<ChannelDescriptor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpDef {
    Source,
    Unary,
    Binary,
    Sink,
    Loop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputDef {
    Producer(String),
    Detailed {
        from: String,
        #[serde(default)]
        broadcast: bool,
    },
}

impl InputDef {
    fn producer(&self) -> &str {
        match self {
            InputDef::Producer(p) => p,
            InputDef::Detailed { from, .. } => from,
        }
    }

    fn is_broadcast(&self) -> bool {
        matches!(self, InputDef::Detailed { broadcast: true, .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorDef {
    pub name: String,
    pub op: OpDef,
    #[serde(rename = "type", default = "default_type")]
    pub element_type: String,
    #[serde(default)]
    pub output_type: Option<String>,
    #[serde(default)]
    pub inputs: Vec<InputDef>,
    /// Loop heads only: the body operator feeding the next iteration.
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(default)]
    pub iterations: Option<u32>,
    #[serde(default)]
    pub expected_iterations: Option<u32>,
    /// Enclosing loop head, by name.
    #[serde(rename = "loop", default)]
    pub in_loop: Option<String>,
    /// `{ fixed: 10 }`, `{ selectivity: 0.5 }`, `{ join: { selectivity: 0.1 } }`,
    /// `identity`, `union`, `cartesian`, or
    /// `{ interval: { lower, upper, confidence } }`.
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub estimator: Option<EstimatorSpec>,
    #[serde(default)]
    pub realizations: Vec<RealizationDef>,
}

fn default_type() -> String {
    "any".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealizationDef {
    pub platform: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Kinds accepted by every input; defaults to the platform's first channel.
    #[serde(default)]
    pub accepts: Vec<String>,
    /// Kind produced by every output; defaults to the platform's first channel.
    #[serde(default)]
    pub produces: Option<String>,
    #[serde(default)]
    pub materializes: bool,
    #[serde(default)]
    pub load: Option<LoadProfile>,
}

/// A job ready for estimation and enumeration.
#[derive(Debug)]
pub struct ParsedJob {
    pub plan: Plan,
    pub context: JobContext,
    pub config: OptimizerConfig,
    pub names: BTreeMap<String, OperatorId>,
}

fn bad(msg: impl Into<String>) -> Error {
    Error::Config(msg.into())
}

/// Split `op.final` style references into operator name and output index.
fn output_ref(reference: &str) -> (&str, usize) {
    if let Some((name, suffix)) = reference.rsplit_once('.') {
        match suffix {
            "final" => return (name, LOOP_FINAL_OUTPUT),
            "iteration" => return (name, LOOP_ITERATION_OUTPUT),
            _ => {
                if let Ok(i) = suffix.parse::<usize>() {
                    return (name, i);
                }
            }
        }
    }
    (reference, 0)
}

pub fn parse_job(yaml_src: &str) -> Result<ParsedJob> {
    let doc: JobDoc =
        serde_yaml::from_str(yaml_src).map_err(|e| bad(format!("invalid job file: {e}")))?;
    build_job(doc)
}

pub fn build_job(doc: JobDoc) -> Result<ParsedJob> {
    let config = doc.config.clone().unwrap_or_default();
    config.validate()?;

    let mut b = PlanBuilder::new();
    let mut names: BTreeMap<String, OperatorId> = BTreeMap::new();
    let mut loops: BTreeMap<String, LoopId> = BTreeMap::new();

    for def in &doc.operators {
        if names.contains_key(&def.name) {
            return Err(bad(format!("operator '{}' declared twice", def.name)));
        }
        let output_type = def.output_type.as_deref().unwrap_or(&def.element_type);
        let id = match def.op {
            OpDef::Loop => {
                let iterations = def
                    .iterations
                    .ok_or_else(|| bad(format!("loop '{}' needs iterations", def.name)))?;
                if def.inputs.len() != 1 || def.feedback.is_none() {
                    return Err(bad(format!(
                        "loop '{}' needs exactly one input and a feedback",
                        def.name
                    )));
                }
                let (head, loop_id) = b.add_loop_head(def.name.clone(), &def.element_type, iterations);
                if let Some(n) = def.expected_iterations {
                    b.expect_iterations(loop_id, n)?;
                }
                loops.insert(def.name.clone(), loop_id);
                head
            }
            op => {
                let (kind, regular, outputs) = match op {
                    OpDef::Source => (OperatorKind::Source, 0, 1),
                    OpDef::Unary => (OperatorKind::Unary, 1, 1),
                    OpDef::Binary => (OperatorKind::Binary, 2, 1),
                    _ => (OperatorKind::Sink, 1, 0),
                };
                let declared = def.inputs.iter().filter(|i| !i.is_broadcast()).count();
                if declared != regular {
                    return Err(bad(format!(
                        "operator '{}' needs {regular} regular inputs, got {declared}",
                        def.name
                    )));
                }
                let inputs = def
                    .inputs
                    .iter()
                    .enumerate()
                    .map(|(i, input)| {
                        let slot = InputSlot::new(format!("in{i}"), def.element_type.as_str());
                        if input.is_broadcast() {
                            slot.broadcast()
                        } else {
                            slot
                        }
                    })
                    .collect();
                let outputs = (0..outputs)
                    .map(|i| OutputSlot::new(format!("out{i}"), output_type))
                    .collect();
                b.add_operator(def.name.clone(), kind, inputs, outputs, def.estimator)
            }
        };
        names.insert(def.name.clone(), id);
    }

    let lookup = |name: &str| {
        names
            .get(name)
            .copied()
            .ok_or_else(|| bad(format!("unknown operator '{name}'")))
    };
    let loop_of = |name: &str| {
        loops
            .get(name)
            .copied()
            .ok_or_else(|| bad(format!("'{name}' is not a loop")))
    };

    for def in &doc.operators {
        let id = lookup(&def.name)?;
        if let Some(outer) = &def.in_loop {
            let outer = loop_of(outer)?;
            match loops.get(&def.name) {
                Some(&inner) => b.nest_loop(inner, outer)?,
                None => b.add_to_loop(outer, id)?,
            }
        }
        for (i, input) in def.inputs.iter().enumerate() {
            let (producer, output) = output_ref(input.producer());
            b.connect(lookup(producer)?, output, id, i);
        }
        if let Some(feedback) = &def.feedback {
            let (producer, output) = output_ref(feedback);
            b.connect(lookup(producer)?, output, id, LOOP_FEEDBACK_INPUT);
        }
    }
    let plan = b.build()?;

    let mut plugins: BTreeMap<String, Plugin> = BTreeMap::new();
    let mut first_kind: BTreeMap<String, ChannelKind> = BTreeMap::new();
    for p in &doc.platforms {
        let mut platform = BasicPlatform::new(p.id.as_str());
        platform.channels = p.channels.clone();
        platform.load = p.load;
        if let Some(d) = p.channels.first() {
            first_kind.insert(p.id.clone(), d.kind.clone());
        }
        plugins.insert(p.id.clone(), Plugin::new(Arc::new(platform)));
    }

    for def in &doc.operators {
        let id = lookup(&def.name)?;
        let operator = plan.op(id);
        for r in &def.realizations {
            let default_kind = first_kind.get(&r.platform).cloned();
            let accepts: Vec<ChannelKind> = if r.accepts.is_empty() {
                default_kind.clone().into_iter().collect()
            } else {
                r.accepts.iter().map(|k| ChannelKind::from(k.as_str())).collect()
            };
            let produces = r
                .produces
                .as_deref()
                .map(ChannelKind::from)
                .or(default_kind)
                .ok_or_else(|| bad(format!("platform '{}' declares no channels", r.platform)))?;
            let mut realized = RealizedOperator::new(
                r.platform.as_str(),
                r.name.clone().unwrap_or_else(|| format!("{}:{}", r.platform, def.name)),
                vec![accepts; operator.inputs.len()],
                vec![produces; operator.outputs.len()],
            );
            realized.materializes = r.materializes;
            realized.load = r.load;

            let plugin = plugins
                .remove(&r.platform)
                .ok_or_else(|| bad(format!("unknown platform '{}'", r.platform)))?;
            plugins.insert(r.platform.clone(), plugin.map(def.name.clone(), realized));
        }
    }

    let mut context = JobContext::from_plugins(plugins.into_values())?;
    for c in doc.conversions {
        context.conversions.register(c)?;
    }

    Ok(ParsedJob {
        plan,
        context,
        config,
        names,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enumerator::PlanEnumerator;
    use crossplan_core::cardinality::CardinalityEstimate;
    use crossplan_core::config::DefaultEstimator;
    use crossplan_estimate::CardinalityEstimator;

    const JOB: &str = r#"
config: { top_k: 4 }
platforms:
  - id: java
    load: { fixed: 1.0, per_record: 0.0 }
    channels: [ { kind: java.collection, reusable: true, multi_consumer: true } ]
  - id: spark
    load: { fixed: 5.0, per_record: 0.0 }
    channels: [ { kind: spark.rdd, reusable: false, multi_consumer: false } ]
conversions:
  - { source: java.collection, target: spark.rdd, load: { fixed: 10.0, per_record: 0.0 } }
operators:
  - { name: src, op: source, type: int, estimator: { fixed: 1000 },
      realizations: [ { platform: java } ] }
  - { name: iterate, op: loop, type: int, iterations: 3, expected_iterations: 3,
      inputs: [src], feedback: step, realizations: [ { platform: java } ] }
  - { name: step, op: unary, type: int, loop: iterate, inputs: [iterate],
      estimator: { selectivity: 0.5 },
      realizations: [ { platform: java }, { platform: spark } ] }
  - { name: out, op: sink, type: int, inputs: [iterate.final],
      realizations: [ { platform: spark } ] }
"#;

    #[test]
    fn parses_loop_job_and_optimizes_it() {
        let job = parse_job(JOB).unwrap();
        assert_eq!(job.config.top_k, Some(4));
        assert_eq!(job.plan.len(), 4);
        assert_eq!(job.plan.loops().len(), 1);
        let step = job.names["step"];
        let region = &job.plan.loops()[0];
        assert!(region.members.contains(&step));
        assert_eq!(region.expected_iterations, Some(3));

        let est = CardinalityEstimator::new(&job.plan, &job.config)
            .estimate()
            .unwrap();
        let best = PlanEnumerator::new(&job.plan, &job.context, &est, &job.config)
            .optimize()
            .unwrap();
        assert_eq!(best.realized(step).unwrap().platform.as_str(), "java");
        assert_eq!(best.realized(job.names["out"]).unwrap().platform.as_str(), "spark");
    }

    #[test]
    fn parses_every_estimator_form() {
        let job = parse_job(
            r#"
config: { default_estimator: { fixed: 7 } }
operators:
  - { name: a, op: source, estimator: { fixed: 10 } }
  - { name: b, op: source, estimator: { interval: { lower: 5, upper: 50, confidence: 0.8 } } }
  - { name: c, op: unary, inputs: [a], estimator: identity }
  - { name: d, op: unary, inputs: [c], estimator: { selectivity: 0.25 } }
  - { name: e, op: binary, inputs: [a, b], estimator: union }
  - { name: f, op: binary, inputs: [d, e], estimator: cartesian }
  - { name: g, op: binary, inputs: [f, b], estimator: { join: { selectivity: 0.1 } } }
  - { name: h, op: unary, inputs: [g] }
  - { name: out, op: sink, inputs: [h] }
"#,
        )
        .unwrap();
        let estimator = |name: &str| job.plan.op(job.names[name]).estimator;
        assert_eq!(estimator("a"), Some(EstimatorSpec::Fixed(10)));
        assert_eq!(
            estimator("b"),
            Some(EstimatorSpec::Interval(CardinalityEstimate::new(5, 50, 0.8)))
        );
        assert_eq!(estimator("c"), Some(EstimatorSpec::Identity));
        assert_eq!(estimator("d"), Some(EstimatorSpec::Selectivity(0.25)));
        assert_eq!(estimator("e"), Some(EstimatorSpec::Union));
        assert_eq!(estimator("f"), Some(EstimatorSpec::Cartesian));
        assert_eq!(estimator("g"), Some(EstimatorSpec::Join { selectivity: 0.1 }));
        assert_eq!(estimator("h"), None);
        assert_eq!(job.config.default_estimator, DefaultEstimator::Fixed(7));
    }

    #[test]
    fn rejects_mutually_nested_loops() {
        let err = parse_job(
            r#"
operators:
  - { name: src, op: source }
  - { name: a, op: loop, iterations: 2, inputs: [src], feedback: b.final, loop: b }
  - { name: b, op: loop, iterations: 2, inputs: [a], feedback: a.final, loop: a }
"#,
        );
        assert!(matches!(err, Err(Error::Plan(_))));
    }

    #[test]
    fn rejects_unknown_references() {
        let err = parse_job(
            r#"
operators:
  - { name: out, op: sink, inputs: [nowhere] }
"#,
        );
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[test]
    fn rejects_wrong_arity() {
        let err = parse_job(
            r#"
operators:
  - { name: a, op: source }
  - { name: j, op: binary, inputs: [a] }
"#,
        );
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[test]
    fn output_references() {
        assert_eq!(output_ref("loop.final"), ("loop", LOOP_FINAL_OUTPUT));
        assert_eq!(output_ref("x.2"), ("x", 2));
        assert_eq!(output_ref("a.b"), ("a.b", 0));
    }
}
