//! Operator cost models.
//!
//! A cost model turns the cardinalities around one realized operator into a
//! `CostRange`. Platforms may supply one; otherwise the optimizer's default
//! `LoadProfile` applies.

use crossplan_core::cardinality::CardinalityEstimate;
use crossplan_core::cost::{CostRange, LoadProfile};

use crate::catalogue::RealizedOperator;

pub trait CostModel: Send + Sync {
    fn estimate_cost(
        &self,
        realized: &RealizedOperator,
        inputs: &[CardinalityEstimate],
        outputs: &[CardinalityEstimate],
    ) -> CostRange;
}

/// Records an operator touches: its inputs, or its outputs for sources.
pub fn processed_records(
    inputs: &[CardinalityEstimate],
    outputs: &[CardinalityEstimate],
) -> CardinalityEstimate {
    let side = if inputs.is_empty() { outputs } else { inputs };
    side.iter()
        .fold(CardinalityEstimate::exact(0), |acc, c| acc.plus(c))
}

impl CostModel for LoadProfile {
    fn estimate_cost(
        &self,
        _realized: &RealizedOperator,
        inputs: &[CardinalityEstimate],
        outputs: &[CardinalityEstimate],
    ) -> CostRange {
        self.cost(&processed_records(inputs, outputs))
    }
}
