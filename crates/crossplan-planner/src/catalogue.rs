//! Operator catalogue: which realized forms an operator has on a platform.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crossplan_core::cost::LoadProfile;
use crossplan_core::plan::Operator;
use crossplan_core::platform::{ChannelKind, PlatformId};

/// One platform-specific execution form of a logical operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealizedOperator {
    pub platform: PlatformId,
    pub name: String,
    /// Channel kinds accepted, per input slot.
    pub inputs: Vec<Vec<ChannelKind>>,
    /// Channel kind produced, per output slot.
    pub outputs: Vec<ChannelKind>,
    /// Output must be materialized before any consumer runs; ends a stage.
    #[serde(default)]
    pub materializes: bool,
    /// Operator-specific cost terms, ahead of the platform's model.
    #[serde(default)]
    pub load: Option<LoadProfile>,
}

impl RealizedOperator {
    pub fn new(
        platform: impl Into<PlatformId>,
        name: impl Into<String>,
        inputs: Vec<Vec<ChannelKind>>,
        outputs: Vec<ChannelKind>,
    ) -> Self {
        Self {
            platform: platform.into(),
            name: name.into(),
            inputs,
            outputs,
            materializes: false,
            load: None,
        }
    }

    /// Every input accepts and every output produces `kind`.
    pub fn uniform(
        platform: impl Into<PlatformId>,
        name: impl Into<String>,
        inputs: usize,
        outputs: usize,
        kind: impl Into<ChannelKind>,
    ) -> Self {
        let kind = kind.into();
        Self::new(
            platform,
            name,
            vec![vec![kind.clone()]; inputs],
            vec![kind; outputs],
        )
    }

    pub fn materializing(mut self) -> Self {
        self.materializes = true;
        self
    }

    pub fn with_load(mut self, load: LoadProfile) -> Self {
        self.load = Some(load);
        self
    }

    pub fn accepted(&self, input: usize) -> &[ChannelKind] {
        self.inputs.get(input).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn produced(&self, output: usize) -> Option<&ChannelKind> {
        self.outputs.get(output)
    }

    fn fits(&self, op: &Operator) -> bool {
        self.inputs.len() == op.inputs.len() && self.outputs.len() == op.outputs.len()
    }
}

/// Oracle from (operator, platform) to the operator's realized forms.
pub trait OperatorCatalogue: Send + Sync {
    fn candidates(&self, op: &Operator, platform: &PlatformId) -> Vec<RealizedOperator>;
}

/// Table of realized forms keyed by logical operator name.
#[derive(Debug, Clone, Default)]
pub struct MappingCatalogue {
    entries: BTreeMap<String, Vec<RealizedOperator>>,
}

impl MappingCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, operator: impl Into<String>, realized: RealizedOperator) {
        self.entries.entry(operator.into()).or_default().push(realized);
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl OperatorCatalogue for MappingCatalogue {
    fn candidates(&self, op: &Operator, platform: &PlatformId) -> Vec<RealizedOperator> {
        let Some(forms) = self.entries.get(&op.name) else {
            return vec![];
        };
        forms
            .iter()
            .filter(|r| &r.platform == platform)
            .filter(|r| {
                let fits = r.fits(op);
                if !fits {
                    warn!(operator = %op, realized = %r.name, "realized form does not match operator slots");
                }
                fits
            })
            .cloned()
            .collect()
    }
}
