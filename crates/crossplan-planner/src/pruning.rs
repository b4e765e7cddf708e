//! Pruning strategies applied after every enumeration merge.

use tracing::trace;

use crossplan_core::config::OptimizerConfig;

use crate::enumeration::PlanEnumeration;

pub trait PruningStrategy: Send + Sync {
    fn prune(&self, enumeration: &mut PlanEnumeration);
}

/// Keep the `k` cheapest implementations. `k == 0` keeps everything.
#[derive(Debug, Clone, Copy)]
pub struct TopKPruning {
    pub k: usize,
}

impl PruningStrategy for TopKPruning {
    fn prune(&self, enumeration: &mut PlanEnumeration) {
        if self.k == 0 || enumeration.len() <= self.k {
            return;
        }
        let before = enumeration.len();
        enumeration.truncate(self.k);
        trace!(before, after = self.k, "top-k pruning");
    }
}

/// Drop multi-platform implementations whenever at least one single-platform
/// implementation exists. Approximate: misses plans where two operators on
/// the same platform are best connected through a third platform.
#[derive(Debug, Clone, Copy, Default)]
pub struct SinglePlatformPruning;

impl PruningStrategy for SinglePlatformPruning {
    fn prune(&self, enumeration: &mut PlanEnumeration) {
        let has_single = enumeration
            .implementations()
            .iter()
            .any(|i| i.is_single_platform());
        if !has_single {
            return;
        }
        let before = enumeration.len();
        enumeration.retain(|i| i.is_single_platform());
        trace!(before, after = enumeration.len(), "single-platform pruning");
    }
}

/// Strategies enabled by `config`, in application order.
pub fn from_config(config: &OptimizerConfig) -> Vec<Box<dyn PruningStrategy>> {
    let mut out: Vec<Box<dyn PruningStrategy>> = vec![];
    if config.single_platform_pruning {
        out.push(Box::new(SinglePlatformPruning));
    }
    if let Some(k) = config.top_k {
        out.push(Box::new(TopKPruning { k }));
    }
    out
}
