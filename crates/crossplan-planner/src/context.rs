//! Per-job optimizer setup assembled from platform plugins.

use std::sync::Arc;

use crossplan_core::error::Result;

use crate::catalogue::{MappingCatalogue, OperatorCatalogue, RealizedOperator};
use crate::conversion::{ChannelConversion, ConversionGraph};
use crate::platform::{Platform, PlatformRegistry};

/// A platform together with the operator mappings and channel conversions it
/// contributes.
#[derive(Clone)]
pub struct Plugin {
    pub platform: Arc<dyn Platform>,
    pub mappings: Vec<(String, RealizedOperator)>,
    pub conversions: Vec<ChannelConversion>,
}

impl Plugin {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self {
            platform,
            mappings: vec![],
            conversions: vec![],
        }
    }

    /// Offer `realized` as a form of the logical operator named `operator`.
    pub fn map(mut self, operator: impl Into<String>, realized: RealizedOperator) -> Self {
        self.mappings.push((operator.into(), realized));
        self
    }

    pub fn convert(mut self, conversion: ChannelConversion) -> Self {
        self.conversions.push(conversion);
        self
    }
}

/// Everything the enumerator consults besides the plan and its estimates.
pub struct JobContext {
    pub platforms: PlatformRegistry,
    pub conversions: ConversionGraph,
    catalogue: Box<dyn OperatorCatalogue>,
}

impl JobContext {
    pub fn from_plugins(plugins: impl IntoIterator<Item = Plugin>) -> Result<Self> {
        let mut platforms = PlatformRegistry::new();
        let mut conversions = ConversionGraph::new();
        let mut catalogue = MappingCatalogue::new();
        for plugin in plugins {
            for d in plugin.platform.channels() {
                conversions.register_channel(d.clone());
            }
            platforms.register(plugin.platform)?;
            for (op, realized) in plugin.mappings {
                catalogue.add(op, realized);
            }
            for c in plugin.conversions {
                conversions.register(c)?;
            }
        }
        Ok(Self {
            platforms,
            conversions,
            catalogue: Box::new(catalogue),
        })
    }

    /// Replace the table-driven catalogue with another oracle.
    pub fn with_catalogue(mut self, catalogue: Box<dyn OperatorCatalogue>) -> Self {
        self.catalogue = catalogue;
        self
    }

    pub fn catalogue(&self) -> &dyn OperatorCatalogue {
        self.catalogue.as_ref()
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("platforms", &self.platforms)
            .field("conversions", &self.conversions)
            .finish_non_exhaustive()
    }
}
