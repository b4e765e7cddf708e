//! Platforms and the per-job registry.
//!
//! A platform is a value constructed at job setup and shared by handle; there
//! are no process-wide instances.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crossplan_core::cost::LoadProfile;
use crossplan_core::error::{Error, Result};
use crossplan_core::platform::{ChannelDescriptor, ChannelKind, PlatformId};

use crate::cost::CostModel;

/// Capabilities of one execution engine as seen by the optimizer.
pub trait Platform: Send + Sync {
    fn id(&self) -> &PlatformId;

    /// Channel kinds this platform produces or consumes.
    fn channels(&self) -> &[ChannelDescriptor];

    /// `None` means the optimizer's default cost model applies.
    fn cost_model(&self) -> Option<&dyn CostModel> {
        None
    }
}

/// Platform described entirely by data: channels plus a linear load profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicPlatform {
    pub id: PlatformId,
    pub channels: Vec<ChannelDescriptor>,
    #[serde(default)]
    pub load: Option<LoadProfile>,
}

impl BasicPlatform {
    pub fn new(id: impl Into<PlatformId>) -> Self {
        Self {
            id: id.into(),
            channels: vec![],
            load: None,
        }
    }

    pub fn with_channel(mut self, descriptor: ChannelDescriptor) -> Self {
        self.channels.push(descriptor);
        self
    }

    pub fn with_load(mut self, load: LoadProfile) -> Self {
        self.load = Some(load);
        self
    }
}

impl Platform for BasicPlatform {
    fn id(&self) -> &PlatformId {
        &self.id
    }

    fn channels(&self) -> &[ChannelDescriptor] {
        &self.channels
    }

    fn cost_model(&self) -> Option<&dyn CostModel> {
        self.load.as_ref().map(|l| l as &dyn CostModel)
    }
}

/// Platforms available to one job, iterated in id order.
#[derive(Clone, Default)]
pub struct PlatformRegistry {
    platforms: BTreeMap<PlatformId, Arc<dyn Platform>>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, platform: Arc<dyn Platform>) -> Result<()> {
        let id = platform.id().clone();
        if self.platforms.contains_key(&id) {
            return Err(Error::Config(format!("platform '{id}' registered twice")));
        }
        self.platforms.insert(id, platform);
        Ok(())
    }

    pub fn get(&self, id: &PlatformId) -> Option<&Arc<dyn Platform>> {
        self.platforms.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &PlatformId> {
        self.platforms.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Platform>> {
        self.platforms.values()
    }

    /// Descriptor of `kind` from whichever platform declares it.
    pub fn descriptor(&self, kind: &ChannelKind) -> Option<&ChannelDescriptor> {
        self.platforms
            .values()
            .flat_map(|p| p.channels())
            .find(|d| &d.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.platforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty()
    }
}

impl std::fmt::Debug for PlatformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.platforms.keys()).finish()
    }
}
