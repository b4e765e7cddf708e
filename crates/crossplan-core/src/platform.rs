//! Platform and channel identities.
//!
//! These are plain values. Behavior (cost models, executors, conversions) is
//! looked up through registries keyed by these ids, so new engines plug in
//! without touching the optimizer.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! name_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(name: impl Into<String>) -> Self {
                Self(name.into())
            }
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }
    };
}

name_id!(PlatformId);
name_id!(ChannelKind);

/// Static properties of a channel kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    pub kind: ChannelKind,
    /// The instance can be read again after the first consumer (materialized).
    pub reusable: bool,
    /// Several consumers may read one instance concurrently (broadcast-safe),
    /// even if it cannot be re-read later.
    pub multi_consumer: bool,
}

impl ChannelDescriptor {
    pub fn new(kind: impl Into<ChannelKind>, reusable: bool, multi_consumer: bool) -> Self {
        Self {
            kind: kind.into(),
            reusable,
            multi_consumer,
        }
    }

    /// Whether a single instance of this kind can feed `consumers` readers.
    pub fn can_serve(&self, consumers: usize) -> bool {
        consumers <= 1 || self.reusable || self.multi_consumer
    }
}

impl From<String> for ChannelKind {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<String> for PlatformId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_channels_serve_a_single_consumer() {
        let stream = ChannelDescriptor::new("java.stream", false, false);
        let collection = ChannelDescriptor::new("java.collection", true, true);
        assert!(stream.can_serve(1));
        assert!(!stream.can_serve(2));
        assert!(collection.can_serve(3));
    }
}
