#![forbid(unsafe_code)]
//! crossplan-core: shared vocabulary of the cross-platform optimizer.
//!
//! - Strongly-typed ids for operators, loops, stages, tasks.
//! - The logical plan model (operators, typed slots, loop regions).
//! - Cardinality and cost intervals used by estimation and enumeration.
//! - Platform and channel identities (no behavior; registries live upstream).
//! - Optimizer configuration, hashing, and the run manifest.
//!
//! No I/O and no engine-specific code lives here.

pub mod cardinality;
pub mod config;
pub mod cost;
pub mod error;
pub mod hash;
pub mod id;
pub mod manifest;
pub mod plan;
pub mod platform;
pub mod prelude;

/// Version string stamped into run manifests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
