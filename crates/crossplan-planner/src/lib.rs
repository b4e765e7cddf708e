#![forbid(unsafe_code)]
//! crossplan-planner: decide which platform runs which operator.
//!
//! Design:
//! - Platforms are explicit values registered per job (`PlatformRegistry`),
//!   each with its channel kinds and an optional cost model.
//! - The operator catalogue is an opaque oracle answering
//!   `candidates(operator, platform)`; `MappingCatalogue` is the table-driven
//!   implementation fed by plugins or the YAML DSL.
//! - `ConversionGraph` finds the cheapest chain of channel conversions
//!   between a producer and its consumers.
//! - `PlanEnumerator` merges per-operator enumerations bottom-up along plan
//!   outputs, inserting conversions and pruning after every merge.

pub mod catalogue;
pub mod context;
pub mod conversion;
pub mod cost;
pub mod dsl;
pub mod enumeration;
pub mod enumerator;
pub mod platform;
pub mod pruning;

pub use catalogue::{MappingCatalogue, OperatorCatalogue, RealizedOperator};
pub use context::{JobContext, Plugin};
pub use conversion::{ChannelConversion, ConversionGraph, ConversionPath, Junction};
pub use cost::CostModel;
pub use dsl::yaml::{parse_job, ParsedJob};
pub use enumeration::{PlanEnumeration, PlanImplementation};
pub use enumerator::PlanEnumerator;
pub use platform::{BasicPlatform, Platform, PlatformRegistry};
pub use pruning::{PruningStrategy, SinglePlatformPruning, TopKPruning};
