#![forbid(unsafe_code)]
//! crossplan-estimate: bottom-up cardinality estimation over a `Plan`.
//!
//! Responsibilities:
//! - A generic, push-based topological traversal (`traversal`) in which each
//!   operator's activator collects one activation per input and becomes
//!   eligible once every required input has arrived.
//! - The cardinality pass on top of it (`cardinality`), including loop-scoped
//!   re-estimation and measured-value overrides.
//!
//! Pure and synchronous; nothing here executes operators.

pub mod cardinality;
pub mod traversal;

pub use cardinality::{CardinalityEstimator, Estimates};
pub use traversal::{Activation, Activator, Step, Traversal, TraversalWork};
