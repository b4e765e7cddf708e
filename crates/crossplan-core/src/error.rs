use thiserror::Error;

use crate::id::OperatorId;

/// Canonical result for the optimizer crates.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Malformed plan: {0}")]
    Plan(String),

    /// A traversal work item requested an abort; no results are produced.
    #[error("Traversal aborted at {operator}: {reason}")]
    Aborted { operator: OperatorId, reason: String },

    /// Enumeration ended with zero implementations for a scope. Callers may
    /// relax platform constraints and retry.
    #[error("No feasible plan for scope {scope}")]
    NoFeasiblePlan { scope: String },

    /// An operator was evaluated in a lifecycle state that forbids it.
    /// This is a contract violation and is never recovered from.
    #[error("Lifecycle violation: {0}")]
    Lifecycle(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Hashing error: {0}")]
    Hash(String),

    #[error("Internal invariant failed: {0}")]
    Invariant(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Hash(e.to_string())
    }
}
