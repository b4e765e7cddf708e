//! Optimizer configuration that downstream crates can serialize/deserialize.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::cost::LoadProfile;
use crate::error::Error;

/// Estimator used for operators that do not declare one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultEstimator {
    /// Output equals the first regular input (or `[0, 0]` without inputs).
    Identity,
    /// Output is always `[n, n]`.
    Fixed(u64),
}

impl FromStr for DefaultEstimator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("identity") {
            return Ok(DefaultEstimator::Identity);
        }
        if let Some(n) = s.strip_prefix("fixed:") {
            return n
                .trim()
                .parse::<u64>()
                .map(DefaultEstimator::Fixed)
                .map_err(|e| Error::Config(format!("bad fixed estimator '{s}': {e}")));
        }
        Err(Error::Config(format!("unknown default estimator '{s}'")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Keep only the best `k` implementations per scope after each merge.
    pub top_k: Option<usize>,

    /// Drop multi-platform implementations whenever a single-platform one
    /// exists for the same scope. Approximate: may discard the optimum.
    pub single_platform_pruning: bool,

    /// Fallback for operators without an estimator.
    pub default_estimator: DefaultEstimator,

    /// When false, broadcast inputs do not gate estimation and contribute
    /// `broadcast_cardinality` until their real estimate arrives.
    pub broadcasts_gate: bool,
    pub broadcast_cardinality: u64,

    /// Amortization factor for loops without an explicit hint.
    pub default_expected_iterations: u32,

    /// Cost model for platforms that do not provide one.
    pub default_load: LoadProfile,

    /// Upper bound on re-optimization passes per job.
    pub max_reoptimizations: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            top_k: None,
            single_platform_pruning: false,
            default_estimator: DefaultEstimator::Identity,
            broadcasts_gate: true,
            broadcast_cardinality: 1,
            default_expected_iterations: 10,
            default_load: LoadProfile::default(),
            max_reoptimizations: 16,
        }
    }
}

impl OptimizerConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `CROSSPLAN_TOP_K`: best-k pruning (`0` disables)
    /// - `CROSSPLAN_SINGLE_PLATFORM`: `true`/`false`
    /// - `CROSSPLAN_DEFAULT_ESTIMATOR`: `identity` or `fixed:<n>`
    /// - `CROSSPLAN_BROADCASTS_GATE`: `true`/`false`
    /// - `CROSSPLAN_EXPECTED_ITERATIONS`: default loop amortization
    /// - `CROSSPLAN_MAX_REOPTIMIZATIONS`: re-optimization budget
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Same as `from_env` with an injectable variable source (tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(s) = lookup("CROSSPLAN_TOP_K") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.top_k = (v > 0).then_some(v);
            }
        }

        if let Some(s) = lookup("CROSSPLAN_SINGLE_PLATFORM") {
            if let Ok(v) = s.parse::<bool>() {
                cfg.single_platform_pruning = v;
            }
        }

        if let Some(s) = lookup("CROSSPLAN_DEFAULT_ESTIMATOR") {
            if let Ok(v) = s.parse::<DefaultEstimator>() {
                cfg.default_estimator = v;
            }
        }

        if let Some(s) = lookup("CROSSPLAN_BROADCASTS_GATE") {
            if let Ok(v) = s.parse::<bool>() {
                cfg.broadcasts_gate = v;
            }
        }

        if let Some(s) = lookup("CROSSPLAN_EXPECTED_ITERATIONS") {
            if let Ok(v) = s.parse::<u32>() {
                cfg.default_expected_iterations = v.max(1);
            }
        }

        if let Some(s) = lookup("CROSSPLAN_MAX_REOPTIMIZATIONS") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.max_reoptimizations = v;
            }
        }

        cfg
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.top_k == Some(0) {
            return Err(Error::Config("top_k must be positive".into()));
        }
        if self.default_expected_iterations == 0 {
            return Err(Error::Config(
                "default_expected_iterations must be positive".into(),
            ));
        }
        if self.default_load.fixed < 0.0 || self.default_load.per_record < 0.0 {
            return Err(Error::Config("default_load must be non-negative".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn lookup_overrides_defaults() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("CROSSPLAN_TOP_K", "3"),
            ("CROSSPLAN_SINGLE_PLATFORM", "true"),
            ("CROSSPLAN_DEFAULT_ESTIMATOR", "fixed:1"),
            ("CROSSPLAN_EXPECTED_ITERATIONS", "not-a-number"),
        ]);
        let cfg = OptimizerConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.top_k, Some(3));
        assert!(cfg.single_platform_pruning);
        assert_eq!(cfg.default_estimator, DefaultEstimator::Fixed(1));
        assert_eq!(cfg.default_expected_iterations, 10);
    }

    #[test]
    fn zero_top_k_disables_pruning() {
        let cfg = OptimizerConfig::from_lookup(|k| (k == "CROSSPLAN_TOP_K").then(|| "0".into()));
        assert_eq!(cfg.top_k, None);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn parses_default_estimator() {
        assert_eq!(
            "identity".parse::<DefaultEstimator>().unwrap(),
            DefaultEstimator::Identity
        );
        assert!("fixed:x".parse::<DefaultEstimator>().is_err());
        assert!("median".parse::<DefaultEstimator>().is_err());
    }
}
