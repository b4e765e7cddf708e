//! Cardinality intervals attached to output slots.
//!
//! An estimate is an interval `[lower, upper]` plus a confidence in `[0, 1]`.
//! Estimators only ever combine children's estimates with monotone operations
//! (sum, product, non-negative scaling); nothing here inverts an estimate.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CardinalityEstimate {
    pub lower: u64,
    pub upper: u64,
    pub confidence: f64,
}

impl CardinalityEstimate {
    /// Build an interval; bounds are reordered if given backwards and the
    /// confidence is clamped to `[0, 1]`.
    pub fn new(lower: u64, upper: u64, confidence: f64) -> Self {
        Self {
            lower: lower.min(upper),
            upper: lower.max(upper),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// A known count (e.g. a measured channel or a fixed-size operator).
    pub fn exact(n: u64) -> Self {
        Self::new(n, n, 1.0)
    }

    pub fn is_exact(&self) -> bool {
        self.lower == self.upper && self.confidence >= 1.0
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Sum of two estimates (union-like composition).
    pub fn plus(&self, other: &Self) -> Self {
        Self::new(
            self.lower.saturating_add(other.lower),
            self.upper.saturating_add(other.upper),
            self.confidence.min(other.confidence),
        )
    }

    /// Multiply by a whole factor, e.g. an expected iteration count.
    pub fn times(&self, n: u64) -> Self {
        Self::new(
            self.lower.saturating_mul(n),
            self.upper.saturating_mul(n),
            self.confidence,
        )
    }

    /// Scale by a non-negative fraction (selectivity). The lower bound rounds
    /// down and the upper bound rounds up so the interval never shrinks past
    /// the exact result.
    pub fn scale(&self, factor: f64) -> Self {
        let f = if factor.is_finite() { factor.max(0.0) } else { 0.0 };
        Self::new(
            saturating_f64(self.lower as f64 * f, f64::floor),
            saturating_f64(self.upper as f64 * f, f64::ceil),
            self.confidence,
        )
    }

    /// Cartesian composition.
    pub fn product(&self, other: &Self) -> Self {
        Self::new(
            self.lower.saturating_mul(other.lower),
            self.upper.saturating_mul(other.upper),
            self.confidence.min(other.confidence),
        )
    }

    /// Ratio `upper / lower`; 1.0 for exact intervals, infinite when the
    /// lower bound is zero but the upper is not.
    pub fn spread(&self) -> f64 {
        match (self.lower, self.upper) {
            (0, 0) => 1.0,
            (0, _) => f64::INFINITY,
            (l, u) => u as f64 / l as f64,
        }
    }

    /// Representative single value used by cost models.
    pub fn geometric_mean(&self) -> f64 {
        ((self.lower as f64) * (self.upper as f64)).sqrt()
    }

    pub fn midpoint(&self) -> f64 {
        (self.lower as f64 + self.upper as f64) / 2.0
    }
}

impl fmt::Display for CardinalityEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}..{}, conf={:.2}]",
            self.lower, self.upper, self.confidence
        )
    }
}

fn saturating_f64(v: f64, round: fn(f64) -> f64) -> u64 {
    let r = round(v);
    if r >= u64::MAX as f64 {
        u64::MAX
    } else if r <= 0.0 {
        0
    } else {
        r as u64
    }
}
