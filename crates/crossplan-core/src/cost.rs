//! Cost intervals and the linear load profile.
//!
//! Costs are additive: the cost of an implementation is the sum of its
//! operators' costs and the conversions between them. Comparison uses the
//! interval midpoint.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign};

use crate::cardinality::CardinalityEstimate;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostRange {
    pub lower: f64,
    pub upper: f64,
}

impl CostRange {
    pub fn new(lower: f64, upper: f64) -> Self {
        Self {
            lower: lower.min(upper),
            upper: lower.max(upper),
        }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0)
    }

    pub fn exact(v: f64) -> Self {
        Self::new(v, v)
    }

    /// Value used to rank alternatives.
    pub fn expected(&self) -> f64 {
        (self.lower + self.upper) / 2.0
    }

    /// Multiply both bounds, e.g. by the expected iteration count of a loop.
    pub fn scaled(&self, factor: f64) -> Self {
        Self::new(self.lower * factor, self.upper * factor)
    }

    /// Total order on the expected value (NaN sorts last).
    pub fn cmp_expected(&self, other: &Self) -> Ordering {
        self.expected().total_cmp(&other.expected())
    }
}

impl Default for CostRange {
    fn default() -> Self {
        Self::zero()
    }
}

impl Add for CostRange {
    type Output = CostRange;

    fn add(self, rhs: Self) -> Self::Output {
        CostRange::new(self.lower + rhs.lower, self.upper + rhs.upper)
    }
}

impl AddAssign for CostRange {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl fmt::Display for CostRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.lower == self.upper {
            write!(f, "{:.2}", self.lower)
        } else {
            write!(f, "{:.2}..{:.2}", self.lower, self.upper)
        }
    }
}

/// `fixed + per_record * cardinality`, the cost shape every platform
/// declares for its operators and every channel conversion carries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadProfile {
    pub fixed: f64,
    pub per_record: f64,
}

impl LoadProfile {
    pub const fn new(fixed: f64, per_record: f64) -> Self {
        Self { fixed, per_record }
    }

    pub const fn fixed(fixed: f64) -> Self {
        Self::new(fixed, 0.0)
    }

    /// Evaluate against an input cardinality interval.
    pub fn cost(&self, records: &CardinalityEstimate) -> CostRange {
        CostRange::new(
            self.fixed + self.per_record * records.lower as f64,
            self.fixed + self.per_record * records.upper as f64,
        )
    }
}

impl Default for LoadProfile {
    fn default() -> Self {
        Self::new(1.0, 0.001)
    }
}
