//! Objectives and outcome constraints.

use serde::{Deserialize, Serialize};

use crate::data::TrialData;
use crate::types::Direction;

/// A metric to optimize.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Objective {
    /// Name of the metric reported in trial data.
    pub metric: String,
    /// Whether lower or higher values are better.
    pub direction: Direction,
}

impl Objective {
    /// Minimize `metric`.
    #[must_use]
    pub fn minimize(metric: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            direction: Direction::Minimize,
        }
    }

    /// Maximize `metric`.
    #[must_use]
    pub fn maximize(metric: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            direction: Direction::Maximize,
        }
    }
}

/// Comparison used by an [`OutcomeConstraint`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOp {
    /// `mean <= bound`.
    Leq,
    /// `mean >= bound`.
    Geq,
}

/// A bound on a tracked metric that a trial must satisfy to be eligible as
/// best-so-far.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutcomeConstraint {
    /// Constrained metric.
    pub metric: String,
    /// Comparison direction.
    pub op: ComparisonOp,
    /// Bound on the observed mean.
    pub bound: f64,
}

impl OutcomeConstraint {
    /// `metric <= bound`.
    #[must_use]
    pub fn leq(metric: impl Into<String>, bound: f64) -> Self {
        Self {
            metric: metric.into(),
            op: ComparisonOp::Leq,
            bound,
        }
    }

    /// `metric >= bound`.
    #[must_use]
    pub fn geq(metric: impl Into<String>, bound: f64) -> Self {
        Self {
            metric: metric.into(),
            op: ComparisonOp::Geq,
            bound,
        }
    }

    /// Return `true` if `data` reports the metric and its mean is within bound.
    #[must_use]
    pub fn is_satisfied(&self, data: &TrialData) -> bool {
        data.get(&self.metric).is_some_and(|obs| match self.op {
            ComparisonOp::Leq => obs.mean <= self.bound,
            ComparisonOp::Geq => obs.mean >= self.bound,
        })
    }
}

/// How to order completed trials whose objective values are identical.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TieBreak {
    /// The earliest trial wins.
    #[default]
    LowestIndex,
    /// The latest trial wins.
    HighestIndex,
}
