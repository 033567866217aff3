//! Core types shared across the crate.

use serde::{Deserialize, Serialize};

/// The direction of optimization for an objective.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Lower values are better.
    Minimize,
    /// Higher values are better.
    Maximize,
}

impl Direction {
    /// Return `true` if `a` is strictly better than `b` in this direction.
    #[must_use]
    pub fn is_better(self, a: f64, b: f64) -> bool {
        match self {
            Direction::Minimize => a < b,
            Direction::Maximize => a > b,
        }
    }
}

/// The status of a trial in its lifecycle.
///
/// `Candidate -> Running -> Completed | Failed | Abandoned`. A candidate may
/// also be abandoned directly. Terminal states never change again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrialStatus {
    /// Generated or attached, not yet handed out for evaluation.
    Candidate,
    /// Handed to the caller and awaiting a result.
    Running,
    /// Evaluated; data is attached.
    Completed,
    /// Evaluation failed; no data.
    Failed,
    /// Discarded without evaluation.
    Abandoned,
}

impl TrialStatus {
    /// Return `true` for `Completed`, `Failed`, and `Abandoned`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TrialStatus::Completed | TrialStatus::Failed | TrialStatus::Abandoned
        )
    }

    /// Return `true` for `Candidate` and `Running`.
    #[must_use]
    pub fn is_pending(self) -> bool {
        matches!(self, TrialStatus::Candidate | TrialStatus::Running)
    }
}
