//! Trial records tracked by an experiment.

use serde::{Deserialize, Serialize};

use crate::data::TrialData;
use crate::param::Parameters;
use crate::types::TrialStatus;

/// Which stage a trial is attributed to for parallelism accounting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageAttribution {
    /// Produced by (or attached under) the stage with this index.
    Stage(usize),
    /// Attached by the caller outside any stage; exempt from caps.
    External,
}

impl StageAttribution {
    /// The stage index, if attributed to a stage.
    #[must_use]
    pub fn stage(self) -> Option<usize> {
        match self {
            StageAttribution::Stage(s) => Some(s),
            StageAttribution::External => None,
        }
    }
}

/// One proposed-and-tracked parameterization.
///
/// Trials are append-only: once created they are never removed, their
/// parameters never change, and terminal statuses are final.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    /// Position in the experiment, assigned at creation.
    pub index: u64,
    /// The evaluated parameterization.
    pub parameters: Parameters,
    /// Lifecycle status.
    pub status: TrialStatus,
    /// Observed metrics, present only once completed.
    pub data: Option<TrialData>,
    /// The stage that produced the trial.
    pub stage: StageAttribution,
}

impl Trial {
    pub(crate) fn new(
        index: u64,
        parameters: Parameters,
        status: TrialStatus,
        stage: StageAttribution,
    ) -> Self {
        Self {
            index,
            parameters,
            status,
            data: None,
            stage,
        }
    }

    /// Observed mean of `metric`, if the trial is completed and reported it.
    #[must_use]
    pub fn mean(&self, metric: &str) -> Option<f64> {
        self.data.as_ref()?.get(metric).map(|o| o.mean)
    }

    /// Return `true` if the trial is completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == TrialStatus::Completed
    }
}
