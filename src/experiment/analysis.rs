use serde::{Deserialize, Serialize};

use crate::data::TrialData;
use crate::error::{Error, Result};
use crate::param::Parameters;
use crate::trial::Trial;

use super::Experiment;

/// A best-so-far trial: its index, parameters, and observed metrics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BestParameters {
    /// The trial's index.
    pub index: u64,
    /// The evaluated parameterization.
    pub parameters: Parameters,
    /// Every metric reported for the trial.
    pub metrics: TrialData,
}

impl BestParameters {
    fn from_trial(trial: &Trial) -> Self {
        Self {
            index: trial.index,
            parameters: trial.parameters.clone(),
            metrics: trial.data.clone().unwrap_or_default(),
        }
    }
}

impl Experiment {
    /// The completed trial that optimizes the first objective among those
    /// satisfying every outcome constraint.
    ///
    /// Ties are resolved by the configured [`TieBreak`](crate::TieBreak).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoData`] if no completed trial is eligible.
    pub fn get_best_parameters(&self) -> Result<BestParameters> {
        let state = self.state.lock();
        let objective = state.objectives.first().ok_or(Error::NoData)?;
        state
            .store
            .best(objective, &state.outcome_constraints, state.config.tie_break)
            .map(BestParameters::from_trial)
    }

    /// The completed, constraint-satisfying trials not dominated on any
    /// objective, in index order.
    ///
    /// With a single objective this is every trial tied for the best value.
    #[must_use]
    pub fn get_pareto_optimal_parameters(&self) -> Vec<BestParameters> {
        let state = self.state.lock();
        state
            .store
            .pareto_frontier(&state.objectives, &state.outcome_constraints)
            .into_iter()
            .map(BestParameters::from_trial)
            .collect()
    }

    /// The best observed value of the first objective so far.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoData`] if no completed trial is eligible.
    pub fn best_value(&self) -> Result<f64> {
        let state = self.state.lock();
        let objective = state.objectives.first().ok_or(Error::NoData)?;
        let best = state
            .store
            .best(objective, &state.outcome_constraints, state.config.tie_break)?;
        best.mean(&objective.metric).ok_or(Error::NoData)
    }
}
