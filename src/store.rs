//! Append-only trial store for a single experiment.

use core::cmp::Ordering;

use crate::data::TrialData;
use crate::error::{Error, Result};
use crate::objective::{Objective, OutcomeConstraint, TieBreak};
use crate::param::Parameters;
use crate::trial::{StageAttribution, Trial};
use crate::types::TrialStatus;

/// Holds every trial of one experiment, keyed by a contiguous index.
///
/// The store is the only place trial status changes. Each mutating method
/// either succeeds completely or leaves the store untouched.
#[derive(Clone, Debug, Default)]
pub struct TrialStore {
    trials: Vec<Trial>,
}

impl TrialStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from previously saved trials.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if indices are not exactly `0..n` in
    /// order, or a non-completed trial carries data.
    pub fn from_trials(trials: Vec<Trial>) -> Result<Self> {
        for (position, trial) in trials.iter().enumerate() {
            if trial.index != position as u64 {
                return Err(Error::persistence(
                    Some(trial.index),
                    format!("trial index {} found at position {position}", trial.index),
                ));
            }
            if trial.data.is_some() != (trial.status == TrialStatus::Completed) {
                return Err(Error::persistence(
                    Some(trial.index),
                    "data must be present exactly when a trial is completed",
                ));
            }
        }
        Ok(Self { trials })
    }

    /// All trials in index order.
    #[must_use]
    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    /// Number of trials.
    #[must_use]
    pub fn len(&self) -> usize {
        self.trials.len()
    }

    /// Return `true` if no trial has been created.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    /// The index the next created trial will receive.
    #[must_use]
    pub fn next_index(&self) -> u64 {
        self.trials.len() as u64
    }

    /// Look up a trial.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TrialNotFound`] for an unknown index.
    pub fn get(&self, index: u64) -> Result<&Trial> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.trials.get(i))
            .ok_or(Error::TrialNotFound(index))
    }

    fn get_mut(&mut self, index: u64) -> Result<&mut Trial> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.trials.get_mut(i))
            .ok_or(Error::TrialNotFound(index))
    }

    /// Index of the first trial whose parameters equal `parameters`.
    #[must_use]
    pub fn find_identical(&self, parameters: &Parameters) -> Option<u64> {
        self.trials
            .iter()
            .find(|t| &t.parameters == parameters)
            .map(|t| t.index)
    }

    /// Append a trial and return its index.
    ///
    /// `status` must be `Candidate` or `Running`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateAttach`] if `require_unique` is set and an
    /// identical parameterization exists, and [`Error::InvalidTrialState`]
    /// for a terminal `status`.
    pub fn create(
        &mut self,
        parameters: Parameters,
        stage: StageAttribution,
        status: TrialStatus,
        require_unique: bool,
    ) -> Result<u64> {
        let index = self.next_index();
        if !status.is_pending() {
            return Err(Error::InvalidTrialState {
                index,
                status,
                operation: "create a trial",
            });
        }
        if require_unique && let Some(existing) = self.find_identical(&parameters) {
            return Err(Error::DuplicateAttach { index: existing });
        }
        self.trials.push(Trial::new(index, parameters, status, stage));
        Ok(index)
    }

    /// `Candidate -> Running`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTrialState`] unless the trial is a candidate.
    pub fn mark_running(&mut self, index: u64) -> Result<()> {
        let trial = self.get_mut(index)?;
        if trial.status != TrialStatus::Candidate {
            return Err(Error::InvalidTrialState {
                index,
                status: trial.status,
                operation: "run",
            });
        }
        trial.status = TrialStatus::Running;
        Ok(())
    }

    /// `Running -> Completed`, attaching `data`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTrialState`] unless the trial is running.
    pub fn complete(&mut self, index: u64, data: TrialData) -> Result<()> {
        let trial = self.get_mut(index)?;
        if trial.status != TrialStatus::Running {
            return Err(Error::InvalidTrialState {
                index,
                status: trial.status,
                operation: "complete",
            });
        }
        trial.status = TrialStatus::Completed;
        trial.data = Some(data);
        Ok(())
    }

    /// `Running -> Failed`. Failing an already failed trial is a no-op.
    ///
    /// Returns `true` if the status changed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTrialState`] for any other status.
    pub fn fail(&mut self, index: u64) -> Result<bool> {
        let trial = self.get_mut(index)?;
        match trial.status {
            TrialStatus::Running => {
                trial.status = TrialStatus::Failed;
                Ok(true)
            }
            TrialStatus::Failed => Ok(false),
            status => Err(Error::InvalidTrialState {
                index,
                status,
                operation: "mark as failed",
            }),
        }
    }

    /// `Candidate | Running -> Abandoned`. Abandoning twice is a no-op.
    ///
    /// Returns `true` if the status changed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTrialState`] for completed or failed trials.
    pub fn abandon(&mut self, index: u64) -> Result<bool> {
        let trial = self.get_mut(index)?;
        match trial.status {
            TrialStatus::Candidate | TrialStatus::Running => {
                trial.status = TrialStatus::Abandoned;
                Ok(true)
            }
            TrialStatus::Abandoned => Ok(false),
            status => Err(Error::InvalidTrialState {
                index,
                status,
                operation: "abandon",
            }),
        }
    }

    fn count(&self, stage: StageAttribution, pred: impl Fn(TrialStatus) -> bool) -> usize {
        self.trials
            .iter()
            .filter(|t| t.stage == stage && pred(t.status))
            .count()
    }

    /// Trials of `stage` currently running.
    #[must_use]
    pub fn count_running(&self, stage: usize) -> usize {
        self.count(StageAttribution::Stage(stage), |s| {
            s == TrialStatus::Running
        })
    }

    /// Trials of `stage` that completed.
    #[must_use]
    pub fn count_completed(&self, stage: usize) -> usize {
        self.count(StageAttribution::Stage(stage), |s| {
            s == TrialStatus::Completed
        })
    }

    /// Trials of `stage` that count toward its trial budget: candidates,
    /// running, and completed. Failed and abandoned trials are replaced.
    #[must_use]
    pub fn count_produced(&self, stage: usize) -> usize {
        self.count(StageAttribution::Stage(stage), |s| {
            matches!(
                s,
                TrialStatus::Candidate | TrialStatus::Running | TrialStatus::Completed
            )
        })
    }

    /// Completed trials across all stages, attached ones included.
    #[must_use]
    pub fn num_completed(&self) -> usize {
        self.trials.iter().filter(|t| t.is_completed()).count()
    }

    /// Running trials across all stages, attached ones included.
    #[must_use]
    pub fn num_running(&self) -> usize {
        self.trials
            .iter()
            .filter(|t| t.status == TrialStatus::Running)
            .count()
    }

    fn eligible<'a, 'c>(
        &'a self,
        constraints: &'c [OutcomeConstraint],
    ) -> impl Iterator<Item = (&'a Trial, &'a TrialData)> + use<'a, 'c> {
        self.trials.iter().filter_map(move |t| {
            let data = t.data.as_ref().filter(|_| t.is_completed())?;
            constraints
                .iter()
                .all(|c| c.is_satisfied(data))
                .then_some((t, data))
        })
    }

    /// The completed trial that optimizes `objective` among those satisfying
    /// every outcome constraint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoData`] if no completed trial is eligible.
    pub fn best(
        &self,
        objective: &Objective,
        constraints: &[OutcomeConstraint],
        tie_break: TieBreak,
    ) -> Result<&Trial> {
        let mut best: Option<(&Trial, f64)> = None;
        for (trial, data) in self.eligible(constraints) {
            let Some(obs) = data.get(&objective.metric) else {
                continue;
            };
            best = match best {
                None => Some((trial, obs.mean)),
                Some((current, value)) => {
                    let replace = objective.direction.is_better(obs.mean, value)
                        || (obs.mean == value && tie_break == TieBreak::HighestIndex);
                    if replace {
                        Some((trial, obs.mean))
                    } else {
                        Some((current, value))
                    }
                }
            };
        }
        best.map(|(t, _)| t).ok_or(Error::NoData)
    }

    /// Completed, constraint-satisfying trials not dominated on `objectives`.
    ///
    /// Returned in index order.
    #[must_use]
    pub fn pareto_frontier(
        &self,
        objectives: &[Objective],
        constraints: &[OutcomeConstraint],
    ) -> Vec<&Trial> {
        let points: Vec<(&Trial, Vec<f64>)> = self
            .eligible(constraints)
            .filter_map(|(t, data)| {
                objectives
                    .iter()
                    .map(|o| data.get(&o.metric).map(|obs| obs.mean))
                    .collect::<Option<Vec<f64>>>()
                    .map(|values| (t, values))
            })
            .collect();

        points
            .iter()
            .filter(|(_, a)| !points.iter().any(|(_, b)| dominates(b, a, objectives)))
            .map(|(t, _)| *t)
            .collect()
    }
}

/// Return `true` if `a` is at least as good as `b` everywhere and strictly
/// better somewhere.
fn dominates(a: &[f64], b: &[f64], objectives: &[Objective]) -> bool {
    let mut strictly_better = false;
    for ((x, y), objective) in a.iter().zip(b).zip(objectives) {
        if objective.direction.is_better(*y, *x) {
            return false;
        }
        if x.partial_cmp(y) != Some(Ordering::Equal) {
            strictly_better = true;
        }
    }
    strictly_better
}
