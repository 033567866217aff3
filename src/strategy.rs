//! The generation strategy engine.
//!
//! [`GenerationStrategy`] owns a [`StagePolicy`] and a pointer to the active
//! stage. On every ask it decides, from the trial store alone, whether the
//! active stage is finished, whether a new trial may be admitted, and which
//! method proposes it. Admission decisions are deterministic for a given
//! store state; only the proposal itself may be random.
//!
//! Checks run in this order:
//!
//! 1. Advance past every finished stage. A stage is finished once it has
//!    produced its trial budget and (under sequential enforcement) enough
//!    of its trials have completed, or, for a stage whose budget is not
//!    enforced, as soon as its data threshold is met.
//! 2. A spent, enforced budget on the last stage ends the strategy.
//! 3. The parallelism cap of the active stage.
//! 4. A spent budget still waiting for completions.
//! 5. The method's own data requirement.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::experiment::{ExperimentConfig, FailedTrialPolicy};
use crate::generator::{GenerationContext, History};
use crate::objective::Objective;
use crate::param::Parameters;
use crate::parameter::SearchSpace;
use crate::stage::{Stage, StagePolicy};
use crate::store::TrialStore;
use crate::types::TrialStatus;

/// One row of the parallelism schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelismEntry {
    /// Cumulative trial count at which the stage takes over.
    pub trials_from: usize,
    /// The stage's trial budget, `None` when unbounded.
    pub num_trials: Option<usize>,
    /// Trials that may run at once, `None` when unbounded.
    pub max_parallelism: Option<usize>,
}

/// A proposal admitted by the strategy, not yet stored.
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    /// Index of the stage that produced it.
    pub stage: usize,
    /// The normalized parameterization.
    pub parameters: Parameters,
}

/// State machine over the stages of a [`StagePolicy`].
///
/// The stage pointer starts at 0 and never moves backward.
#[derive(Clone, Debug)]
pub struct GenerationStrategy {
    policy: StagePolicy,
    current: usize,
    enforce_sequential: bool,
}

impl GenerationStrategy {
    /// Creates a strategy positioned on the first stage.
    #[must_use]
    pub fn new(policy: StagePolicy, enforce_sequential: bool) -> Self {
        Self {
            policy,
            current: 0,
            enforce_sequential,
        }
    }

    /// Creates a strategy positioned on `current`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStagePolicy`] if `current` is out of range.
    pub fn resume(policy: StagePolicy, enforce_sequential: bool, current: usize) -> Result<Self> {
        if current >= policy.len() {
            return Err(Error::InvalidStagePolicy(format!(
                "stage pointer {current} is out of range for {} stages",
                policy.len()
            )));
        }
        Ok(Self {
            policy,
            current,
            enforce_sequential,
        })
    }

    /// Index of the active stage.
    #[must_use]
    pub fn current_stage(&self) -> usize {
        self.current
    }

    /// The stage policy.
    #[must_use]
    pub fn policy(&self) -> &StagePolicy {
        &self.policy
    }

    /// Whether parallelism caps and data thresholds are enforced.
    #[must_use]
    pub fn is_sequential(&self) -> bool {
        self.enforce_sequential
    }

    fn active(&self) -> &Stage {
        &self.policy.stages()[self.current]
    }

    fn budget_spent(stage: &Stage, index: usize, store: &TrialStore) -> bool {
        stage
            .trial_budget()
            .is_some_and(|n| store.count_produced(index) >= n)
    }

    fn threshold_met(&self, stage: &Stage, index: usize, store: &TrialStore) -> bool {
        !self.enforce_sequential || store.count_completed(index) >= stage.required_observations()
    }

    fn is_finished(&self, index: usize, store: &TrialStore) -> bool {
        let stage = &self.policy.stages()[index];
        let required = stage.required_observations();
        let early = !stage.is_budget_enforced()
            && required > 0
            && store.count_completed(index) >= required;
        early
            || (Self::budget_spent(stage, index, store) && self.threshold_met(stage, index, store))
    }

    /// Whether stage `index` can propose with the completions on record.
    ///
    /// Only consulted when caps are not enforced: the pointer then stays
    /// on a finished stage rather than entering one that would refuse.
    fn can_enter(&self, index: usize, store: &TrialStore) -> bool {
        self.enforce_sequential
            || self.policy.stages()[index].method().min_observed() <= store.num_completed()
    }

    /// Move the stage pointer past every finished stage and return it.
    pub fn update_stage(&mut self, store: &TrialStore) -> usize {
        while self.current + 1 < self.policy.len()
            && self.is_finished(self.current, store)
            && self.can_enter(self.current + 1, store)
        {
            trace_info!(
                from = self.current,
                to = self.current + 1,
                completed = store.count_completed(self.current),
                "stage advanced"
            );
            self.current += 1;
        }
        self.current
    }

    /// Decide whether a trial may be generated now and from which stage.
    ///
    /// # Errors
    ///
    /// - [`Error::StrategyCompleted`] if the last stage's enforced budget is
    ///   spent.
    /// - [`Error::MaxParallelismReached`] if the active stage's running
    ///   trials fill its cap.
    /// - [`Error::DataRequired`] if the active stage's budget is spent and
    ///   it awaits completions, or its method needs more completed trials.
    pub fn admit(&mut self, store: &TrialStore) -> Result<usize> {
        let index = self.update_stage(store);
        let stage = self.active();
        let last = index + 1 == self.policy.len();
        let spent = Self::budget_spent(stage, index, store);

        if last && spent && stage.is_budget_enforced() {
            trace_debug!(stage = index, "strategy completed");
            return Err(Error::StrategyCompleted);
        }

        self.check_capacity(index, store)?;

        if spent && !self.threshold_met(stage, index, store) && stage.is_budget_enforced() {
            let observed = store.count_completed(index);
            trace_debug!(stage = index, observed, "admission refused: stage awaits data");
            return Err(Error::DataRequired {
                stage: index,
                required: stage.required_observations(),
                observed,
            });
        }

        let required = stage.method().min_observed();
        let observed = store.num_completed();
        if required > observed {
            trace_debug!(
                stage = index,
                required,
                observed,
                "admission refused: method awaits data"
            );
            return Err(Error::DataRequired {
                stage: index,
                required,
                observed,
            });
        }

        Ok(index)
    }

    /// Refuse one more running trial in stage `index` if its cap is full.
    ///
    /// Always succeeds when sequential enforcement is off.
    ///
    /// # Errors
    ///
    /// [`Error::MaxParallelismReached`] if the stage's running trials fill
    /// its cap.
    pub fn check_capacity(&self, index: usize, store: &TrialStore) -> Result<()> {
        let cap = self.policy.stages().get(index).and_then(Stage::parallelism);
        if self.enforce_sequential
            && let Some(max_parallelism) = cap
            && store.count_running(index) >= max_parallelism
        {
            trace_debug!(stage = index, max_parallelism, "admission refused: parallelism");
            return Err(Error::MaxParallelismReached {
                stage: index,
                max_parallelism,
            });
        }
        Ok(())
    }

    /// Admit and generate one candidate.
    ///
    /// The method sees the full history. Its proposal is normalized against
    /// the search space; a proposal identical to an existing trial (when
    /// uniqueness is required) or to a failed trial (under
    /// [`FailedTrialPolicy::Exclude`]) is redrawn up to
    /// `config.max_redraws` times.
    ///
    /// # Errors
    ///
    /// Any error of [`admit`](Self::admit) or of the method,
    /// [`Error::InvalidCandidate`] if the proposal violates the search space,
    /// and [`Error::SearchSpaceExhausted`] when every redraw clashes.
    pub fn next_candidate(
        &mut self,
        store: &TrialStore,
        search_space: &SearchSpace,
        objectives: &[Objective],
        config: &ExperimentConfig,
    ) -> Result<Candidate> {
        let index = self.admit(store)?;
        let method = self.active().method();
        let history = History::new(store.trials());
        let ctx = GenerationContext {
            search_space,
            objectives,
            stage: index,
            next_index: store.next_index(),
        };

        for _ in 0..=config.max_redraws {
            let proposal = method.propose(&history, &ctx)?;
            let parameters = search_space
                .normalize(&proposal)
                .map_err(|reason| Error::InvalidCandidate {
                    stage: index,
                    reason,
                })?;
            if clashes(store, &parameters, config) {
                trace_debug!(stage = index, method = method.name(), "redrawing clashing candidate");
                continue;
            }
            return Ok(Candidate {
                stage: index,
                parameters,
            });
        }
        Err(Error::SearchSpaceExhausted { stage: index })
    }

    /// The parallelism schedule, one entry per stage.
    ///
    /// With sequential enforcement off every cap is reported as unbounded.
    #[must_use]
    pub fn parallelism_report(&self) -> Vec<ParallelismEntry> {
        let mut trials_from = 0;
        self.policy
            .stages()
            .iter()
            .map(|stage| {
                let entry = ParallelismEntry {
                    trials_from,
                    num_trials: stage.trial_budget(),
                    max_parallelism: stage.parallelism().filter(|_| self.enforce_sequential),
                };
                trials_from += stage.trial_budget().unwrap_or(0);
                entry
            })
            .collect()
    }
}

fn clashes(store: &TrialStore, parameters: &Parameters, config: &ExperimentConfig) -> bool {
    if config.require_unique_parameters && store.find_identical(parameters).is_some() {
        return true;
    }
    config.failed_trial_policy == FailedTrialPolicy::Exclude
        && store
            .trials()
            .iter()
            .any(|t| t.status == TrialStatus::Failed && &t.parameters == parameters)
}
