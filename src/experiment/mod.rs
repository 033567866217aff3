//! The ask/tell experiment façade.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::data::RawData;
use crate::error::{Error, Result};
use crate::objective::{Objective, OutcomeConstraint};
use crate::param::Parameters;
use crate::parameter::SearchSpace;
use crate::storage::{MutationEvent, PersistenceHook};
use crate::store::TrialStore;
use crate::strategy::{GenerationStrategy, ParallelismEntry};
use crate::trial::{StageAttribution, Trial};
use crate::types::TrialStatus;

mod analysis;
mod builder;
mod persistence;

pub use analysis::BestParameters;
pub use builder::{AttachAttribution, ExperimentBuilder, ExperimentConfig, FailedTrialPolicy};
pub(crate) use persistence::write_snapshot;
pub use persistence::{ExperimentSnapshot, SNAPSHOT_VERSION};

/// Everything one experiment mutates, guarded by a single lock.
struct ExperimentState {
    name: String,
    search_space: SearchSpace,
    objectives: Vec<Objective>,
    outcome_constraints: Vec<OutcomeConstraint>,
    config: ExperimentConfig,
    strategy: GenerationStrategy,
    store: TrialStore,
}

/// An ask/tell optimization experiment.
///
/// Callers ask for trials with [`get_next_trial`](Self::get_next_trial),
/// evaluate them anywhere, and report back with
/// [`complete_trial`](Self::complete_trial) or
/// [`log_trial_failure`](Self::log_trial_failure), in any order.
///
/// All operations take `&self`; the experiment can be shared across threads
/// behind an `Arc`. Mutations are serialized by an internal lock that is
/// held for the whole operation, persistence hook included.
///
/// # Examples
///
/// ```
/// use stagewise::{Experiment, Objective, ParameterSpec, SearchSpace};
///
/// let space = SearchSpace::builder()
///     .parameter("x", ParameterSpec::float(-5.0, 5.0))
///     .parameter("y", ParameterSpec::float(-5.0, 5.0))
///     .build()
///     .unwrap();
/// let experiment = Experiment::builder("quadratic")
///     .search_space(space)
///     .objective(Objective::minimize("loss"))
///     .build()
///     .unwrap();
///
/// let (params, index) = experiment.get_next_trial().unwrap();
/// let x = params["x"].as_f64().unwrap();
/// let y = params["y"].as_f64().unwrap();
/// experiment.complete_trial(index, x * x + y * y).unwrap();
///
/// let best = experiment.get_best_parameters().unwrap();
/// assert_eq!(best.index, 0);
/// ```
pub struct Experiment {
    state: Mutex<ExperimentState>,
    hook: Option<Arc<dyn PersistenceHook>>,
}

impl Experiment {
    /// Return an [`ExperimentBuilder`] for an experiment called `name`.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ExperimentBuilder {
        ExperimentBuilder::new(name)
    }

    fn from_parts(state: ExperimentState, hook: Option<Arc<dyn PersistenceHook>>) -> Self {
        Self {
            state: Mutex::new(state),
            hook,
        }
    }

    /// Install (or replace) the persistence hook, e.g. after loading.
    #[must_use]
    pub fn with_persistence_hook(mut self, hook: impl PersistenceHook + 'static) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    /// The experiment's name.
    #[must_use]
    pub fn name(&self) -> String {
        self.state.lock().name.clone()
    }

    /// A copy of the search space.
    #[must_use]
    pub fn search_space(&self) -> SearchSpace {
        self.state.lock().search_space.clone()
    }

    /// The objectives, in declaration order.
    #[must_use]
    pub fn objectives(&self) -> Vec<Objective> {
        self.state.lock().objectives.clone()
    }

    /// The behavioural configuration.
    #[must_use]
    pub fn config(&self) -> ExperimentConfig {
        self.state.lock().config.clone()
    }

    /// Generate the next trial and mark it running.
    ///
    /// Returns the parameters to evaluate and the trial index to report
    /// back with.
    ///
    /// # Errors
    ///
    /// - [`Error::MaxParallelismReached`] / [`Error::DataRequired`]: retry
    ///   after outstanding trials resolve (see [`Error::is_backpressure`]).
    ///   No trial is created.
    /// - [`Error::StrategyCompleted`], [`Error::SearchSpaceExhausted`],
    ///   [`Error::InvalidCandidate`]: generation cannot continue.
    /// - [`Error::Persistence`]: the trial was created but the hook failed.
    pub fn get_next_trial(&self) -> Result<(Parameters, u64)> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!("get_next_trial", experiment = %state.name).entered();

        let candidate = state.strategy.next_candidate(
            &state.store,
            &state.search_space,
            &state.objectives,
            &state.config,
        )?;
        let stage = StageAttribution::Stage(candidate.stage);
        let index = state.store.create(
            candidate.parameters.clone(),
            stage,
            TrialStatus::Candidate,
            state.config.require_unique_parameters,
        )?;
        state.store.mark_running(index)?;
        trace_info!(index, stage = candidate.stage, "trial generated");

        self.notify(
            state,
            MutationEvent::Generated {
                index,
                stage,
                parameters: candidate.parameters.clone(),
            },
        )?;
        Ok((candidate.parameters, index))
    }

    /// Generate up to `max` trials, stopping at the first refusal.
    ///
    /// # Errors
    ///
    /// Returns the refusal if not even one trial could be generated, and
    /// any persistence failure immediately.
    pub fn get_next_trials(&self, max: usize) -> Result<Vec<(Parameters, u64)>> {
        let mut batch = Vec::with_capacity(max);
        while batch.len() < max {
            match self.get_next_trial() {
                Ok(trial) => batch.push(trial),
                Err(err @ Error::Persistence { .. }) => return Err(err),
                Err(err) if batch.is_empty() => return Err(err),
                Err(_) => break,
            }
        }
        Ok(batch)
    }

    /// Report results for a running trial.
    ///
    /// `raw` may be a bare mean, a `(mean, sem)` pair (both only for
    /// single-objective experiments), or a full metric map. See
    /// [`RawData`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidData`] for malformed data,
    /// [`Error::TrialNotFound`], [`Error::InvalidTrialState`] unless the
    /// trial is running, and [`Error::Persistence`] if the hook fails.
    pub fn complete_trial(&self, index: u64, raw: impl Into<RawData>) -> Result<()> {
        let mut state = self.state.lock();
        let data = raw.into().into_trial_data(&state.objectives)?;
        state.store.complete(index, data.clone())?;
        trace_info!(index, "trial completed");
        self.notify(&state, MutationEvent::Completed { index, data })
    }

    /// Mark a running trial as failed.
    ///
    /// Failing an already failed trial is a no-op. Under
    /// [`FailedTrialPolicy::Exclude`] its parameters are never generated
    /// again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TrialNotFound`], [`Error::InvalidTrialState`] for
    /// candidate, completed or abandoned trials, and [`Error::Persistence`].
    pub fn log_trial_failure(&self, index: u64) -> Result<()> {
        let mut state = self.state.lock();
        if !state.store.fail(index)? {
            return Ok(());
        }
        trace_info!(index, "trial failed");
        self.notify(&state, MutationEvent::Failed { index })
    }

    /// Discard a candidate or running trial without evaluating it.
    ///
    /// Abandoned trials free their parallelism slot and do not count toward
    /// a stage's budget. Abandoning twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TrialNotFound`], [`Error::InvalidTrialState`] for
    /// completed or failed trials, and [`Error::Persistence`].
    pub fn abandon_trial(&self, index: u64) -> Result<()> {
        let mut state = self.state.lock();
        if !state.store.abandon(index)? {
            return Ok(());
        }
        trace_info!(index, "trial abandoned");
        self.notify(&state, MutationEvent::Abandoned { index })
    }

    /// Insert a caller-chosen parameterization as a running trial.
    ///
    /// By default the trial is attributed to an external pseudo-stage and
    /// does not count against any parallelism cap (see
    /// [`AttachAttribution`]).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameters`] if the parameters do not fit the
    /// search space, [`Error::DuplicateAttach`] if uniqueness is required
    /// and an identical trial exists, [`Error::MaxParallelismReached`] if it
    /// is attributed to a stage already at capacity, and
    /// [`Error::Persistence`].
    pub fn attach_trial(&self, parameters: Parameters) -> Result<u64> {
        self.attach(parameters, TrialStatus::Running)
    }

    /// Like [`attach_trial`](Self::attach_trial) but leaves the trial as a
    /// candidate until [`run_trial`](Self::run_trial) is called.
    ///
    /// # Errors
    ///
    /// As [`attach_trial`](Self::attach_trial).
    pub fn attach_candidate(&self, parameters: Parameters) -> Result<u64> {
        self.attach(parameters, TrialStatus::Candidate)
    }

    fn attach(&self, parameters: Parameters, status: TrialStatus) -> Result<u64> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let parameters = state
            .search_space
            .normalize(&parameters)
            .map_err(Error::InvalidParameters)?;
        let stage = match state.config.attach_attribution {
            AttachAttribution::External => StageAttribution::External,
            AttachAttribution::CurrentStage => {
                let current = state.strategy.update_stage(&state.store);
                if status == TrialStatus::Running {
                    state.strategy.check_capacity(current, &state.store)?;
                }
                StageAttribution::Stage(current)
            }
        };
        let index = state.store.create(
            parameters.clone(),
            stage,
            status,
            state.config.require_unique_parameters,
        )?;
        trace_info!(index, ?stage, ?status, "trial attached");
        self.notify(
            state,
            MutationEvent::Attached {
                index,
                stage,
                status,
                parameters,
            },
        )?;
        Ok(index)
    }

    /// Commit a candidate trial to running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TrialNotFound`], [`Error::InvalidTrialState`] unless
    /// the trial is a candidate, [`Error::MaxParallelismReached`] if its
    /// stage is at capacity, and [`Error::Persistence`].
    pub fn run_trial(&self, index: u64) -> Result<()> {
        let mut state = self.state.lock();
        let trial = state.store.get(index)?;
        if trial.status == TrialStatus::Candidate
            && let StageAttribution::Stage(stage) = trial.stage
        {
            state.strategy.check_capacity(stage, &state.store)?;
        }
        state.store.mark_running(index)?;
        trace_debug!(index, "trial running");
        self.notify(&state, MutationEvent::Running { index })
    }

    /// The parallelism schedule: one entry per stage.
    #[must_use]
    pub fn get_max_parallelism(&self) -> Vec<ParallelismEntry> {
        self.state.lock().strategy.parallelism_report()
    }

    /// A copy of one trial.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TrialNotFound`] for an unknown index.
    pub fn get_trial(&self, index: u64) -> Result<Trial> {
        self.state.lock().store.get(index).cloned()
    }

    /// The parameters of one trial.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TrialNotFound`] for an unknown index.
    pub fn get_trial_parameters(&self, index: u64) -> Result<Parameters> {
        self.state
            .lock()
            .store
            .get(index)
            .map(|t| t.parameters.clone())
    }

    /// Copies of every trial, in index order.
    #[must_use]
    pub fn trials(&self) -> Vec<Trial> {
        self.state.lock().store.trials().to_vec()
    }

    /// Index of the active stage.
    ///
    /// The pointer only moves when a trial is requested, so this reports
    /// the stage of the most recent ask.
    #[must_use]
    pub fn current_stage(&self) -> usize {
        self.state.lock().strategy.current_stage()
    }

    /// Number of trials of any status.
    #[must_use]
    pub fn num_trials(&self) -> usize {
        self.state.lock().store.len()
    }

    /// Number of running trials, attached ones included.
    #[must_use]
    pub fn num_running(&self) -> usize {
        self.state.lock().store.num_running()
    }

    /// Run the persistence hook, if any, after a mutation.
    ///
    /// The mutation has already been applied; a hook failure is reported
    /// with the touched trial's index.
    fn notify(&self, state: &ExperimentState, event: MutationEvent) -> Result<()> {
        let Some(hook) = &self.hook else {
            return Ok(());
        };
        let index = event.index();
        hook.on_mutation(&event, &state.snapshot())
            .map_err(|err| {
                trace_info!(index, error = %err, "persistence hook failed");
                match err {
                    Error::Persistence { message, .. } => Error::Persistence {
                        index: Some(index),
                        message,
                    },
                    other => Error::persistence(Some(index), other),
                }
            })
    }
}
