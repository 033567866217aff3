use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::objective::{Objective, OutcomeConstraint, TieBreak};
use crate::parameter::SearchSpace;
use crate::stage::StagePolicy;
use crate::storage::PersistenceHook;
use crate::store::TrialStore;
use crate::strategy::GenerationStrategy;

use super::{Experiment, ExperimentState};

/// Where trials added through [`Experiment::attach_trial`] are attributed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttachAttribution {
    /// A pseudo-stage exempt from every parallelism cap.
    #[default]
    External,
    /// The stage active at attach time; counts against its cap.
    CurrentStage,
}

/// What generation does with parameterizations of failed trials.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailedTrialPolicy {
    /// Redraw any candidate identical to a failed trial's parameters.
    #[default]
    Exclude,
    /// Let the generation method propose them again.
    Allow,
}

/// Behavioural switches of an experiment.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `enforce_sequential_optimization` | `true` |
/// | `require_unique_parameters` | `false` |
/// | `attach_attribution` | [`AttachAttribution::External`] |
/// | `failed_trial_policy` | [`FailedTrialPolicy::Exclude`] |
/// | `tie_break` | [`TieBreak::LowestIndex`] |
/// | `max_redraws` | 32 |
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Enforce parallelism caps and stage data thresholds.
    pub enforce_sequential_optimization: bool,
    /// Reject a parameterization identical to an existing trial.
    pub require_unique_parameters: bool,
    /// Stage attribution of attached trials.
    pub attach_attribution: AttachAttribution,
    /// Handling of failed trials' parameters during generation.
    pub failed_trial_policy: FailedTrialPolicy,
    /// Which trial wins when best values tie.
    pub tie_break: TieBreak,
    /// Proposals discarded per ask before giving up.
    pub max_redraws: usize,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            enforce_sequential_optimization: true,
            require_unique_parameters: false,
            attach_attribution: AttachAttribution::External,
            failed_trial_policy: FailedTrialPolicy::Exclude,
            tie_break: TieBreak::LowestIndex,
            max_redraws: 32,
        }
    }
}

/// A builder for constructing [`Experiment`] instances with a fluent API.
///
/// Created via [`Experiment::builder()`]. A search space and at least one
/// objective are required; everything else has a default.
///
/// # Defaults
///
/// - Stage policy: [`StagePolicy::default_for`] the number of parameters
/// - Config: [`ExperimentConfig::default`]
/// - No persistence hook
///
/// # Examples
///
/// ```
/// use stagewise::{Experiment, Objective, ParameterSpec, SearchSpace};
///
/// let space = SearchSpace::builder()
///     .parameter("x", ParameterSpec::float(0.0, 1.0))
///     .build()
///     .unwrap();
/// let experiment = Experiment::builder("demo")
///     .search_space(space)
///     .objective(Objective::minimize("loss"))
///     .build()
///     .unwrap();
/// assert_eq!(experiment.num_trials(), 0);
/// ```
pub struct ExperimentBuilder {
    name: String,
    search_space: Option<SearchSpace>,
    objectives: Vec<Objective>,
    outcome_constraints: Vec<OutcomeConstraint>,
    policy: Option<StagePolicy>,
    config: ExperimentConfig,
    hook: Option<Arc<dyn PersistenceHook>>,
}

impl ExperimentBuilder {
    pub(super) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            search_space: None,
            objectives: Vec::new(),
            outcome_constraints: Vec::new(),
            policy: None,
            config: ExperimentConfig::default(),
            hook: None,
        }
    }

    /// Set the search space.
    #[must_use]
    pub fn search_space(mut self, space: SearchSpace) -> Self {
        self.search_space = Some(space);
        self
    }

    /// Add an objective. The first one drives best-so-far queries and
    /// model-based generation.
    #[must_use]
    pub fn objective(mut self, objective: Objective) -> Self {
        self.objectives.push(objective);
        self
    }

    /// Add an outcome constraint.
    #[must_use]
    pub fn outcome_constraint(mut self, constraint: OutcomeConstraint) -> Self {
        self.outcome_constraints.push(constraint);
        self
    }

    /// Override the stage policy.
    #[must_use]
    pub fn stage_policy(mut self, policy: StagePolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Replace the whole config.
    #[must_use]
    pub fn config(mut self, config: ExperimentConfig) -> Self {
        self.config = config;
        self
    }

    /// Turn parallelism caps and stage data thresholds on or off.
    #[must_use]
    pub fn enforce_sequential_optimization(mut self, enforce: bool) -> Self {
        self.config.enforce_sequential_optimization = enforce;
        self
    }

    /// Reject parameterizations identical to an existing trial.
    #[must_use]
    pub fn require_unique_parameters(mut self, unique: bool) -> Self {
        self.config.require_unique_parameters = unique;
        self
    }

    /// Set the stage attribution of attached trials.
    #[must_use]
    pub fn attach_attribution(mut self, attribution: AttachAttribution) -> Self {
        self.config.attach_attribution = attribution;
        self
    }

    /// Set the handling of failed trials' parameters.
    #[must_use]
    pub fn failed_trial_policy(mut self, policy: FailedTrialPolicy) -> Self {
        self.config.failed_trial_policy = policy;
        self
    }

    /// Set the best-value tie break.
    #[must_use]
    pub fn tie_break(mut self, tie_break: TieBreak) -> Self {
        self.config.tie_break = tie_break;
        self
    }

    /// Set how many clashing proposals an ask discards before failing.
    #[must_use]
    pub fn max_redraws(mut self, n: usize) -> Self {
        self.config.max_redraws = n;
        self
    }

    /// Install a hook called after every mutation.
    #[must_use]
    pub fn persistence_hook(mut self, hook: impl PersistenceHook + 'static) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    /// Build the [`Experiment`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSearchSpace`] without a search space and
    /// [`Error::InvalidObjective`] without objectives, with repeated
    /// objective metrics, or with an outcome constraint on an objective
    /// metric or a non-finite bound.
    pub fn build(self) -> Result<Experiment> {
        let search_space = self
            .search_space
            .ok_or_else(|| Error::InvalidSearchSpace("a search space is required".into()))?;
        validate_objectives(&self.objectives, &self.outcome_constraints)?;
        let policy = self
            .policy
            .unwrap_or_else(|| StagePolicy::default_for(search_space.len()));

        trace_info!(
            name = %self.name,
            stages = policy.len(),
            parameters = search_space.len(),
            "experiment created"
        );

        let strategy =
            GenerationStrategy::new(policy, self.config.enforce_sequential_optimization);
        Ok(Experiment::from_parts(
            ExperimentState {
                name: self.name,
                search_space,
                objectives: self.objectives,
                outcome_constraints: self.outcome_constraints,
                config: self.config,
                strategy,
                store: TrialStore::new(),
            },
            self.hook,
        ))
    }
}

pub(super) fn validate_objectives(
    objectives: &[Objective],
    constraints: &[OutcomeConstraint],
) -> Result<()> {
    if objectives.is_empty() {
        return Err(Error::InvalidObjective(
            "at least one objective is required".into(),
        ));
    }
    for (i, objective) in objectives.iter().enumerate() {
        if objectives[..i].iter().any(|o| o.metric == objective.metric) {
            return Err(Error::InvalidObjective(format!(
                "metric '{}' is used by two objectives",
                objective.metric
            )));
        }
    }
    for constraint in constraints {
        if !constraint.bound.is_finite() {
            return Err(Error::InvalidObjective(format!(
                "outcome constraint on '{}' has a non-finite bound",
                constraint.metric
            )));
        }
        if objectives.iter().any(|o| o.metric == constraint.metric) {
            return Err(Error::InvalidObjective(format!(
                "metric '{}' cannot be both an objective and an outcome constraint",
                constraint.metric
            )));
        }
    }
    Ok(())
}
