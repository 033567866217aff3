//! Stage policy: the ordered phases of a generation strategy.
//!
//! A [`Stage`] pairs a [`GenerationMethod`] with a trial budget, a data
//! threshold, and a parallelism cap. A [`StagePolicy`] is the validated,
//! ordered list of stages an experiment walks through.
//!
//! # Examples
//!
//! ```
//! use stagewise::generator::{GpGenerator, SobolGenerator};
//! use stagewise::{Stage, StagePolicy};
//!
//! let policy = StagePolicy::builder()
//!     .stage(
//!         Stage::new(SobolGenerator::with_seed(0))
//!             .num_trials(5)
//!             .min_trials_observed(5)
//!             .max_parallelism(5),
//!     )
//!     .stage(Stage::new(GpGenerator::new()).max_parallelism(3))
//!     .build()
//!     .unwrap();
//! assert_eq!(policy.len(), 2);
//! ```

use core::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::generator::{GenerationMethod, MethodDescriptor};

/// One phase of a generation strategy.
///
/// Defaults: unbounded trial budget, no data threshold, unbounded
/// parallelism, budget enforced.
#[derive(Clone)]
pub struct Stage {
    method: Arc<dyn GenerationMethod>,
    num_trials: Option<usize>,
    min_trials_observed: usize,
    max_parallelism: Option<usize>,
    enforce_num_trials: bool,
}

impl Stage {
    /// Creates a stage driven by `method`.
    #[must_use]
    pub fn new(method: impl GenerationMethod + 'static) -> Self {
        Self::from_arc(Arc::new(method))
    }

    /// Creates a stage from a shared method.
    #[must_use]
    pub fn from_arc(method: Arc<dyn GenerationMethod>) -> Self {
        Self {
            method,
            num_trials: None,
            min_trials_observed: 0,
            max_parallelism: None,
            enforce_num_trials: true,
        }
    }

    /// Sets the number of trials the stage produces before handing over.
    #[must_use]
    pub fn num_trials(mut self, n: usize) -> Self {
        self.num_trials = Some(n);
        self
    }

    /// Sets the completed trials from this stage required before the
    /// strategy may move past it.
    #[must_use]
    pub fn min_trials_observed(mut self, n: usize) -> Self {
        self.min_trials_observed = n;
        self
    }

    /// Caps how many of this stage's trials may be running at once.
    #[must_use]
    pub fn max_parallelism(mut self, n: usize) -> Self {
        self.max_parallelism = Some(n);
        self
    }

    /// Removes the parallelism cap.
    #[must_use]
    pub fn unbounded_parallelism(mut self) -> Self {
        self.max_parallelism = None;
        self
    }

    /// Whether the stage must produce its full budget before handing over.
    ///
    /// When `false`, the stage also ends as soon as `min_trials_observed`
    /// of its trials have completed.
    #[must_use]
    pub fn enforce_num_trials(mut self, enforce: bool) -> Self {
        self.enforce_num_trials = enforce;
        self
    }

    /// The stage's generation method.
    #[must_use]
    pub fn method(&self) -> &Arc<dyn GenerationMethod> {
        &self.method
    }

    /// Trial budget, `None` when unbounded.
    #[must_use]
    pub fn trial_budget(&self) -> Option<usize> {
        self.num_trials
    }

    /// Completed trials required before moving on.
    #[must_use]
    pub fn required_observations(&self) -> usize {
        self.min_trials_observed
    }

    /// Parallelism cap, `None` when unbounded.
    #[must_use]
    pub fn parallelism(&self) -> Option<usize> {
        self.max_parallelism
    }

    /// Whether the trial budget is enforced.
    #[must_use]
    pub fn is_budget_enforced(&self) -> bool {
        self.enforce_num_trials
    }

    /// Serializable description of the stage.
    #[must_use]
    pub fn descriptor(&self) -> StageDescriptor {
        StageDescriptor {
            method: self.method.descriptor(),
            num_trials: self.num_trials,
            min_trials_observed: self.min_trials_observed,
            max_parallelism: self.max_parallelism,
            enforce_num_trials: self.enforce_num_trials,
        }
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("method", &self.method.name())
            .field("num_trials", &self.num_trials)
            .field("min_trials_observed", &self.min_trials_observed)
            .field("max_parallelism", &self.max_parallelism)
            .field("enforce_num_trials", &self.enforce_num_trials)
            .finish()
    }
}

/// Serialized form of a [`Stage`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageDescriptor {
    /// How to rebuild the generation method.
    pub method: MethodDescriptor,
    /// Trial budget.
    pub num_trials: Option<usize>,
    /// Completed trials required before moving on.
    pub min_trials_observed: usize,
    /// Parallelism cap.
    pub max_parallelism: Option<usize>,
    /// Whether the budget is enforced.
    pub enforce_num_trials: bool,
}

impl StageDescriptor {
    /// Rebuild the stage, asking `resolve` first and falling back to the
    /// built-in methods.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStagePolicy`] if no method can be built.
    pub fn to_stage(
        &self,
        resolve: &dyn Fn(&MethodDescriptor) -> Option<Arc<dyn GenerationMethod>>,
    ) -> Result<Stage> {
        let method = resolve(&self.method)
            .or_else(|| self.method.instantiate())
            .ok_or_else(|| {
                Error::InvalidStagePolicy(format!(
                    "no generation method available for '{}'",
                    self.method.name()
                ))
            })?;
        Ok(Stage {
            method,
            num_trials: self.num_trials,
            min_trials_observed: self.min_trials_observed,
            max_parallelism: self.max_parallelism,
            enforce_num_trials: self.enforce_num_trials,
        })
    }
}

/// Validated, ordered sequence of stages.
#[derive(Clone, Debug)]
pub struct StagePolicy {
    stages: Vec<Stage>,
}

impl StagePolicy {
    /// Return a [`StagePolicyBuilder`].
    #[must_use]
    pub fn builder() -> StagePolicyBuilder {
        StagePolicyBuilder::default()
    }

    /// Build a policy from stages.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStagePolicy`] if there are no stages, a
    /// stage other than the last has no trial budget, a budget is zero, a
    /// data threshold exceeds its stage's budget, or a parallelism cap is
    /// zero.
    pub fn new(stages: Vec<Stage>) -> Result<Self> {
        if stages.is_empty() {
            return Err(Error::InvalidStagePolicy(
                "at least one stage is required".into(),
            ));
        }
        let last = stages.len() - 1;
        for (i, stage) in stages.iter().enumerate() {
            match stage.num_trials {
                None if i != last => {
                    return Err(Error::InvalidStagePolicy(format!(
                        "stage {i} has no trial budget; only the last stage may be unbounded"
                    )));
                }
                Some(0) => {
                    return Err(Error::InvalidStagePolicy(format!(
                        "stage {i} has a trial budget of zero"
                    )));
                }
                Some(n) if stage.min_trials_observed > n => {
                    return Err(Error::InvalidStagePolicy(format!(
                        "stage {i} requires {} completed trials but produces only {n}",
                        stage.min_trials_observed
                    )));
                }
                _ => {}
            }
            if stage.max_parallelism == Some(0) {
                return Err(Error::InvalidStagePolicy(format!(
                    "stage {i} has max_parallelism 0"
                )));
            }
        }
        Ok(Self { stages })
    }

    /// The default two-stage policy for a space of `n_parameters`.
    ///
    /// A quasi-random stage of `max(5, 2n)` trials, all of which may run at
    /// once and half of which must complete, followed by an unbounded
    /// model-based stage running at most 3 trials at a time. Without the
    /// `sobol` or `gp` features the missing stage uses
    /// [`RandomGenerator`](crate::generator::RandomGenerator).
    #[must_use]
    pub fn default_for(n_parameters: usize) -> Self {
        let budget = (2 * n_parameters).max(5);
        let exploration = exploration_stage()
            .num_trials(budget)
            .min_trials_observed(budget.div_ceil(2))
            .max_parallelism(budget);
        Self {
            stages: vec![exploration, model_stage().max_parallelism(3)],
        }
    }

    /// Rebuild a policy from descriptors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStagePolicy`] if a method cannot be built or
    /// the result is not a valid policy.
    pub fn from_descriptors(
        descriptors: &[StageDescriptor],
        resolve: &dyn Fn(&MethodDescriptor) -> Option<Arc<dyn GenerationMethod>>,
    ) -> Result<Self> {
        let stages = descriptors
            .iter()
            .map(|d| d.to_stage(resolve))
            .collect::<Result<Vec<_>>>()?;
        Self::new(stages)
    }

    /// Stages in order.
    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Look up a stage.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Stage> {
        self.stages.get(index)
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Always `false`; a policy has at least one stage.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Serializable description of every stage.
    #[must_use]
    pub fn descriptors(&self) -> Vec<StageDescriptor> {
        self.stages.iter().map(Stage::descriptor).collect()
    }
}

#[cfg(feature = "sobol")]
fn exploration_stage() -> Stage {
    Stage::new(crate::generator::SobolGenerator::new())
}

#[cfg(not(feature = "sobol"))]
fn exploration_stage() -> Stage {
    Stage::new(crate::generator::RandomGenerator::new())
}

#[cfg(feature = "gp")]
fn model_stage() -> Stage {
    Stage::new(crate::generator::GpGenerator::new())
}

#[cfg(not(feature = "gp"))]
fn model_stage() -> Stage {
    Stage::new(crate::generator::RandomGenerator::new())
}

/// Fluent builder for [`StagePolicy`].
#[derive(Debug, Default)]
pub struct StagePolicyBuilder {
    stages: Vec<Stage>,
}

impl StagePolicyBuilder {
    /// Append a stage.
    #[must_use]
    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Build and validate the policy.
    ///
    /// # Errors
    ///
    /// See [`StagePolicy::new`].
    pub fn build(self) -> Result<StagePolicy> {
        StagePolicy::new(self.stages)
    }
}
