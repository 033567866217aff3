//! Pluggable generation methods.
//!
//! A [`GenerationMethod`] turns the full trial history into one candidate
//! parameterization. Stages of a [`StagePolicy`](crate::StagePolicy) each hold
//! one method; the [`GenerationStrategy`](crate::GenerationStrategy) decides
//! which stage is asked.
//!
//! # Built-in methods
//!
//! | Method | Kind | Feature flag |
//! |--------|------|--------------|
//! | [`RandomGenerator`] | Uniform random | — |
//! | [`GridGenerator`] | Fixed point set, deterministic | — |
//! | [`SobolGenerator`](sobol::SobolGenerator) | Scrambled Sobol quasi-random | `sobol` |
//! | [`GpGenerator`](gp::GpGenerator) | Gaussian process + Expected Improvement | `gp` |
//!
//! # Implementing a custom method
//!
//! ```
//! use stagewise::generator::{GenerationContext, GenerationMethod, History};
//! use stagewise::{ParamValue, Parameters, Result};
//!
//! /// Always proposes the centre of every float range.
//! struct Centre;
//!
//! impl GenerationMethod for Centre {
//!     fn propose(&self, _history: &History<'_>, ctx: &GenerationContext<'_>) -> Result<Parameters> {
//!         Ok(stagewise::generator::map_unit_point(ctx.search_space, |_| 0.5))
//!     }
//!
//!     fn name(&self) -> &str {
//!         "centre"
//!     }
//! }
//! ```

mod common;
pub mod grid;
pub mod random;

#[cfg(feature = "gp")]
pub mod gp;
#[cfg(feature = "sobol")]
pub mod sobol;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use common::map_unit_point;
pub(crate) use common::{sample_random_point, value_to_unit};
#[cfg(feature = "gp")]
pub use gp::{GpGenerator, GpGeneratorBuilder};
pub use grid::GridGenerator;
pub use random::RandomGenerator;
#[cfg(feature = "sobol")]
pub use sobol::SobolGenerator;

use crate::error::Result;
use crate::objective::Objective;
use crate::param::Parameters;
use crate::parameter::SearchSpace;
use crate::trial::Trial;
use crate::types::TrialStatus;

/// Read-only view of every trial in an experiment, in index order.
#[derive(Clone, Copy, Debug)]
pub struct History<'a> {
    trials: &'a [Trial],
}

impl<'a> History<'a> {
    /// Wrap a slice of trials.
    #[must_use]
    pub fn new(trials: &'a [Trial]) -> Self {
        Self { trials }
    }

    /// All trials.
    #[must_use]
    pub fn trials(&self) -> &'a [Trial] {
        self.trials
    }

    /// Number of trials of any status.
    #[must_use]
    pub fn len(&self) -> usize {
        self.trials.len()
    }

    /// Return `true` if there are no trials.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    /// Completed trials (data attached).
    pub fn completed(&self) -> impl Iterator<Item = &'a Trial> + 'a {
        self.trials.iter().filter(|t| t.is_completed())
    }

    /// Candidate and running trials, whose points are in flight.
    pub fn pending(&self) -> impl Iterator<Item = &'a Trial> + 'a {
        self.trials.iter().filter(|t| t.status.is_pending())
    }

    /// Failed trials.
    pub fn failed(&self) -> impl Iterator<Item = &'a Trial> + 'a {
        self.trials
            .iter()
            .filter(|t| t.status == TrialStatus::Failed)
    }

    /// Return `true` if any trial of any status has exactly `parameters`.
    #[must_use]
    pub fn contains(&self, parameters: &Parameters) -> bool {
        self.trials.iter().any(|t| &t.parameters == parameters)
    }
}

/// Stage-specific configuration passed to a method alongside the history.
#[derive(Clone, Copy, Debug)]
pub struct GenerationContext<'a> {
    /// The experiment's search space.
    pub search_space: &'a SearchSpace,
    /// The experiment's objectives; the first one drives single-objective
    /// model-based methods.
    pub objectives: &'a [Objective],
    /// Index of the stage being asked.
    pub stage: usize,
    /// Index the generated trial will receive.
    pub next_index: u64,
}

/// Produces one candidate parameterization from the trial history.
///
/// Methods may be stochastic. They must be `Send + Sync` because an
/// experiment can be shared across threads; keep mutable state behind a
/// lock.
pub trait GenerationMethod: Send + Sync {
    /// Propose a candidate.
    ///
    /// # Errors
    ///
    /// Implementations return [`Error::SearchSpaceExhausted`](crate::Error::SearchSpaceExhausted)
    /// when no unexplored point is left, or any other error that prevents a
    /// proposal.
    fn propose(&self, history: &History<'_>, ctx: &GenerationContext<'_>) -> Result<Parameters>;

    /// Short, stable name used in logs and snapshots.
    fn name(&self) -> &str;

    /// Completed trials (across the experiment) needed before the method
    /// can produce a meaningful candidate.
    fn min_observed(&self) -> usize {
        0
    }

    /// Serializable description from which the method can be rebuilt.
    fn descriptor(&self) -> MethodDescriptor {
        MethodDescriptor::Custom {
            name: self.name().to_string(),
        }
    }
}

/// Serializable description of a generation method.
///
/// Built-in methods round-trip through [`instantiate`](Self::instantiate).
/// `Custom` methods must be supplied by the caller when an experiment is
/// loaded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MethodDescriptor {
    /// [`RandomGenerator`].
    Random {
        /// Seed, if fixed.
        seed: Option<u64>,
    },
    /// `SobolGenerator`.
    Sobol {
        /// Scrambling seed.
        seed: u32,
    },
    /// [`GridGenerator`].
    Grid {
        /// The fixed point set.
        points: Vec<Parameters>,
    },
    /// `GpGenerator`.
    Gp {
        /// Random candidates scored per proposal.
        n_candidates: usize,
        /// Observation noise added to the kernel diagonal.
        noise_variance: f64,
        /// Completed trials required before fitting.
        min_observed: usize,
        /// Seed, if fixed.
        seed: Option<u64>,
    },
    /// A caller-defined method.
    Custom {
        /// The method's name.
        name: String,
    },
}

impl MethodDescriptor {
    /// Rebuild a built-in method.
    ///
    /// Returns `None` for `Custom` descriptors and for methods whose feature
    /// flag is disabled.
    #[must_use]
    pub fn instantiate(&self) -> Option<Arc<dyn GenerationMethod>> {
        match self {
            MethodDescriptor::Random { seed } => Some(Arc::new(
                seed.map_or_else(RandomGenerator::new, RandomGenerator::with_seed),
            )),
            #[cfg(feature = "sobol")]
            MethodDescriptor::Sobol { seed } => {
                Some(Arc::new(SobolGenerator::with_seed(u64::from(*seed))))
            }
            MethodDescriptor::Grid { points } => Some(Arc::new(GridGenerator::new(points.clone()))),
            #[cfg(feature = "gp")]
            MethodDescriptor::Gp {
                n_candidates,
                noise_variance,
                min_observed,
                seed,
            } => {
                let mut builder = GpGenerator::builder()
                    .n_candidates(*n_candidates)
                    .noise_variance(*noise_variance)
                    .min_observed(*min_observed);
                if let Some(seed) = seed {
                    builder = builder.seed(*seed);
                }
                Some(Arc::new(builder.build()))
            }
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// The method name this descriptor rebuilds.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            MethodDescriptor::Random { .. } => "random",
            MethodDescriptor::Sobol { .. } => "sobol",
            MethodDescriptor::Grid { .. } => "grid",
            MethodDescriptor::Gp { .. } => "gp",
            MethodDescriptor::Custom { name } => name,
        }
    }
}
