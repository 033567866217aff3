#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![deny(unreachable_pub)]
#![deny(clippy::correctness)]
#![deny(clippy::suspicious)]
#![deny(clippy::style)]
#![deny(clippy::complexity)]
#![deny(clippy::perf)]
#![deny(clippy::pedantic)]
#![deny(clippy::std_instead_of_core)]

//! Ask/tell experiment optimization with staged generation strategies.
//!
//! An [`Experiment`] hands out parameterizations to evaluate, takes back
//! observed metrics, and decides what to try next. Which generation method
//! is asked, and how many trials may run at once, is governed by a
//! [`StagePolicy`]: an ordered list of stages (say, quasi-random
//! exploration followed by a Gaussian process model), each with a trial
//! budget, a data threshold, and a parallelism cap. When a request cannot
//! be served yet, the experiment answers with a backpressure error instead
//! of blocking.
//!
//! # Getting Started
//!
//! ```
//! use stagewise::prelude::*;
//!
//! let space = SearchSpace::builder()
//!     .parameter("x", ParameterSpec::float(-5.0, 5.0))
//!     .parameter("y", ParameterSpec::float(-5.0, 5.0))
//!     .build()
//!     .unwrap();
//!
//! let experiment = Experiment::builder("quadratic")
//!     .search_space(space)
//!     .objective(Objective::minimize("loss"))
//!     .build()
//!     .unwrap();
//!
//! for _ in 0..10 {
//!     let (parameters, index) = match experiment.get_next_trial() {
//!         Ok(next) => next,
//!         Err(e) if e.is_backpressure() => break,
//!         Err(e) => panic!("{e}"),
//!     };
//!     let x = parameters["x"].as_f64().unwrap();
//!     let y = parameters["y"].as_f64().unwrap();
//!     experiment.complete_trial(index, x * x + y * y).unwrap();
//! }
//!
//! let best = experiment.get_best_parameters().unwrap();
//! println!("best trial {} with {:?}", best.index, best.parameters);
//! ```
//!
//! # Core Concepts
//!
//! | Type | Role |
//! |------|------|
//! | [`Experiment`] | The ask/tell surface: generate, attach, complete, fail, abandon trials. |
//! | [`SearchSpace`] | Typed parameters ([`ParameterSpec`]) and linear [`ParameterConstraint`]s. |
//! | [`Objective`] / [`OutcomeConstraint`] | What to optimize and which outcomes are acceptable. |
//! | [`StagePolicy`] | Ordered [`Stage`]s, each wrapping a [`GenerationMethod`](generator::GenerationMethod). |
//! | [`GenerationStrategy`] | Tracks the active stage and admits or refuses new trials. |
//! | [`TrialStore`] | Append-only, index-ordered record of every trial. |
//! | [`PersistenceHook`](storage::PersistenceHook) | Synchronous observer of every mutation. |
//!
//! # Backpressure
//!
//! [`Error::MaxParallelismReached`] and [`Error::DataRequired`] mean "wait
//! for outstanding trials, then retry". Check them with
//! [`Error::is_backpressure`].
//!
//! # Feature Flags
//!
//! | Flag | What it enables | Default |
//! |------|----------------|---------|
//! | `sobol` | [`SobolGenerator`](generator::SobolGenerator), used by the default exploration stage | on |
//! | `gp` | [`GpGenerator`](generator::GpGenerator), used by the default model stage | on |
//! | `journal` | [`JournalHook`](storage::JournalHook): JSONL event log with file locking | off |
//! | `sqlite` | [`SqliteStore`](storage::SqliteStore): snapshots in an `SQLite` database | off |
//! | `tracing` | Structured log events via [`tracing`](https://docs.rs/tracing) at key points | off |

/// Emit a `tracing::info!` event when the `tracing` feature is enabled.
/// No-op otherwise.
#[cfg(feature = "tracing")]
macro_rules! trace_info {
    ($($arg:tt)*) => { tracing::info!($($arg)*) };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_info {
    ($($arg:tt)*) => {};
}

/// Emit a `tracing::debug!` event when the `tracing` feature is enabled.
/// No-op otherwise.
#[cfg(feature = "tracing")]
macro_rules! trace_debug {
    ($($arg:tt)*) => { tracing::debug!($($arg)*) };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_debug {
    ($($arg:tt)*) => {};
}

mod data;
mod error;
mod experiment;
pub mod generator;
mod objective;
mod param;
pub mod parameter;
mod rng_util;
mod stage;
pub mod storage;
mod store;
mod strategy;
mod trial;
mod types;

pub use data::{Observation, RawData, TrialData};
pub use error::{Error, Result};
pub use experiment::{
    AttachAttribution, BestParameters, Experiment, ExperimentBuilder, ExperimentConfig,
    ExperimentSnapshot, FailedTrialPolicy, SNAPSHOT_VERSION,
};
pub use objective::{ComparisonOp, Objective, OutcomeConstraint, TieBreak};
pub use param::{ParamValue, Parameters, params};
pub use parameter::{ParameterConstraint, ParameterSpec, SearchSpace};
pub use stage::{Stage, StageDescriptor, StagePolicy, StagePolicyBuilder};
pub use store::TrialStore;
pub use strategy::{Candidate, GenerationStrategy, ParallelismEntry};
pub use trial::{StageAttribution, Trial};
pub use types::{Direction, TrialStatus};

/// Convenient wildcard import for the most common types.
///
/// ```
/// use stagewise::prelude::*;
/// ```
pub mod prelude {
    #[cfg(feature = "gp")]
    pub use crate::generator::GpGenerator;
    #[cfg(feature = "sobol")]
    pub use crate::generator::SobolGenerator;
    pub use crate::generator::{GenerationMethod, GridGenerator, RandomGenerator};
    pub use crate::storage::{JsonFileHook, MutationEvent, PersistenceHook};
    pub use crate::{
        BestParameters, Direction, Error, Experiment, ExperimentConfig, Objective,
        OutcomeConstraint, ParamValue, ParameterConstraint, ParameterSpec, Parameters, Result,
        SearchSpace, Stage, StagePolicy, TrialStatus, params,
    };
}
