//! Persistence hooks.
//!
//! An [`Experiment`](crate::Experiment) keeps its state in memory and calls
//! an optional [`PersistenceHook`] synchronously after every mutation. The
//! hook receives the [`MutationEvent`] that just happened and a full
//! [`ExperimentSnapshot`], so it can either log the change or store the
//! whole state. A hook error is returned to the caller of the mutating
//! operation as [`Error::Persistence`](crate::Error::Persistence); the
//! in-memory change stands.
//!
//! # Available hooks
//!
//! | Hook | Description | Feature flag |
//! |------|-------------|-------------|
//! | [`JsonFileHook`] | Rewrites a snapshot file atomically after each mutation | — |
//! | `JournalHook` | Appends each event as a JSON line under an `fs2` file lock | `journal` |
//! | `SqliteStore` | Stores snapshots keyed by experiment name in `SQLite` | `sqlite` |
//!
//! # Implementing a custom hook
//!
//! ```
//! use parking_lot::Mutex;
//! use stagewise::storage::{MutationEvent, PersistenceHook};
//! use stagewise::{ExperimentSnapshot, Result};
//!
//! /// Remembers the index of every touched trial.
//! #[derive(Default)]
//! struct Recorder(Mutex<Vec<u64>>);
//!
//! impl PersistenceHook for Recorder {
//!     fn on_mutation(&self, event: &MutationEvent, _: &ExperimentSnapshot) -> Result<()> {
//!         self.0.lock().push(event.index());
//!         Ok(())
//!     }
//! }
//! ```

#[cfg(feature = "journal")]
mod journal;
#[cfg(feature = "sqlite")]
mod sqlite;

use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(feature = "journal")]
pub use journal::JournalHook;
use serde::{Deserialize, Serialize};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use crate::data::TrialData;
use crate::error::Result;
use crate::experiment::{ExperimentSnapshot, write_snapshot};
use crate::param::Parameters;
use crate::trial::StageAttribution;
use crate::types::TrialStatus;

/// A state change applied to an experiment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MutationEvent {
    /// A trial was generated by a stage and handed out as running.
    Generated {
        /// The new trial's index.
        index: u64,
        /// The producing stage.
        stage: StageAttribution,
        /// The generated parameters.
        parameters: Parameters,
    },
    /// A caller-chosen trial was attached.
    Attached {
        /// The new trial's index.
        index: u64,
        /// Stage attribution of the trial.
        stage: StageAttribution,
        /// `Candidate` or `Running`.
        status: TrialStatus,
        /// The attached parameters.
        parameters: Parameters,
    },
    /// A candidate was committed to running.
    Running {
        /// The trial's index.
        index: u64,
    },
    /// A running trial completed.
    Completed {
        /// The trial's index.
        index: u64,
        /// The stored observations.
        data: TrialData,
    },
    /// A running trial failed.
    Failed {
        /// The trial's index.
        index: u64,
    },
    /// A trial was abandoned.
    Abandoned {
        /// The trial's index.
        index: u64,
    },
}

impl MutationEvent {
    /// The index of the trial the event touched.
    #[must_use]
    pub fn index(&self) -> u64 {
        match self {
            MutationEvent::Generated { index, .. }
            | MutationEvent::Attached { index, .. }
            | MutationEvent::Running { index }
            | MutationEvent::Completed { index, .. }
            | MutationEvent::Failed { index }
            | MutationEvent::Abandoned { index } => *index,
        }
    }
}

/// Observer invoked synchronously after every experiment mutation.
///
/// Implementations must be `Send + Sync` because an experiment may be
/// shared across threads. The experiment's lock is held while the hook
/// runs, so hooks see mutations one at a time and in order.
pub trait PersistenceHook: Send + Sync {
    /// Persist the effect of `event`.
    ///
    /// # Errors
    ///
    /// Any error is surfaced to the caller of the mutating operation as
    /// [`Error::Persistence`](crate::Error::Persistence).
    fn on_mutation(&self, event: &MutationEvent, snapshot: &ExperimentSnapshot) -> Result<()>;
}

/// Lets a caller keep a handle on a hook it installed.
impl<T: PersistenceHook + ?Sized> PersistenceHook for Arc<T> {
    fn on_mutation(&self, event: &MutationEvent, snapshot: &ExperimentSnapshot) -> Result<()> {
        (**self).on_mutation(event, snapshot)
    }
}

/// Rewrites a JSON snapshot file after every mutation.
///
/// The file is always a complete snapshot that
/// [`Experiment::load`](crate::Experiment::load) can read back.
///
/// # Examples
///
/// ```no_run
/// use stagewise::storage::JsonFileHook;
///
/// let hook = JsonFileHook::new("experiment.json");
/// ```
#[derive(Clone, Debug)]
pub struct JsonFileHook {
    path: PathBuf,
}

impl JsonFileHook {
    /// Creates a hook writing to `path`.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// The snapshot file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PersistenceHook for JsonFileHook {
    fn on_mutation(&self, _event: &MutationEvent, snapshot: &ExperimentSnapshot) -> Result<()> {
        write_snapshot(&self.path, snapshot)
    }
}
