use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::generator::{GenerationMethod, MethodDescriptor};
use crate::objective::{Objective, OutcomeConstraint};
use crate::parameter::SearchSpace;
use crate::stage::{StageDescriptor, StagePolicy};
use crate::store::TrialStore;
use crate::strategy::GenerationStrategy;
use crate::trial::Trial;

use super::builder::validate_objectives;
use super::{Experiment, ExperimentConfig, ExperimentState};

/// Current snapshot schema version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// A serializable snapshot of an experiment's state.
///
/// Captures everything needed to rebuild an equivalent experiment: the
/// search space, objectives, config, stage policy, stage pointer, and
/// every trial with its status and data. Generation methods are stored as
/// [`MethodDescriptor`]s; the internal state of stochastic methods is not.
///
/// # Schema versioning
///
/// The `version` field enables future schema evolution without breaking
/// existing files. The current version is [`SNAPSHOT_VERSION`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSnapshot {
    /// Schema version.
    pub version: u32,
    /// Experiment name.
    pub name: String,
    /// The search space.
    pub search_space: SearchSpace,
    /// Objectives in declaration order.
    pub objectives: Vec<Objective>,
    /// Outcome constraints.
    pub outcome_constraints: Vec<OutcomeConstraint>,
    /// Behavioural config.
    pub config: ExperimentConfig,
    /// The stage policy.
    pub stages: Vec<StageDescriptor>,
    /// Index of the active stage.
    pub current_stage: usize,
    /// Every trial, in index order.
    pub trials: Vec<Trial>,
}

impl ExperimentState {
    pub(super) fn snapshot(&self) -> ExperimentSnapshot {
        ExperimentSnapshot {
            version: SNAPSHOT_VERSION,
            name: self.name.clone(),
            search_space: self.search_space.clone(),
            objectives: self.objectives.clone(),
            outcome_constraints: self.outcome_constraints.clone(),
            config: self.config.clone(),
            stages: self.strategy.policy().descriptors(),
            current_stage: self.strategy.current_stage(),
            trials: self.store.trials().to_vec(),
        }
    }
}

/// Write `snapshot` as pretty JSON, atomically.
pub(crate) fn write_snapshot(path: &Path, snapshot: &ExperimentSnapshot) -> Result<()> {
    // Write to a temp file in the same directory, then rename.
    let parent = path.parent().unwrap_or(Path::new("."));
    let tmp_path = parent.join(format!(
        ".{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy()
    ));
    let file = std::fs::File::create(&tmp_path).map_err(|e| Error::persistence(None, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, snapshot).map_err(|e| Error::persistence(None, e))?;
    writer.flush().map_err(|e| Error::persistence(None, e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| Error::persistence(None, e))
}

impl Experiment {
    /// Capture the current state.
    #[must_use]
    pub fn snapshot(&self) -> ExperimentSnapshot {
        self.state.lock().snapshot()
    }

    /// Rebuild an experiment from a snapshot using the built-in methods.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] for an unknown schema version or
    /// inconsistent trials, and [`Error::InvalidStagePolicy`] if a stage
    /// uses a custom method (use [`from_snapshot_with`](Self::from_snapshot_with)).
    pub fn from_snapshot(snapshot: ExperimentSnapshot) -> Result<Self> {
        Self::from_snapshot_with(snapshot, |_| None)
    }

    /// Rebuild an experiment from a snapshot, resolving generation methods
    /// through `resolve` before falling back to the built-ins.
    ///
    /// The loaded experiment has no persistence hook; add one with
    /// [`with_persistence_hook`](Self::with_persistence_hook).
    ///
    /// # Errors
    ///
    /// As [`from_snapshot`](Self::from_snapshot), plus any validation error
    /// of the stored search space or objectives.
    pub fn from_snapshot_with(
        snapshot: ExperimentSnapshot,
        resolve: impl Fn(&MethodDescriptor) -> Option<Arc<dyn GenerationMethod>>,
    ) -> Result<Self> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(Error::persistence(
                None,
                format!(
                    "unsupported snapshot version {} (expected {SNAPSHOT_VERSION})",
                    snapshot.version
                ),
            ));
        }
        let search_space = SearchSpace::new(
            snapshot.search_space.parameters().to_vec(),
            snapshot.search_space.constraints().to_vec(),
        )?;
        validate_objectives(&snapshot.objectives, &snapshot.outcome_constraints)?;
        let policy = StagePolicy::from_descriptors(&snapshot.stages, &resolve)?;
        let strategy = GenerationStrategy::resume(
            policy,
            snapshot.config.enforce_sequential_optimization,
            snapshot.current_stage,
        )?;
        let store = TrialStore::from_trials(snapshot.trials)?;

        trace_info!(
            name = %snapshot.name,
            trials = store.len(),
            stage = snapshot.current_stage,
            "experiment restored"
        );

        Ok(Self {
            state: Mutex::new(ExperimentState {
                name: snapshot.name,
                search_space,
                objectives: snapshot.objectives,
                outcome_constraints: snapshot.outcome_constraints,
                config: snapshot.config,
                strategy,
                store,
            }),
            hook: None,
        })
    }

    /// Save the experiment to a JSON file.
    ///
    /// The write is atomic: a temporary file is written next to `path` and
    /// renamed over it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        write_snapshot(path.as_ref(), &self.snapshot())
    }

    /// Load an experiment saved with [`save`](Self::save).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the file cannot be read or parsed,
    /// and any error of [`from_snapshot`](Self::from_snapshot).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_with(path, |_| None)
    }

    /// Load an experiment whose stages use custom generation methods.
    ///
    /// # Errors
    ///
    /// As [`load`](Self::load).
    pub fn load_with(
        path: impl AsRef<Path>,
        resolve: impl Fn(&MethodDescriptor) -> Option<Arc<dyn GenerationMethod>>,
    ) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| Error::persistence(None, e))?;
        let snapshot: ExperimentSnapshot = serde_json::from_reader(std::io::BufReader::new(file))
            .map_err(|e| Error::persistence(None, e))?;
        Self::from_snapshot_with(snapshot, resolve)
    }
}
