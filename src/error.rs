/// Errors returned by experiment, store, and generation operations.
///
/// Two variants are backpressure signals rather than failures:
/// [`MaxParallelismReached`](Error::MaxParallelismReached) and
/// [`DataRequired`](Error::DataRequired). Callers that drive an ask/tell loop
/// should wait for outstanding trials (or supply more data) and retry when
/// [`Error::is_backpressure`] returns `true`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The active stage already has `max_parallelism` trials running.
    #[error(
        "maximum parallelism reached for stage {stage}: {max_parallelism} trials are running; \
         complete or fail outstanding trials before requesting more"
    )]
    MaxParallelismReached {
        /// Index of the stage that refused admission.
        stage: usize,
        /// The stage's parallelism cap.
        max_parallelism: usize,
    },

    /// More completed trials are needed before a new trial can be generated.
    #[error(
        "stage {stage} requires {required} completed trials before proceeding, but only \
         {observed} are available"
    )]
    DataRequired {
        /// Index of the stage that refused admission.
        stage: usize,
        /// Number of completed trials required.
        required: usize,
        /// Number of completed trials currently observed.
        observed: usize,
    },

    /// The trial is not in a status that allows the requested operation.
    #[error("trial {index} is {status:?}; cannot {operation}")]
    InvalidTrialState {
        /// The trial index.
        index: u64,
        /// The trial's current status.
        status: crate::TrialStatus,
        /// The refused operation.
        operation: &'static str,
    },

    /// An identical parameterization already exists and uniqueness is required.
    #[error("parameterization is identical to existing trial {index}")]
    DuplicateAttach {
        /// Index of the existing identical trial.
        index: u64,
    },

    /// No completed trial satisfies the outcome constraints.
    #[error("no completed trials satisfy the outcome constraints")]
    NoData,

    /// No trial has the given index.
    #[error("trial {0} does not exist")]
    TrialNotFound(u64),

    /// A caller-supplied parameterization does not fit the search space.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// A generation method produced a candidate outside the search space.
    #[error("generation method of stage {stage} produced an invalid candidate: {reason}")]
    InvalidCandidate {
        /// Index of the stage whose method misbehaved.
        stage: usize,
        /// Why the validator rejected the candidate.
        reason: String,
    },

    /// Raw data passed on completion is malformed.
    #[error("invalid trial data: {0}")]
    InvalidData(String),

    /// The stage policy is inconsistent.
    #[error("invalid stage policy: {0}")]
    InvalidStagePolicy(String),

    /// The search space definition is inconsistent.
    #[error("invalid search space: {0}")]
    InvalidSearchSpace(String),

    /// The objective or outcome constraint definition is inconsistent.
    #[error("invalid objective: {0}")]
    InvalidObjective(String),

    /// A deterministic generation method has no unexplored point left.
    #[error("search space exhausted for stage {stage}")]
    SearchSpaceExhausted {
        /// Index of the exhausted stage.
        stage: usize,
    },

    /// The last stage has a finite, enforced trial budget that is spent.
    #[error("generation strategy completed: the last stage produced all of its trials")]
    StrategyCompleted,

    /// Saving or loading experiment state failed.
    ///
    /// When raised from a mutating call, the in-memory mutation has been
    /// applied and `index` names the trial it touched.
    #[error("persistence failed: {message}")]
    Persistence {
        /// The trial touched by the mutation, if any.
        index: Option<u64>,
        /// Description of the underlying failure.
        message: String,
    },
}

impl Error {
    /// Return `true` for errors that signal "wait and retry" rather than
    /// a fault: [`MaxParallelismReached`](Error::MaxParallelismReached) and
    /// [`DataRequired`](Error::DataRequired).
    ///
    /// # Examples
    ///
    /// ```
    /// use stagewise::Error;
    ///
    /// let err = Error::MaxParallelismReached { stage: 0, max_parallelism: 3 };
    /// assert!(err.is_backpressure());
    /// assert!(!Error::NoData.is_backpressure());
    /// ```
    #[must_use]
    pub fn is_backpressure(&self) -> bool {
        matches!(
            self,
            Error::MaxParallelismReached { .. } | Error::DataRequired { .. }
        )
    }

    pub(crate) fn persistence(index: Option<u64>, err: impl ToString) -> Self {
        Error::Persistence {
            index,
            message: err.to_string(),
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;
