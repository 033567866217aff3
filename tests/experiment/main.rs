#![allow(clippy::cast_possible_truncation, clippy::float_cmp)]

mod admission;
mod failures;
mod lifecycle;
mod persistence;

use stagewise::generator::RandomGenerator;
use stagewise::{Experiment, Objective, ParameterSpec, SearchSpace, Stage, StagePolicy};

/// Two float parameters on `[0, 1]`.
pub(crate) fn unit_square() -> SearchSpace {
    SearchSpace::builder()
        .parameter("x", ParameterSpec::float(0.0, 1.0))
        .parameter("y", ParameterSpec::float(0.0, 1.0))
        .build()
        .unwrap()
}

/// A single-objective experiment over [`unit_square`] with `policy`.
pub(crate) fn experiment_with(policy: StagePolicy) -> Experiment {
    Experiment::builder("test")
        .search_space(unit_square())
        .objective(Objective::minimize("loss"))
        .stage_policy(policy)
        .build()
        .unwrap()
}

/// Random exploration (3 trials, all observed, 2 at a time) followed by an
/// unbounded random stage capped at 3.
pub(crate) fn two_random_stages() -> StagePolicy {
    StagePolicy::builder()
        .stage(
            Stage::new(RandomGenerator::with_seed(1))
                .num_trials(3)
                .min_trials_observed(3)
                .max_parallelism(2),
        )
        .stage(Stage::new(RandomGenerator::with_seed(2)).max_parallelism(3))
        .build()
        .unwrap()
}

pub(crate) fn temp_path(tag: &str, ext: &str) -> std::path::PathBuf {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let mut path = std::env::temp_dir();
    path.push(format!(
        "stagewise_{tag}_{}_{}.{ext}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    path
}
