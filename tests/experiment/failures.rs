use stagewise::generator::{GenerationContext, GenerationMethod, GridGenerator, History};
use stagewise::{
    Error, Experiment, FailedTrialPolicy, Objective, ParamValue, ParameterSpec, Parameters,
    Result, SearchSpace, Stage, StagePolicy, TrialStatus, params,
};

use super::{experiment_with, unit_square};

fn grid_points() -> Vec<Parameters> {
    [(0.1, 0.1), (0.5, 0.5), (0.9, 0.9)]
        .into_iter()
        .map(|(x, y)| params([("x", ParamValue::Float(x)), ("y", ParamValue::Float(y))]))
        .collect()
}

#[test]
fn failed_grid_point_is_never_returned() {
    let policy = StagePolicy::builder()
        .stage(Stage::new(GridGenerator::new(grid_points())))
        .build()
        .unwrap();
    let exp = experiment_with(policy);

    let (failed, index) = exp.get_next_trial().unwrap();
    exp.log_trial_failure(index).unwrap();

    let mut returned = Vec::new();
    loop {
        match exp.get_next_trial() {
            Ok((p, _)) => returned.push(p),
            Err(Error::SearchSpaceExhausted { stage: 0 }) => break,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(returned.len(), 2);
    assert!(!returned.contains(&failed));

    // Asking again keeps failing the same way.
    for _ in 0..3 {
        assert!(matches!(
            exp.get_next_trial(),
            Err(Error::SearchSpaceExhausted { .. })
        ));
    }
}

#[test]
fn cartesian_grid_covers_levels() {
    let space = SearchSpace::builder()
        .parameter("a", ParameterSpec::int(0, 2))
        .parameter("b", ParameterSpec::choice(["u", "v"]))
        .build()
        .unwrap();
    let grid = GridGenerator::cartesian(&space, 3);
    assert_eq!(grid.len(), 6);

    let exp = Experiment::builder("grid")
        .search_space(space)
        .objective(Objective::minimize("loss"))
        .stage_policy(StagePolicy::builder().stage(Stage::new(grid)).build().unwrap())
        .build()
        .unwrap();
    let batch = exp.get_next_trials(10).unwrap();
    assert_eq!(batch.len(), 6);
}

/// Proposes the same point forever.
struct Fixed(Parameters);

impl GenerationMethod for Fixed {
    fn propose(&self, _: &History<'_>, _: &GenerationContext<'_>) -> Result<Parameters> {
        Ok(self.0.clone())
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

fn fixed_experiment(policy: FailedTrialPolicy) -> Experiment {
    let point = params([("x", 0.4.into()), ("y", 0.6.into())]);
    Experiment::builder("fixed")
        .search_space(unit_square())
        .objective(Objective::minimize("loss"))
        .stage_policy(StagePolicy::builder().stage(Stage::new(Fixed(point))).build().unwrap())
        .failed_trial_policy(policy)
        .max_redraws(4)
        .build()
        .unwrap()
}

#[test]
fn excluded_failure_exhausts_fixed_method() {
    let exp = fixed_experiment(FailedTrialPolicy::Exclude);
    let (_, index) = exp.get_next_trial().unwrap();
    exp.log_trial_failure(index).unwrap();
    assert!(matches!(
        exp.get_next_trial(),
        Err(Error::SearchSpaceExhausted { stage: 0 })
    ));
    assert_eq!(exp.num_trials(), 1);
}

#[test]
fn allowed_failure_is_retried() {
    let exp = fixed_experiment(FailedTrialPolicy::Allow);
    let (first, index) = exp.get_next_trial().unwrap();
    exp.log_trial_failure(index).unwrap();
    let (second, retry) = exp.get_next_trial().unwrap();
    assert_eq!(first, second);
    assert_eq!(retry, 1);
    assert_eq!(exp.get_trial(0).unwrap().status, TrialStatus::Failed);
}

/// Proposes a point outside the unit square.
struct OutOfBounds;

impl GenerationMethod for OutOfBounds {
    fn propose(&self, _: &History<'_>, _: &GenerationContext<'_>) -> Result<Parameters> {
        Ok(params([("x", 2.0.into()), ("y", 0.0.into())]))
    }

    fn name(&self) -> &str {
        "out-of-bounds"
    }
}

#[test]
fn invalid_candidate_creates_no_trial() {
    let policy = StagePolicy::builder()
        .stage(Stage::new(OutOfBounds))
        .build()
        .unwrap();
    let exp = experiment_with(policy);
    assert!(matches!(
        exp.get_next_trial(),
        Err(Error::InvalidCandidate { stage: 0, .. })
    ));
    assert_eq!(exp.num_trials(), 0);
}

#[test]
fn failed_trials_do_not_count_toward_budget() {
    let policy = StagePolicy::builder()
        .stage(Stage::new(GridGenerator::new(grid_points())).num_trials(2))
        .stage(Stage::new(GridGenerator::new(grid_points())))
        .build()
        .unwrap();
    let exp = experiment_with(policy);
    let (_, a) = exp.get_next_trial().unwrap();
    exp.log_trial_failure(a).unwrap();
    exp.get_next_trial().unwrap();
    exp.get_next_trial().unwrap();
    assert_eq!(exp.current_stage(), 0);
}
