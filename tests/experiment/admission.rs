use stagewise::generator::RandomGenerator;
use stagewise::{
    Error, Experiment, Objective, ParallelismEntry, Stage, StageAttribution, StagePolicy,
    TrialStatus,
};

use super::{experiment_with, two_random_stages, unit_square};

fn running_per_stage(exp: &Experiment, stage: usize) -> usize {
    exp.trials()
        .iter()
        .filter(|t| t.stage == StageAttribution::Stage(stage) && t.status == TrialStatus::Running)
        .count()
}

#[cfg(all(feature = "sobol", feature = "gp"))]
#[test]
fn quasi_random_then_model_scenario() {
    use stagewise::generator::{GpGenerator, SobolGenerator};

    let policy = StagePolicy::builder()
        .stage(
            Stage::new(SobolGenerator::with_seed(11))
                .num_trials(5)
                .min_trials_observed(5)
                .max_parallelism(5),
        )
        .stage(Stage::new(GpGenerator::with_seed(12)))
        .build()
        .unwrap();
    let exp = experiment_with(policy);

    let mut batch = Vec::new();
    for expected in 0..5 {
        let (parameters, index) = exp.get_next_trial().unwrap();
        assert_eq!(index, expected);
        assert!(!batch.contains(&parameters));
        batch.push(parameters);
    }
    assert!(
        exp.trials()
            .iter()
            .all(|t| t.status == TrialStatus::Running && t.stage == StageAttribution::Stage(0))
    );

    assert!(matches!(
        exp.get_next_trial(),
        Err(Error::MaxParallelismReached { stage: 0, max_parallelism: 5 })
    ));
    assert_eq!(exp.num_trials(), 5);

    for (index, p) in batch.iter().enumerate() {
        let x = p["x"].as_f64().unwrap();
        let y = p["y"].as_f64().unwrap();
        exp.complete_trial(index as u64, (x - 0.3).powi(2) + (y - 0.6).powi(2))
            .unwrap();
    }

    let (_, index) = exp.get_next_trial().unwrap();
    assert_eq!(index, 5);
    assert_eq!(exp.current_stage(), 1);
    assert_eq!(
        exp.get_trial(5).unwrap().stage,
        StageAttribution::Stage(1)
    );
}

#[test]
fn caps_hold_under_random_interleaving() {
    let exp = experiment_with(two_random_stages());
    let caps = [2, 3];
    let mut rng = fastrand::Rng::with_seed(21);

    for _ in 0..200 {
        if rng.u8(..3) > 0 {
            let _ = exp.get_next_trial();
        } else {
            let running: Vec<u64> = exp
                .trials()
                .iter()
                .filter(|t| t.status == TrialStatus::Running)
                .map(|t| t.index)
                .collect();
            if let Some(&index) = running.get(rng.usize(..running.len().max(1))) {
                exp.complete_trial(index, rng.f64()).unwrap();
            }
        }
        for (stage, cap) in caps.iter().enumerate() {
            assert!(running_per_stage(&exp, stage) <= *cap);
        }
    }
}

#[test]
fn stage_pointer_never_decreases() {
    let policy = StagePolicy::builder()
        .stage(
            Stage::new(RandomGenerator::with_seed(1))
                .num_trials(3)
                .min_trials_observed(2)
                .max_parallelism(2),
        )
        .stage(
            Stage::new(RandomGenerator::with_seed(2))
                .num_trials(4)
                .max_parallelism(2),
        )
        .stage(Stage::new(RandomGenerator::with_seed(3)))
        .build()
        .unwrap();
    let exp = experiment_with(policy);
    let mut rng = fastrand::Rng::with_seed(5);
    let mut last = exp.current_stage();

    for _ in 0..120 {
        let _ = exp.get_next_trial();
        let running: Vec<u64> = exp
            .trials()
            .iter()
            .filter(|t| t.status == TrialStatus::Running)
            .map(|t| t.index)
            .collect();
        if !running.is_empty() && rng.bool() {
            let index = running[rng.usize(..running.len())];
            match rng.u8(..3) {
                0 => exp.log_trial_failure(index).unwrap(),
                1 => exp.abandon_trial(index).unwrap(),
                _ => exp.complete_trial(index, rng.f64()).unwrap(),
            }
        }
        let now = exp.current_stage();
        assert!(now >= last);
        last = now;
    }
}

#[test]
fn data_threshold_blocks_until_completions() {
    let policy = StagePolicy::builder()
        .stage(
            Stage::new(RandomGenerator::with_seed(1))
                .num_trials(2)
                .min_trials_observed(2),
        )
        .stage(Stage::new(RandomGenerator::with_seed(2)))
        .build()
        .unwrap();
    let exp = experiment_with(policy);
    let (_, a) = exp.get_next_trial().unwrap();
    let (_, b) = exp.get_next_trial().unwrap();

    let err = exp.get_next_trial().unwrap_err();
    assert!(err.is_backpressure());
    assert!(matches!(
        err,
        Error::DataRequired { stage: 0, required: 2, observed: 0 }
    ));

    exp.complete_trial(a, 1.0).unwrap();
    assert!(matches!(
        exp.get_next_trial(),
        Err(Error::DataRequired { observed: 1, .. })
    ));
    exp.complete_trial(b, 2.0).unwrap();
    let (_, c) = exp.get_next_trial().unwrap();
    assert_eq!(exp.get_trial(c).unwrap().stage, StageAttribution::Stage(1));
}

#[test]
fn sequential_off_forces_progress() {
    let policy = StagePolicy::builder()
        .stage(
            Stage::new(RandomGenerator::with_seed(1))
                .num_trials(2)
                .min_trials_observed(2)
                .max_parallelism(1),
        )
        .stage(Stage::new(RandomGenerator::with_seed(2)).max_parallelism(1))
        .build()
        .unwrap();
    let exp = Experiment::builder("free")
        .search_space(unit_square())
        .objective(Objective::minimize("loss"))
        .stage_policy(policy)
        .enforce_sequential_optimization(false)
        .build()
        .unwrap();

    let indices: Vec<u64> = (0..6).map(|_| exp.get_next_trial().unwrap().1).collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(exp.num_running(), 6);
    assert_eq!(exp.current_stage(), 1);
    assert!(
        exp.get_max_parallelism()
            .iter()
            .all(|e| e.max_parallelism.is_none())
    );
}

#[cfg(feature = "gp")]
#[test]
fn sequential_off_waits_for_model_data() {
    let exp = Experiment::builder("free-default")
        .search_space(unit_square())
        .objective(Objective::minimize("loss"))
        .enforce_sequential_optimization(false)
        .build()
        .unwrap();
    let budget = exp.get_max_parallelism()[0].num_trials.unwrap();

    // Nothing has completed, so exploration keeps going past its budget.
    for expected in 0..budget as u64 + 3 {
        let (_, index) = exp.get_next_trial().unwrap();
        assert_eq!(index, expected);
    }
    assert_eq!(exp.current_stage(), 0);
    assert_eq!(running_per_stage(&exp, 0), budget + 3);

    exp.complete_trial(0, 0.5).unwrap();
    let (_, index) = exp.get_next_trial().unwrap();
    assert_eq!(index, budget as u64 + 3);
    assert_eq!(exp.current_stage(), 1);
    assert_eq!(running_per_stage(&exp, 1), 1);
}

#[test]
fn finite_last_stage_completes() {
    let policy = StagePolicy::builder()
        .stage(Stage::new(RandomGenerator::with_seed(1)).num_trials(2))
        .build()
        .unwrap();
    let exp = experiment_with(policy);
    exp.get_next_trial().unwrap();
    exp.get_next_trial().unwrap();
    let err = exp.get_next_trial().unwrap_err();
    assert!(matches!(err, Error::StrategyCompleted));
    assert!(!err.is_backpressure());
}

#[test]
fn batch_stops_at_cap() {
    let exp = experiment_with(two_random_stages());
    let batch = exp.get_next_trials(10).unwrap();
    assert_eq!(batch.len(), 2);
    assert!(exp.get_next_trials(1).unwrap_err().is_backpressure());
}

#[test]
fn parallelism_schedule() {
    let exp = experiment_with(two_random_stages());
    assert_eq!(
        exp.get_max_parallelism(),
        vec![
            ParallelismEntry {
                trials_from: 0,
                num_trials: Some(3),
                max_parallelism: Some(2),
            },
            ParallelismEntry {
                trials_from: 3,
                num_trials: None,
                max_parallelism: Some(3),
            },
        ]
    );
}
