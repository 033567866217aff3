use std::collections::HashMap;

use stagewise::generator::RandomGenerator;
use stagewise::{
    AttachAttribution, Error, Experiment, Objective, Observation, Stage, StageAttribution,
    StagePolicy, TrialStatus, params,
};

use super::{experiment_with, two_random_stages, unit_square};

#[test]
fn indices_are_contiguous() {
    let exp = experiment_with(two_random_stages());
    let mut seen = Vec::new();
    let mut rng = fastrand::Rng::with_seed(7);

    for _ in 0..40 {
        match exp.get_next_trial() {
            Ok((_, index)) => seen.push(index),
            Err(e) if e.is_backpressure() => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
        // Resolve one outstanding trial at random.
        let running: Vec<u64> = exp
            .trials()
            .iter()
            .filter(|t| t.status == TrialStatus::Running)
            .map(|t| t.index)
            .collect();
        if !running.is_empty() {
            let pick = running[rng.usize(..running.len())];
            if rng.bool() {
                exp.complete_trial(pick, rng.f64()).unwrap();
            } else {
                exp.log_trial_failure(pick).unwrap();
            }
        }
    }

    let expected: Vec<u64> = (0..seen.len() as u64).collect();
    assert_eq!(seen, expected);
    assert_eq!(exp.num_trials(), seen.len());
}

#[test]
fn pair_and_mapping_store_identical_data() {
    let by_pair = experiment_with(two_random_stages());
    let by_map = experiment_with(two_random_stages());

    let (_, a) = by_pair.get_next_trial().unwrap();
    let (_, b) = by_map.get_next_trial().unwrap();
    by_pair.complete_trial(a, (1.25, 0.1)).unwrap();
    by_map
        .complete_trial(b, HashMap::from([("loss".to_string(), (1.25, 0.1))]))
        .unwrap();

    let left = by_pair.get_trial(a).unwrap().data.unwrap();
    let right = by_map.get_trial(b).unwrap().data.unwrap();
    assert_eq!(left, right);
    assert_eq!(left["loss"], Observation::new(1.25, 0.1));
}

#[test]
fn bare_mean_has_unknown_sem() {
    let exp = experiment_with(two_random_stages());
    let (_, index) = exp.get_next_trial().unwrap();
    exp.complete_trial(index, 3.0).unwrap();
    assert_eq!(
        exp.get_trial(index).unwrap().data.unwrap()["loss"],
        Observation::mean_only(3.0)
    );
}

#[test]
fn bare_mean_rejected_for_two_objectives() {
    let exp = Experiment::builder("multi")
        .search_space(unit_square())
        .objective(Objective::minimize("loss"))
        .objective(Objective::maximize("acc"))
        .stage_policy(two_random_stages())
        .build()
        .unwrap();
    let (_, index) = exp.get_next_trial().unwrap();
    assert!(matches!(
        exp.complete_trial(index, 1.0),
        Err(Error::InvalidData(_))
    ));
    // The trial is still running and can be completed properly.
    exp.complete_trial(index, [("loss", (1.0, 0.0)), ("acc", (0.5, 0.0))])
        .unwrap();
    assert_eq!(exp.get_trial(index).unwrap().status, TrialStatus::Completed);
}

#[test]
fn attach_on_fresh_experiment() {
    let space = stagewise::SearchSpace::builder()
        .parameter("x", stagewise::ParameterSpec::float(0.0, 1.0))
        .build()
        .unwrap();
    let policy = StagePolicy::builder()
        .stage(Stage::new(RandomGenerator::with_seed(3)).max_parallelism(1))
        .build()
        .unwrap();
    let exp = Experiment::builder("attach")
        .search_space(space)
        .objective(Objective::minimize("loss"))
        .stage_policy(policy)
        .build()
        .unwrap();

    let index = exp.attach_trial(params([("x", 0.9.into())])).unwrap();
    assert_eq!(index, 0);
    let trial = exp.get_trial(0).unwrap();
    assert_eq!(trial.status, TrialStatus::Running);
    assert_eq!(trial.stage, StageAttribution::External);

    // The cap of one is still free for a generated trial.
    let (_, generated) = exp.get_next_trial().unwrap();
    assert_eq!(generated, 1);
    assert!(matches!(
        exp.get_next_trial(),
        Err(Error::MaxParallelismReached { stage: 0, max_parallelism: 1 })
    ));
}

#[test]
fn attach_to_current_stage_counts_against_cap() {
    let exp = Experiment::builder("attach")
        .search_space(unit_square())
        .objective(Objective::minimize("loss"))
        .stage_policy(two_random_stages())
        .attach_attribution(AttachAttribution::CurrentStage)
        .build()
        .unwrap();

    exp.attach_trial(params([("x", 0.1.into()), ("y", 0.2.into())]))
        .unwrap();
    exp.attach_trial(params([("x", 0.3.into()), ("y", 0.4.into())]))
        .unwrap();
    assert!(matches!(
        exp.get_next_trial(),
        Err(Error::MaxParallelismReached { stage: 0, .. })
    ));
}

#[test]
fn attach_past_cap_is_refused() {
    let exp = Experiment::builder("attach")
        .search_space(unit_square())
        .objective(Objective::minimize("loss"))
        .stage_policy(two_random_stages())
        .attach_attribution(AttachAttribution::CurrentStage)
        .build()
        .unwrap();

    let first = exp
        .attach_trial(params([("x", 0.1.into()), ("y", 0.2.into())]))
        .unwrap();
    exp.attach_trial(params([("x", 0.3.into()), ("y", 0.4.into())]))
        .unwrap();
    let err = exp
        .attach_trial(params([("x", 0.5.into()), ("y", 0.6.into())]))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::MaxParallelismReached {
            stage: 0,
            max_parallelism: 2
        }
    ));
    assert!(err.is_backpressure());
    assert_eq!(exp.num_trials(), 2);
    assert_eq!(exp.num_running(), 2);

    // A freed slot admits the attach again.
    exp.complete_trial(first, 0.3).unwrap();
    let index = exp
        .attach_trial(params([("x", 0.5.into()), ("y", 0.6.into())]))
        .unwrap();
    assert_eq!(index, 2);
}

#[test]
fn running_a_candidate_respects_cap() {
    let exp = Experiment::builder("candidates")
        .search_space(unit_square())
        .objective(Objective::minimize("loss"))
        .stage_policy(two_random_stages())
        .attach_attribution(AttachAttribution::CurrentStage)
        .build()
        .unwrap();

    let candidates: Vec<u64> = [0.1, 0.2, 0.3]
        .into_iter()
        .map(|x| {
            exp.attach_candidate(params([("x", x.into()), ("y", x.into())]))
                .unwrap()
        })
        .collect();
    assert_eq!(exp.num_running(), 0);

    exp.run_trial(candidates[0]).unwrap();
    exp.run_trial(candidates[1]).unwrap();
    assert!(matches!(
        exp.run_trial(candidates[2]),
        Err(Error::MaxParallelismReached { stage: 0, .. })
    ));
    assert_eq!(
        exp.get_trial(candidates[2]).unwrap().status,
        TrialStatus::Candidate
    );

    exp.complete_trial(candidates[0], 1.0).unwrap();
    exp.run_trial(candidates[2]).unwrap();
    assert_eq!(exp.num_running(), 2);
}

#[test]
fn attach_rejects_out_of_space() {
    let exp = experiment_with(two_random_stages());
    let err = exp
        .attach_trial(params([("x", 1.5.into()), ("y", 0.0.into())]))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidParameters(_)));
    assert_eq!(exp.num_trials(), 0);
}

#[test]
fn duplicate_attach_when_unique_required() {
    let exp = Experiment::builder("unique")
        .search_space(unit_square())
        .objective(Objective::minimize("loss"))
        .stage_policy(two_random_stages())
        .require_unique_parameters(true)
        .build()
        .unwrap();
    let p = params([("x", 0.5.into()), ("y", 0.5.into())]);
    let first = exp.attach_trial(p.clone()).unwrap();
    assert!(matches!(
        exp.attach_trial(p),
        Err(Error::DuplicateAttach { index }) if index == first
    ));
}

#[test]
fn status_transitions() {
    let exp = experiment_with(two_random_stages());
    let (_, a) = exp.get_next_trial().unwrap();
    let (_, b) = exp.get_next_trial().unwrap();

    exp.complete_trial(a, 1.0).unwrap();
    assert!(matches!(
        exp.complete_trial(a, 2.0),
        Err(Error::InvalidTrialState { .. })
    ));
    assert!(matches!(
        exp.log_trial_failure(a),
        Err(Error::InvalidTrialState { .. })
    ));

    exp.log_trial_failure(b).unwrap();
    // Failing twice is a no-op.
    exp.log_trial_failure(b).unwrap();
    assert!(matches!(
        exp.complete_trial(b, 1.0),
        Err(Error::InvalidTrialState { .. })
    ));

    assert!(matches!(
        exp.complete_trial(99, 1.0),
        Err(Error::TrialNotFound(99))
    ));
}

#[test]
fn candidate_run_and_abandon() {
    let exp = experiment_with(two_random_stages());
    let c = exp
        .attach_candidate(params([("x", 0.2.into()), ("y", 0.2.into())]))
        .unwrap();
    assert_eq!(exp.get_trial(c).unwrap().status, TrialStatus::Candidate);
    assert_eq!(exp.num_running(), 0);

    exp.run_trial(c).unwrap();
    assert_eq!(exp.num_running(), 1);

    exp.abandon_trial(c).unwrap();
    exp.abandon_trial(c).unwrap();
    assert_eq!(exp.get_trial(c).unwrap().status, TrialStatus::Abandoned);
    assert_eq!(exp.num_running(), 0);
}

#[test]
fn shared_across_threads() {
    let exp = std::sync::Arc::new(experiment_with(
        StagePolicy::builder()
            .stage(Stage::new(RandomGenerator::with_seed(5)).max_parallelism(4))
            .build()
            .unwrap(),
    ));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let exp = std::sync::Arc::clone(&exp);
            std::thread::spawn(move || {
                let mut done = 0;
                while done < 10 {
                    match exp.get_next_trial() {
                        Ok((p, index)) => {
                            let x = p["x"].as_f64().unwrap();
                            exp.complete_trial(index, x).unwrap();
                            done += 1;
                        }
                        Err(e) if e.is_backpressure() => std::thread::yield_now(),
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let trials = exp.trials();
    assert_eq!(trials.len(), 40);
    assert!(trials.iter().enumerate().all(|(i, t)| t.index == i as u64));
    assert!(trials.iter().all(|t| t.status == TrialStatus::Completed));
}
