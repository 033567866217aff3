use std::sync::Arc;

use parking_lot::Mutex;
use stagewise::generator::{GenerationContext, GenerationMethod, History, RandomGenerator};
use stagewise::storage::{JsonFileHook, MutationEvent, PersistenceHook};
use stagewise::{
    Error, Experiment, ExperimentSnapshot, Parameters, Result, Stage, StagePolicy, TrialStatus,
    params,
};

use super::{experiment_with, temp_path, two_random_stages};

/// Drive an experiment through every kind of mutation.
fn exercise(exp: &Experiment) {
    let (_, a) = exp.get_next_trial().unwrap();
    let (_, b) = exp.get_next_trial().unwrap();
    exp.complete_trial(a, (0.5, 0.05)).unwrap();
    exp.log_trial_failure(b).unwrap();
    let c = exp
        .attach_trial(params([("x", 0.25.into()), ("y", 0.75.into())]))
        .unwrap();
    exp.complete_trial(c, 0.1).unwrap();
    let (_, d) = exp.get_next_trial().unwrap();
    exp.complete_trial(d, 0.3).unwrap();
    let (_, e) = exp.get_next_trial().unwrap();
    exp.abandon_trial(e).unwrap();
    exp.get_next_trial().unwrap();
}

#[test]
fn save_load_round_trip() {
    let exp = experiment_with(two_random_stages());
    exercise(&exp);
    let path = temp_path("roundtrip", "json");
    exp.save(&path).unwrap();

    let loaded = Experiment::load(&path).unwrap();
    assert_eq!(loaded.trials(), exp.trials());
    assert_eq!(loaded.current_stage(), exp.current_stage());
    assert_eq!(loaded.get_max_parallelism(), exp.get_max_parallelism());
    assert_eq!(loaded.snapshot(), exp.snapshot());
    assert_eq!(loaded.name(), "test");

    // Both copies behave the same from here on.
    let last = exp.num_trials() as u64 - 1;
    exp.complete_trial(last, 0.2).unwrap();
    loaded.complete_trial(last, 0.2).unwrap();
    let (_, original) = exp.get_next_trial().unwrap();
    let (_, index) = loaded.get_next_trial().unwrap();
    assert_eq!(index, original);
    assert_eq!(index, last + 1);
    assert_eq!(loaded.current_stage(), 1);

    std::fs::remove_file(&path).ok();
}

#[test]
fn saved_floats_reload_bit_for_bit() {
    let exp = experiment_with(two_random_stages());
    let awkward = [0.009_679_883_051_119_205, 0.1 + 0.2, 1.0 / 3.0];
    let attached: Vec<u64> = awkward
        .iter()
        .map(|&v| {
            exp.attach_trial(params([("x", v.into()), ("y", (1.0 - v).into())]))
                .unwrap()
        })
        .collect();
    for (&index, &v) in attached.iter().zip(&awkward) {
        exp.complete_trial(index, (v, v / 7.0)).unwrap();
    }
    let path = temp_path("floats", "json");
    exp.save(&path).unwrap();

    let loaded = Experiment::load(&path).unwrap();
    for (&index, &v) in attached.iter().zip(&awkward) {
        let trial = loaded.get_trial(index).unwrap();
        assert_eq!(trial.parameters["x"].as_f64().unwrap().to_bits(), v.to_bits());
        assert_eq!(trial.mean("loss").unwrap().to_bits(), v.to_bits());
    }
    assert_eq!(loaded.snapshot(), exp.snapshot());

    std::fs::remove_file(&path).ok();
}

#[cfg(feature = "sobol")]
#[test]
fn sobol_does_not_repeat_after_reload() {
    use stagewise::generator::SobolGenerator;

    let policy = StagePolicy::builder()
        .stage(Stage::new(SobolGenerator::with_seed(3)))
        .build()
        .unwrap();
    let exp = experiment_with(policy);
    let mut seen: Vec<Parameters> = (0..4).map(|_| exp.get_next_trial().unwrap().0).collect();

    let loaded = Experiment::from_snapshot(exp.snapshot()).unwrap();
    for _ in 0..4 {
        let (p, _) = loaded.get_next_trial().unwrap();
        assert!(!seen.contains(&p));
        seen.push(p);
    }
}

#[test]
fn unsupported_version_is_rejected() {
    let exp = experiment_with(two_random_stages());
    let mut snapshot = exp.snapshot();
    snapshot.version = 99;
    assert!(matches!(
        Experiment::from_snapshot(snapshot),
        Err(Error::Persistence { index: None, .. })
    ));
}

#[test]
fn load_missing_file_fails() {
    let path = temp_path("missing", "json");
    assert!(matches!(
        Experiment::load(&path),
        Err(Error::Persistence { .. })
    ));
}

/// Proposes the centre of the square, then nudges it by the trial index.
struct Centre;

impl GenerationMethod for Centre {
    #[allow(clippy::cast_precision_loss)]
    fn propose(&self, _: &History<'_>, ctx: &GenerationContext<'_>) -> Result<Parameters> {
        let shift = (ctx.next_index as f64) * 1e-3;
        Ok(params([("x", (0.5 + shift).into()), ("y", 0.5.into())]))
    }

    fn name(&self) -> &str {
        "centre"
    }
}

#[test]
fn custom_method_needs_resolver() {
    let policy = StagePolicy::builder()
        .stage(Stage::new(Centre).num_trials(2))
        .stage(Stage::new(RandomGenerator::with_seed(4)))
        .build()
        .unwrap();
    let exp = experiment_with(policy);
    exp.get_next_trial().unwrap();
    let path = temp_path("custom", "json");
    exp.save(&path).unwrap();

    assert!(matches!(
        Experiment::load(&path),
        Err(Error::InvalidStagePolicy(_))
    ));

    let loaded = Experiment::load_with(&path, |descriptor| {
        (descriptor.name() == "centre").then(|| Arc::new(Centre) as Arc<dyn GenerationMethod>)
    })
    .unwrap();
    let (p, index) = loaded.get_next_trial().unwrap();
    assert_eq!(index, 1);
    assert!((p["x"].as_f64().unwrap() - 0.501).abs() < 1e-12);

    std::fs::remove_file(&path).ok();
}

/// Records events and fails on a chosen trial index.
#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<MutationEvent>>,
    fail_on: Option<u64>,
}

impl PersistenceHook for Recorder {
    fn on_mutation(&self, event: &MutationEvent, snapshot: &ExperimentSnapshot) -> Result<()> {
        assert!(snapshot.trials.iter().any(|t| t.index == event.index()));
        self.events.lock().push(event.clone());
        if self.fail_on == Some(event.index()) {
            return Err(Error::Persistence {
                index: None,
                message: "disk full".into(),
            });
        }
        Ok(())
    }
}

#[test]
fn hook_sees_every_mutation_in_order() {
    let recorder = Arc::new(Recorder::default());
    let exp = experiment_with(two_random_stages()).with_persistence_hook(Arc::clone(&recorder));
    exercise(&exp);

    let kinds: Vec<(&str, u64)> = recorder
        .events
        .lock()
        .iter()
        .map(|e| {
            let kind = match e {
                MutationEvent::Generated { .. } => "generated",
                MutationEvent::Attached { .. } => "attached",
                MutationEvent::Running { .. } => "running",
                MutationEvent::Completed { .. } => "completed",
                MutationEvent::Failed { .. } => "failed",
                MutationEvent::Abandoned { .. } => "abandoned",
            };
            (kind, e.index())
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            ("generated", 0),
            ("generated", 1),
            ("completed", 0),
            ("failed", 1),
            ("attached", 2),
            ("completed", 2),
            ("generated", 3),
            ("completed", 3),
            ("generated", 4),
            ("abandoned", 4),
            ("generated", 5),
        ]
    );
}

#[test]
fn hook_failure_keeps_mutation() {
    let recorder = Recorder {
        fail_on: Some(1),
        ..Recorder::default()
    };
    let exp = experiment_with(two_random_stages()).with_persistence_hook(recorder);

    exp.get_next_trial().unwrap();
    let err = exp.get_next_trial().unwrap_err();
    assert!(matches!(err, Error::Persistence { index: Some(1), .. }));
    assert!(!err.is_backpressure());

    let trial = exp.get_trial(1).unwrap();
    assert_eq!(trial.status, TrialStatus::Running);

    // The experiment stays usable; completing trial 1 fails to persist too,
    // but the data is kept.
    assert!(exp.complete_trial(1, 0.2).is_err());
    assert_eq!(exp.get_trial(1).unwrap().status, TrialStatus::Completed);
    exp.complete_trial(0, 0.4).unwrap();
}

#[test]
fn json_file_hook_tracks_state() {
    let path = temp_path("hook", "json");
    let exp = Experiment::builder("hooked")
        .search_space(super::unit_square())
        .objective(stagewise::Objective::minimize("loss"))
        .stage_policy(two_random_stages())
        .persistence_hook(JsonFileHook::new(&path))
        .build()
        .unwrap();
    exercise(&exp);

    let restored = Experiment::load(&path).unwrap();
    assert_eq!(restored.snapshot(), exp.snapshot());

    std::fs::remove_file(&path).ok();
}
