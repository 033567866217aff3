//! Observed metric data attached to completed trials.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::objective::Objective;

/// A single observed metric: mean and standard error of the mean.
///
/// `sem` is `None` when the caller reported a bare mean and the noise level
/// is left for the generation method to infer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Observed mean.
    pub mean: f64,
    /// Standard error of the mean, if known.
    pub sem: Option<f64>,
}

impl Observation {
    /// An observation with a known standard error.
    #[must_use]
    pub fn new(mean: f64, sem: f64) -> Self {
        Self {
            mean,
            sem: Some(sem),
        }
    }

    /// An observation whose noise level is unknown.
    #[must_use]
    pub fn mean_only(mean: f64) -> Self {
        Self { mean, sem: None }
    }

    fn validate(&self, metric: &str) -> Result<()> {
        if !self.mean.is_finite() {
            return Err(Error::InvalidData(format!(
                "mean of '{metric}' must be finite, got {}",
                self.mean
            )));
        }
        if let Some(sem) = self.sem
            && (!sem.is_finite() || sem < 0.0)
        {
            return Err(Error::InvalidData(format!(
                "sem of '{metric}' must be finite and non-negative, got {sem}"
            )));
        }
        Ok(())
    }
}

/// Metric name to observation, as stored on a completed trial.
pub type TrialData = BTreeMap<String, Observation>;

/// Raw evaluation results as reported by a caller.
///
/// A bare mean or a `(mean, sem)` pair is only accepted for single-objective
/// experiments, where the metric name is inferred from the objective.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
///
/// use stagewise::RawData;
///
/// let bare: RawData = 1.5.into();
/// let pair: RawData = (1.5, 0.1).into();
/// let map: RawData = HashMap::from([("loss".to_string(), (1.5, 0.1))]).into();
/// # let _ = (bare, pair, map);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub enum RawData {
    /// A mean with unknown sem for the single objective.
    Mean(f64),
    /// A `(mean, sem)` pair for the single objective.
    MeanSem(f64, f64),
    /// Observations keyed by metric name.
    Metrics(TrialData),
}

impl RawData {
    /// Resolve into stored trial data for an experiment with `objectives`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidData`] if a bare value is used with more than
    /// one objective, an objective metric is missing from a mapping, or any
    /// mean/sem is not finite.
    pub fn into_trial_data(self, objectives: &[Objective]) -> Result<TrialData> {
        let data = match self {
            RawData::Mean(mean) => Self::single(objectives, Observation::mean_only(mean))?,
            RawData::MeanSem(mean, sem) => Self::single(objectives, Observation::new(mean, sem))?,
            RawData::Metrics(map) => {
                if let Some(missing) = objectives.iter().find(|o| !map.contains_key(&o.metric)) {
                    return Err(Error::InvalidData(format!(
                        "no data for objective metric '{}'",
                        missing.metric
                    )));
                }
                map
            }
        };
        for (metric, obs) in &data {
            obs.validate(metric)?;
        }
        Ok(data)
    }

    fn single(objectives: &[Objective], obs: Observation) -> Result<TrialData> {
        match objectives {
            [objective] => Ok(TrialData::from([(objective.metric.clone(), obs)])),
            _ => Err(Error::InvalidData(format!(
                "a bare value needs exactly one objective, experiment has {}; pass a metric mapping",
                objectives.len()
            ))),
        }
    }
}

impl From<f64> for RawData {
    fn from(mean: f64) -> Self {
        RawData::Mean(mean)
    }
}

impl From<(f64, f64)> for RawData {
    fn from((mean, sem): (f64, f64)) -> Self {
        RawData::MeanSem(mean, sem)
    }
}

impl From<TrialData> for RawData {
    fn from(map: TrialData) -> Self {
        RawData::Metrics(map)
    }
}

impl From<HashMap<String, (f64, f64)>> for RawData {
    fn from(map: HashMap<String, (f64, f64)>) -> Self {
        RawData::Metrics(
            map.into_iter()
                .map(|(k, (mean, sem))| (k, Observation::new(mean, sem)))
                .collect(),
        )
    }
}

impl From<HashMap<String, f64>> for RawData {
    fn from(map: HashMap<String, f64>) -> Self {
        RawData::Metrics(
            map.into_iter()
                .map(|(k, mean)| (k, Observation::mean_only(mean)))
                .collect(),
        )
    }
}

impl<const N: usize> From<[(&str, (f64, f64)); N]> for RawData {
    fn from(pairs: [(&str, (f64, f64)); N]) -> Self {
        RawData::Metrics(
            pairs
                .into_iter()
                .map(|(k, (mean, sem))| (k.to_string(), Observation::new(mean, sem)))
                .collect(),
        )
    }
}
