//! Deterministic generation over a fixed point set.
//!
//! [`GridGenerator`] walks a finite list of parameterizations in order and
//! proposes the first one no existing trial has used, whatever that trial's
//! status. Once every point has been used it reports
//! [`Error::SearchSpaceExhausted`]. Because failed trials still mark their
//! point as used, a failed point is never proposed again.

use crate::error::{Error, Result};
use crate::generator::{GenerationContext, GenerationMethod, History, MethodDescriptor};
use crate::param::{ParamValue, Parameters};
use crate::parameter::{ParameterSpec, SearchSpace};

/// Proposes points from a fixed list, skipping ones already tried.
///
/// # Examples
///
/// ```
/// use stagewise::generator::GridGenerator;
/// use stagewise::params;
///
/// let grid = GridGenerator::new(vec![
///     params([("x", 0.0.into())]),
///     params([("x", 0.5.into())]),
///     params([("x", 1.0.into())]),
/// ]);
/// assert_eq!(grid.len(), 3);
/// ```
pub struct GridGenerator {
    points: Vec<Parameters>,
}

impl GridGenerator {
    /// Creates a generator over `points`, proposed in order.
    #[must_use]
    pub fn new(points: Vec<Parameters>) -> Self {
        Self { points }
    }

    /// Build the Cartesian product of `levels` evenly spaced values per range
    /// parameter, every choice value, both booleans, and each fixed value.
    ///
    /// Integer ranges with fewer than `levels` values contribute each value
    /// once. Points violating parameter constraints are dropped.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn cartesian(space: &SearchSpace, levels: usize) -> Self {
        let levels = levels.max(1);
        let axes: Vec<(String, Vec<ParamValue>)> = space
            .parameters()
            .iter()
            .map(|p| (p.name.clone(), axis_values(&p.spec, levels)))
            .collect();

        let mut points = vec![Parameters::new()];
        for (name, values) in &axes {
            points = points
                .into_iter()
                .flat_map(|partial| {
                    values.iter().map(move |v| {
                        let mut next = partial.clone();
                        next.insert(name.clone(), v.clone());
                        next
                    })
                })
                .collect();
        }
        points.retain(|p| space.constraints().iter().all(|c| c.is_satisfied(p)));
        Self { points }
    }

    /// Number of points in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Return `true` if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn axis_values(spec: &ParameterSpec, levels: usize) -> Vec<ParamValue> {
    let fractions = |n: usize| -> Vec<f64> {
        if n == 1 {
            vec![0.5]
        } else {
            (0..n).map(|i| i as f64 / (n - 1) as f64).collect()
        }
    };
    match spec {
        ParameterSpec::Float { .. } => fractions(levels)
            .into_iter()
            .map(|u| super::common::unit_to_value(u, spec))
            .collect(),
        ParameterSpec::Int { low, high, .. } => {
            let span = usize::try_from(high - low).unwrap_or(usize::MAX).saturating_add(1);
            let mut values: Vec<ParamValue> = fractions(levels.min(span))
                .into_iter()
                .map(|u| {
                    let v = *low as f64 + u * (*high - *low) as f64;
                    ParamValue::Int(v.round() as i64)
                })
                .collect();
            values.dedup();
            values
        }
        ParameterSpec::Choice { values } => {
            values.iter().cloned().map(ParamValue::Choice).collect()
        }
        ParameterSpec::Bool => vec![ParamValue::Bool(false), ParamValue::Bool(true)],
        ParameterSpec::Fixed(value) => vec![value.clone()],
    }
}

impl GenerationMethod for GridGenerator {
    fn propose(&self, history: &History<'_>, ctx: &GenerationContext<'_>) -> Result<Parameters> {
        self.points
            .iter()
            .find(|p| !history.contains(p))
            .cloned()
            .ok_or(Error::SearchSpaceExhausted { stage: ctx.stage })
    }

    fn name(&self) -> &str {
        "grid"
    }

    fn descriptor(&self) -> MethodDescriptor {
        MethodDescriptor::Grid {
            points: self.points.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::params;
    use crate::trial::{StageAttribution, Trial};
    use crate::types::TrialStatus;

    #[test]
    fn test_cartesian_grid_size() {
        let space = SearchSpace::builder()
            .parameter("x", ParameterSpec::float(0.0, 1.0))
            .parameter("n", ParameterSpec::int(1, 2))
            .parameter("c", ParameterSpec::choice(["a", "b", "c"]))
            .build()
            .unwrap();
        let grid = GridGenerator::cartesian(&space, 3);
        assert_eq!(grid.len(), 3 * 2 * 3);
        for p in &grid.points {
            space.check(p).unwrap();
        }
    }

    #[test]
    fn test_skips_used_points_and_exhausts() {
        let space = SearchSpace::builder()
            .parameter("x", ParameterSpec::float(0.0, 1.0))
            .build()
            .unwrap();
        let a = params([("x", 0.0.into())]);
        let b = params([("x", 1.0.into())]);
        let grid = GridGenerator::new(vec![a.clone(), b.clone()]);
        let ctx = GenerationContext {
            search_space: &space,
            objectives: &[],
            stage: 2,
            next_index: 1,
        };

        let mut failed = Trial::new(0, a, TrialStatus::Running, StageAttribution::Stage(2));
        failed.status = TrialStatus::Failed;
        let trials = vec![failed];
        assert_eq!(grid.propose(&History::new(&trials), &ctx).unwrap(), b);

        let mut trials = trials;
        trials.push(Trial::new(1, b, TrialStatus::Running, StageAttribution::Stage(2)));
        assert!(matches!(
            grid.propose(&History::new(&trials), &ctx),
            Err(Error::SearchSpaceExhausted { stage: 2 })
        ));
    }
}
