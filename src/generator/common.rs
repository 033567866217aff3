//! Unit-cube mapping shared by the built-in generation methods.
//!
//! Every parameter is mapped to one dimension of `[0, 1]`. Range parameters
//! map linearly (or in log space); choices split the interval into equal
//! buckets; booleans split it in half; fixed parameters ignore it.

use crate::param::{ParamValue, Parameters};
use crate::parameter::{ParameterSpec, SearchSpace};
use crate::rng_util;

/// Draws attempted when looking for a point that satisfies the parameter
/// constraints.
pub(crate) const MAX_REJECTION_DRAWS: usize = 1000;

/// Map a point in `[0, 1]` to a value of `spec`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub(crate) fn unit_to_value(u: f64, spec: &ParameterSpec) -> ParamValue {
    let u = u.clamp(0.0, 1.0);
    match spec {
        ParameterSpec::Float {
            low,
            high,
            log_scale,
            step,
        } => {
            let v = if *log_scale {
                let (lo, hi) = (low.ln(), high.ln());
                (lo + u * (hi - lo)).exp()
            } else if let Some(step) = step {
                let n_steps = ((high - low) / step).floor();
                let k = (u * (n_steps + 1.0)).floor().min(n_steps);
                low + k * step
            } else {
                low + u * (high - low)
            };
            ParamValue::Float(v.clamp(*low, *high))
        }
        ParameterSpec::Int {
            low,
            high,
            log_scale,
        } => {
            let v = if *log_scale {
                let (lo, hi) = ((*low as f64).ln(), (*high as f64).ln());
                (lo + u * (hi - lo)).exp().round() as i64
            } else {
                let range = (high - low + 1) as f64;
                low + (u * range).floor() as i64
            };
            ParamValue::Int(v.clamp(*low, *high))
        }
        ParameterSpec::Choice { values } => {
            let i = ((u * values.len() as f64).floor() as usize).min(values.len() - 1);
            ParamValue::Choice(values[i].clone())
        }
        ParameterSpec::Bool => ParamValue::Bool(u >= 0.5),
        ParameterSpec::Fixed(value) => value.clone(),
    }
}

/// Map a range parameter's value back into `[0, 1]`.
///
/// Returns `None` for non-range parameters and mismatched values.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn value_to_unit(value: &ParamValue, spec: &ParameterSpec) -> Option<f64> {
    let (v, lo, hi) = match (spec, value.as_f64()?) {
        (
            ParameterSpec::Float {
                low,
                high,
                log_scale,
                ..
            },
            v,
        ) => {
            if *log_scale {
                (v.ln(), low.ln(), high.ln())
            } else {
                (v, *low, *high)
            }
        }
        (
            ParameterSpec::Int {
                low,
                high,
                log_scale,
            },
            v,
        ) => {
            if *log_scale {
                (v.ln(), (*low as f64).ln(), (*high as f64).ln())
            } else {
                (v, *low as f64, *high as f64)
            }
        }
        _ => return None,
    };
    if (hi - lo).abs() < 1e-15 {
        Some(0.5)
    } else {
        Some(((v - lo) / (hi - lo)).clamp(0.0, 1.0))
    }
}

/// Build a parameterization by mapping `unit(dimension)` through every
/// parameter of `space`, in declaration order.
pub fn map_unit_point(space: &SearchSpace, mut unit: impl FnMut(usize) -> f64) -> Parameters {
    space
        .parameters()
        .iter()
        .enumerate()
        .map(|(dim, p)| (p.name.clone(), unit_to_value(unit(dim), &p.spec)))
        .collect()
}

/// Draw uniformly random points until one satisfies the parameter
/// constraints, giving up after [`MAX_REJECTION_DRAWS`] and returning the
/// last draw.
pub(crate) fn sample_random_point(rng: &mut fastrand::Rng, space: &SearchSpace) -> Parameters {
    let mut point = map_unit_point(space, |_| rng_util::f64_range(rng, 0.0, 1.0));
    for _ in 1..MAX_REJECTION_DRAWS {
        if satisfies_constraints(space, &point) {
            break;
        }
        point = map_unit_point(space, |_| rng_util::f64_range(rng, 0.0, 1.0));
    }
    point
}

pub(crate) fn satisfies_constraints(space: &SearchSpace, point: &Parameters) -> bool {
    space.constraints().iter().all(|c| c.is_satisfied(point))
}
