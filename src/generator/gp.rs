//! Gaussian Process (GP) generation with Expected Improvement acquisition.
//!
//! [`GpGenerator`] fits a Gaussian Process surrogate with a **Matérn 5/2
//! kernel** (ARD lengthscales) to the completed trials and proposes the
//! random candidate with the highest **Expected Improvement (EI)** on the
//! first objective. It is the model-based stage that usually follows a
//! Sobol exploration stage.
//!
//! # Algorithm overview
//!
//! 1. **Collect data**: every completed trial reporting the first
//!    objective becomes a training point. Range parameters are normalized
//!    to `[0, 1]` (in log space when log-scaled). Maximized objectives are
//!    negated so the model always minimizes.
//! 2. **Fit GP**: observations are standardized and a GP is fitted via
//!    Cholesky decomposition. A reported SEM adds its squared, standardized
//!    value to that point's diagonal noise.
//! 3. **Pending points**: candidate and running trials enter the model as
//!    fantasies at the best observed value (the "constant liar"), which
//!    pushes parallel proposals apart.
//! 4. **Maximize EI**: `n_candidates` random points that satisfy the
//!    parameter constraints are scored and the best one is returned.
//!
//! Choice, boolean and fixed parameters do not enter the model; they are
//! drawn at random with each candidate. Without range parameters or
//! training data the method falls back to random sampling.
//!
//! The model uses at most 100 training points (the most recent ones) to
//! keep the O(n³) fitting cost manageable.
//!
//! # Configuration
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `n_candidates` | 1000 | Random candidates scored per proposal |
//! | `noise_variance` | 1e-6 | Observation noise added to kernel diagonal |
//! | `min_observed` | 1 | Completed trials required before proposing |
//! | `seed` | random | RNG seed for reproducibility |
//!
//! Requires the **`gp`** feature flag (on by default; adds `nalgebra`).
//!
//! # Examples
//!
//! ```
//! use stagewise::generator::GpGenerator;
//!
//! let method = GpGenerator::builder()
//!     .n_candidates(500)
//!     .min_observed(3)
//!     .seed(42)
//!     .build();
//! ```

use nalgebra::{DMatrix, DVector};
use parking_lot::Mutex;

use crate::error::Result;
use crate::generator::{
    GenerationContext, GenerationMethod, History, MethodDescriptor, sample_random_point,
    value_to_unit,
};
use crate::param::Parameters;
use crate::parameter::SearchSpace;
use crate::rng_util;
use crate::types::Direction;

/// Default number of candidate points for EI optimization.
const DEFAULT_N_CANDIDATES: usize = 1000;
/// Default observation noise variance.
const DEFAULT_NOISE_VAR: f64 = 1e-6;
/// Default completed trials required before proposing.
const DEFAULT_MIN_OBSERVED: usize = 1;
/// Maximum number of training points used for the GP.
const MAX_TRAIN_POINTS: usize = 100;

const SQRT_5: f64 = 2.236_067_977_499_79;

/// Gaussian Process generation method.
///
/// # Examples
///
/// ```
/// use stagewise::generator::GpGenerator;
///
/// let default = GpGenerator::new();
/// let seeded = GpGenerator::with_seed(42);
/// ```
pub struct GpGenerator {
    n_candidates: usize,
    noise_variance: f64,
    min_observed: usize,
    seed: Option<u64>,
    rng: Mutex<fastrand::Rng>,
}

impl GpGenerator {
    /// Creates a GP generator with default settings and a random seed.
    #[must_use]
    pub fn new() -> Self {
        GpGeneratorBuilder::new().build()
    }

    /// Creates a GP generator with a fixed seed.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        GpGeneratorBuilder::new().seed(seed).build()
    }

    /// Creates a builder for configuring a `GpGenerator`.
    #[must_use]
    pub fn builder() -> GpGeneratorBuilder {
        GpGeneratorBuilder::new()
    }
}

impl Default for GpGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for configuring a [`GpGenerator`].
#[derive(Debug, Clone, Default)]
pub struct GpGeneratorBuilder {
    n_candidates: Option<usize>,
    noise_variance: Option<f64>,
    min_observed: Option<usize>,
    seed: Option<u64>,
}

impl GpGeneratorBuilder {
    /// Creates a new builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of random candidate points scored per proposal.
    ///
    /// Default: 1000.
    #[must_use]
    pub fn n_candidates(mut self, n: usize) -> Self {
        self.n_candidates = Some(n.max(1));
        self
    }

    /// Sets the observation noise variance added to the kernel diagonal.
    ///
    /// Default: 1e-6 (near-noiseless).
    #[must_use]
    pub fn noise_variance(mut self, v: f64) -> Self {
        self.noise_variance = Some(v);
        self
    }

    /// Sets the number of completed trials required before the method can
    /// propose.
    ///
    /// Default: 1.
    #[must_use]
    pub fn min_observed(mut self, n: usize) -> Self {
        self.min_observed = Some(n);
        self
    }

    /// Sets the random seed for reproducibility.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Builds the configured [`GpGenerator`].
    #[must_use]
    pub fn build(self) -> GpGenerator {
        GpGenerator {
            n_candidates: self.n_candidates.unwrap_or(DEFAULT_N_CANDIDATES),
            noise_variance: self.noise_variance.unwrap_or(DEFAULT_NOISE_VAR),
            min_observed: self.min_observed.unwrap_or(DEFAULT_MIN_OBSERVED),
            seed: self.seed,
            rng: Mutex::new(rng_util::rng_from(self.seed)),
        }
    }
}

/// A fitted GP model ready for predictions.
struct GpModel {
    /// Cholesky factor L of K + diag(noise).
    cholesky: nalgebra::linalg::Cholesky<f64, nalgebra::Dyn>,
    /// α = (K + diag(noise))^{-1} y.
    alpha: DVector<f64>,
    /// Training inputs, normalized to [0, 1].
    x_train: Vec<Vec<f64>>,
    lengthscales: Vec<f64>,
    signal_var: f64,
    /// Best observed standardized y.
    f_best: f64,
}

/// Training set in the normalized, minimized frame.
struct TrainingData {
    x: Vec<Vec<f64>>,
    y: Vec<f64>,
    sem: Vec<f64>,
    /// Inputs of pending trials, fantasized at the best value.
    pending: Vec<Vec<f64>>,
}

/// Matérn 5/2 kernel with ARD lengthscales.
///
/// `k(x1, x2) = σ² (1 + √5 r + 5/3 r²) exp(-√5 r)`
fn matern52(x1: &[f64], x2: &[f64], lengthscales: &[f64], signal_var: f64) -> f64 {
    let r_sq: f64 = x1
        .iter()
        .zip(x2)
        .zip(lengthscales)
        .map(|((a, b), l)| ((a - b) / l).powi(2))
        .sum();
    let sqrt5_r = SQRT_5 * r_sq.sqrt();
    signal_var * (1.0 + sqrt5_r + 5.0 / 3.0 * r_sq) * (-sqrt5_r).exp()
}

fn kernel_matrix(
    x: &[Vec<f64>],
    lengthscales: &[f64],
    signal_var: f64,
    noise: &[f64],
) -> DMatrix<f64> {
    let n = x.len();
    DMatrix::from_fn(n, n, |i, j| {
        let k = matern52(&x[i], &x[j], lengthscales, signal_var);
        if i == j { k + noise[i] } else { k }
    })
}

fn kernel_vector(
    x_star: &[f64],
    x_train: &[Vec<f64>],
    lengthscales: &[f64],
    signal_var: f64,
) -> DVector<f64> {
    DVector::from_fn(x_train.len(), |i, _| {
        matern52(x_star, &x_train[i], lengthscales, signal_var)
    })
}

/// Fit a GP to the training data.
///
/// Returns `None` if there is no data or the Cholesky decomposition fails.
#[allow(clippy::cast_precision_loss)]
fn fit_gp(data: &TrainingData, noise_var: f64) -> Option<GpModel> {
    let n = data.y.len();
    if n == 0 {
        return None;
    }

    let y_mean = data.y.iter().sum::<f64>() / n as f64;
    let y_var = if n > 1 {
        data.y.iter().map(|&y| (y - y_mean).powi(2)).sum::<f64>() / (n - 1) as f64
    } else {
        1.0
    };
    let y_std = y_var.sqrt().max(1e-10);
    let mut y: Vec<f64> = data.y.iter().map(|&y| (y - y_mean) / y_std).collect();
    let f_best = y.iter().copied().fold(f64::INFINITY, f64::min);

    let mut noise: Vec<f64> = data
        .sem
        .iter()
        .map(|s| noise_var + (s / y_std).powi(2))
        .collect();
    let mut x_train = data.x.clone();
    for x in &data.pending {
        x_train.push(x.clone());
        y.push(f_best);
        noise.push(noise_var);
    }

    let total = x_train.len();
    let d = x_train.first().map_or(0, Vec::len);
    let lengthscales: Vec<f64> = (0..d)
        .map(|j| {
            let mean_j = x_train.iter().map(|x| x[j]).sum::<f64>() / total as f64;
            let var_j = x_train.iter().map(|x| (x[j] - mean_j).powi(2)).sum::<f64>() / total as f64;
            var_j.sqrt().max(0.01)
        })
        .collect();

    // Data is standardized.
    let signal_var = 1.0;

    let k = kernel_matrix(&x_train, &lengthscales, signal_var, &noise);
    let cholesky = nalgebra::linalg::Cholesky::new(k)?;
    let alpha = cholesky.solve(&DVector::from_column_slice(&y));

    Some(GpModel {
        cholesky,
        alpha,
        x_train,
        lengthscales,
        signal_var,
        f_best,
    })
}

/// Predict mean and standard deviation at a test point.
fn predict(model: &GpModel, x: &[f64]) -> (f64, f64) {
    let k_star = kernel_vector(x, &model.x_train, &model.lengthscales, model.signal_var);
    let mean = k_star.dot(&model.alpha);
    let v = model.cholesky.solve(&k_star);
    let var = (model.signal_var - k_star.dot(&v)).max(0.0);
    (mean, var.sqrt())
}

fn norm_pdf(x: f64) -> f64 {
    const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;
    INV_SQRT_2PI * (-0.5 * x * x).exp()
}

/// Standard normal CDF (Hart rational approximation).
fn norm_cdf(x: f64) -> f64 {
    if x < -8.0 {
        return 0.0;
    }
    if x > 8.0 {
        return 1.0;
    }

    let abs_x = x.abs();
    let t = 1.0 / (1.0 + 0.231_641_9 * abs_x);
    let t2 = t * t;
    let t3 = t2 * t;
    let t4 = t3 * t;
    let t5 = t4 * t;

    let poly = 0.319_381_530 * t - 0.356_563_782 * t2 + 1.781_477_937 * t3 - 1.821_255_978 * t4
        + 1.330_274_429 * t5;
    let cdf = 1.0 - norm_pdf(abs_x) * poly;

    if x >= 0.0 { cdf } else { 1.0 - cdf }
}

/// `EI(x) = (f_best - mean) Φ(z) + std φ(z)` with `z = (f_best - mean) / std`.
fn expected_improvement(mean: f64, std: f64, f_best: f64) -> f64 {
    if std < 1e-12 {
        return (f_best - mean).max(0.0);
    }
    let z = (f_best - mean) / std;
    ((f_best - mean) * norm_cdf(z) + std * norm_pdf(z)).max(0.0)
}

/// Normalized coordinates of `parameters` over the range dimensions.
fn encode(space: &SearchSpace, dims: &[usize], parameters: &Parameters) -> Option<Vec<f64>> {
    let specs = space.parameters();
    dims.iter()
        .map(|&d| {
            let p = &specs[d];
            value_to_unit(parameters.get(&p.name)?, &p.spec)
        })
        .collect()
}

fn build_training_data(
    history: &History<'_>,
    ctx: &GenerationContext<'_>,
    dims: &[usize],
) -> Option<TrainingData> {
    let objective = ctx.objectives.first()?;
    let sign = match objective.direction {
        Direction::Minimize => 1.0,
        Direction::Maximize => -1.0,
    };

    let observed: Vec<_> = history
        .completed()
        .filter_map(|t| {
            let obs = t.data.as_ref()?.get(&objective.metric)?;
            let x = encode(ctx.search_space, dims, &t.parameters)?;
            Some((x, sign * obs.mean, obs.sem.unwrap_or(0.0)))
        })
        .collect();
    let start = observed.len().saturating_sub(MAX_TRAIN_POINTS);

    let mut data = TrainingData {
        x: Vec::new(),
        y: Vec::new(),
        sem: Vec::new(),
        pending: history
            .pending()
            .filter_map(|t| encode(ctx.search_space, dims, &t.parameters))
            .collect(),
    };
    for (x, y, sem) in observed.into_iter().skip(start) {
        data.x.push(x);
        data.y.push(y);
        data.sem.push(sem);
    }
    Some(data)
}

impl GenerationMethod for GpGenerator {
    fn propose(&self, history: &History<'_>, ctx: &GenerationContext<'_>) -> Result<Parameters> {
        let space = ctx.search_space;
        let mut rng = self.rng.lock();

        let dims: Vec<usize> = space
            .parameters()
            .iter()
            .enumerate()
            .filter(|(_, p)| p.spec.is_range())
            .map(|(i, _)| i)
            .collect();

        let model = if dims.is_empty() {
            None
        } else {
            build_training_data(history, ctx, &dims).and_then(|d| fit_gp(&d, self.noise_variance))
        };
        let Some(model) = model else {
            trace_debug!(method = "gp", "no model, sampling at random");
            return Ok(sample_random_point(&mut rng, space));
        };

        let mut best = sample_random_point(&mut rng, space);
        let mut best_ei = f64::NEG_INFINITY;
        for _ in 0..self.n_candidates {
            let candidate = sample_random_point(&mut rng, space);
            let Some(x) = encode(space, &dims, &candidate) else {
                continue;
            };
            let (mean, std) = predict(&model, &x);
            let ei = expected_improvement(mean, std, model.f_best);
            if ei > best_ei {
                best_ei = ei;
                best = candidate;
            }
        }
        Ok(best)
    }

    fn name(&self) -> &str {
        "gp"
    }

    fn min_observed(&self) -> usize {
        self.min_observed
    }

    fn descriptor(&self) -> MethodDescriptor {
        MethodDescriptor::Gp {
            n_candidates: self.n_candidates,
            noise_variance: self.noise_variance,
            min_observed: self.min_observed,
            seed: self.seed,
        }
    }
}
