//! Uniform random generation method.

use parking_lot::Mutex;

use crate::error::Result;
use crate::generator::{
    GenerationContext, GenerationMethod, History, MethodDescriptor, sample_random_point,
};
use crate::param::Parameters;
use crate::rng_util;

/// Samples every parameter uniformly at random, ignoring history.
///
/// Log-scaled ranges are sampled uniformly in log space and stepped ranges
/// on their grid. Parameter constraints are met by rejection sampling.
///
/// # Examples
///
/// ```
/// use stagewise::generator::RandomGenerator;
///
/// let method = RandomGenerator::with_seed(42);
/// ```
pub struct RandomGenerator {
    seed: Option<u64>,
    rng: Mutex<fastrand::Rng>,
}

impl RandomGenerator {
    /// Creates a random generator seeded from entropy.
    #[must_use]
    pub fn new() -> Self {
        Self {
            seed: None,
            rng: Mutex::new(rng_util::rng_from(None)),
        }
    }

    /// Creates a random generator with a fixed seed for reproducibility.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            rng: Mutex::new(rng_util::rng_from(Some(seed))),
        }
    }
}

impl Default for RandomGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerationMethod for RandomGenerator {
    fn propose(&self, _history: &History<'_>, ctx: &GenerationContext<'_>) -> Result<Parameters> {
        let mut rng = self.rng.lock();
        Ok(sample_random_point(&mut rng, ctx.search_space))
    }

    fn name(&self) -> &str {
        "random"
    }

    fn descriptor(&self) -> MethodDescriptor {
        MethodDescriptor::Random { seed: self.seed }
    }
}
