//! Quasi-random generation using scrambled Sobol sequences.
//!
//! [`SobolGenerator`] fills the search space more evenly than uniform random
//! sampling, which makes it the usual choice for the exploration stage that
//! precedes model-based search.
//!
//! # How it works
//!
//! Each proposal takes the next position of an Owen-scrambled Sobol sequence
//! (Burley 2020) and maps dimension `d` of that point to the `d`-th parameter
//! of the search space. The sequence position never falls behind the number
//! of trials already in the experiment, so a reloaded experiment continues
//! the sequence instead of replaying it and no point is proposed twice.
//! Points violating parameter constraints are skipped.
//!
//! Requires the **`sobol`** feature flag (on by default).

use parking_lot::Mutex;
use sobol_burley::sample;

use crate::error::{Error, Result};
use crate::generator::common::{MAX_REJECTION_DRAWS, satisfies_constraints};
use crate::generator::{
    GenerationContext, GenerationMethod, History, MethodDescriptor, map_unit_point,
};
use crate::param::Parameters;

/// Dimensions supported by the Sobol direction numbers.
const MAX_DIMENSIONS: usize = 256;

/// Quasi-random generation method over a scrambled Sobol sequence.
///
/// # Examples
///
/// ```
/// use stagewise::generator::SobolGenerator;
///
/// let method = SobolGenerator::with_seed(42);
/// ```
pub struct SobolGenerator {
    seed: u32,
    /// Next sequence position to use.
    position: Mutex<u32>,
}

impl SobolGenerator {
    /// Creates a Sobol generator with seed 0.
    #[must_use]
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Creates a Sobol generator with the given scrambling seed.
    ///
    /// Different seeds give statistically independent sequences; the same
    /// seed always gives the same sequence.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed: seed as u32,
            position: Mutex::new(0),
        }
    }
}

impl Default for SobolGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerationMethod for SobolGenerator {
    #[allow(clippy::cast_possible_truncation)]
    fn propose(&self, history: &History<'_>, ctx: &GenerationContext<'_>) -> Result<Parameters> {
        let space = ctx.search_space;
        if space.len() > MAX_DIMENSIONS {
            return Err(Error::InvalidSearchSpace(format!(
                "Sobol sequences support at most {MAX_DIMENSIONS} parameters, got {}",
                space.len()
            )));
        }

        let mut position = self.position.lock();
        let floor = u32::try_from(history.len()).unwrap_or(u32::MAX);
        *position = (*position).max(floor);

        let mut point = Parameters::new();
        for _ in 0..MAX_REJECTION_DRAWS {
            let index = *position;
            *position = position.saturating_add(1);
            point = map_unit_point(space, |dim| f64::from(sample(index, dim as u32, self.seed)));
            if satisfies_constraints(space, &point) {
                break;
            }
        }
        Ok(point)
    }

    fn name(&self) -> &str {
        "sobol"
    }

    fn descriptor(&self) -> MethodDescriptor {
        MethodDescriptor::Sobol { seed: self.seed }
    }
}
