//! Random sources for level sampling, neighbour resampling and random
//! query restarts.

use rand::{Rng, SeedableRng, distributions::Standard, rngs::SmallRng};

use crate::{error::HnswError, space::Space};

use super::index::Hnsw;

/// SplitMix64 increment (the 64-bit golden ratio).
const SPLITMIX_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;
const SPLITMIX_MULT_A: u64 = 0xBF58_476D_1CE4_E5B9;
const SPLITMIX_MULT_B: u64 = 0x94D0_49BB_1331_11EB;
const FNV_OFFSET: u64 = 0xCBF2_9CE4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;

#[inline]
fn splitmix64(mut state: u64) -> u64 {
    state = state.wrapping_add(SPLITMIX_GAMMA);
    state = (state ^ (state >> 30)).wrapping_mul(SPLITMIX_MULT_A);
    state = (state ^ (state >> 27)).wrapping_mul(SPLITMIX_MULT_B);
    state ^ (state >> 31)
}

/// Derives a per-query generator so random restarts are reproducible for a
/// given seed and query without sharing a locked generator.
pub(super) fn query_rng(base_seed: u64, query: &[u8]) -> SmallRng {
    let digest = query.iter().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    });
    SmallRng::seed_from_u64(splitmix64(base_seed ^ digest))
}

/// Maps a uniform draw in `[0, 1)` to a level: `floor(-ln(U) * multiplier)`
/// with `U = 1 - draw` in `(0, 1]`.
pub(super) fn level_from_draw(draw: f64, multiplier: f64) -> usize {
    let uniform = 1.0 - draw.clamp(0.0, 1.0 - f64::EPSILON);
    (-uniform.ln() * multiplier).floor() as usize
}

impl<S: Space> Hnsw<S> {
    pub(super) fn sample_level(&self) -> Result<usize, HnswError> {
        let mut rng = self.level_rng.lock().map_err(|_| HnswError::LockPoisoned {
            resource: "level rng mutex",
        })?;
        let draw: f64 = rng.sample(Standard);
        Ok(level_from_draw(draw, self.params.level_multiplier()))
    }

    /// Draws the Bernoulli coin deciding whether a neighbour is resampled
    /// during an update.
    pub(super) fn should_resample(&self, probability: f64) -> Result<bool, HnswError> {
        let mut rng = self.update_rng.lock().map_err(|_| HnswError::LockPoisoned {
            resource: "update rng mutex",
        })?;
        let draw: f64 = rng.sample(Standard);
        Ok(draw <= probability)
    }
}
