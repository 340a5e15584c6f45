//! Parameter handling for the HNSW index.

use tracing::warn;

use crate::error::HnswError;

use super::store::LinkHeader;

/// Default base branching factor.
pub const DEFAULT_M: usize = 16;
/// Default construction search width.
pub const DEFAULT_EF_CONSTRUCTION: usize = 200;
/// Default query search width.
pub const DEFAULT_EF: usize = 10;
/// Default seed for level sampling.
pub const DEFAULT_RNG_SEED: u64 = 100;
/// Default number of hashed update locks.
pub const DEFAULT_UPDATE_LOCKS: usize = 65_536;
/// Default cap on concurrently checked-out visited trackers.
pub const DEFAULT_VISITED_POOL_LIMIT: usize = 1_024;

/// Edge-pruning policy applied when a neighbour list must shrink to `M`.
///
/// The policy governs layer 0. Upper layers always use
/// [`PruningMode::Heuristic`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum PruningMode {
    /// Relative-neighbourhood test: keep a candidate only when it is closer
    /// to the query than to every already-accepted neighbour.
    #[default]
    Heuristic,
    /// Relaxed relative-neighbourhood test keeping a candidate when
    /// `alpha * d(accepted, candidate) >= d(query, candidate)`.
    Alpha {
        /// Relaxation factor, at least one.
        alpha: f32,
    },
    /// Rejects a candidate whose direction from the query is within the
    /// configured cosine of an accepted neighbour.
    Angle {
        /// Cosine threshold in `[-1, 1]`.
        threshold: f32,
    },
    /// Keeps the `M` nearest candidates without a geometric test.
    Truncate,
}

/// Strategy used to seed the layer-0 best-first expansion of a query.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum EntryStrategy {
    /// Single entry found by greedy descent through the upper layers.
    #[default]
    Greedy,
    /// Greedy entry plus `samples` nodes drawn uniformly at random.
    RandomRestarts {
        /// Number of extra random seeds per query.
        samples: usize,
    },
}

/// Configuration parameters for the HNSW index.
#[derive(Clone, Debug)]
pub struct HnswParams {
    max_elements: usize,
    m: usize,
    ef_construction: usize,
    ef: usize,
    rng_seed: u64,
    pruning: PruningMode,
    level_multiplier: f64,
    update_lock_count: usize,
    visited_pool_limit: usize,
    entry_strategy: EntryStrategy,
}

impl HnswParams {
    /// Creates a parameter set for an index holding up to `max_elements`
    /// vectors with base branching factor `m`.
    ///
    /// `ef_construction` is raised to `m` when smaller.
    ///
    /// # Errors
    /// Returns [`HnswError::InvalidParameters`] when `max_elements` is zero,
    /// when `m < 2`, or when `2 * m` exceeds the link-count field.
    ///
    /// # Examples
    /// ```
    /// use navgraph_core::HnswParams;
    /// let params = HnswParams::new(1_000, 16, 200).expect("parameters must be valid");
    /// assert_eq!(params.max_m0(), 32);
    /// assert_eq!(params.ef(), 10);
    /// ```
    pub fn new(max_elements: usize, m: usize, ef_construction: usize) -> Result<Self, HnswError> {
        if max_elements == 0 {
            return Err(HnswError::InvalidParameters {
                reason: "max_elements must be greater than zero".into(),
            });
        }
        if max_elements > u32::MAX as usize - 1 {
            return Err(HnswError::InvalidParameters {
                reason: format!("max_elements ({max_elements}) exceeds the 32-bit id space"),
            });
        }
        if m < 2 {
            return Err(HnswError::InvalidParameters {
                reason: format!("M must be at least 2 (got {m})"),
            });
        }
        let max_m0 = m.saturating_mul(2);
        if max_m0 > LinkHeader::MAX_COUNT {
            return Err(HnswError::InvalidParameters {
                reason: format!(
                    "2 * M ({max_m0}) exceeds the link count limit {}",
                    LinkHeader::MAX_COUNT
                ),
            });
        }
        let ef_construction = if ef_construction < m {
            warn!(ef_construction, m, "raising ef_construction to M");
            m
        } else {
            ef_construction
        };
        Ok(Self {
            max_elements,
            m,
            ef_construction,
            ef: DEFAULT_EF,
            rng_seed: DEFAULT_RNG_SEED,
            pruning: PruningMode::Heuristic,
            level_multiplier: (m as f64).ln().recip(),
            update_lock_count: DEFAULT_UPDATE_LOCKS,
            visited_pool_limit: DEFAULT_VISITED_POOL_LIMIT,
            entry_strategy: EntryStrategy::Greedy,
        })
    }

    /// Seeds the level sampler to make construction reproducible.
    #[must_use]
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = seed;
        self
    }

    /// Selects the layer-0 pruning policy.
    #[must_use]
    pub fn with_pruning(mut self, pruning: PruningMode) -> Self {
        self.pruning = pruning;
        self
    }

    /// Sets the initial query search width.
    #[must_use]
    pub fn with_ef(mut self, ef: usize) -> Self {
        self.ef = ef;
        self
    }

    /// Overrides the level multiplier (`1 / ln(M)` by default).
    #[must_use]
    pub fn with_level_multiplier(mut self, multiplier: f64) -> Self {
        self.level_multiplier = multiplier;
        self
    }

    /// Sets the size of the hashed update-lock table, rounded up to a power
    /// of two.
    #[must_use]
    pub fn with_update_lock_count(mut self, count: usize) -> Self {
        let rounded = count.max(1).next_power_of_two();
        if rounded != count {
            warn!(requested = count, rounded, "rounding update lock count to a power of two");
        }
        self.update_lock_count = rounded;
        self
    }

    /// Caps how many visited trackers may exist at once.
    #[must_use]
    pub fn with_visited_pool_limit(mut self, limit: usize) -> Self {
        self.visited_pool_limit = limit;
        self
    }

    /// Selects how queries seed the layer-0 expansion.
    #[must_use]
    pub fn with_entry_strategy(mut self, strategy: EntryStrategy) -> Self {
        self.entry_strategy = strategy;
        self
    }

    /// Returns the maximum number of stored elements.
    #[must_use]
    #[rustfmt::skip]
    pub fn max_elements(&self) -> usize { self.max_elements }

    /// Returns the base branching factor `M`.
    #[must_use]
    #[rustfmt::skip]
    pub fn m(&self) -> usize { self.m }

    /// Returns the degree cap above layer 0 (`maxM`).
    #[must_use]
    #[rustfmt::skip]
    pub fn max_m(&self) -> usize { self.m }

    /// Returns the degree cap at layer 0 (`maxM0`).
    #[must_use]
    #[rustfmt::skip]
    pub fn max_m0(&self) -> usize { self.m * 2 }

    /// Returns the construction search width.
    #[must_use]
    #[rustfmt::skip]
    pub fn ef_construction(&self) -> usize { self.ef_construction }

    /// Returns the initial query search width.
    #[must_use]
    #[rustfmt::skip]
    pub fn ef(&self) -> usize { self.ef }

    /// Returns the level-sampling seed.
    #[must_use]
    #[rustfmt::skip]
    pub fn rng_seed(&self) -> u64 { self.rng_seed }

    /// Returns the layer-0 pruning policy.
    #[must_use]
    #[rustfmt::skip]
    pub fn pruning(&self) -> PruningMode { self.pruning }

    /// Returns the level multiplier.
    #[must_use]
    #[rustfmt::skip]
    pub fn level_multiplier(&self) -> f64 { self.level_multiplier }

    /// Returns the number of hashed update locks.
    #[must_use]
    #[rustfmt::skip]
    pub fn update_lock_count(&self) -> usize { self.update_lock_count }

    /// Returns the visited-tracker cap.
    #[must_use]
    #[rustfmt::skip]
    pub fn visited_pool_limit(&self) -> usize { self.visited_pool_limit }

    /// Returns the query entry strategy.
    #[must_use]
    #[rustfmt::skip]
    pub fn entry_strategy(&self) -> EntryStrategy { self.entry_strategy }

    pub(crate) fn set_max_elements(&mut self, max_elements: usize) {
        self.max_elements = max_elements;
    }

    /// Checks the builder-supplied values that [`HnswParams::new`] cannot see.
    pub(crate) fn validate(&self) -> Result<(), HnswError> {
        if self.ef == 0 {
            return Err(HnswError::InvalidParameters {
                reason: "ef must be greater than zero".into(),
            });
        }
        if !(self.level_multiplier.is_finite() && self.level_multiplier > 0.0) {
            return Err(HnswError::InvalidParameters {
                reason: format!(
                    "level multiplier must be finite and positive (got {})",
                    self.level_multiplier
                ),
            });
        }
        if self.visited_pool_limit == 0 {
            return Err(HnswError::InvalidParameters {
                reason: "visited pool limit must be greater than zero".into(),
            });
        }
        match self.pruning {
            PruningMode::Alpha { alpha } if !(alpha.is_finite() && alpha >= 1.0) => {
                Err(HnswError::InvalidParameters {
                    reason: format!("alpha must be finite and >= 1 (got {alpha})"),
                })
            }
            PruningMode::Angle { threshold } if !(-1.0..=1.0).contains(&threshold) => {
                Err(HnswError::InvalidParameters {
                    reason: format!("angle threshold must lie in [-1, 1] (got {threshold})"),
                })
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn defaults_follow_m() {
        let params = HnswParams::new(100, 16, 200).expect("params");
        assert_eq!(params.max_m(), 16);
        assert_eq!(params.max_m0(), 32);
        assert_eq!(params.ef(), DEFAULT_EF);
        assert_eq!(params.rng_seed(), DEFAULT_RNG_SEED);
        assert_eq!(params.pruning(), PruningMode::Heuristic);
        assert!((params.level_multiplier() - 1.0 / 16f64.ln()).abs() < 1e-12);
        params.validate().expect("defaults validate");
    }

    #[test]
    fn small_ef_construction_is_raised_to_m() {
        let params = HnswParams::new(100, 8, 3).expect("params");
        assert_eq!(params.ef_construction(), 8);
    }

    #[rstest]
    #[case::zero_capacity(0, 16)]
    #[case::degenerate_m(10, 1)]
    #[case::link_count_overflow(10, 20_000)]
    fn new_rejects_invalid_values(#[case] max_elements: usize, #[case] m: usize) {
        let err = HnswParams::new(max_elements, m, 10).expect_err("must reject");
        assert!(matches!(err, HnswError::InvalidParameters { .. }));
    }

    #[rstest]
    #[case::alpha_below_one(PruningMode::Alpha { alpha: 0.5 })]
    #[case::alpha_nan(PruningMode::Alpha { alpha: f32::NAN })]
    #[case::angle_out_of_range(PruningMode::Angle { threshold: 1.5 })]
    fn validate_rejects_bad_pruning(#[case] pruning: PruningMode) {
        let params = HnswParams::new(10, 4, 10).expect("params").with_pruning(pruning);
        assert!(matches!(
            params.validate(),
            Err(HnswError::InvalidParameters { .. })
        ));
    }

    #[test]
    fn validate_rejects_zero_ef() {
        let params = HnswParams::new(10, 4, 10).expect("params").with_ef(0);
        assert!(params.validate().is_err());
    }

    #[rstest]
    #[case(0, 1)]
    #[case(1, 1)]
    #[case(3, 4)]
    #[case(1_000, 1_024)]
    fn update_lock_count_rounds_to_power_of_two(#[case] requested: usize, #[case] expected: usize) {
        let params = HnswParams::new(10, 4, 10)
            .expect("params")
            .with_update_lock_count(requested);
        assert_eq!(params.update_lock_count(), expected);
    }
}
