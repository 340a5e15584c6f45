//! Fixture types consumed by the HNSW property strategies.

use test_strategy::Arbitrary;

use crate::{
    error::HnswError,
    hnsw::{EntryStrategy, HnswParams, PruningMode},
};

/// Kind of dataset produced for an [`IndexFixture`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Arbitrary)]
pub(super) enum VectorDistribution {
    /// Points sampled uniformly in the unit hypercube.
    #[weight(3)]
    Uniform,
    /// Tight clusters around a handful of random centroids.
    #[weight(2)]
    Clustered,
    /// Uniform data where some vectors repeat exactly.
    #[weight(1)]
    Duplicates,
}

/// Layer-0 pruning policy, mirrored so it can be generated.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Arbitrary)]
pub(super) enum PruningChoice {
    #[weight(3)]
    Heuristic,
    Alpha,
    Angle,
    Truncate,
}

impl PruningChoice {
    pub(super) fn mode(self) -> PruningMode {
        match self {
            Self::Heuristic => PruningMode::Heuristic,
            Self::Alpha => PruningMode::Alpha { alpha: 1.2 },
            Self::Angle => PruningMode::Angle { threshold: 0.5 },
            Self::Truncate => PruningMode::Truncate,
        }
    }
}

/// Parameter seed sampled by the strategies.
#[derive(Clone, Copy, Debug)]
pub(super) struct ParamsSeed {
    pub(super) m: usize,
    pub(super) ef_construction: usize,
    pub(super) pruning: PruningChoice,
    pub(super) restarts: Option<usize>,
    pub(super) rng_seed: u64,
}

impl ParamsSeed {
    pub(super) fn build(self, capacity: usize) -> Result<HnswParams, HnswError> {
        let strategy = self
            .restarts
            .map_or(EntryStrategy::Greedy, |samples| EntryStrategy::RandomRestarts { samples });
        Ok(HnswParams::new(capacity, self.m, self.ef_construction)?
            .with_pruning(self.pruning.mode())
            .with_rng_seed(self.rng_seed)
            .with_entry_strategy(strategy))
    }
}

/// Dataset plus the parameters an index over it is built with.
#[derive(Clone, Debug)]
pub(super) struct IndexFixture {
    pub(super) distribution: VectorDistribution,
    pub(super) vectors: Vec<Vec<f32>>,
    pub(super) params: ParamsSeed,
}

impl IndexFixture {
    pub(super) fn dimension(&self) -> usize {
        self.vectors.first().map_or(0, Vec::len)
    }

    /// Whether every level-0 list can hold all other nodes, so no back-edge
    /// is ever re-pruned and the graph stays connected.
    pub(super) fn fits_without_pruning(&self) -> bool {
        self.vectors.len() <= self.params.m * 2 + 1
    }
}
