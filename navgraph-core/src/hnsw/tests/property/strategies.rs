//! Strategy builders for property-based HNSW tests.

use proptest::prelude::*;
use rand::{Rng, SeedableRng, distributions::Standard, rngs::SmallRng};

use super::types::{IndexFixture, ParamsSeed, PruningChoice, VectorDistribution};

const MAX_POINTS: usize = 48;
const MAX_DIMENSION: usize = 6;
const CLUSTER_SPREAD: f32 = 0.01;

/// Generates datasets of every [`VectorDistribution`] with parameters to
/// index them.
pub(super) fn index_fixture_strategy() -> impl Strategy<Value = IndexFixture> {
    (
        any::<VectorDistribution>(),
        any::<u64>(),
        2_usize..=MAX_POINTS,
        1_usize..=MAX_DIMENSION,
        params_strategy(),
    )
        .prop_map(|(distribution, seed, count, dimension, params)| {
            let mut rng = SmallRng::seed_from_u64(seed);
            let vectors = match distribution {
                VectorDistribution::Uniform => uniform(&mut rng, count, dimension),
                VectorDistribution::Clustered => clustered(&mut rng, count, dimension),
                VectorDistribution::Duplicates => duplicated(&mut rng, count, dimension),
            };
            IndexFixture {
                distribution,
                vectors,
                params,
            }
        })
}

/// Samples small parameter sets so that overflow pruning is exercised.
pub(super) fn params_strategy() -> impl Strategy<Value = ParamsSeed> {
    (
        2_usize..=8,
        0_usize..=24,
        any::<PruningChoice>(),
        proptest::option::of(1_usize..=4),
        any::<u64>(),
    )
        .prop_map(|(m, extra_ef, pruning, restarts, rng_seed)| ParamsSeed {
            m,
            ef_construction: m + extra_ef,
            pruning,
            restarts,
            rng_seed,
        })
}

fn point(rng: &mut SmallRng, dimension: usize) -> Vec<f32> {
    (0..dimension).map(|_| rng.sample(Standard)).collect()
}

fn uniform(rng: &mut SmallRng, count: usize, dimension: usize) -> Vec<Vec<f32>> {
    (0..count).map(|_| point(rng, dimension)).collect()
}

fn clustered(rng: &mut SmallRng, count: usize, dimension: usize) -> Vec<Vec<f32>> {
    let clusters = rng.gen_range(1..=4);
    let centroids = uniform(rng, clusters, dimension);
    (0..count)
        .map(|i| {
            centroids[i % centroids.len()]
                .iter()
                .map(|c| c + rng.gen_range(-CLUSTER_SPREAD..CLUSTER_SPREAD))
                .collect()
        })
        .collect()
}

fn duplicated(rng: &mut SmallRng, count: usize, dimension: usize) -> Vec<Vec<f32>> {
    let mut vectors = uniform(rng, count.div_ceil(2), dimension);
    while vectors.len() < count {
        let copy = vectors[rng.gen_range(0..vectors.len())].clone();
        vectors.push(copy);
    }
    vectors
}
