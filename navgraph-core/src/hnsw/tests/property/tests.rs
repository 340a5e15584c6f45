use proptest::{
    prelude::any,
    prop_assert, prop_assert_eq, proptest,
    test_runner::{TestCaseError, TestCaseResult},
};

use navgraph_test_support::datasets::brute_force_top_k;

use super::{
    strategies::index_fixture_strategy,
    types::{IndexFixture, VectorDistribution},
};
use crate::{
    hnsw::{Hnsw, HnswInvariant},
    space::L2Space,
    test_utils::suite_proptest_config,
};

const DISTANCE_TOLERANCE: f32 = 1e-5;

fn build(fixture: &IndexFixture) -> Result<Hnsw<L2Space>, TestCaseError> {
    let params = fixture
        .params
        .build(fixture.vectors.len())
        .map_err(|err| TestCaseError::fail(format!("invalid params: {err}")))?;
    let index = Hnsw::new(L2Space::new(fixture.dimension()), params)
        .map_err(|err| TestCaseError::fail(format!("index construction failed: {err}")))?;
    for (label, vector) in fixture.vectors.iter().enumerate() {
        index
            .insert(label as u64, &L2Space::encode(vector))
            .map_err(|err| TestCaseError::fail(format!("insert {label} failed: {err}")))?;
    }
    Ok(index)
}

fn run_structure_property(fixture: &IndexFixture) -> TestCaseResult {
    let index = build(fixture)?;
    prop_assert_eq!(index.len(), fixture.vectors.len());
    let violations = index.invariants().collect_many(HnswInvariant::structural());
    prop_assert!(violations.is_empty(), "violations: {:?}", violations);
    if fixture.fits_without_pruning() {
        let violations = index.invariants().collect_all();
        prop_assert!(violations.is_empty(), "violations: {:?}", violations);
    }
    Ok(())
}

fn run_exact_search_property(fixture: &IndexFixture, deletion_mask: u64) -> TestCaseResult {
    let index = build(fixture)?;
    index.set_ef(fixture.vectors.len());
    let deleted: Vec<u64> = (0..fixture.vectors.len() as u64)
        .filter(|label| deletion_mask >> (label % 64) & 1 == 1)
        .collect();
    for label in &deleted {
        index
            .mark_deleted(*label)
            .map_err(|err| TestCaseError::fail(format!("delete {label} failed: {err}")))?;
    }

    let live: Vec<(usize, &Vec<f32>)> = fixture
        .vectors
        .iter()
        .enumerate()
        .filter(|(label, _)| !deleted.contains(&(*label as u64)))
        .collect();
    let live_vectors: Vec<Vec<f32>> = live.iter().map(|(_, v)| (*v).clone()).collect();
    let k = 3.min(live.len());
    for query in fixture.vectors.iter().step_by(3) {
        let hits = index
            .search(&L2Space::encode(query), 3)
            .map_err(|err| TestCaseError::fail(format!("search failed: {err}")))?;
        prop_assert!(hits.iter().all(|hit| !deleted.contains(&hit.label)));
        prop_assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
        prop_assert!(hits.len() <= k);
        if fixture.fits_without_pruning() {
            let expected = brute_force_top_k(&live_vectors, query, k);
            prop_assert_eq!(hits.len(), expected.len());
            for (hit, (_, distance)) in hits.iter().zip(&expected) {
                prop_assert!(
                    (hit.distance - distance).abs() <= DISTANCE_TOLERANCE,
                    "distance {} differs from exact {}",
                    hit.distance,
                    distance
                );
            }
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(suite_proptest_config(64))]

    #[test]
    fn built_graphs_satisfy_invariants(fixture in index_fixture_strategy()) {
        run_structure_property(&fixture)?;
    }

    #[test]
    fn searches_skip_deleted_and_match_brute_force(
        fixture in index_fixture_strategy(),
        deletion_mask in any::<u64>(),
    ) {
        run_exact_search_property(&fixture, deletion_mask)?;
    }

    #[test]
    fn stored_vectors_find_themselves(fixture in index_fixture_strategy()) {
        let index = build(&fixture)?;
        index.set_ef(fixture.vectors.len());
        if fixture.fits_without_pruning() {
            let distinct = fixture.distribution != VectorDistribution::Duplicates;
            for (label, vector) in fixture.vectors.iter().enumerate() {
                let hits = index
                    .search(&L2Space::encode(vector), 1)
                    .map_err(|err| TestCaseError::fail(format!("search failed: {err}")))?;
                prop_assert_eq!(hits.len(), 1);
                prop_assert_eq!(hits[0].distance, 0.0);
                if distinct {
                    prop_assert_eq!(hits[0].label, label as u64);
                }
            }
        }
    }
}
