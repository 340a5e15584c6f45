//! Construction and end-to-end search tests.

use navgraph_test_support::datasets::random_vectors;
use rstest::rstest;

use crate::{
    hnsw::{Hnsw, HnswParams, InsertOptions, PruningMode},
    space::L2Space,
};

use super::fixtures::{
    assert_sorted_by_distance, assert_structurally_valid, exact_labels, labels, params,
    random_index,
};

#[rstest]
#[case::heuristic(PruningMode::Heuristic)]
#[case::alpha(PruningMode::Alpha { alpha: 1.2 })]
#[case::angle(PruningMode::Angle { threshold: 0.5 })]
#[case::truncate(PruningMode::Truncate)]
fn every_vector_finds_itself(#[case] pruning: PruningMode) {
    let (vectors, index) = random_index(200, 8, 3, params(200, 8, 100).with_pruning(pruning));
    index.set_ef(100);
    for (label, vector) in vectors.iter().enumerate() {
        let hits = index.search(&L2Space::encode(vector), 1).expect("search");
        assert_eq!(hits[0].label, label as u64, "self-match for {label}");
        assert_eq!(hits[0].distance, 0.0);
    }
    assert_structurally_valid(&index);
}

#[test]
fn top_ten_matches_brute_force_on_thousand_vectors() {
    let (vectors, index) = random_index(1_000, 32, 500, params(1_000, 16, 200));
    index.set_ef(200);
    let hits = index
        .search(&L2Space::encode(&vectors[500]), 10)
        .expect("search");

    assert_eq!(hits.len(), 10);
    assert_eq!(hits[0].label, 500);
    assert_eq!(hits[0].distance, 0.0);
    assert_eq!(labels(&hits), exact_labels(&vectors, &vectors[500], 10, &[]));
    assert_sorted_by_distance(&hits);
}

#[test]
fn small_graphs_satisfy_every_invariant() {
    // Nine nodes with M = 4 never overflow a layer-0 list.
    let (_, index) = random_index(9, 3, 11, params(16, 4, 16));
    index.invariants().check_all().expect("graph valid");
    assert_eq!(index.len(), 9);
}

#[test]
fn larger_graphs_stay_structurally_valid() {
    let (_, index) = random_index(600, 6, 5, params(600, 4, 32));
    assert_structurally_valid(&index);
    assert!(index.max_level().is_some());
}

#[test]
fn first_insert_becomes_entry_point() {
    let index = Hnsw::new(L2Space::new(2), params(4, 2, 4)).expect("index");
    assert_eq!(index.entry_point(), None);
    assert_eq!(index.max_level(), None);

    let id = index
        .insert_with(9, &L2Space::encode(&[1.0, 1.0]), InsertOptions::at_level(2))
        .expect("insert");
    assert_eq!(index.entry_point(), Some(id));
    assert_eq!(index.max_level(), Some(2));
    assert_eq!(index.level_of(id), Some(2));
    assert_eq!(index.label_of(id), Some(9));
}

#[test]
fn higher_level_insert_takes_over_entry_point() {
    let index = Hnsw::new(L2Space::new(1), params(4, 2, 4)).expect("index");
    index
        .insert_with(0, &L2Space::encode(&[0.0]), InsertOptions::at_level(0))
        .expect("insert");
    let low = index
        .insert_with(1, &L2Space::encode(&[1.0]), InsertOptions::at_level(0))
        .expect("insert");
    assert_eq!(index.entry_point(), Some(0));
    let high = index
        .insert_with(2, &L2Space::encode(&[2.0]), InsertOptions::at_level(3))
        .expect("insert");
    assert_ne!(low, high);
    assert_eq!(index.entry_point(), Some(high));
    assert_eq!(index.max_level(), Some(3));
    index.invariants().check_all().expect("graph valid");
}

#[test]
fn new_nodes_keep_at_most_m_neighbours() {
    let (_, index) = random_index(300, 4, 8, params(300, 6, 64));
    let last = (index.len() - 1) as u32;
    let links = index.neighbours(last, 0).expect("level 0 exists");
    assert!(!links.is_empty());
    assert!(links.len() <= index.params().m());
}

#[test]
fn batch_insert_returns_ids_in_input_order() {
    let vectors = random_vectors(300, 6, 21);
    let items: Vec<(u64, Vec<u8>)> = vectors
        .iter()
        .enumerate()
        .map(|(label, vector)| (label as u64 * 10, L2Space::encode(vector)))
        .collect();
    let index = Hnsw::new(L2Space::new(6), params(300, 8, 64)).expect("index");
    let ids = index.insert_batch(&items).expect("batch insert");

    assert_eq!(index.len(), 300);
    for ((label, _), id) in items.iter().zip(&ids) {
        assert_eq!(index.label_of(*id), Some(*label));
        assert_eq!(index.id_of(*label), Some(*id));
    }
    assert_structurally_valid(&index);
}

#[test]
fn reinserting_a_label_updates_in_place() {
    let index = Hnsw::new(L2Space::new(2), params(8, 2, 8)).expect("index");
    for label in 0..4u64 {
        index
            .insert(label, &L2Space::encode(&[label as f32, 0.0]))
            .expect("insert");
    }
    let original = index.id_of(2).expect("label 2");
    let id = index
        .insert(2, &L2Space::encode(&[50.0, 50.0]))
        .expect("re-insert");

    assert_eq!(id, original);
    assert_eq!(index.len(), 4);
    assert_eq!(
        L2Space::decode(&index.vector_by_label(2).expect("vector")),
        vec![50.0, 50.0]
    );
    let hits = index
        .search(&L2Space::encode(&[50.0, 50.0]), 1)
        .expect("search");
    assert_eq!(hits[0].label, 2);
}

#[test]
fn seeded_builds_are_reproducible() {
    let build = || random_index(120, 4, 17, params(120, 4, 32).with_rng_seed(5)).1;
    let (left, right) = (build(), build());
    assert_eq!(left.entry_point(), right.entry_point());
    for id in 0..left.len() as u32 {
        assert_eq!(left.level_of(id), right.level_of(id));
        assert_eq!(left.neighbours(id, 0), right.neighbours(id, 0));
    }
}

#[test]
fn params_round_trip_through_the_index() {
    let params = HnswParams::new(32, 4, 2).expect("params");
    assert_eq!(params.ef_construction(), 4);
    let index = Hnsw::new(L2Space::new(3), params).expect("index");
    assert_eq!(index.capacity(), 32);
    assert_eq!(index.params().max_m0(), 8);
    assert!(index.is_empty());
}
