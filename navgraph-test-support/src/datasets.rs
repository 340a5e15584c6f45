//! Synthetic datasets and exact-search oracles for recall assertions.

use rand::{Rng, SeedableRng, distributions::Standard, rngs::SmallRng};

/// Generates `count` vectors of `dim` components drawn uniformly from
/// `[0, 1)`, reproducibly for a given `seed`.
///
/// # Examples
/// ```
/// use navgraph_test_support::datasets::random_vectors;
///
/// let vectors = random_vectors(3, 4, 7);
/// assert_eq!(vectors.len(), 3);
/// assert!(vectors.iter().all(|v| v.len() == 4));
/// assert_eq!(vectors, random_vectors(3, 4, 7));
/// ```
#[must_use]
pub fn random_vectors(count: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = SmallRng::seed_from_u64(seed);
    (0..count)
        .map(|_| (0..dim).map(|_| rng.sample(Standard)).collect())
        .collect()
}

/// Squared Euclidean distance between two equally long vectors.
#[must_use]
pub fn squared_l2(left: &[f32], right: &[f32]) -> f32 {
    left.iter()
        .zip(right)
        .map(|(a, b)| (a - b) * (a - b))
        .sum()
}

/// Exact `k` nearest neighbours of `query` by squared L2 distance, as
/// `(index, distance)` pairs nearest first. Ties keep the lower index first.
#[must_use]
pub fn brute_force_top_k(vectors: &[Vec<f32>], query: &[f32], k: usize) -> Vec<(usize, f32)> {
    let mut scored: Vec<(usize, f32)> = vectors
        .iter()
        .enumerate()
        .map(|(index, vector)| (index, squared_l2(vector, query)))
        .collect();
    scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
    scored.truncate(k);
    scored
}

/// Fraction of `truth` present in `found`.
///
/// Returns 1.0 when `truth` is empty.
#[must_use]
pub fn recall_at_k(found: &[u64], truth: &[u64]) -> f64 {
    if truth.is_empty() {
        return 1.0;
    }
    let hits = truth.iter().filter(|label| found.contains(label)).count();
    hits as f64 / truth.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn brute_force_orders_by_distance() {
        let vectors = vec![vec![3.0], vec![1.0], vec![-1.5], vec![0.5]];
        let top = brute_force_top_k(&vectors, &[0.0], 3);
        let order: Vec<usize> = top.iter().map(|(index, _)| *index).collect();
        assert_eq!(order, vec![3, 1, 2]);
        assert_eq!(top[0].1, 0.25);
    }

    #[rstest]
    #[case::perfect(&[1, 2, 3], &[3, 2, 1], 1.0)]
    #[case::partial(&[1, 9], &[1, 2], 0.5)]
    #[case::empty_truth(&[], &[], 1.0)]
    fn recall_counts_overlap(#[case] found: &[u64], #[case] truth: &[u64], #[case] expected: f64) {
        assert!((recall_at_k(found, truth) - expected).abs() < f64::EPSILON);
    }

    #[test]
    fn seeds_produce_distinct_datasets() {
        assert_ne!(random_vectors(4, 2, 1), random_vectors(4, 2, 2));
    }
}
