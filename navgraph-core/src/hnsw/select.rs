//! Neighbour selection policies used to bound adjacency lists.
//!
//! Every policy receives candidates carrying their distance to a base point
//! (the query, or the node whose list is being rebuilt) and shrinks them in
//! place to at most `m` entries, nearest first. Sets that already hold fewer
//! than `m` candidates are returned unchanged.

use crate::error::HnswError;

use super::{params::PruningMode, types::Candidate};

/// Shrinks `candidates` to at most `m` entries according to `mode`.
///
/// `between` returns the distance separating two stored nodes.
///
/// # Errors
/// Returns [`HnswError::InvariantViolation`] if the policy produced more than
/// `m` neighbours.
pub(crate) fn select_neighbours(
    candidates: &mut Vec<Candidate>,
    m: usize,
    mode: PruningMode,
    between: impl FnMut(u32, u32) -> f32,
) -> Result<(), HnswError> {
    candidates.sort_unstable();
    if candidates.len() < m {
        return Ok(());
    }
    match mode {
        PruningMode::Heuristic => {
            retain_diverse(candidates, m, between, |to_query, _, to_kept| to_kept < to_query);
        }
        PruningMode::Alpha { alpha } => {
            retain_diverse(candidates, m, between, |to_query, _, to_kept| {
                alpha * to_kept < to_query
            });
        }
        PruningMode::Angle { threshold } => {
            retain_diverse(candidates, m, between, |to_query, kept_to_query, to_kept| {
                cosine_at_query(to_query, kept_to_query, to_kept).is_some_and(|cos| cos > threshold)
            });
        }
        PruningMode::Truncate => candidates.truncate(m),
    }
    if candidates.len() > m {
        return Err(HnswError::InvariantViolation {
            message: format!(
                "neighbour selection returned {} candidates for a limit of {m}",
                candidates.len()
            ),
        });
    }
    Ok(())
}

/// Greedy acceptance loop shared by the geometric policies.
///
/// `rejects(d(q, c), d(q, r), d(r, c))` decides whether an accepted
/// neighbour `r` disqualifies candidate `c`.
fn retain_diverse(
    candidates: &mut Vec<Candidate>,
    m: usize,
    mut between: impl FnMut(u32, u32) -> f32,
    rejects: impl Fn(f32, f32, f32) -> bool,
) {
    let mut accepted: Vec<Candidate> = Vec::with_capacity(m);
    for candidate in candidates.iter() {
        if accepted.len() >= m {
            break;
        }
        let dominated = accepted.iter().any(|kept| {
            let kept_to_candidate = between(kept.id, candidate.id);
            rejects(candidate.distance, kept.distance, kept_to_candidate)
        });
        if !dominated {
            accepted.push(*candidate);
        }
    }
    *candidates = accepted;
}

/// Cosine of the angle at the query vertex from squared side lengths, or
/// `None` when either side is degenerate.
fn cosine_at_query(to_query: f32, kept_to_query: f32, to_kept: f32) -> Option<f32> {
    let scale = (to_query * kept_to_query).sqrt();
    (scale > 0.0).then(|| (to_query + kept_to_query - to_kept) / 2.0 / scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    /// Points on a line; squared distance between ids.
    fn on_line(points: &[f32]) -> impl FnMut(u32, u32) -> f32 + '_ {
        move |a, b| {
            let diff = points[a as usize] - points[b as usize];
            diff * diff
        }
    }

    fn from_query(points: &[f32], query: f32) -> Vec<Candidate> {
        points
            .iter()
            .enumerate()
            .map(|(id, p)| Candidate::new(id as u32, (p - query) * (p - query)))
            .collect()
    }

    fn ids(candidates: &[Candidate]) -> Vec<u32> {
        candidates.iter().map(|c| c.id).collect()
    }

    #[test]
    fn heuristic_drops_candidates_shadowed_by_closer_neighbours() {
        // Query at 0; 1.0 shadows 2.0 and 3.0, -1.0 lies on the other side.
        let points = [1.0, 2.0, 3.0, -1.0];
        let mut candidates = from_query(&points, 0.0);
        select_neighbours(&mut candidates, 3, PruningMode::Heuristic, on_line(&points))
            .expect("selection");
        assert_eq!(ids(&candidates), vec![0, 3]);
    }

    #[test]
    fn alpha_relaxation_keeps_more_edges() {
        let points = [1.0, 2.0, 3.0, -1.0];
        let mut strict = from_query(&points, 0.0);
        select_neighbours(&mut strict, 4, PruningMode::Heuristic, on_line(&points))
            .expect("strict");
        let mut relaxed = from_query(&points, 0.0);
        select_neighbours(
            &mut relaxed,
            4,
            PruningMode::Alpha { alpha: 4.0 },
            on_line(&points),
        )
        .expect("relaxed");
        assert!(relaxed.len() > strict.len());
        assert_eq!(ids(&relaxed), vec![0, 3, 1]);
    }

    #[test]
    fn angle_pruning_rejects_same_direction() {
        // 1.0 and 2.0 share a direction from the query; -1.5 does not.
        let points = [1.0, 2.0, -1.5];
        let mut candidates = from_query(&points, 0.0);
        select_neighbours(
            &mut candidates,
            3,
            PruningMode::Angle { threshold: 0.5 },
            on_line(&points),
        )
        .expect("selection");
        assert_eq!(ids(&candidates), vec![0, 2]);
    }

    #[test]
    fn truncate_keeps_nearest() {
        let points = [5.0, 1.0, 3.0, 2.0];
        let mut candidates = from_query(&points, 0.0);
        select_neighbours(&mut candidates, 2, PruningMode::Truncate, on_line(&points))
            .expect("selection");
        assert_eq!(ids(&candidates), vec![1, 3]);
    }

    #[rstest]
    #[case::heuristic(PruningMode::Heuristic)]
    #[case::alpha(PruningMode::Alpha { alpha: 1.2 })]
    #[case::angle(PruningMode::Angle { threshold: 0.9 })]
    #[case::truncate(PruningMode::Truncate)]
    fn small_sets_are_left_intact(#[case] mode: PruningMode) {
        let points = [1.0, 2.0];
        let mut candidates = from_query(&points, 0.0);
        select_neighbours(&mut candidates, 3, mode, on_line(&points)).expect("selection");
        assert_eq!(ids(&candidates), vec![0, 1]);
    }

    #[rstest]
    #[case::heuristic(PruningMode::Heuristic)]
    #[case::alpha(PruningMode::Alpha { alpha: 100.0 })]
    #[case::angle(PruningMode::Angle { threshold: 1.0 })]
    #[case::truncate(PruningMode::Truncate)]
    fn result_never_exceeds_limit(#[case] mode: PruningMode) {
        let points: Vec<f32> = (0..32).map(|i| i as f32 * 0.37 - 5.0).collect();
        let mut candidates = from_query(&points, 0.1);
        select_neighbours(&mut candidates, 4, mode, on_line(&points)).expect("selection");
        assert!(candidates.len() <= 4);
        assert!(candidates.windows(2).all(|w| w[0].distance <= w[1].distance));
    }
}
