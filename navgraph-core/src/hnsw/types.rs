//! Result and candidate types with the ordering used by the search heaps.

use std::cmp::Ordering;

/// Search hit returned to callers, nearest first.
///
/// # Examples
/// ```
/// use navgraph_core::Neighbour;
///
/// let neighbour = Neighbour { label: 3, distance: 0.42 };
/// assert_eq!(neighbour.label, 3);
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Neighbour {
    /// External label supplied at insertion.
    pub label: u64,
    /// Distance between the query and the stored vector.
    pub distance: f32,
}

/// Internal node paired with its distance to the current query.
///
/// Ordered by distance, then id, so a [`std::collections::BinaryHeap`] of
/// candidates keeps the farthest on top.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Candidate {
    pub(crate) id: u32,
    pub(crate) distance: f32,
}

impl Candidate {
    #[rustfmt::skip]
    pub(crate) const fn new(id: u32, distance: f32) -> Self { Self { id, distance } }
}

impl Eq for Candidate {}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap adapter keeping the nearest candidate on top.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct ReverseCandidate(pub(crate) Candidate);

impl Ord for ReverseCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.cmp(&self.0)
    }
}

impl PartialOrd for ReverseCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;

    #[test]
    fn candidate_heap_keeps_farthest_on_top() {
        let heap: BinaryHeap<_> = [(0, 0.5), (1, 2.0), (2, 1.0)]
            .into_iter()
            .map(|(id, distance)| Candidate::new(id, distance))
            .collect();
        assert_eq!(heap.peek().map(|c| c.id), Some(1));
    }

    #[test]
    fn reverse_heap_keeps_nearest_on_top() {
        let heap: BinaryHeap<_> = [(0, 0.5), (1, 2.0), (2, 0.1)]
            .into_iter()
            .map(|(id, distance)| ReverseCandidate(Candidate::new(id, distance)))
            .collect();
        assert_eq!(heap.peek().map(|c| c.0.id), Some(2));
    }

    #[test]
    fn equal_distances_break_ties_by_id() {
        let a = Candidate::new(1, 1.0);
        let b = Candidate::new(2, 1.0);
        assert!(a < b);
    }
}
