//! Layer search routines for the HNSW graph.
//!
//! Greedy single-path descent through the upper layers, followed by a
//! bounded best-first expansion. The same expansion serves construction
//! (locked reads, `ef_construction` wide) and queries (lock-free layer-0
//! reads seeded by the configured [`EntryStrategy`]).

use std::collections::BinaryHeap;

use rand::Rng;
use tracing::instrument;

use crate::{
    error::{HnswError, Result},
    space::Space,
};

use super::{
    index::Hnsw,
    params::EntryStrategy,
    rng::query_rng,
    types::{Candidate, Neighbour, ReverseCandidate},
    visited::VisitedList,
};

/// How a best-first expansion reads adjacency and when it stops.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum Expansion {
    /// Insertion and repair: every list is read under its node's lock and
    /// the frontier is only cut once `ef` results are held.
    Construction,
    /// Query fast path: layer-0 lists are read without locks and the
    /// frontier is cut as soon as it passes the worst retained result, or,
    /// once deletions exist, only when `ef` live results are held.
    Query,
}

#[derive(Debug)]
struct SearchState {
    frontier: BinaryHeap<ReverseCandidate>,
    results: BinaryHeap<Candidate>,
    lower_bound: f32,
    deletions: bool,
}

impl SearchState {
    fn new(deletions: bool) -> Self {
        Self {
            frontier: BinaryHeap::new(),
            results: BinaryHeap::new(),
            lower_bound: f32::INFINITY,
            deletions,
        }
    }

    fn seed(&mut self, candidate: Candidate, retain: bool, ef: usize) {
        self.frontier.push(ReverseCandidate(candidate));
        if retain {
            self.retain(candidate, ef);
        }
    }

    fn should_stop(&self, mode: Expansion, ef: usize, distance: f32) -> bool {
        match mode {
            Expansion::Construction => distance > self.lower_bound && self.results.len() >= ef,
            Expansion::Query => {
                distance > self.lower_bound && (!self.deletions || self.results.len() >= ef)
            }
        }
    }

    fn admits(&self, ef: usize, distance: f32) -> bool {
        self.results.len() < ef || distance < self.lower_bound
    }

    fn retain(&mut self, candidate: Candidate, ef: usize) {
        self.results.push(candidate);
        while self.results.len() > ef {
            self.results.pop();
        }
        if let Some(worst) = self.results.peek() {
            self.lower_bound = worst.distance;
        }
    }
}

impl<S: Space> Hnsw<S> {
    /// Hill-climbs from `entry` through every level in `(to, from]`, moving
    /// to any strictly closer neighbour until none improves.
    pub(super) fn greedy_descend(
        &self,
        query: &[u8],
        entry: Candidate,
        from: usize,
        to: usize,
    ) -> Result<Candidate> {
        let mut current = entry;
        let mut links = Vec::new();
        let mut buf = Vec::with_capacity(self.space.data_size());
        for level in (to + 1..=from).rev() {
            let mut improved = true;
            while improved {
                improved = false;
                self.locked_links(current.id, level, &mut links)?;
                for &neighbour in &links {
                    self.check_link_target(current.id, neighbour, level)?;
                    let distance = self.distance_to(query, neighbour, &mut buf);
                    if distance < current.distance {
                        current = Candidate::new(neighbour, distance);
                        improved = true;
                    }
                }
            }
        }
        Ok(current)
    }

    /// Bounded best-first expansion at `level` from `seeds`.
    ///
    /// Soft-deleted nodes are traversed but never retained. Returns the
    /// retained candidates as a max-heap keyed on distance.
    pub(super) fn search_layer(
        &self,
        query: &[u8],
        seeds: &[Candidate],
        level: usize,
        ef: usize,
        mode: Expansion,
    ) -> Result<BinaryHeap<Candidate>> {
        let mut visited = self.visited.acquire()?;
        let check_deleted = self.has_deletions_hint();
        let mut state = SearchState::new(check_deleted);
        for seed in seeds {
            if !visited.insert(seed.id) {
                continue;
            }
            let live = !(check_deleted && self.store.is_deleted(seed.id));
            state.seed(*seed, live, ef);
        }

        let mut links = Vec::new();
        let mut buf = Vec::with_capacity(self.space.data_size());
        while let Some(ReverseCandidate(current)) = state.frontier.pop() {
            if state.should_stop(mode, ef, current.distance) {
                break;
            }
            self.read_links(current.id, level, mode, &mut links)?;
            self.expand(
                ExpandStep {
                    query,
                    from: current.id,
                    level,
                    ef,
                    check_deleted,
                },
                &links,
                &mut visited,
                &mut state,
                &mut buf,
            )?;
        }
        Ok(state.results)
    }

    fn read_links(&self, id: u32, level: usize, mode: Expansion, out: &mut Vec<u32>) -> Result<()> {
        if mode == Expansion::Query && level == 0 {
            self.store.level0(id).snapshot_into(out);
            return Ok(());
        }
        self.locked_links(id, level, out)
    }

    fn expand(
        &self,
        step: ExpandStep<'_>,
        links: &[u32],
        visited: &mut VisitedList,
        state: &mut SearchState,
        buf: &mut Vec<u8>,
    ) -> Result<()> {
        for &neighbour in links {
            self.check_link_target(step.from, neighbour, step.level)?;
            if !visited.insert(neighbour) {
                continue;
            }
            let distance = self.distance_to(step.query, neighbour, buf);
            if !state.admits(step.ef, distance) {
                continue;
            }
            let candidate = Candidate::new(neighbour, distance);
            let live = !(step.check_deleted && self.store.is_deleted(neighbour));
            state.seed(candidate, live, step.ef);
        }
        Ok(())
    }

    fn has_deletions_hint(&self) -> bool {
        self.has_deletions.load(std::sync::atomic::Ordering::Acquire)
    }

    /// Finds up to `k` live neighbours of `query`, nearest first.
    ///
    /// The layer-0 expansion is `max(ef, k)` wide and seeded according to
    /// the configured [`EntryStrategy`]. Ties between equal distances are
    /// broken arbitrarily.
    ///
    /// # Errors
    /// Returns [`HnswError::VectorSizeMismatch`] for malformed queries and
    /// [`HnswError::InvariantViolation`] when traversal meets a corrupt link.
    #[instrument(level = "debug", skip(self, query), fields(len = self.len()))]
    pub fn search(&self, query: &[u8], k: usize) -> Result<Vec<Neighbour>> {
        self.search_seeded(query, k, &[])
    }

    /// Like [`Hnsw::search`], additionally seeding the layer-0 expansion with
    /// the nodes stored under `seeds`.
    ///
    /// # Errors
    /// Returns [`HnswError::LabelNotFound`] when a seed label is unknown, plus
    /// the errors of [`Hnsw::search`].
    #[instrument(level = "debug", skip(self, query, seeds), fields(seeds = seeds.len()))]
    pub fn search_with_seeds(&self, query: &[u8], k: usize, seeds: &[u64]) -> Result<Vec<Neighbour>> {
        let ids = seeds
            .iter()
            .map(|label| self.id_of(*label).ok_or(HnswError::LabelNotFound { label: *label }))
            .collect::<Result<Vec<_>>>()?;
        self.search_seeded(query, k, &ids)
    }

    fn search_seeded(&self, query: &[u8], k: usize, extra: &[u32]) -> Result<Vec<Neighbour>> {
        self.check_vector(query)?;
        let Some(entry) = self.entry_point() else {
            return Ok(Vec::new());
        };
        if k == 0 {
            return Ok(Vec::new());
        }
        let mut buf = Vec::with_capacity(self.space.data_size());
        let start = Candidate::new(entry, self.distance_to(query, entry, &mut buf));
        let top = self.store.level(entry);
        let landing = self.greedy_descend(query, start, top, 0)?;

        let seeds = self.query_seeds(query, landing, extra, &mut buf);
        let ef = self.ef().max(k);
        let results = self.search_layer(query, &seeds, 0, ef, Expansion::Query)?;

        let mut hits = results.into_sorted_vec();
        hits.truncate(k);
        Ok(hits
            .into_iter()
            .map(|hit| Neighbour {
                label: self.store.label(hit.id),
                distance: hit.distance,
            })
            .collect())
    }

    fn query_seeds(&self, query: &[u8], landing: Candidate, extra: &[u32], buf: &mut Vec<u8>) -> Vec<Candidate> {
        let mut seeds = vec![landing];
        let count = self.len();
        if let EntryStrategy::RandomRestarts { samples } = self.params.entry_strategy() {
            let mut rng = query_rng(self.params.rng_seed(), query);
            // Ids still being inserted by other threads are skipped.
            seeds.extend((0..samples.min(count)).filter_map(|_| {
                let id = rng.gen_range(0..count) as u32;
                self.is_published(id)
                    .then(|| Candidate::new(id, self.distance_to(query, id, buf)))
            }));
        }
        seeds.extend(
            extra
                .iter()
                .map(|id| Candidate::new(*id, self.distance_to(query, *id, buf))),
        );
        seeds
    }
}

#[derive(Clone, Copy)]
struct ExpandStep<'q> {
    query: &'q [u8],
    from: u32,
    level: usize,
    ef: usize,
    check_deleted: bool,
}
