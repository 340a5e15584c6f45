//! In-place vector updates and neighbourhood repair.
//!
//! An update rewrites the stored vector, rebuilds the adjacency of a random
//! sample of the node's neighbours from their two-hop neighbourhood and then
//! reconnects the node itself as if it were being inserted again.

use std::{
    collections::{BTreeSet, BinaryHeap},
    sync::atomic::Ordering,
};

use tracing::instrument;

use crate::{
    error::{HnswError, Result},
    space::Space,
};

use super::{
    index::{Hnsw, Scratch},
    insert::ConnectContext,
    params::PruningMode,
    select::select_neighbours,
    types::Candidate,
};

impl<S: Space> Hnsw<S> {
    /// Replaces the vector of internal id `id` and repairs its links.
    ///
    /// Each direct neighbour is resampled with `resample_probability`: a
    /// resampled neighbour has its list rebuilt from the node's two-hop
    /// neighbourhood. The node's own lists are then rebuilt by a fresh
    /// descent from the entry point.
    ///
    /// # Errors
    /// Returns [`HnswError::NodeNotFound`] for unknown ids,
    /// [`HnswError::InvalidParameters`] when the probability lies outside
    /// `[0, 1]`, [`HnswError::VectorSizeMismatch`] for malformed vectors and
    /// [`HnswError::IndexPoisoned`] after a fatal failure.
    #[instrument(level = "debug", skip(self, vector))]
    pub fn update(&self, id: u32, vector: &[u8], resample_probability: f64) -> Result<()> {
        self.ensure_healthy()?;
        self.check_vector(vector)?;
        if !(0.0..=1.0).contains(&resample_probability) {
            return Err(HnswError::InvalidParameters {
                reason: format!("resample probability {resample_probability} is outside [0, 1]"),
            });
        }
        if id as usize >= self.len() || !self.is_published(id) {
            return Err(HnswError::NodeNotFound { id });
        }
        // A published node's inserter took this lock before publishing, so
        // acquiring it waits out the rest of that insertion.
        let result = self
            .lock_update(id)
            .and_then(|_guard| self.update_locked(id, vector, resample_probability));
        self.guard_fatal(result)
    }

    /// Replaces the vector stored under `label`; see [`Hnsw::update`].
    ///
    /// # Errors
    /// Returns [`HnswError::LabelNotFound`] for unknown labels, plus the
    /// errors of [`Hnsw::update`].
    pub fn update_label(&self, label: u64, vector: &[u8], resample_probability: f64) -> Result<()> {
        let id = self.id_of(label).ok_or(HnswError::LabelNotFound { label })?;
        self.update(id, vector, resample_probability)
    }

    /// Update body; the caller holds the node's update lock.
    pub(super) fn update_locked(&self, id: u32, vector: &[u8], resample_probability: f64) -> Result<()> {
        let entry = self.entry_point.load(Ordering::Acquire);
        self.store.write_vector(id, vector);
        if entry == id && self.len() == 1 {
            return Ok(());
        }

        let level = self.store.level(id);
        for layer in 0..=level {
            self.resample_layer(id, layer, resample_probability)?;
        }

        // Promotion stores the entry point and max level separately.
        let top = self.store.level(entry);
        if top < level {
            return Err(HnswError::InvariantViolation {
                message: format!("node {id} at level {level} sits above entry point {entry} at level {top}"),
            });
        }
        self.link_from(
            ConnectContext {
                vector,
                id,
                level,
                is_update: true,
            },
            entry,
            top,
        )
    }

    /// Rebuilds the lists of a random sample of `id`'s neighbours at `layer`
    /// from the two-hop candidate set.
    fn resample_layer(&self, id: u32, layer: usize, probability: f64) -> Result<()> {
        let mut one_hop = Vec::new();
        self.locked_links(id, layer, &mut one_hop)?;
        if one_hop.is_empty() {
            return Ok(());
        }

        let mut pool = BTreeSet::from([id]);
        let mut resampled = BTreeSet::new();
        let mut two_hop = Vec::new();
        for &neighbour in &one_hop {
            self.check_link_target(id, neighbour, layer)?;
            pool.insert(neighbour);
            if !self.should_resample(probability)? {
                continue;
            }
            resampled.insert(neighbour);
            self.locked_links(neighbour, layer, &mut two_hop)?;
            for &far in &two_hop {
                self.check_link_target(neighbour, far, layer)?;
                pool.insert(far);
            }
        }

        let cap = if layer == 0 {
            self.params.max_m0()
        } else {
            self.params.max_m()
        };
        let mut scratch = Scratch::default();
        for &neighbour in &resampled {
            let mut kept = self.nearest_in_pool(neighbour, &pool, &mut scratch);
            select_neighbours(&mut kept, cap, PruningMode::Heuristic, |a, b| {
                self.distance_between(a, b, &mut scratch)
            })?;
            let ids: Vec<u32> = kept.iter().map(|c| c.id).collect();
            let _guard = self.lock_links(neighbour)?;
            self.store
                .links(neighbour, layer)
                .ok_or(HnswError::DanglingLevel {
                    node: id,
                    neighbour,
                    level: layer,
                })?
                .set(&ids)?;
        }
        Ok(())
    }

    /// The `ef_construction` members of `pool` closest to `base`, excluding
    /// `base` itself.
    fn nearest_in_pool(&self, base: u32, pool: &BTreeSet<u32>, scratch: &mut Scratch) -> Vec<Candidate> {
        let others = pool.len() - usize::from(pool.contains(&base));
        let keep = self.params.ef_construction().min(others);
        let mut nearest = BinaryHeap::with_capacity(keep + 1);
        for &candidate in pool.iter().filter(|c| **c != base) {
            let distance = self.distance_between(base, candidate, scratch);
            if nearest.len() < keep {
                nearest.push(Candidate::new(candidate, distance));
            } else if nearest.peek().is_some_and(|worst: &Candidate| distance < worst.distance) {
                nearest.pop();
                nearest.push(Candidate::new(candidate, distance));
            }
        }
        nearest.into_vec()
    }
}
