//! Insertion: level sampling, descent, per-level connection and back-edge
//! maintenance.

use std::{collections::BinaryHeap, sync::atomic::Ordering};

use dashmap::mapref::entry::Entry;
use rayon::prelude::*;
use tracing::{debug, instrument};

use crate::{
    error::{HnswError, Result},
    space::Space,
};

use super::{
    index::{Hnsw, InsertOptions, MAX_LEVEL, NO_ENTRY, Scratch, missing_level},
    params::PruningMode,
    search::Expansion,
    select::select_neighbours,
    types::Candidate,
};

/// Identifies the node being connected at one level.
#[derive(Clone, Copy, Debug)]
pub(super) struct ConnectContext<'q> {
    pub(super) vector: &'q [u8],
    pub(super) id: u32,
    pub(super) level: usize,
    pub(super) is_update: bool,
}

impl<S: Space> Hnsw<S> {
    /// Inserts `vector` under `label` and returns its internal id.
    ///
    /// Re-inserting a known label overwrites that node's vector in place and
    /// repairs its neighbourhood instead of creating a node.
    ///
    /// # Errors
    /// Returns [`HnswError::CapacityExceeded`] when the index is full,
    /// [`HnswError::VectorSizeMismatch`] for malformed vectors and
    /// [`HnswError::IndexPoisoned`] after a fatal failure. Invariant
    /// breaches poison the index.
    pub fn insert(&self, label: u64, vector: &[u8]) -> Result<u32> {
        self.insert_with(label, vector, InsertOptions::default())
    }

    /// Inserts with explicit [`InsertOptions`].
    ///
    /// # Errors
    /// Returns [`HnswError::InvalidParameters`] for a forced level above
    /// [`MAX_LEVEL`], plus the errors of [`Hnsw::insert`].
    #[instrument(level = "debug", skip(self, vector), fields(level = options.level))]
    pub fn insert_with(&self, label: u64, vector: &[u8], options: InsertOptions) -> Result<u32> {
        self.ensure_healthy()?;
        self.check_vector(vector)?;
        if let Some(level) = options.level.filter(|level| *level > MAX_LEVEL) {
            return Err(HnswError::InvalidParameters {
                reason: format!("level {level} exceeds the maximum of {MAX_LEVEL}"),
            });
        }
        let result = self.insert_or_update(label, vector, options);
        self.guard_fatal(result)
    }

    /// Inserts every `(label, vector)` pair from Rayon workers, returning the
    /// internal ids in input order.
    ///
    /// # Errors
    /// Stops at the first failing insertion and returns its error.
    pub fn insert_batch<V>(&self, items: &[(u64, V)]) -> Result<Vec<u32>>
    where
        V: AsRef<[u8]> + Sync,
    {
        items
            .par_iter()
            .map(|(label, vector)| self.insert(*label, vector.as_ref()))
            .collect()
    }

    fn insert_or_update(&self, label: u64, vector: &[u8], options: InsertOptions) -> Result<u32> {
        let (id, _update_guard) = match self.labels.entry(label) {
            Entry::Occupied(existing) => {
                let id = *existing.get();
                drop(existing);
                let _guard = self.lock_update(id)?;
                self.update_locked(id, vector, 1.0)?;
                return Ok(id);
            }
            Entry::Vacant(slot) => {
                let id = self.store.allocate()?;
                let guard = self.lock_update(id)?;
                slot.insert(id);
                (id, guard)
            }
        };
        let level = match options.level {
            Some(level) => level,
            None => self.sample_level()?,
        };
        tracing::Span::current().record("level", level);

        let global = self.lock_global()?;
        let max_level = self.max_level.load(Ordering::Acquire);
        let promotes = i64::try_from(level).map_or(true, |level| level > i64::from(max_level));
        let global = promotes.then_some(global);
        let entry = self.entry_point.load(Ordering::Acquire);

        self.store.init_node(id, label, vector, level)?;

        if entry == NO_ENTRY {
            self.promote(id, level);
            drop(global);
            return Ok(id);
        }
        let top = usize::try_from(max_level).map_err(|_| HnswError::InvariantViolation {
            message: format!("entry point {entry} set while max level is {max_level}"),
        })?;
        self.link_from(ConnectContext { vector, id, level, is_update: false }, entry, top)?;

        if global.is_some() {
            self.promote(id, level);
        }
        Ok(id)
    }

    fn promote(&self, id: u32, level: usize) {
        self.entry_point.store(id, Ordering::Release);
        self.max_level
            .store(i32::try_from(level).unwrap_or(i32::MAX), Ordering::Release);
        debug!(id, level, "node became the entry point");
    }

    /// Descends from `entry` (at level `top`) and connects `ctx.id` at every
    /// level from `min(ctx.level, top)` down to 0.
    pub(super) fn link_from(&self, ctx: ConnectContext<'_>, entry: u32, top: usize) -> Result<()> {
        let mut buf = Vec::with_capacity(self.space.data_size());
        let mut current = Candidate::new(entry, self.distance_to(ctx.vector, entry, &mut buf));
        if ctx.level < top {
            current = self.greedy_descend(ctx.vector, current, top, ctx.level)?;
        }
        let entry_deleted = self.store.is_deleted(entry);
        let ef = self.params.ef_construction();
        for level in (0..=ctx.level.min(top)).rev() {
            let mut pool = self.search_layer(ctx.vector, &[current], level, ef, Expansion::Construction)?;
            if ctx.is_update {
                pool = pool.into_iter().filter(|c| c.id != ctx.id).collect();
                if pool.is_empty() {
                    continue;
                }
            } else if pool.is_empty() {
                // Every reachable node is deleted; keep the landing node.
                pool.push(current);
            }
            if entry_deleted && entry != ctx.id {
                pool.push(Candidate::new(entry, self.distance_to(ctx.vector, entry, &mut buf)));
                while pool.len() > ef {
                    pool.pop();
                }
            }
            let next = self.connect(ConnectContext { level, ..ctx }, pool)?;
            current = Candidate::new(next, self.distance_to(ctx.vector, next, &mut buf));
        }
        Ok(())
    }

    /// Prunes `pool` into the node's adjacency at `ctx.level` and writes the
    /// matching back-edges. Returns the nearest selected neighbour, the entry
    /// for the next level down.
    pub(super) fn connect(&self, ctx: ConnectContext<'_>, pool: BinaryHeap<Candidate>) -> Result<u32> {
        let m = self.params.m();
        let mode = self.pruning_for(ctx.level);
        let mut scratch = Scratch::default();
        let mut selected = pool.into_vec();
        if !ctx.is_update {
            self.merge_early_back_edges(ctx, &mut selected)?;
        }
        select_neighbours(&mut selected, m, mode, |a, b| {
            self.distance_between(a, b, &mut scratch)
        })?;
        let nearest = selected.first().map(|c| c.id).ok_or_else(|| HnswError::InvariantViolation {
            message: format!("no neighbours selected for node {} at level {}", ctx.id, ctx.level),
        })?;

        let ids: Vec<u32> = selected.iter().map(|c| c.id).collect();
        for &neighbour in &ids {
            if neighbour == ctx.id {
                return Err(HnswError::SelfLoop { node: ctx.id, level: ctx.level });
            }
            if self.store.level(neighbour) < ctx.level {
                return Err(HnswError::DanglingLevel {
                    node: ctx.id,
                    neighbour,
                    level: ctx.level,
                });
            }
        }

        {
            let _guard = self.lock_links(ctx.id)?;
            self.store
                .links(ctx.id, ctx.level)
                .ok_or_else(|| missing_level(ctx.id, ctx.level))?
                .set(&ids)?;
        }

        for &neighbour in &ids {
            self.add_back_edge(ctx, neighbour, mode, &mut scratch)?;
        }
        Ok(nearest)
    }

    /// A concurrent insertion that landed on this node during its descent
    /// may already have linked to it; keep those edges as candidates.
    fn merge_early_back_edges(&self, ctx: ConnectContext<'_>, selected: &mut Vec<Candidate>) -> Result<()> {
        let mut early = Vec::new();
        self.locked_links(ctx.id, ctx.level, &mut early)?;
        let mut buf = Vec::with_capacity(self.space.data_size());
        for id in early {
            if id != ctx.id && !selected.iter().any(|c| c.id == id) {
                selected.push(Candidate::new(id, self.distance_to(ctx.vector, id, &mut buf)));
            }
        }
        Ok(())
    }

    fn add_back_edge(
        &self,
        ctx: ConnectContext<'_>,
        neighbour: u32,
        mode: PruningMode,
        scratch: &mut Scratch,
    ) -> Result<()> {
        let _guard = self.lock_links(neighbour)?;
        let links = self
            .store
            .links(neighbour, ctx.level)
            .ok_or(HnswError::DanglingLevel {
                node: ctx.id,
                neighbour,
                level: ctx.level,
            })?;
        if links.contains(ctx.id) {
            return Ok(());
        }
        if links.push(ctx.id) {
            return Ok(());
        }

        let mut base = Vec::with_capacity(self.space.data_size());
        self.store.read_vector(neighbour, &mut base);
        let mut candidates = Vec::with_capacity(links.len() + 1);
        candidates.push(Candidate::new(ctx.id, self.space.distance(&base, ctx.vector)));
        let mut buf = Vec::with_capacity(self.space.data_size());
        for slot in 0..links.len() {
            let existing = links.get(slot);
            candidates.push(Candidate::new(existing, self.distance_to(&base, existing, &mut buf)));
        }
        select_neighbours(&mut candidates, links.capacity(), mode, |a, b| {
            self.distance_between(a, b, scratch)
        })?;
        let kept: Vec<u32> = candidates.iter().map(|c| c.id).collect();
        links.set(&kept)?;
        debug!(node = neighbour, level = ctx.level, kept = kept.len(), "re-pruned full neighbour list");
        Ok(())
    }

    /// Layer 0 honours the configured policy; upper layers always use the
    /// relative-neighbourhood heuristic.
    pub(super) fn pruning_for(&self, level: usize) -> PruningMode {
        if level == 0 {
            self.params.pruning()
        } else {
            PruningMode::Heuristic
        }
    }
}
