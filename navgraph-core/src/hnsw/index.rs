//! The concurrent HNSW index and its shared state.
//!
//! Locking discipline, outermost first: the label shard of a label being
//! inserted for the first time, the hashed update lock of the node being
//! inserted or updated, the global entry-point lock (held past the level
//! check only by inserts that raise the top level), then per-node link
//! locks. Link locks are never held two at a time, and no thread touches a
//! label shard while holding an update lock.

use std::sync::{
    Mutex, MutexGuard,
    atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicUsize, Ordering},
};

use dashmap::DashMap;
use rand::{SeedableRng, rngs::SmallRng};
use tracing::{error, info, instrument};

use crate::{
    error::{HnswError, Result},
    space::Space,
};

use super::{
    invariants::HnswInvariantChecker,
    params::HnswParams,
    store::{NodeStore, RecordLayout, try_filled},
    visited::VisitedPool,
};

/// Sentinel stored in the entry-point slot of an empty index.
pub(crate) const NO_ENTRY: u32 = u32::MAX;

/// Highest level a node may be given through [`InsertOptions::at_level`].
pub const MAX_LEVEL: usize = 255;

/// Options accepted by [`Hnsw::insert_with`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct InsertOptions {
    /// Forces the level of a new node instead of sampling it.
    pub level: Option<usize>,
}

impl InsertOptions {
    /// Inserts a new node at exactly `level`, which must not exceed
    /// [`MAX_LEVEL`].
    #[must_use]
    pub const fn at_level(level: usize) -> Self {
        Self { level: Some(level) }
    }
}

/// Hierarchical navigable small-world index over vectors of one [`Space`].
///
/// Insertion, update, deletion marks and search may run concurrently from
/// many threads; [`Hnsw::resize`] requires exclusive access.
///
/// # Examples
/// ```
/// use navgraph_core::{Hnsw, HnswParams, L2Space};
///
/// let params = HnswParams::new(16, 4, 32).expect("params must be valid");
/// let index = Hnsw::new(L2Space::new(2), params).expect("index");
/// index.insert(7, &L2Space::encode(&[1.0, 2.0])).expect("insert");
/// index.insert(9, &L2Space::encode(&[5.0, 5.0])).expect("insert");
///
/// let hits = index.search(&L2Space::encode(&[1.0, 2.0]), 1).expect("search");
/// assert_eq!(hits[0].label, 7);
/// assert_eq!(hits[0].distance, 0.0);
/// ```
#[derive(Debug)]
pub struct Hnsw<S: Space> {
    pub(super) space: S,
    pub(super) params: HnswParams,
    pub(super) store: NodeStore,
    pub(super) labels: DashMap<u64, u32>,
    pub(super) link_locks: Box<[Mutex<()>]>,
    pub(super) update_locks: Box<[Mutex<()>]>,
    pub(super) global: Mutex<()>,
    pub(super) entry_point: AtomicU32,
    pub(super) max_level: AtomicI32,
    pub(super) ef: AtomicUsize,
    pub(super) visited: VisitedPool,
    pub(super) level_rng: Mutex<SmallRng>,
    pub(super) update_rng: Mutex<SmallRng>,
    pub(super) has_deletions: AtomicBool,
    pub(super) deleted: AtomicUsize,
    poisoned: AtomicBool,
}

impl<S: Space> Hnsw<S> {
    /// Creates an empty index sized for `params.max_elements()` vectors.
    ///
    /// # Errors
    /// Returns [`HnswError::InvalidParameters`] for rejected parameters or a
    /// zero-sized space, and [`HnswError::OutOfMemory`] when the node store
    /// cannot be reserved.
    pub fn new(space: S, params: HnswParams) -> Result<Self> {
        if space.data_size() == 0 {
            return Err(HnswError::InvalidParameters {
                reason: format!("space `{}` has a zero-byte vector size", space.name()),
            });
        }
        let layout = RecordLayout::new(space.data_size(), params.max_m(), params.max_m0());
        let store = NodeStore::with_capacity(layout, params.max_elements())?;
        Self::with_store(space, params, store)
    }

    pub(super) fn with_store(space: S, params: HnswParams, store: NodeStore) -> Result<Self> {
        params.validate()?;
        let capacity = store.capacity();
        let seed = params.rng_seed();
        Ok(Self {
            link_locks: try_filled(capacity, "link locks", Mutex::default)?,
            update_locks: try_filled(params.update_lock_count(), "update locks", Mutex::default)?,
            global: Mutex::new(()),
            entry_point: AtomicU32::new(NO_ENTRY),
            max_level: AtomicI32::new(-1),
            ef: AtomicUsize::new(params.ef()),
            visited: VisitedPool::new(capacity, params.visited_pool_limit())?,
            level_rng: Mutex::new(SmallRng::seed_from_u64(seed)),
            update_rng: Mutex::new(SmallRng::seed_from_u64(seed.wrapping_add(1))),
            labels: DashMap::new(),
            has_deletions: AtomicBool::new(false),
            deleted: AtomicUsize::new(0),
            poisoned: AtomicBool::new(false),
            space,
            params,
            store,
        })
    }

    /// Returns the number of stored vectors, including soft-deleted ones.
    #[must_use]
    #[rustfmt::skip]
    pub fn len(&self) -> usize { self.store.len() }

    /// Returns whether the index stores no vectors.
    #[must_use]
    #[rustfmt::skip]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Returns the maximum number of vectors the index can hold.
    #[must_use]
    #[rustfmt::skip]
    pub fn capacity(&self) -> usize { self.store.capacity() }

    /// Returns the number of soft-deleted vectors.
    #[must_use]
    #[rustfmt::skip]
    pub fn deleted_count(&self) -> usize { self.deleted.load(Ordering::Acquire) }

    /// Returns the parameters the index was built with.
    #[must_use]
    #[rustfmt::skip]
    pub fn params(&self) -> &HnswParams { &self.params }

    /// Returns the distance space.
    #[must_use]
    #[rustfmt::skip]
    pub fn space(&self) -> &S { &self.space }

    /// Returns the current query search width.
    #[must_use]
    #[rustfmt::skip]
    pub fn ef(&self) -> usize { self.ef.load(Ordering::Relaxed) }

    /// Changes the query search width. Zero is raised to one.
    pub fn set_ef(&self, ef: usize) {
        self.ef.store(ef.max(1), Ordering::Relaxed);
    }

    /// Returns the internal id of the entry point, if any.
    #[must_use]
    pub fn entry_point(&self) -> Option<u32> {
        let entry = self.entry_point.load(Ordering::Acquire);
        (entry != NO_ENTRY).then_some(entry)
    }

    /// Returns the highest level present in the graph, if any.
    #[must_use]
    pub fn max_level(&self) -> Option<usize> {
        usize::try_from(self.max_level.load(Ordering::Acquire)).ok()
    }

    /// Returns the level assigned to internal id `id`.
    #[must_use]
    pub fn level_of(&self, id: u32) -> Option<usize> {
        ((id as usize) < self.len()).then(|| self.store.level(id))
    }

    /// Returns the label stored for internal id `id`.
    #[must_use]
    pub fn label_of(&self, id: u32) -> Option<u64> {
        ((id as usize) < self.len()).then(|| self.store.label(id))
    }

    /// Returns the internal id of `label`, deleted or not.
    #[must_use]
    pub fn id_of(&self, label: u64) -> Option<u32> {
        self.labels.get(&label).map(|entry| *entry)
    }

    /// Returns whether `label` is stored and not soft-deleted.
    #[must_use]
    pub fn contains(&self, label: u64) -> bool {
        self.id_of(label).is_some_and(|id| !self.store.is_deleted(id))
    }

    /// Returns the layer-`level` neighbours of internal id `id`.
    #[must_use]
    pub fn neighbours(&self, id: u32, level: usize) -> Option<Vec<u32>> {
        if id as usize >= self.len() {
            return None;
        }
        self.store.links(id, level).map(|links| links.to_vec())
    }

    /// Returns a copy of the vector stored under `label`.
    ///
    /// # Errors
    /// Returns [`HnswError::LabelNotFound`] when the label is unknown or
    /// soft-deleted.
    pub fn vector_by_label(&self, label: u64) -> Result<Vec<u8>> {
        let id = self.live_id(label)?;
        let mut vector = Vec::with_capacity(self.space.data_size());
        self.store.read_vector(id, &mut vector);
        Ok(vector)
    }

    /// Soft-deletes `label`: it stays in the graph for navigation but is no
    /// longer returned by searches. Deleting twice is a no-op.
    ///
    /// # Errors
    /// Returns [`HnswError::LabelNotFound`] for unknown labels and
    /// [`HnswError::IndexPoisoned`] after a fatal failure.
    #[instrument(level = "debug", skip(self))]
    pub fn mark_deleted(&self, label: u64) -> Result<()> {
        self.ensure_healthy()?;
        let id = self.id_of(label).ok_or(HnswError::LabelNotFound { label })?;
        if self.store.mark_deleted(id) {
            self.deleted.fetch_add(1, Ordering::AcqRel);
            self.has_deletions.store(true, Ordering::Release);
        }
        Ok(())
    }

    /// Clears the soft-delete mark of `label`.
    ///
    /// # Errors
    /// Returns [`HnswError::LabelNotFound`] for unknown labels and
    /// [`HnswError::IndexPoisoned`] after a fatal failure.
    #[instrument(level = "debug", skip(self))]
    pub fn unmark_deleted(&self, label: u64) -> Result<()> {
        self.ensure_healthy()?;
        let id = self.id_of(label).ok_or(HnswError::LabelNotFound { label })?;
        if self.store.unmark_deleted(id) {
            self.deleted.fetch_sub(1, Ordering::AcqRel);
        }
        Ok(())
    }

    /// Grows the index to hold `new_capacity` vectors.
    ///
    /// # Errors
    /// Returns [`HnswError::InvalidResize`] when `new_capacity` is below the
    /// stored count and [`HnswError::OutOfMemory`] when the new storage
    /// cannot be reserved.
    #[instrument(level = "debug", skip(self))]
    pub fn resize(&mut self, new_capacity: usize) -> Result<()> {
        self.ensure_healthy()?;
        let count = self.len();
        if new_capacity < count {
            return Err(HnswError::InvalidResize {
                requested: new_capacity,
                count,
            });
        }
        let link_locks = try_filled(new_capacity, "link locks", Mutex::default)?;
        let visited = VisitedPool::new(new_capacity, self.params.visited_pool_limit())?;
        self.store.resize(new_capacity)?;
        self.link_locks = link_locks;
        self.visited = visited;
        self.params.set_max_elements(new_capacity);
        info!(new_capacity, count, "resized index");
        Ok(())
    }

    /// Returns a handle for checking structural invariants.
    ///
    /// Checks read the graph without locks and should run while no mutation
    /// is in flight.
    #[must_use]
    pub fn invariants(&self) -> HnswInvariantChecker<'_, S> {
        HnswInvariantChecker::new(self)
    }

    /// Returns whether a fatal failure has poisoned the index.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    pub(super) fn ensure_healthy(&self) -> Result<()> {
        if self.is_poisoned() {
            return Err(HnswError::IndexPoisoned);
        }
        Ok(())
    }

    /// Poisons the index when `result` carries a fatal error.
    pub(super) fn guard_fatal<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.code().is_fatal() && !self.poisoned.swap(true, Ordering::AcqRel) {
                error!(code = %err.code(), error = %err, "poisoning index after fatal failure");
            }
        }
        result
    }

    pub(super) fn check_vector(&self, vector: &[u8]) -> Result<()> {
        let expected = self.space.data_size();
        if vector.len() != expected {
            return Err(HnswError::VectorSizeMismatch {
                expected,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    /// An allocated id is published once its stored label maps back to it.
    pub(super) fn is_published(&self, id: u32) -> bool {
        self.id_of(self.store.label(id)) == Some(id)
    }

    pub(super) fn live_id(&self, label: u64) -> Result<u32> {
        self.id_of(label)
            .filter(|id| !self.store.is_deleted(*id))
            .ok_or(HnswError::LabelNotFound { label })
    }

    pub(super) fn lock_links(&self, id: u32) -> Result<MutexGuard<'_, ()>> {
        lock(&self.link_locks[id as usize], "node link lock")
    }

    pub(super) fn lock_update(&self, id: u32) -> Result<MutexGuard<'_, ()>> {
        let mask = self.update_locks.len() - 1;
        lock(&self.update_locks[id as usize & mask], "update lock")
    }

    pub(super) fn lock_global(&self) -> Result<MutexGuard<'_, ()>> {
        lock(&self.global, "global entry-point lock")
    }

    /// Distance from `query` to stored node `id`, using `buf` as scratch.
    pub(super) fn distance_to(&self, query: &[u8], id: u32, buf: &mut Vec<u8>) -> f32 {
        self.store.read_vector(id, buf);
        self.space.distance(query, buf)
    }

    /// Distance between two stored nodes.
    pub(super) fn distance_between(&self, left: u32, right: u32, scratch: &mut Scratch) -> f32 {
        self.store.read_vector(left, &mut scratch.left);
        self.store.read_vector(right, &mut scratch.right);
        self.space.distance(&scratch.left, &scratch.right)
    }

    /// Snapshot of `id`'s links at `level`, taken under the node's lock.
    pub(super) fn locked_links(&self, id: u32, level: usize, out: &mut Vec<u32>) -> Result<()> {
        let _guard = self.lock_links(id)?;
        let links = self.store.links(id, level).ok_or_else(|| missing_level(id, level))?;
        links.snapshot_into(out);
        Ok(())
    }

    /// Validates a neighbour id read from a link record.
    pub(super) fn check_link_target(&self, from: u32, target: u32, level: usize) -> Result<()> {
        if target as usize >= self.len() {
            return Err(HnswError::InvariantViolation {
                message: format!("node {from} links to unallocated node {target} at level {level}"),
            });
        }
        Ok(())
    }
}

/// Reusable vector buffers for pairwise distances.
#[derive(Debug, Default)]
pub(super) struct Scratch {
    left: Vec<u8>,
    right: Vec<u8>,
}

pub(super) fn lock<'a>(mutex: &'a Mutex<()>, resource: &'static str) -> Result<MutexGuard<'a, ()>> {
    mutex.lock().map_err(|_| HnswError::LockPoisoned { resource })
}

pub(super) fn missing_level(id: u32, level: usize) -> HnswError {
    HnswError::InvariantViolation {
        message: format!("node {id} has no links at level {level}"),
    }
}
