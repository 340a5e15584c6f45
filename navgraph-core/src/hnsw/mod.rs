//! Concurrent Hierarchical Navigable Small World (HNSW) index.
//!
//! Nodes live in a fixed-stride record store addressed by internal id.
//! Insertion, update and search run concurrently from any number of threads
//! under per-node link locks, a hashed table of update locks and a single
//! global lock taken only while a new node may become the entry point.

mod index;
mod insert;
mod invariants;
mod params;
mod persist;
mod rng;
mod search;
mod select;
mod store;
mod types;
mod update;
mod visited;

pub use self::{
    index::{Hnsw, InsertOptions, MAX_LEVEL},
    invariants::{
        HnswInvariant, HnswInvariantChecker, HnswInvariantViolation, LayerConsistencyDetail,
    },
    params::{
        DEFAULT_EF, DEFAULT_EF_CONSTRUCTION, DEFAULT_M, DEFAULT_RNG_SEED, DEFAULT_UPDATE_LOCKS,
        DEFAULT_VISITED_POOL_LIMIT, EntryStrategy, HnswParams, PruningMode,
    },
    types::Neighbour,
};

#[cfg(test)]
mod tests;
