//! Navgraph core library: an in-memory approximate nearest-neighbour index
//! built on a hierarchical navigable small-world graph.
#![cfg_attr(docsrs, feature(doc_cfg))]

mod error;
pub mod hnsw;
mod space;

#[cfg(test)]
pub(crate) mod test_utils;

pub use crate::{
    error::{HnswError, HnswErrorCode, Result},
    hnsw::{
        EntryStrategy, Hnsw, HnswInvariant, HnswInvariantChecker, HnswInvariantViolation,
        HnswParams, InsertOptions, Neighbour, PruningMode,
    },
    space::{InnerProductSpace, L2Space, Space, decode_f32, encode_f32},
};
