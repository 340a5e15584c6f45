//! Structural invariant checks for the HNSW graph.
//!
//! The checkers are surfaced via [`Hnsw::invariants`] so tests and operators
//! can assert graph health after mutation without reimplementing traversal.
//! Checks read the graph without taking locks; run them while no mutation
//! is in flight.

mod degree_bounds;
mod entry_point;
mod helpers;
mod layer_consistency;
mod reachability;
mod uniqueness;

use std::{fmt, ops::Range};

use thiserror::Error;

use crate::space::Space;

use super::{index::Hnsw, store::NodeStore};

use self::{
    degree_bounds::check_degree_bounds, entry_point::check_entry_point,
    layer_consistency::check_layer_consistency, reachability::check_reachability,
    uniqueness::check_neighbour_uniqueness,
};

/// Enumerates the structural invariants of the graph.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HnswInvariant {
    /// Every edge targets a stored node that owns the edge's level.
    LayerConsistency,
    /// Lists hold at most `maxM0` entries at level 0 and `maxM` above.
    DegreeBounds,
    /// No list holds a self-loop or the same neighbour twice.
    NeighbourUniqueness,
    /// The entry point exists and sits at the maximum level.
    EntryPoint,
    /// Every stored node is reachable from the entry point.
    Reachability,
}

impl HnswInvariant {
    /// Returns all invariants in the order they should be evaluated.
    #[must_use]
    pub const fn all() -> [Self; 5] {
        [
            Self::LayerConsistency,
            Self::DegreeBounds,
            Self::NeighbourUniqueness,
            Self::EntryPoint,
            Self::Reachability,
        ]
    }

    /// Returns the invariants that hold after any sequence of operations.
    ///
    /// Overflow pruning may evict the only edge into a node, so
    /// [`HnswInvariant::Reachability`] is guaranteed only for graphs small
    /// enough that no list ever overflowed.
    #[must_use]
    pub const fn structural() -> [Self; 4] {
        [
            Self::LayerConsistency,
            Self::DegreeBounds,
            Self::NeighbourUniqueness,
            Self::EntryPoint,
        ]
    }
}

/// Reason describing why a layer-consistency check failed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LayerConsistencyDetail {
    /// The referenced id is not a stored node.
    MissingNode,
    /// The referenced node exists but exposes fewer levels than required.
    MissingLayer {
        /// Number of levels the target owns.
        available: usize,
    },
}

impl fmt::Display for LayerConsistencyDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingNode => f.write_str("target node is missing"),
            Self::MissingLayer { available } => {
                write!(f, "target node exposes only {available} level(s)")
            }
        }
    }
}

/// Reports an invariant violation surfaced by [`HnswInvariantChecker`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum HnswInvariantViolation {
    /// A node references a neighbour at a level the neighbour does not expose.
    #[error("node {origin} references {target} at layer {layer}, but {detail}")]
    LayerConsistency {
        /// Node that emitted the invalid reference.
        origin: u32,
        /// Referenced neighbour identifier.
        target: u32,
        /// Layer index of the reference.
        layer: usize,
        /// Detailed failure reason.
        detail: LayerConsistencyDetail,
    },
    /// A node exceeded the degree bound of a layer.
    #[error("node {node} has {degree} connection(s) on layer {layer}, exceeding limit {limit}")]
    DegreeBounds {
        /// Node whose adjacency exceeded the allowed bound.
        node: u32,
        /// Layer containing the overflow.
        layer: usize,
        /// Declared neighbour count.
        degree: usize,
        /// Maximum permitted neighbours for the layer.
        limit: usize,
    },
    /// A node lists itself as a neighbour.
    #[error("node {node} links to itself on layer {layer}")]
    SelfLoop {
        /// Offending node.
        node: u32,
        /// Layer containing the loop.
        layer: usize,
    },
    /// A node lists the same neighbour more than once.
    #[error("node {node} lists {neighbour} more than once on layer {layer}")]
    DuplicateNeighbour {
        /// Node owning the list.
        node: u32,
        /// Repeated neighbour.
        neighbour: u32,
        /// Layer containing the duplicate.
        layer: usize,
    },
    /// Reported when a populated graph lacks an entry point.
    #[error("graph entry point missing despite populated nodes")]
    MissingEntryPoint,
    /// The entry point disagrees with the stored levels.
    #[error("entry point invalid: {reason}")]
    EntryPointMismatch {
        /// Description of the disagreement.
        reason: String,
    },
    /// A node cannot be reached from the entry point using any layer.
    #[error("node {node} is unreachable from the entry point")]
    UnreachableNode {
        /// Identifier of the unreachable node.
        node: u32,
    },
}

/// Helper returned by [`Hnsw::invariants`] to run structural checks.
#[derive(Debug)]
pub struct HnswInvariantChecker<'index, S: Space> {
    index: &'index Hnsw<S>,
}

impl<'index, S: Space> HnswInvariantChecker<'index, S> {
    pub(super) fn new(index: &'index Hnsw<S>) -> Self {
        Self { index }
    }

    /// Runs all invariants, returning the first violation encountered.
    ///
    /// # Errors
    /// Returns the first [`HnswInvariantViolation`] found.
    pub fn check_all(&self) -> Result<(), HnswInvariantViolation> {
        self.check_many(HnswInvariant::all())
    }

    /// Runs a custom subset of invariants in the provided order.
    ///
    /// # Errors
    /// Returns the first [`HnswInvariantViolation`] found.
    pub fn check_many(
        &self,
        invariants: impl IntoIterator<Item = HnswInvariant>,
    ) -> Result<(), HnswInvariantViolation> {
        self.run_with_mode(invariants, EvaluationMode::FailFast)
    }

    /// Runs a single invariant.
    ///
    /// # Errors
    /// Returns the first [`HnswInvariantViolation`] found.
    pub fn check(&self, invariant: HnswInvariant) -> Result<(), HnswInvariantViolation> {
        self.check_many([invariant])
    }

    /// Executes every invariant and returns the full set of violations.
    #[must_use]
    pub fn collect_all(&self) -> Vec<HnswInvariantViolation> {
        self.collect_many(HnswInvariant::all())
    }

    /// Executes the selected invariants and returns every violation discovered.
    #[must_use]
    pub fn collect_many(
        &self,
        invariants: impl IntoIterator<Item = HnswInvariant>,
    ) -> Vec<HnswInvariantViolation> {
        let mut violations = Vec::new();
        let _ = self.run_with_mode(invariants, EvaluationMode::Collect(&mut violations));
        violations
    }

    fn run_with_mode(
        &self,
        invariants: impl IntoIterator<Item = HnswInvariant>,
        mut mode: EvaluationMode<'_>,
    ) -> Result<(), HnswInvariantViolation> {
        let ctx = GraphContext::of(self.index);
        for invariant in invariants {
            dispatch(ctx, invariant, &mut mode)?;
        }
        Ok(())
    }
}

fn dispatch(
    ctx: GraphContext<'_>,
    invariant: HnswInvariant,
    mode: &mut EvaluationMode<'_>,
) -> Result<(), HnswInvariantViolation> {
    match invariant {
        HnswInvariant::LayerConsistency => check_layer_consistency(ctx, mode),
        HnswInvariant::DegreeBounds => check_degree_bounds(ctx, mode),
        HnswInvariant::NeighbourUniqueness => check_neighbour_uniqueness(ctx, mode),
        HnswInvariant::EntryPoint => check_entry_point(ctx, mode),
        HnswInvariant::Reachability => check_reachability(ctx, mode),
    }
}

#[derive(Clone, Copy, Debug)]
pub(super) struct GraphContext<'a> {
    store: &'a NodeStore,
    count: usize,
    entry: Option<u32>,
    max_level: Option<usize>,
    max_m: usize,
    max_m0: usize,
}

impl<'a> GraphContext<'a> {
    fn of<S: Space>(index: &'a Hnsw<S>) -> Self {
        Self {
            store: &index.store,
            count: index.len(),
            entry: index.entry_point(),
            max_level: index.max_level(),
            max_m: index.params.max_m(),
            max_m0: index.params.max_m0(),
        }
    }

    fn node_ids(&self) -> Range<u32> {
        0..self.count as u32
    }
}

pub(super) enum EvaluationMode<'a> {
    FailFast,
    Collect(&'a mut Vec<HnswInvariantViolation>),
}

impl EvaluationMode<'_> {
    fn record(&mut self, violation: HnswInvariantViolation) -> Result<(), HnswInvariantViolation> {
        match self {
            Self::FailFast => Err(violation),
            Self::Collect(sink) => {
                sink.push(violation);
                Ok(())
            }
        }
    }
}
