//! Error types for the navgraph core library.
//!
//! Defines the HNSW error enum exposed by the public API, its stable
//! machine-readable codes, and a convenient result alias.

use std::{fmt, io, sync::Arc};

use thiserror::Error;

macro_rules! define_error_codes {
    (
        $(#[$enum_meta:meta])*
        enum $CodeTy:ident for $ErrTy:ident {
            $(
                $(#[$variant_meta:meta])*
                $CodeVariant:ident => $ErrVariant:ident $( { $($pattern:tt)* } )? => $code:expr
            ),+ $(,)?
        }
    ) => {
        $(#[$enum_meta])*
        #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
        #[non_exhaustive]
        pub enum $CodeTy {
            $(
                $(#[$variant_meta])*
                $CodeVariant,
            )+
        }

        impl $CodeTy {
            /// Return the stable machine-readable representation of this error code.
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$CodeVariant => $code,)+
                }
            }
        }

        impl fmt::Display for $CodeTy {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl $ErrTy {
            #[doc = concat!(
                "Retrieve the stable [`",
                stringify!($CodeTy),
                "`] for this error."
            )]
            pub const fn code(&self) -> $CodeTy {
                match self {
                    $(Self::$ErrVariant $( { $($pattern)* } )? => $CodeTy::$CodeVariant,)+
                }
            }
        }
    };
}

/// Errors produced by the HNSW index.
///
/// Caller-input errors ([`HnswError::CapacityExceeded`],
/// [`HnswError::LabelNotFound`], [`HnswError::InvalidResize`]) leave the index
/// untouched and may be retried. Invariant violations poison the index; see
/// [`HnswErrorCode::is_fatal`].
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum HnswError {
    /// The node store is full; resize the index and retry.
    #[error("index is full: capacity of {capacity} elements exceeded")]
    CapacityExceeded {
        /// Configured maximum number of elements.
        capacity: usize,
    },
    /// A persisted image failed validation while loading.
    #[error("corrupt index image: {reason}")]
    CorruptIndex {
        /// Description of the failed consistency check.
        reason: String,
    },
    /// The requested label is unknown or has been soft-deleted.
    #[error("label {label} not found")]
    LabelNotFound {
        /// External label supplied by the caller.
        label: u64,
    },
    /// Internal graph state broke a structural invariant.
    #[error("HNSW graph invariant violated: {message}")]
    InvariantViolation {
        /// Human-readable description of the broken invariant.
        message: String,
    },
    /// An internal id does not refer to a stored node.
    #[error("node {id} is not stored in the index")]
    NodeNotFound {
        /// Internal identifier supplied by the caller.
        id: u32,
    },
    /// A resize would drop live elements.
    #[error("cannot resize to {requested} elements while {count} are stored")]
    InvalidResize {
        /// Requested capacity.
        requested: usize,
        /// Number of elements currently stored.
        count: usize,
    },
    /// Reserving backing storage failed.
    #[error("failed to allocate {what} ({bytes} bytes)")]
    OutOfMemory {
        /// Storage being allocated.
        what: &'static str,
        /// Number of bytes requested.
        bytes: usize,
    },
    /// Construction parameters were rejected.
    #[error("invalid HNSW parameter: {reason}")]
    InvalidParameters {
        /// Explanation of the rejected value.
        reason: String,
    },
    /// An edge from a node to itself was about to be written.
    #[error("node {node} would link to itself at level {level}")]
    SelfLoop {
        /// Node identifier.
        node: u32,
        /// Level of the attempted edge.
        level: usize,
    },
    /// An edge referenced a level the neighbour does not possess.
    #[error("node {node} references {neighbour} at level {level}, above its top level")]
    DanglingLevel {
        /// Node emitting the edge.
        node: u32,
        /// Neighbour lacking the level.
        neighbour: u32,
        /// Level of the attempted edge.
        level: usize,
    },
    /// A vector's byte length did not match the space.
    #[error("vector has {actual} bytes but the space expects {expected}")]
    VectorSizeMismatch {
        /// Byte size required by the distance space.
        expected: usize,
        /// Byte size supplied by the caller.
        actual: usize,
    },
    /// A mutex guarding index state was poisoned.
    #[error("lock poisoned: {resource}")]
    LockPoisoned {
        /// Name of the protected resource.
        resource: &'static str,
    },
    /// An earlier invariant violation poisoned the index against mutation.
    #[error("index is poisoned by an earlier invariant violation")]
    IndexPoisoned,
    /// Reading or writing a persisted image failed.
    #[error("I/O failure: {source}")]
    Io {
        /// Underlying operating-system error.
        source: Arc<io::Error>,
    },
}

impl From<io::Error> for HnswError {
    fn from(error: io::Error) -> Self {
        Self::Io {
            source: Arc::new(error),
        }
    }
}

define_error_codes! {
    /// Stable codes describing [`HnswError`] variants.
    enum HnswErrorCode for HnswError {
        /// The node store is full.
        CapacityExceeded => CapacityExceeded { .. } => "HNSW_CAPACITY_EXCEEDED",
        /// A persisted image failed validation.
        CorruptIndex => CorruptIndex { .. } => "HNSW_CORRUPT_INDEX",
        /// The requested label is unknown.
        LabelNotFound => LabelNotFound { .. } => "HNSW_LABEL_NOT_FOUND",
        /// A structural invariant was broken.
        InvariantViolation => InvariantViolation { .. } => "HNSW_INVARIANT_VIOLATION",
        /// The internal id is not allocated.
        NodeNotFound => NodeNotFound { .. } => "HNSW_NODE_NOT_FOUND",
        /// A resize would drop live elements.
        InvalidResize => InvalidResize { .. } => "HNSW_INVALID_RESIZE",
        /// Reserving backing storage failed.
        OutOfMemory => OutOfMemory { .. } => "HNSW_OUT_OF_MEMORY",
        /// Construction parameters were rejected.
        InvalidParameters => InvalidParameters { .. } => "HNSW_INVALID_PARAMETERS",
        /// A self-loop was about to be written.
        SelfLoop => SelfLoop { .. } => "HNSW_SELF_LOOP",
        /// An edge referenced a missing level.
        DanglingLevel => DanglingLevel { .. } => "HNSW_DANGLING_LEVEL",
        /// A vector had the wrong byte length.
        VectorSizeMismatch => VectorSizeMismatch { .. } => "HNSW_VECTOR_SIZE_MISMATCH",
        /// A mutex was poisoned.
        LockPoisoned => LockPoisoned { .. } => "HNSW_LOCK_POISONED",
        /// The index refuses mutation after an invariant violation.
        IndexPoisoned => IndexPoisoned => "HNSW_INDEX_POISONED",
        /// Reading or writing a persisted image failed.
        Io => Io { .. } => "HNSW_IO",
    }
}

impl HnswErrorCode {
    /// Reports whether the code signals a logic or resource failure rather
    /// than caller misuse.
    ///
    /// # Examples
    /// ```
    /// use navgraph_core::HnswErrorCode;
    ///
    /// assert!(HnswErrorCode::InvariantViolation.is_fatal());
    /// assert!(!HnswErrorCode::CapacityExceeded.is_fatal());
    /// ```
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(
            self,
            Self::CorruptIndex
                | Self::InvariantViolation
                | Self::OutOfMemory
                | Self::SelfLoop
                | Self::DanglingLevel
                | Self::IndexPoisoned
        )
    }
}

/// Convenient alias for results returned by the index.
pub type Result<T> = core::result::Result<T, HnswError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::capacity(HnswError::CapacityExceeded { capacity: 4 }, "HNSW_CAPACITY_EXCEEDED", false)]
    #[case::corrupt(HnswError::CorruptIndex { reason: "short".into() }, "HNSW_CORRUPT_INDEX", true)]
    #[case::label(HnswError::LabelNotFound { label: 3 }, "HNSW_LABEL_NOT_FOUND", false)]
    #[case::node(HnswError::NodeNotFound { id: 3 }, "HNSW_NODE_NOT_FOUND", false)]
    #[case::self_loop(HnswError::SelfLoop { node: 1, level: 0 }, "HNSW_SELF_LOOP", true)]
    #[case::poisoned(HnswError::IndexPoisoned, "HNSW_INDEX_POISONED", true)]
    fn codes_are_stable(#[case] error: HnswError, #[case] code: &str, #[case] fatal: bool) {
        assert_eq!(error.code().as_str(), code);
        assert_eq!(error.code().is_fatal(), fatal);
    }

    #[test]
    fn io_errors_keep_their_source() {
        let error = HnswError::from(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"));
        assert_eq!(error.code(), HnswErrorCode::Io);
        assert!(error.to_string().contains("eof"));
    }
}
