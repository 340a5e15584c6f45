//! Fixed-stride record layout of the node store.
//!
//! Every record is a run of 32-bit words:
//!
//! ```text
//! | link header | maxM0 link slots | vector words (padded) | label lo | label hi |
//! ```
//!
//! Byte offsets reported here are the ones persisted in the image header.

/// Geometry of one node record, fixed at construction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct RecordLayout {
    data_size: usize,
    max_m: usize,
    max_m0: usize,
    vector_words: usize,
}

impl RecordLayout {
    pub(crate) const WORD: usize = 4;

    pub(crate) fn new(data_size: usize, max_m: usize, max_m0: usize) -> Self {
        Self {
            data_size,
            max_m,
            max_m0,
            vector_words: data_size.div_ceil(Self::WORD),
        }
    }

    #[rustfmt::skip]
    pub(crate) fn data_size(&self) -> usize { self.data_size }

    /// Words in the layer-0 link record (header plus `maxM0` slots).
    #[rustfmt::skip]
    pub(crate) fn level0_words(&self) -> usize { 1 + self.max_m0 }

    #[rustfmt::skip]
    pub(crate) fn vector_word(&self) -> usize { self.level0_words() }

    #[rustfmt::skip]
    pub(crate) fn vector_words(&self) -> usize { self.vector_words }

    #[rustfmt::skip]
    pub(crate) fn label_word(&self) -> usize { self.vector_word() + self.vector_words }

    #[rustfmt::skip]
    pub(crate) fn stride_words(&self) -> usize { self.label_word() + 2 }

    /// Words in one upper-level link record (header plus `maxM` slots).
    #[rustfmt::skip]
    pub(crate) fn upper_words(&self) -> usize { 1 + self.max_m }

    #[rustfmt::skip]
    pub(crate) fn level0_offset(&self) -> usize { 0 }

    #[rustfmt::skip]
    pub(crate) fn vector_offset(&self) -> usize { self.vector_word() * Self::WORD }

    #[rustfmt::skip]
    pub(crate) fn label_offset(&self) -> usize { self.label_word() * Self::WORD }

    #[rustfmt::skip]
    pub(crate) fn stride(&self) -> usize { self.stride_words() * Self::WORD }

    /// Bytes of one upper-level link record.
    #[rustfmt::skip]
    pub(crate) fn upper_record_bytes(&self) -> usize { self.upper_words() * Self::WORD }
}
