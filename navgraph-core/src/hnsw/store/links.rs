//! Adjacency records shared by every level.
//!
//! A record is a header word followed by a fixed number of neighbour slots.
//! The header packs the neighbour count into its low half and, at layer 0,
//! the node's soft-delete flag into bit 16.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::HnswError;

/// Decoded link-record header.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct LinkHeader {
    count: u16,
    deleted: bool,
}

impl LinkHeader {
    /// Largest neighbour count a record may hold.
    pub(crate) const MAX_COUNT: usize = 0x7FFF;
    const COUNT_MASK: u32 = 0xFFFF;
    const DELETED_BIT: u32 = 1 << 16;

    pub(crate) const fn from_word(word: u32) -> Self {
        Self {
            count: (word & Self::COUNT_MASK) as u16,
            deleted: word & Self::DELETED_BIT != 0,
        }
    }

    #[cfg(test)]
    pub(crate) const fn to_word(self) -> u32 {
        let flag = if self.deleted { Self::DELETED_BIT } else { 0 };
        self.count as u32 | flag
    }

    #[rustfmt::skip]
    pub(crate) const fn count(self) -> usize { self.count as usize }

    #[rustfmt::skip]
    pub(crate) const fn deleted(self) -> bool { self.deleted }
}

/// Borrowed view over one adjacency record.
///
/// Writers must hold the owning node's link lock; the view itself performs
/// no locking.
#[derive(Clone, Copy, Debug)]
pub(crate) struct LinkList<'a> {
    words: &'a [AtomicU32],
}

impl<'a> LinkList<'a> {
    pub(crate) fn new(words: &'a [AtomicU32]) -> Self {
        debug_assert!(!words.is_empty(), "link record needs a header word");
        Self { words }
    }

    pub(crate) fn header(&self) -> LinkHeader {
        LinkHeader::from_word(self.words[0].load(Ordering::Acquire))
    }

    /// Neighbour count, clamped to the record capacity.
    pub(crate) fn len(&self) -> usize {
        self.header().count().min(self.capacity())
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn capacity(&self) -> usize {
        self.words.len() - 1
    }

    pub(crate) fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    pub(crate) fn get(&self, slot: usize) -> u32 {
        self.words[slot + 1].load(Ordering::Acquire)
    }

    pub(crate) fn contains(&self, id: u32) -> bool {
        (0..self.len()).any(|slot| self.get(slot) == id)
    }

    /// Copies the current neighbours into `out`, replacing its contents.
    pub(crate) fn snapshot_into(&self, out: &mut Vec<u32>) {
        out.clear();
        out.extend((0..self.len()).map(|slot| self.get(slot)));
    }

    pub(crate) fn to_vec(&self) -> Vec<u32> {
        let mut out = Vec::with_capacity(self.len());
        self.snapshot_into(&mut out);
        out
    }

    /// Overwrites the neighbour list, preserving the delete flag.
    pub(crate) fn set(&self, ids: &[u32]) -> Result<(), HnswError> {
        if ids.len() > self.capacity() {
            return Err(HnswError::InvariantViolation {
                message: format!(
                    "{} neighbours exceed link record capacity {}",
                    ids.len(),
                    self.capacity()
                ),
            });
        }
        for (slot, id) in ids.iter().enumerate() {
            self.words[slot + 1].store(*id, Ordering::Release);
        }
        self.store_count(ids.len());
        Ok(())
    }

    /// Appends `id` when a slot is free; returns whether it was written.
    pub(crate) fn push(&self, id: u32) -> bool {
        if self.is_full() {
            return false;
        }
        let len = self.len();
        self.words[len + 1].store(id, Ordering::Release);
        self.store_count(len + 1);
        true
    }

    pub(crate) fn set_deleted(&self, deleted: bool) -> bool {
        let previous = if deleted {
            self.words[0].fetch_or(LinkHeader::DELETED_BIT, Ordering::AcqRel)
        } else {
            self.words[0].fetch_and(!LinkHeader::DELETED_BIT, Ordering::AcqRel)
        };
        LinkHeader::from_word(previous).deleted() != deleted
    }

    fn store_count(&self, count: usize) {
        let count = count as u32 & LinkHeader::COUNT_MASK;
        let _ = self.words[0].fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
            Some((word & !LinkHeader::COUNT_MASK) | count)
        });
    }
}
