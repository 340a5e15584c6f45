//! Node store backing the HNSW graph.
//!
//! Layer-0 adjacency, vector bytes and labels live in one contiguous block of
//! fixed-stride records addressed by internal id. Adjacency above layer 0 is
//! kept in a per-node buffer sized to the node's level when it is created.
//! All words are atomics so concurrent readers never observe torn values.

mod layout;
mod links;

use std::sync::{
    OnceLock,
    atomic::{AtomicU32, AtomicUsize, Ordering},
};

use crate::error::HnswError;

pub(crate) use self::{
    layout::RecordLayout,
    links::{LinkHeader, LinkList},
};

/// Reserves `len` items fallibly, mapping failure to
/// [`HnswError::OutOfMemory`].
pub(crate) fn try_filled<T>(
    len: usize,
    what: &'static str,
    mut make: impl FnMut() -> T,
) -> Result<Box<[T]>, HnswError> {
    let mut items = Vec::new();
    items
        .try_reserve_exact(len)
        .map_err(|_| HnswError::OutOfMemory {
            what,
            bytes: len.saturating_mul(size_of::<T>()),
        })?;
    items.extend((0..len).map(|_| make()));
    Ok(items.into_boxed_slice())
}

fn zeroed_words(len: usize, what: &'static str) -> Result<Box<[AtomicU32]>, HnswError> {
    try_filled(len, what, || AtomicU32::new(0))
}

#[derive(Debug)]
pub(crate) struct NodeStore {
    layout: RecordLayout,
    capacity: usize,
    count: AtomicUsize,
    records: Box<[AtomicU32]>,
    upper: Box<[OnceLock<Box<[AtomicU32]>>]>,
}

impl NodeStore {
    pub(crate) fn with_capacity(layout: RecordLayout, capacity: usize) -> Result<Self, HnswError> {
        let words = capacity
            .checked_mul(layout.stride_words())
            .ok_or(HnswError::OutOfMemory {
                what: "node store",
                bytes: usize::MAX,
            })?;
        Ok(Self {
            layout,
            capacity,
            count: AtomicUsize::new(0),
            records: zeroed_words(words, "node store")?,
            upper: try_filled(capacity, "upper link table", OnceLock::new)?,
        })
    }

    #[rustfmt::skip]
    pub(crate) fn layout(&self) -> &RecordLayout { &self.layout }

    #[rustfmt::skip]
    pub(crate) fn capacity(&self) -> usize { self.capacity }

    #[rustfmt::skip]
    pub(crate) fn len(&self) -> usize { self.count.load(Ordering::Acquire) }

    /// Reserves the next internal id.
    pub(crate) fn allocate(&self) -> Result<u32, HnswError> {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count < self.capacity).then_some(count + 1)
            })
            .map(|previous| previous as u32)
            .map_err(|_| HnswError::CapacityExceeded {
                capacity: self.capacity,
            })
    }

    /// Writes a freshly allocated record. The record must still be blank.
    pub(crate) fn init_node(
        &self,
        id: u32,
        label: u64,
        vector: &[u8],
        level: usize,
    ) -> Result<(), HnswError> {
        let links = self.level0(id);
        if links.header() != LinkHeader::default() {
            return Err(HnswError::InvariantViolation {
                message: format!("record for fresh node {id} is not blank"),
            });
        }
        self.write_vector(id, vector);
        self.set_label(id, label);
        if level > 0 {
            let len = level
                .checked_mul(self.layout.upper_words())
                .ok_or_else(|| HnswError::InvalidParameters {
                    reason: format!("level {level} of node {id} is too large"),
                })?;
            let words = zeroed_words(len, "upper links")?;
            self.upper[id as usize]
                .set(words)
                .map_err(|_| HnswError::InvariantViolation {
                    message: format!("upper links of fresh node {id} already exist"),
                })?;
        }
        Ok(())
    }

    fn record(&self, id: u32) -> &[AtomicU32] {
        let start = id as usize * self.layout.stride_words();
        &self.records[start..start + self.layout.stride_words()]
    }

    pub(crate) fn record_words(&self, id: u32) -> &[AtomicU32] {
        self.record(id)
    }

    pub(crate) fn upper_links(&self, id: u32) -> Option<&[AtomicU32]> {
        self.upper[id as usize].get().map(|words| &words[..])
    }

    /// Top level of `id`.
    pub(crate) fn level(&self, id: u32) -> usize {
        self.upper_links(id)
            .map_or(0, |words| words.len() / self.layout.upper_words())
    }

    pub(crate) fn level0(&self, id: u32) -> LinkList<'_> {
        LinkList::new(&self.record(id)[..self.layout.level0_words()])
    }

    /// Adjacency of `id` at `level`, or `None` above the node's top level.
    pub(crate) fn links(&self, id: u32, level: usize) -> Option<LinkList<'_>> {
        if level == 0 {
            return Some(self.level0(id));
        }
        let words = self.upper_links(id)?;
        let width = self.layout.upper_words();
        let start = (level - 1) * width;
        words.get(start..start + width).map(LinkList::new)
    }

    /// Copies the stored vector of `id` into `out`.
    pub(crate) fn read_vector(&self, id: u32, out: &mut Vec<u8>) {
        let start = self.layout.vector_word();
        let words = &self.record(id)[start..start + self.layout.vector_words()];
        out.clear();
        for word in words {
            out.extend_from_slice(&word.load(Ordering::Acquire).to_le_bytes());
        }
        out.truncate(self.layout.data_size());
    }

    pub(crate) fn write_vector(&self, id: u32, vector: &[u8]) {
        let start = self.layout.vector_word();
        let words = &self.record(id)[start..start + self.layout.vector_words()];
        for (word, chunk) in words.iter().zip(vector.chunks(RecordLayout::WORD)) {
            let mut bytes = [0u8; RecordLayout::WORD];
            bytes[..chunk.len()].copy_from_slice(chunk);
            word.store(u32::from_le_bytes(bytes), Ordering::Release);
        }
    }

    pub(crate) fn label(&self, id: u32) -> u64 {
        let record = self.record(id);
        let at = self.layout.label_word();
        let lo = u64::from(record[at].load(Ordering::Acquire));
        let hi = u64::from(record[at + 1].load(Ordering::Acquire));
        (hi << 32) | lo
    }

    pub(crate) fn set_label(&self, id: u32, label: u64) {
        let record = self.record(id);
        let at = self.layout.label_word();
        record[at].store(label as u32, Ordering::Release);
        record[at + 1].store((label >> 32) as u32, Ordering::Release);
    }

    #[rustfmt::skip]
    pub(crate) fn is_deleted(&self, id: u32) -> bool { self.level0(id).header().deleted() }

    /// Sets the delete flag; returns whether it changed.
    #[rustfmt::skip]
    pub(crate) fn mark_deleted(&self, id: u32) -> bool { self.level0(id).set_deleted(true) }

    /// Clears the delete flag; returns whether it changed.
    #[rustfmt::skip]
    pub(crate) fn unmark_deleted(&self, id: u32) -> bool { self.level0(id).set_deleted(false) }

    /// Grows the backing storage, copying every allocated record.
    pub(crate) fn resize(&mut self, new_capacity: usize) -> Result<(), HnswError> {
        let count = self.len();
        if new_capacity < count {
            return Err(HnswError::InvalidResize {
                requested: new_capacity,
                count,
            });
        }
        let mut grown = Self::with_capacity(self.layout, new_capacity)?;
        let used = count * self.layout.stride_words();
        for (target, source) in grown.records.iter_mut().zip(self.records[..used].iter_mut()) {
            *target.get_mut() = *source.get_mut();
        }
        for (target, source) in grown.upper.iter_mut().zip(self.upper.iter_mut()) {
            *target = std::mem::take(source);
        }
        *grown.count.get_mut() = count;
        *self = grown;
        Ok(())
    }

    /// Installs a record restored from a persisted image.
    pub(crate) fn restore_node(
        &mut self,
        id: u32,
        record: &[u32],
        upper: Option<Box<[AtomicU32]>>,
    ) -> Result<(), HnswError> {
        let stride = self.layout.stride_words();
        let start = id as usize * stride;
        let slots = self
            .records
            .get_mut(start..start + stride)
            .ok_or_else(|| HnswError::CorruptIndex {
                reason: format!("node {id} lies beyond capacity {}", self.capacity),
            })?;
        for (slot, word) in slots.iter_mut().zip(record) {
            *slot.get_mut() = *word;
        }
        if let Some(words) = upper {
            self.upper[id as usize] = OnceLock::from(words);
        }
        let count = self.count.get_mut();
        *count = (*count).max(id as usize + 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(capacity: usize) -> NodeStore {
        NodeStore::with_capacity(RecordLayout::new(6, 2, 4), capacity).expect("store")
    }

    #[test]
    fn allocate_fails_when_full() {
        let store = store(2);
        assert_eq!(store.allocate().expect("first"), 0);
        assert_eq!(store.allocate().expect("second"), 1);
        let err = store.allocate().expect_err("full");
        assert!(matches!(err, HnswError::CapacityExceeded { capacity: 2 }));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn init_node_rejects_levels_whose_links_overflow() {
        let store = store(1);
        let id = store.allocate().expect("id");
        let err = store
            .init_node(id, 1, &[0; 6], usize::MAX)
            .expect_err("overflow");
        assert!(matches!(err, HnswError::InvalidParameters { .. }));
        assert!(store.upper_links(id).is_none());
    }

    #[test]
    fn init_node_writes_vector_label_and_levels() {
        let store = store(2);
        let id = store.allocate().expect("id");
        store
            .init_node(id, u64::MAX - 3, &[1, 2, 3, 4, 5, 6], 2)
            .expect("init");
        let mut vector = Vec::new();
        store.read_vector(id, &mut vector);
        assert_eq!(vector, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(store.label(id), u64::MAX - 3);
        assert_eq!(store.level(id), 2);
        assert_eq!(store.links(id, 2).expect("level 2").capacity(), 2);
        assert_eq!(store.links(id, 0).expect("level 0").capacity(), 4);
        assert!(store.links(id, 3).is_none());
    }

    #[test]
    fn init_node_rejects_dirty_record() {
        let store = store(1);
        let id = store.allocate().expect("id");
        assert!(store.level0(id).push(0));
        let err = store
            .init_node(id, 7, &[0; 6], 0)
            .expect_err("dirty record");
        assert!(matches!(err, HnswError::InvariantViolation { .. }));
    }

    #[test]
    fn delete_flag_toggles_without_touching_links() {
        let store = store(2);
        let id = store.allocate().expect("id");
        store.level0(id).set(&[1]).expect("set");
        assert!(store.mark_deleted(id));
        assert!(store.is_deleted(id));
        assert_eq!(store.level0(id).to_vec(), vec![1]);
        assert!(store.unmark_deleted(id));
        assert!(!store.is_deleted(id));
    }

    #[test]
    fn resize_preserves_records() {
        let mut store = store(1);
        let id = store.allocate().expect("id");
        store.init_node(id, 42, &[9; 6], 1).expect("init");
        store.level0(id).set(&[0]).expect("set");
        store.resize(4).expect("grow");
        assert_eq!(store.capacity(), 4);
        assert_eq!(store.len(), 1);
        assert_eq!(store.label(id), 42);
        assert_eq!(store.level(id), 1);
        assert_eq!(store.level0(id).to_vec(), vec![0]);
        assert_eq!(store.allocate().expect("next id"), 1);
    }

    #[test]
    fn resize_rejects_shrinking_below_count() {
        let mut store = store(3);
        store.allocate().expect("a");
        store.allocate().expect("b");
        let err = store.resize(1).expect_err("shrink");
        assert!(matches!(
            err,
            HnswError::InvalidResize {
                requested: 1,
                count: 2
            }
        ));
    }
}
