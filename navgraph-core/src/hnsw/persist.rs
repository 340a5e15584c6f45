//! Binary image of an index.
//!
//! Layout, all integers little-endian:
//!
//! | field             | type  |
//! |-------------------|-------|
//! | `level0_offset`   | `u64` |
//! | `max_elements`    | `u64` |
//! | `element_count`   | `u64` |
//! | `record_stride`   | `u64` |
//! | `label_offset`    | `u64` |
//! | `vector_offset`   | `u64` |
//! | `max_level`       | `i32` |
//! | `entry_point`     | `u32` |
//! | `max_m`           | `u64` |
//! | `max_m0`          | `u64` |
//! | `m`               | `u64` |
//! | `level_multiplier`| `f64` |
//! | `ef_construction` | `u64` |
//!
//! The header is followed by `element_count * record_stride` bytes of node
//! records, then, for every node in id order, a `u32` byte length and the
//! node's upper-layer link records.

use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicU32, Ordering},
};

use tracing::{info, instrument};

use crate::{
    error::{HnswError, Result},
    space::Space,
};

use super::{
    index::{Hnsw, NO_ENTRY},
    params::HnswParams,
    store::{LinkList, NodeStore, RecordLayout, try_filled},
};

/// Size of the fixed header in bytes.
pub(crate) const HEADER_BYTES: usize = 6 * 8 + 4 + 4 + 3 * 8 + 8 + 8;

const LABEL_BYTES: usize = 8;

fn corrupt(reason: impl Into<String>) -> HnswError {
    HnswError::CorruptIndex {
        reason: reason.into(),
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Header {
    level0_offset: u64,
    max_elements: u64,
    element_count: u64,
    record_stride: u64,
    label_offset: u64,
    vector_offset: u64,
    max_level: i32,
    entry_point: u32,
    max_m: u64,
    max_m0: u64,
    m: u64,
    level_multiplier: f64,
    ef_construction: u64,
}

impl Header {
    fn write_to(&self, out: &mut impl Write) -> std::io::Result<()> {
        for field in [
            self.level0_offset,
            self.max_elements,
            self.element_count,
            self.record_stride,
            self.label_offset,
            self.vector_offset,
        ] {
            out.write_all(&field.to_le_bytes())?;
        }
        out.write_all(&self.max_level.to_le_bytes())?;
        out.write_all(&self.entry_point.to_le_bytes())?;
        for field in [self.max_m, self.max_m0, self.m] {
            out.write_all(&field.to_le_bytes())?;
        }
        out.write_all(&self.level_multiplier.to_le_bytes())?;
        out.write_all(&self.ef_construction.to_le_bytes())
    }

    fn read_from(reader: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            level0_offset: reader.u64()?,
            max_elements: reader.u64()?,
            element_count: reader.u64()?,
            record_stride: reader.u64()?,
            label_offset: reader.u64()?,
            vector_offset: reader.u64()?,
            max_level: reader.i32()?,
            entry_point: reader.u32()?,
            max_m: reader.u64()?,
            max_m0: reader.u64()?,
            m: reader.u64()?,
            level_multiplier: reader.f64()?,
            ef_construction: reader.u64()?,
        })
    }
}

/// Cursor over an in-memory image that reports truncation as corruption.
struct ByteReader<'a> {
    bytes: &'a [u8],
    at: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, at: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .at
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                corrupt(format!(
                    "image truncated: wanted {len} bytes at offset {} of {}",
                    self.at,
                    self.bytes.len()
                ))
            })?;
        let slice = &self.bytes[self.at..end];
        self.at = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32> {
        self.array().map(u32::from_le_bytes)
    }

    fn i32(&mut self) -> Result<i32> {
        self.array().map(i32::from_le_bytes)
    }

    fn u64(&mut self) -> Result<u64> {
        self.array().map(u64::from_le_bytes)
    }

    fn f64(&mut self) -> Result<f64> {
        self.array().map(f64::from_le_bytes)
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.at
    }
}

fn to_usize(value: u64, field: &str) -> Result<usize> {
    usize::try_from(value).map_err(|_| corrupt(format!("{field} {value} does not fit in memory")))
}

fn words_le(bytes: &[u8]) -> impl Iterator<Item = u32> + '_ {
    bytes.chunks_exact(RecordLayout::WORD).map(|chunk| {
        let mut word = [0u8; RecordLayout::WORD];
        word.copy_from_slice(chunk);
        u32::from_le_bytes(word)
    })
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|name| name.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

impl<S: Space> Hnsw<S> {
    /// Writes the index image to `path`, replacing any existing file.
    ///
    /// The image is written to a sibling temporary file and renamed into
    /// place. Saving reads the graph without locks and should not overlap
    /// with mutation.
    ///
    /// # Errors
    /// Returns [`HnswError::Io`] when writing fails.
    #[instrument(level = "debug", skip(self, path), fields(file = %path.as_ref().display()))]
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let layout = *self.store.layout();
        let count = self.len();
        let header = Header {
            level0_offset: layout.level0_offset() as u64,
            max_elements: self.capacity() as u64,
            element_count: count as u64,
            record_stride: layout.stride() as u64,
            label_offset: layout.label_offset() as u64,
            vector_offset: layout.vector_offset() as u64,
            max_level: self.max_level.load(Ordering::Acquire),
            entry_point: self.entry_point.load(Ordering::Acquire),
            max_m: self.params.max_m() as u64,
            max_m0: self.params.max_m0() as u64,
            m: self.params.m() as u64,
            level_multiplier: self.params.level_multiplier(),
            ef_construction: self.params.ef_construction() as u64,
        };

        let temp = temp_sibling(path);
        let mut out = BufWriter::new(File::create(&temp)?);
        header.write_to(&mut out)?;
        for id in 0..count as u32 {
            for word in self.store.record_words(id) {
                out.write_all(&word.load(Ordering::Acquire).to_le_bytes())?;
            }
        }
        let mut blob_bytes = 0usize;
        for id in 0..count as u32 {
            let upper = self.store.upper_links(id).unwrap_or_default();
            let len = upper.len() * RecordLayout::WORD;
            let len_word = u32::try_from(len).map_err(|_| HnswError::InvariantViolation {
                message: format!("upper links of node {id} exceed {} bytes", u32::MAX),
            })?;
            out.write_all(&len_word.to_le_bytes())?;
            for word in upper {
                out.write_all(&word.load(Ordering::Acquire).to_le_bytes())?;
            }
            blob_bytes += len;
        }
        let file = out.into_inner().map_err(|err| err.into_error())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp, path)?;
        info!(count, stride = layout.stride(), blob_bytes, "saved index image");
        Ok(())
    }

    /// Restores an index saved by [`Hnsw::save`].
    ///
    /// The capacity becomes the largest of `capacity_hint`, the stored
    /// capacity and the stored element count. Settings that are not part of
    /// the image (pruning policy, seed, query `ef`, entry strategy) take their
    /// defaults.
    ///
    /// # Errors
    /// Returns [`HnswError::CorruptIndex`] when the image fails validation,
    /// [`HnswError::Io`] when it cannot be read and
    /// [`HnswError::OutOfMemory`] when storage cannot be reserved.
    #[instrument(level = "debug", skip(path, space), fields(file = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>, space: S, capacity_hint: usize) -> Result<Self> {
        let bytes = fs::read(path.as_ref())?;
        if bytes.len() < HEADER_BYTES {
            return Err(corrupt(format!(
                "image of {} bytes is shorter than the {HEADER_BYTES}-byte header",
                bytes.len()
            )));
        }
        let mut reader = ByteReader::new(&bytes);
        let header = Header::read_from(&mut reader)?;

        let count = to_usize(header.element_count, "element count")?;
        let stored_capacity = to_usize(header.max_elements, "max elements")?;
        if count > stored_capacity {
            return Err(corrupt(format!(
                "element count {count} exceeds stored capacity {stored_capacity}"
            )));
        }
        let params = restore_params(&header, capacity_hint.max(stored_capacity).max(count))?;
        let layout = RecordLayout::new(space.data_size(), params.max_m(), params.max_m0());
        let stored = StoredLayout::check(&header, &layout)?;

        let records = reader.take(
            count
                .checked_mul(stored.stride)
                .ok_or_else(|| corrupt("node store size overflows"))?,
        )?;
        let blobs = read_blobs(&mut reader, count, layout.upper_record_bytes())?;
        if reader.remaining() != 0 {
            return Err(corrupt(format!(
                "{} trailing bytes after the last link record",
                reader.remaining()
            )));
        }

        let mut store = NodeStore::with_capacity(layout, params.max_elements())?;
        for (id, (record, blob)) in records.chunks_exact(stored.stride).zip(&blobs).enumerate() {
            let record: Vec<u32> = words_le(record).collect();
            let upper = if blob.is_empty() {
                None
            } else {
                let mut words = words_le(blob);
                let len = blob.len() / RecordLayout::WORD;
                Some(try_filled(len, "upper links", || {
                    AtomicU32::new(words.next().unwrap_or_default())
                })?)
            };
            store.restore_node(id as u32, &record, upper)?;
        }

        let index = Self::with_store(space, params, store)?;
        index.restore_graph(&header, stored.has_labels)?;
        info!(
            count,
            capacity = index.capacity(),
            deleted = index.deleted_count(),
            "loaded index image"
        );
        Ok(index)
    }

    /// Rebuilds labels, entry point and deletion counters after the raw
    /// records are in place, validating every link on the way.
    fn restore_graph(&self, header: &Header, has_labels: bool) -> Result<()> {
        let count = self.len();
        let max_level = i64::from(header.max_level);
        for id in 0..count as u32 {
            if i64::try_from(self.store.level(id)).map_or(true, |level| level > max_level) {
                return Err(corrupt(format!(
                    "node {id} sits above max level {max_level}"
                )));
            }
            if !has_labels {
                self.store.set_label(id, u64::from(id));
            }
            let label = self.store.label(id);
            if self.labels.insert(label, id).is_some() {
                return Err(corrupt(format!("label {label} is stored twice")));
            }
            for level in 0..=self.store.level(id) {
                let links = self.store.links(id, level).ok_or_else(|| {
                    corrupt(format!("node {id} is missing its level {level} record"))
                })?;
                self.check_restored_links(id, level, &links)?;
            }
            if self.store.is_deleted(id) {
                self.deleted.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.has_deletions
            .store(self.deleted_count() > 0, Ordering::Release);

        match (count, header.entry_point) {
            (0, NO_ENTRY) if header.max_level == -1 => {}
            (0, _) => return Err(corrupt("empty image declares an entry point")),
            (_, entry) if entry as usize >= count => {
                return Err(corrupt(format!("entry point {entry} is out of range")));
            }
            (_, entry) => {
                let level = self.store.level(entry);
                if i64::try_from(level).ok() != Some(i64::from(header.max_level)) {
                    return Err(corrupt(format!(
                        "entry point {entry} has level {level} but max level is {}",
                        header.max_level
                    )));
                }
            }
        }
        self.entry_point.store(header.entry_point, Ordering::Release);
        self.max_level.store(header.max_level, Ordering::Release);
        Ok(())
    }

    fn check_restored_links(&self, id: u32, level: usize, links: &LinkList<'_>) -> Result<()> {
        let declared = links.header().count();
        if declared > links.capacity() {
            return Err(corrupt(format!(
                "node {id} declares {declared} links at level {level}, capacity {}",
                links.capacity()
            )));
        }
        for slot in 0..declared {
            let neighbour = links.get(slot);
            if neighbour as usize >= self.len() {
                return Err(corrupt(format!(
                    "node {id} links to missing node {neighbour} at level {level}"
                )));
            }
        }
        Ok(())
    }
}

fn restore_params(header: &Header, capacity: usize) -> Result<HnswParams> {
    let m = to_usize(header.m, "M")?;
    let ef_construction = to_usize(header.ef_construction, "ef_construction")?;
    let params = HnswParams::new(capacity, m, ef_construction)
        .map_err(|err| corrupt(format!("stored parameters rejected: {err}")))?
        .with_level_multiplier(header.level_multiplier);
    params
        .validate()
        .map_err(|err| corrupt(format!("stored parameters rejected: {err}")))?;
    if header.max_m != params.max_m() as u64 || header.max_m0 != params.max_m0() as u64 {
        return Err(corrupt(format!(
            "degree caps {}/{} do not match M = {m}",
            header.max_m, header.max_m0
        )));
    }
    Ok(params)
}

/// Record geometry declared by an image, checked against the geometry the
/// supplied space implies.
struct StoredLayout {
    stride: usize,
    has_labels: bool,
}

impl StoredLayout {
    fn check(header: &Header, layout: &RecordLayout) -> Result<Self> {
        let stride = to_usize(header.record_stride, "record stride")?;
        let label_offset = to_usize(header.label_offset, "label offset")?;
        if header.level0_offset != layout.level0_offset() as u64 {
            return Err(corrupt(format!(
                "layer-0 offset {} is not {}",
                header.level0_offset,
                layout.level0_offset()
            )));
        }
        if header.vector_offset != layout.vector_offset() as u64 {
            return Err(corrupt(format!(
                "vector offset {} does not match a space of {} bytes",
                header.vector_offset,
                layout.data_size()
            )));
        }
        let has_labels = label_offset
            .checked_add(LABEL_BYTES)
            .is_some_and(|end| end <= stride);
        let expected = if has_labels {
            if label_offset != layout.label_offset() {
                return Err(corrupt(format!(
                    "label offset {label_offset} is not {}",
                    layout.label_offset()
                )));
            }
            layout.stride()
        } else {
            layout.label_offset()
        };
        if stride != expected {
            return Err(corrupt(format!("record stride {stride} is not {expected}")));
        }
        Ok(Self { stride, has_labels })
    }
}

/// Reads every length-prefixed upper-layer blob, checking that each is a
/// whole number of level records.
fn read_blobs<'a>(reader: &mut ByteReader<'a>, count: usize, record_bytes: usize) -> Result<Vec<&'a [u8]>> {
    let mut blobs = Vec::with_capacity(count.min(reader.remaining() / 4));
    for id in 0..count {
        let len = reader.u32()? as usize;
        if len % record_bytes != 0 {
            return Err(corrupt(format!(
                "link blob of node {id} is {len} bytes, not a multiple of {record_bytes}"
            )));
        }
        blobs.push(reader.take(len)?);
    }
    Ok(blobs)
}
