pub mod bit_array;
pub mod filter;
pub mod index_block;
pub mod iter;
pub mod record_block;
pub mod trailer;
pub mod writer;

pub use iter::TableIter;
pub use writer::TableBuilder;

use crate::descriptor_table::DescriptorTable;
use crate::key::Key;
use crate::value::{GenerationId, SnapshotId, Tuple};
use crate::Caches;
use filter::BloomFilter;
use index_block::IndexBlock;
use record_block::RecordBlock;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use trailer::{Trailer, TRAILER_SIZE};

/// An immutable, sorted table file
///
/// Layout: record blocks, then the index tree (leaves first, exactly one
/// root block on top), then the bloom filter, then the fixed-size trailer.
///
/// The root index and bloom filter stay resident for the lifetime of the
/// table; record blocks and deeper index blocks are fetched through the
/// shared block caches, and the file handle itself through the bounded
/// descriptor table.
pub struct SsTable {
    generation: GenerationId,
    path: PathBuf,
    file_len: u64,

    trailer: Trailer,
    root_index: Arc<IndexBlock>,
    filter: BloomFilter,

    caches: Arc<Caches>,
    descriptors: Arc<DescriptorTable>,

    /// Set when the table is replaced by compaction; the file is
    /// unlinked once the last reference drops
    is_dropped: AtomicBool,
}

impl std::fmt::Debug for SsTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SsTable:{}({:?})", self.generation, self.path)
    }
}

impl SsTable {
    /// Opens a table file, validating its trailer.
    ///
    /// Reads the trailer from the end of the file, then loads the root
    /// index block and bloom filter into memory. The opened handle is
    /// parked in the descriptor table for later block reads.
    pub fn open<P: AsRef<Path>>(
        folder: P,
        generation: GenerationId,
        caches: Arc<Caches>,
        descriptors: Arc<DescriptorTable>,
    ) -> crate::Result<Self> {
        let path = crate::file::table_file_path(folder, generation);

        let file = Arc::new(File::open(&path)?);
        let file_len = file.metadata()?.len();

        let corrupt = |error| crate::Error::CorruptTable { generation, error };

        if file_len < TRAILER_SIZE as u64 {
            return Err(corrupt(crate::DecodeError::UnexpectedEof));
        }

        let mut trailer_bytes = vec![0; TRAILER_SIZE];
        crate::file::read_exact_at(&file, &mut trailer_bytes, file_len - TRAILER_SIZE as u64)?;

        let trailer = Trailer::decode(&trailer_bytes, file_len).map_err(corrupt)?;

        let mut root_bytes = vec![0; trailer.root_index_size as usize];
        crate::file::read_exact_at(&file, &mut root_bytes, trailer.root_index_offset)?;
        let root_index = Arc::new(IndexBlock::decode(&root_bytes).map_err(corrupt)?);

        let mut filter_bytes = vec![0; trailer.filter_size as usize];
        crate::file::read_exact_at(&file, &mut filter_bytes, trailer.filter_offset)?;
        let filter = BloomFilter::decode_from(&mut &filter_bytes[..]).map_err(corrupt)?;

        descriptors.insert(generation, file);

        log::trace!("opened table {generation} with {} tuples", trailer.tuple_count);

        Ok(Self {
            generation,
            path,
            file_len,
            trailer,
            root_index,
            filter,
            caches,
            descriptors,
            is_dropped: AtomicBool::default(),
        })
    }

    #[must_use]
    pub fn generation(&self) -> GenerationId {
        self.generation
    }

    /// Number of tuples in the table.
    #[must_use]
    pub fn tuple_count(&self) -> u64 {
        self.trailer.tuple_count
    }

    /// Highest snapshot id of any tuple in the table.
    #[must_use]
    pub fn max_snapshot(&self) -> SnapshotId {
        self.trailer.max_snapshot
    }

    /// Size of the table file in bytes.
    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.file_len
    }

    #[must_use]
    pub(crate) fn root_index(&self) -> &Arc<IndexBlock> {
        &self.root_index
    }

    /// Whether a child pointer addresses a record block (as opposed to a
    /// deeper index block): record blocks all live below the index region.
    #[must_use]
    pub(crate) fn is_record_child(&self, child_offset: u64) -> bool {
        child_offset < self.trailer.index_region_offset
    }

    fn read_raw(&self, offset: u64, size: u64) -> crate::Result<Vec<u8>> {
        if offset.saturating_add(size) > self.file_len {
            return Err(crate::Error::CorruptTable {
                generation: self.generation,
                error: crate::DecodeError::OutOfBounds("block region"),
            });
        }

        let file = self.descriptors.access_or_open(self.generation, &self.path)?;

        let mut bytes = vec![0; size as usize];
        crate::file::read_exact_at(&file, &mut bytes, offset)?;
        Ok(bytes)
    }

    /// Loads a record block through the cache.
    pub(crate) fn load_record_block(
        &self,
        offset: u64,
        size: u64,
    ) -> crate::Result<Arc<RecordBlock>> {
        self.caches.record_block((self.generation, offset), || {
            log::trace!("loading record block from disk: {}/{offset}", self.generation);

            let bytes = self.read_raw(offset, size)?;

            RecordBlock::decode(&bytes).map_err(|error| crate::Error::CorruptTable {
                generation: self.generation,
                error,
            })
        })
    }

    /// Loads an index block through the cache.
    pub(crate) fn load_index_block(
        &self,
        offset: u64,
        size: u64,
    ) -> crate::Result<Arc<IndexBlock>> {
        self.caches.index_block((self.generation, offset), || {
            log::trace!("loading index block from disk: {}/{offset}", self.generation);

            let bytes = self.read_raw(offset, size)?;

            IndexBlock::decode(&bytes).map_err(|error| crate::Error::CorruptTable {
                generation: self.generation,
                error,
            })
        })
    }

    /// Walks the index tree down to the record block that may contain `key`.
    pub(crate) fn find_record_block(&self, key: &Key) -> crate::Result<Arc<RecordBlock>> {
        let mut record = self.root_index.get(key).clone();

        // The descent is bounded; a cycle in child pointers means corruption
        for _ in 0..MAX_INDEX_DEPTH {
            if self.is_record_child(record.child_offset) {
                return self.load_record_block(record.child_offset, record.child_size);
            }

            let block = self.load_index_block(record.child_offset, record.child_size)?;
            record = block.get(key).clone();
        }

        Err(crate::Error::CorruptTable {
            generation: self.generation,
            error: crate::DecodeError::Malformed("index tree too deep"),
        })
    }

    /// Returns the tuple for the key if it exists and is visible at the
    /// key's snapshot.
    pub fn get(&self, key: &Key) -> crate::Result<Option<Tuple>> {
        if !self.filter.contains(&key.user_key) {
            return Ok(None);
        }

        let block = self.find_record_block(key)?;
        Ok(block.get(key))
    }

    /// Creates an ascending iterator, optionally starting at a key.
    #[must_use]
    pub fn iter(self: &Arc<Self>, start: Option<Key>) -> TableIter {
        TableIter::new(self.clone(), start, false)
    }

    /// Creates a descending iterator, optionally starting at a key.
    #[must_use]
    pub fn iter_rev(self: &Arc<Self>, start: Option<Key>) -> TableIter {
        TableIter::new(self.clone(), start, true)
    }

    /// Flags the file for deletion once the last reference drops.
    pub fn mark_dropped(&self) {
        self.is_dropped.store(true, Ordering::Release);
    }
}

const MAX_INDEX_DEPTH: usize = 64;

impl Drop for SsTable {
    fn drop(&mut self) {
        // Close the pooled descriptor right away instead of waiting
        // for cache eviction
        self.descriptors.remove(self.generation);

        if self.is_dropped.load(Ordering::Acquire) {
            log::trace!("unlinking dropped table file {:?}", self.path);

            if let Err(e) = std::fs::remove_file(&self.path) {
                log::warn!("failed to unlink table file {:?}: {e}", self.path);
            }
        }
    }
}
