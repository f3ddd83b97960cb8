use crate::binary_search::partition_point;
use crate::key::Key;
use crate::DecodeError;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Write;

/// Points to a child block (a record block or another index block)
/// inside the same table file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IndexRecord {
    /// The LARGEST key contained in the child
    pub end_key: Key,

    /// Position of the child in the file
    pub child_offset: u64,

    /// Size of the child in bytes
    pub child_size: u64,
}

/// A sorted block of child pointers, binary-searchable by [`Key`]
///
/// Index blocks chain into a tree: the children of a non-leaf index block
/// are index blocks, the children of a leaf index block are record blocks.
///
/// Encoded layout (all integers little-endian):
///
/// ```text
/// [u32 count][u32 offsets[count]][entries]
/// ```
///
/// where each entry is
///
/// ```text
/// [u32 keyLen][keyBytes][u64 snapshotId][u64 childOffset][u64 childSize]
/// ```
///
/// The offsets table points at entry starts relative to the start of the
/// entries region, making random access O(1).
pub struct IndexBlock {
    records: Box<[IndexRecord]>,

    /// Size of the encoded block, tracked for cache weighting
    pub(crate) raw_size: u32,
}

impl IndexBlock {
    /// Finds the child that may contain `key`.
    ///
    /// Because each entry's key is the largest key in its child, the correct
    /// child is the leftmost entry with `end_key >= key`. A key past the end
    /// of the block resolves to the LAST entry, so scans that run off a
    /// table's high end terminate cleanly instead of erroring; point lookups
    /// landing there are rejected later by the record block search.
    #[must_use]
    pub fn get(&self, key: &Key) -> &IndexRecord {
        let idx = self.get_idx(key);

        // NOTE: Blocks are never empty, and the index is clamped
        #[allow(clippy::expect_used)]
        self.records.get(idx).expect("should exist")
    }

    /// Index of the child that may contain `key` (clamped to the last child).
    #[must_use]
    pub fn get_idx(&self, key: &Key) -> usize {
        let idx = partition_point(&self.records, |rec| rec.end_key < *key);
        idx.min(self.records.len() - 1)
    }

    #[must_use]
    pub fn records(&self) -> &[IndexRecord] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Decodes a block from its encoded form.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        use crate::coding::eof;

        let mut reader = bytes;

        let count = eof(reader.read_u32::<LittleEndian>())? as usize;

        if count == 0 {
            return Err(DecodeError::Malformed("empty index block"));
        }

        let header_size = 4 + 4 * count;

        if bytes.len() < header_size {
            return Err(DecodeError::UnexpectedEof);
        }

        let mut offsets = Vec::with_capacity(count);

        for _ in 0..count {
            offsets.push(eof(reader.read_u32::<LittleEndian>())? as usize);
        }

        let entries = bytes.get(header_size..).ok_or(DecodeError::UnexpectedEof)?;
        let mut records = Vec::with_capacity(count);

        for (idx, offset) in offsets.iter().enumerate() {
            let mut entry = entries
                .get(*offset..)
                .ok_or(DecodeError::OutOfBounds("index entry offset"))?;

            let key_len = eof(entry.read_u32::<LittleEndian>())? as usize;

            if entry.len() < key_len {
                return Err(DecodeError::UnexpectedEof);
            }

            let (key_bytes, mut rest) = entry.split_at(key_len);

            let snapshot_id = eof(rest.read_u64::<LittleEndian>())?;
            let child_offset = eof(rest.read_u64::<LittleEndian>())?;
            let child_size = eof(rest.read_u64::<LittleEndian>())?;

            let record = IndexRecord {
                end_key: Key::new(key_bytes, snapshot_id),
                child_offset,
                child_size,
            };

            if let Some(prev) = idx.checked_sub(1).and_then(|i| records.get(i)) {
                let prev: &IndexRecord = prev;

                if prev.end_key >= record.end_key {
                    return Err(DecodeError::Malformed("index entries out of order"));
                }
            }

            records.push(record);
        }

        // NOTE: Block length fits u32 by construction
        #[allow(clippy::cast_possible_truncation)]
        Ok(Self {
            records: records.into_boxed_slice(),
            raw_size: bytes.len() as u32,
        })
    }
}

/// Streaming index block builder
///
/// Accepts records in strictly increasing key order and produces the
/// encoded block.
#[derive(Default)]
pub struct Builder {
    records: Vec<IndexRecord>,
    entries_size: usize,
}

impl Builder {
    /// Appends a record.
    ///
    /// # Panics
    ///
    /// Panics if the record's key is not greater than all previous keys.
    pub fn add(&mut self, record: IndexRecord) {
        if let Some(last) = self.records.last() {
            assert!(
                last.end_key < record.end_key,
                "index records must be added in ascending key order",
            );
        }

        self.entries_size += 4 + record.end_key.user_key.len() + 8 + 8 + 8;
        self.records.push(record);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Last key (end_key of the last record) added so far.
    #[must_use]
    pub fn last_key(&self) -> Option<&Key> {
        self.records.last().map(|record| &record.end_key)
    }

    /// Size of the encoded block so far.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        4 + 4 * self.records.len() + self.entries_size
    }

    /// Encodes the block, consuming the builder.
    ///
    /// # Panics
    ///
    /// Panics if no records were added - an empty index block is illegal.
    #[must_use]
    pub fn build(self) -> Vec<u8> {
        assert!(!self.records.is_empty(), "index block may not be empty");

        let mut bytes = Vec::with_capacity(self.encoded_size());

        // NOTE: Writing into a vec cannot fail, and entry counts,
        // lengths and offsets all fit u32 by construction
        #[allow(clippy::expect_used, clippy::cast_possible_truncation)]
        {
            bytes
                .write_u32::<LittleEndian>(self.records.len() as u32)
                .expect("cannot fail");

            let mut offset = 0u32;

            for record in &self.records {
                bytes.write_u32::<LittleEndian>(offset).expect("cannot fail");
                offset += (4 + record.end_key.user_key.len() + 8 + 8 + 8) as u32;
            }

            for record in &self.records {
                bytes
                    .write_u32::<LittleEndian>(record.end_key.user_key.len() as u32)
                    .expect("cannot fail");
                bytes
                    .write_all(&record.end_key.user_key)
                    .expect("cannot fail");
                bytes
                    .write_u64::<LittleEndian>(record.end_key.snapshot_id)
                    .expect("cannot fail");
                bytes
                    .write_u64::<LittleEndian>(record.child_offset)
                    .expect("cannot fail");
                bytes
                    .write_u64::<LittleEndian>(record.child_size)
                    .expect("cannot fail");
            }
        }

        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn record(key: &str, snapshot_id: u64, child_offset: u64) -> IndexRecord {
        IndexRecord {
            end_key: Key::new(key, snapshot_id),
            child_offset,
            child_size: 1,
        }
    }

    /// Five children over three distinct user keys; version splits put the
    /// newer snapshot in the earlier child, per the key comparator.
    fn test_block() -> IndexBlock {
        let mut builder = Builder::default();
        builder.add(record("An awesome test key", 2, 1));
        builder.add(record("An awesome test key", 1, 2));
        builder.add(record("Bad as I want to be", 3, 3));
        builder.add(record("Dog I am a test key", 5, 4));
        builder.add(record("Dog I am a test key", 4, 5));

        #[allow(clippy::expect_used)]
        IndexBlock::decode(&builder.build()).expect("should decode")
    }

    #[test]
    fn find_record_exact_match() {
        let block = test_block();

        let rec = block.get(&Key::new("An awesome test key", 2));
        assert_eq!(1, rec.child_offset);

        let rec = block.get(&Key::new("An awesome test key", 1));
        assert_eq!(2, rec.child_offset);
    }

    #[test]
    fn find_record_exact_match_end() {
        let block = test_block();

        let rec = block.get(&Key::new("Dog I am a test key", 4));
        assert_eq!(5, rec.child_offset);
    }

    #[test]
    fn find_record_between_children() {
        let block = test_block();

        // "Awesome" > "An awesome test key", so it can only live in the
        // child that ends at "Bad as I want to be"
        let rec = block.get(&Key::new("Awesome", 1));
        assert_eq!(3, rec.child_offset);
    }

    #[test]
    fn find_record_mid() {
        let block = test_block();

        let rec = block.get(&Key::new("Box", 1));
        assert_eq!(4, rec.child_offset);
    }

    #[test]
    fn find_record_end() {
        let block = test_block();

        // Past the end of the block: the last child is returned so scans
        // terminate there instead of erroring
        let rec = block.get(&Key::new("Toast", 1));
        assert_eq!(5, rec.child_offset);
    }

    #[test]
    fn find_record_before_start() {
        let block = test_block();

        let rec = block.get(&Key::new("Aardvark", 1));
        assert_eq!(1, rec.child_offset);
    }

    #[test]
    #[should_panic(expected = "ascending key order")]
    fn builder_rejects_unsorted_input() {
        let mut builder = Builder::default();
        builder.add(record("b", 1, 1));
        builder.add(record("a", 1, 2));
    }

    #[test]
    #[should_panic(expected = "may not be empty")]
    fn builder_rejects_empty_block() {
        let builder = Builder::default();
        let _ = builder.build();
    }

    #[test]
    fn decode_rejects_truncation() {
        let mut builder = Builder::default();
        builder.add(record("a", 1, 1));
        builder.add(record("b", 2, 2));
        let bytes = builder.build();

        for len in 0..bytes.len() {
            assert!(
                IndexBlock::decode(&bytes[..len]).is_err(),
                "truncated block at {len} should not decode"
            );
        }
    }

    #[test]
    fn round_trip_preserves_records() {
        let block = test_block();

        assert_eq!(5, block.len());
        assert_eq!(
            Key::new("An awesome test key", 2),
            block.records()[0].end_key,
        );
        assert_eq!(
            Key::new("Dog I am a test key", 4),
            block.records()[4].end_key,
        );
    }
}
