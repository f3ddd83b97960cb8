use crate::binary_search::partition_point;
use crate::key::Key;
use crate::value::Tuple;
use crate::DecodeError;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Write;

/// A sorted run of tuples, binary-searchable by [`Key`]
///
/// Record blocks are the leaves of a table file. Encoded layout
/// (all integers little-endian):
///
/// ```text
/// [entries][u32 offsets[count]][u32 count]
/// ```
///
/// where each entry is
///
/// ```text
/// [u32 keyLen][keyBytes][u64 snapshotId][u32 valueLen][valueBytes]
/// ```
///
/// The offset table trails the entries; decoders read the count from the
/// last four bytes first.
pub struct RecordBlock {
    items: Box<[Tuple]>,

    /// Size of the encoded block, tracked for cache weighting
    pub(crate) raw_size: u32,
}

impl RecordBlock {
    /// Returns the first tuple with key >= `key` if its user key matches
    /// and it is visible at the key's snapshot.
    #[must_use]
    pub fn get(&self, key: &Key) -> Option<Tuple> {
        let idx = partition_point(&self.items, |item| item.key < *key);

        let item = self.items.get(idx)?;

        // The index may have routed a key here that the block does not
        // contain; reject anything that is not an exact visible match
        if item.key.user_key == key.user_key && item.key.snapshot_id <= key.snapshot_id {
            Some(item.clone())
        } else {
            None
        }
    }

    /// Index of the first tuple with key >= `key`
    /// (`len` if every tuple is smaller).
    #[must_use]
    pub fn seek_idx(&self, key: &Key) -> usize {
        partition_point(&self.items, |item| item.key < *key)
    }

    #[must_use]
    pub fn items(&self) -> &[Tuple] {
        &self.items
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// First key of the block.
    #[must_use]
    pub fn first_key(&self) -> Option<&Key> {
        self.items.first().map(|item| &item.key)
    }

    /// Last key of the block.
    #[must_use]
    pub fn last_key(&self) -> Option<&Key> {
        self.items.last().map(|item| &item.key)
    }

    /// Decodes a block from its encoded form.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        use crate::coding::eof;

        if bytes.len() < 4 {
            return Err(DecodeError::UnexpectedEof);
        }

        let (rest, mut count_bytes) = bytes.split_at(bytes.len() - 4);
        let count = eof(count_bytes.read_u32::<LittleEndian>())? as usize;

        if count == 0 {
            return Err(DecodeError::Malformed("empty record block"));
        }

        let offsets_size = 4 * count;

        if rest.len() < offsets_size {
            return Err(DecodeError::UnexpectedEof);
        }

        let (entries, mut offsets_bytes) = rest.split_at(rest.len() - offsets_size);
        let mut items = Vec::with_capacity(count);

        for idx in 0..count {
            let offset = eof(offsets_bytes.read_u32::<LittleEndian>())? as usize;

            let mut entry = entries
                .get(offset..)
                .ok_or(DecodeError::OutOfBounds("record entry offset"))?;

            let key_len = eof(entry.read_u32::<LittleEndian>())? as usize;

            if entry.len() < key_len {
                return Err(DecodeError::UnexpectedEof);
            }

            let (key_bytes, mut rest) = entry.split_at(key_len);

            if key_bytes.is_empty() {
                return Err(DecodeError::Malformed("empty record key"));
            }

            let snapshot_id = eof(rest.read_u64::<LittleEndian>())?;
            let value_len = eof(rest.read_u32::<LittleEndian>())? as usize;

            if rest.len() < value_len {
                return Err(DecodeError::UnexpectedEof);
            }

            let value = rest
                .get(..value_len)
                .ok_or(DecodeError::UnexpectedEof)?;

            let tuple = Tuple::from_components(key_bytes, value, snapshot_id);

            if let Some(prev) = idx.checked_sub(1).and_then(|i| items.get(i)) {
                let prev: &Tuple = prev;

                if prev.key >= tuple.key {
                    return Err(DecodeError::Malformed("record entries out of order"));
                }
            }

            items.push(tuple);
        }

        // NOTE: Block length fits u32 by construction
        #[allow(clippy::cast_possible_truncation)]
        Ok(Self {
            items: items.into_boxed_slice(),
            raw_size: bytes.len() as u32,
        })
    }
}

/// Streaming record block builder
#[derive(Default)]
pub struct Builder {
    items: Vec<Tuple>,
    entries_size: usize,
}

impl Builder {
    /// Appends a tuple.
    ///
    /// # Panics
    ///
    /// Panics if the tuple's key is not greater than all previous keys.
    pub fn add(&mut self, tuple: Tuple) {
        if let Some(last) = self.items.last() {
            assert!(
                last.key < tuple.key,
                "tuples must be added in ascending key order",
            );
        }

        self.entries_size += tuple.encoded_size();
        self.items.push(tuple);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Last key added so far.
    #[must_use]
    pub fn last_key(&self) -> Option<&Key> {
        self.items.last().map(|item| &item.key)
    }

    /// Size of the encoded block so far.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        self.entries_size + 4 * self.items.len() + 4
    }

    /// Encodes the block, consuming the builder.
    ///
    /// # Panics
    ///
    /// Panics if no tuples were added.
    #[must_use]
    pub fn build(self) -> Vec<u8> {
        assert!(!self.items.is_empty(), "record block may not be empty");

        let mut bytes = Vec::with_capacity(self.encoded_size());
        let mut offsets = Vec::with_capacity(self.items.len());

        // NOTE: Writing into a vec cannot fail, and entry counts,
        // lengths and offsets all fit u32 by construction
        #[allow(clippy::expect_used, clippy::cast_possible_truncation)]
        {
            for tuple in &self.items {
                offsets.push(bytes.len() as u32);

                bytes
                    .write_u32::<LittleEndian>(tuple.key.user_key.len() as u32)
                    .expect("cannot fail");
                bytes.write_all(&tuple.key.user_key).expect("cannot fail");
                bytes
                    .write_u64::<LittleEndian>(tuple.key.snapshot_id)
                    .expect("cannot fail");
                bytes
                    .write_u32::<LittleEndian>(tuple.value.len() as u32)
                    .expect("cannot fail");
                bytes.write_all(&tuple.value).expect("cannot fail");
            }

            for offset in &offsets {
                bytes.write_u32::<LittleEndian>(*offset).expect("cannot fail");
            }

            bytes
                .write_u32::<LittleEndian>(offsets.len() as u32)
                .expect("cannot fail");
        }

        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SnapshotId;
    use test_log::test;

    fn test_block() -> RecordBlock {
        let mut builder = Builder::default();
        builder.add(Tuple::from_components(*b"b", *b"b2", 2));
        builder.add(Tuple::from_components(*b"b", *b"b1", 1));
        builder.add(Tuple::from_components(*b"c", *b"c1", 1));
        builder.add(Tuple::from_components(*b"d", *b"d5", 5));

        #[allow(clippy::expect_used)]
        RecordBlock::decode(&builder.build()).expect("should decode")
    }

    #[test]
    fn record_block_round_trip() {
        let block = test_block();

        assert_eq!(4, block.len());
        assert_eq!(Some(&Key::new(*b"b", 2)), block.first_key());
        assert_eq!(Some(&Key::new(*b"d", 5)), block.last_key());
    }

    #[test]
    fn record_block_point_lookup() {
        let block = test_block();

        // Newest visible version wins
        #[allow(clippy::unwrap_used)]
        let hit = block.get(&Key::new(*b"b", SnapshotId::MAX)).unwrap();
        assert_eq!(*b"b2", &*hit.value);

        // Snapshot-bounded read sees the old version
        #[allow(clippy::unwrap_used)]
        let hit = block.get(&Key::new(*b"b", 1)).unwrap();
        assert_eq!(*b"b1", &*hit.value);

        // Key not present
        assert!(block.get(&Key::new(*b"a", SnapshotId::MAX)).is_none());
        assert!(block.get(&Key::new(*b"e", SnapshotId::MAX)).is_none());

        // Present, but not visible at this snapshot
        assert!(block.get(&Key::new(*b"d", 4)).is_none());
    }

    #[test]
    fn record_block_rejects_snapshot_above_read() {
        let block = test_block();

        // First tuple >= (c, 0) is (d, 5) - user key differs, so no hit
        assert!(block.get(&Key::new(*b"c", 0)).is_none());
    }

    #[test]
    fn record_block_decode_rejects_truncation() {
        let mut builder = Builder::default();
        builder.add(Tuple::from_components(*b"a", *b"a", 1));
        builder.add(Tuple::from_components(*b"b", *b"b", 2));
        let bytes = builder.build();

        for len in 0..bytes.len() {
            assert!(
                RecordBlock::decode(&bytes[..len]).is_err(),
                "truncated block at {len} should not decode"
            );
        }
    }

    #[test]
    #[should_panic(expected = "ascending key order")]
    fn builder_rejects_shadow_order_violation() {
        let mut builder = Builder::default();

        // Older version first is wrong: newer snapshots sort first
        builder.add(Tuple::from_components(*b"a", *b"old", 1));
        builder.add(Tuple::from_components(*b"a", *b"new", 2));
    }
}
