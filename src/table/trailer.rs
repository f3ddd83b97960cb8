use crate::value::SnapshotId;
use crate::DecodeError;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Write;

pub const TRAILER_MAGIC: u32 = 0x4846_5431; // "HFT1"
pub const TRAILER_SIZE: usize = 64;

/// Fixed-size footer at the end of every table file
///
/// Openers seek to `file_len - TRAILER_SIZE` first; everything else in the
/// file is reached through the offsets recorded here.
///
/// Layout (little-endian):
///
/// ```text
/// [u64 rootIndexOffset][u64 rootIndexSize][u64 filterOffset][u64 filterSize]
/// [u64 tupleCount][u64 indexRegionOffset][u64 maxSnapshotId][u32 pad][u32 magic]
/// ```
///
/// `indexRegionOffset` marks where record blocks end and index blocks
/// begin: an index entry whose child offset lies below it addresses a
/// record block, everything at or above it is another index block.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Trailer {
    pub root_index_offset: u64,
    pub root_index_size: u64,
    pub filter_offset: u64,
    pub filter_size: u64,
    pub tuple_count: u64,
    pub index_region_offset: u64,
    pub max_snapshot: SnapshotId,
}

impl Trailer {
    pub fn encode_into<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        let mut v = Vec::with_capacity(TRAILER_SIZE);

        v.write_u64::<LittleEndian>(self.root_index_offset)?;
        v.write_u64::<LittleEndian>(self.root_index_size)?;
        v.write_u64::<LittleEndian>(self.filter_offset)?;
        v.write_u64::<LittleEndian>(self.filter_size)?;
        v.write_u64::<LittleEndian>(self.tuple_count)?;
        v.write_u64::<LittleEndian>(self.index_region_offset)?;
        v.write_u64::<LittleEndian>(self.max_snapshot)?;

        // Pad, magic goes last
        v.resize(TRAILER_SIZE - 4, 0);
        v.write_u32::<LittleEndian>(TRAILER_MAGIC)?;

        debug_assert_eq!(TRAILER_SIZE, v.len());

        writer.write_all(&v)
    }

    /// Decodes and validates a trailer taken from a file of `file_len` bytes.
    pub fn decode(bytes: &[u8], file_len: u64) -> Result<Self, DecodeError> {
        use crate::coding::eof;

        if bytes.len() != TRAILER_SIZE {
            return Err(DecodeError::UnexpectedEof);
        }

        let mut magic_bytes = bytes
            .get(TRAILER_SIZE - 4..)
            .ok_or(DecodeError::UnexpectedEof)?;
        let magic = eof(magic_bytes.read_u32::<LittleEndian>())?;

        if magic != TRAILER_MAGIC {
            return Err(DecodeError::BadMagic { got: magic });
        }

        let mut reader = bytes;

        let trailer = Self {
            root_index_offset: eof(reader.read_u64::<LittleEndian>())?,
            root_index_size: eof(reader.read_u64::<LittleEndian>())?,
            filter_offset: eof(reader.read_u64::<LittleEndian>())?,
            filter_size: eof(reader.read_u64::<LittleEndian>())?,
            tuple_count: eof(reader.read_u64::<LittleEndian>())?,
            index_region_offset: eof(reader.read_u64::<LittleEndian>())?,
            max_snapshot: eof(reader.read_u64::<LittleEndian>())?,
        };

        // A file is committed iff its magic matches and every region
        // lies inside it
        let data_end = trailer
            .root_index_offset
            .checked_add(trailer.root_index_size)
            .ok_or(DecodeError::OutOfBounds("root index region"))?;

        let filter_end = trailer
            .filter_offset
            .checked_add(trailer.filter_size)
            .ok_or(DecodeError::OutOfBounds("filter region"))?;

        let trailer_start = file_len.saturating_sub(TRAILER_SIZE as u64);

        if data_end > trailer_start
            || filter_end > trailer_start
            || trailer.index_region_offset > trailer.root_index_offset
            || trailer.tuple_count == 0
        {
            return Err(DecodeError::OutOfBounds("trailer regions"));
        }

        Ok(trailer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn fixture() -> Trailer {
        Trailer {
            root_index_offset: 800,
            root_index_size: 100,
            filter_offset: 900,
            filter_size: 50,
            tuple_count: 123,
            index_region_offset: 500,
            max_snapshot: 42,
        }
    }

    #[test]
    fn trailer_round_trip() {
        let trailer = fixture();

        let mut bytes = vec![];
        #[allow(clippy::expect_used)]
        trailer.encode_into(&mut bytes).expect("cannot fail");
        assert_eq!(TRAILER_SIZE, bytes.len());

        #[allow(clippy::expect_used)]
        let decoded = Trailer::decode(&bytes, 1_024).expect("should decode");
        assert_eq!(trailer, decoded);
    }

    #[test]
    fn trailer_rejects_bad_magic() {
        let trailer = fixture();

        let mut bytes = vec![];
        #[allow(clippy::expect_used)]
        trailer.encode_into(&mut bytes).expect("cannot fail");

        #[allow(clippy::expect_used)]
        {
            *bytes.last_mut().expect("not empty") ^= 0xFF;
        }

        assert!(matches!(
            Trailer::decode(&bytes, 1_024),
            Err(DecodeError::BadMagic { .. }),
        ));
    }

    #[test]
    fn trailer_rejects_regions_outside_file() {
        let trailer = fixture();

        let mut bytes = vec![];
        #[allow(clippy::expect_used)]
        trailer.encode_into(&mut bytes).expect("cannot fail");

        // File shorter than the regions the trailer claims
        assert!(Trailer::decode(&bytes, 600).is_err());
    }
}
