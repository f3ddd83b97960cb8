use super::bit_array::{BitArrayBuilder, BitArrayReader};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Derives a second, independent hash from the primary key hash.
fn secondary_hash(h1: u64) -> u64 {
    h1.wrapping_shr(32).wrapping_mul(0x51_7c_c1_b7_27_22_0a_95)
}

/// 4 GiB of filter bits; far beyond any sane per-table filter
const MAX_FILTER_BITS: usize = 1 << 35;

/// A standard bloom filter
///
/// One is built per table file over its distinct user keys and answers
/// `maybe contained` before any disk access happens. Never produces a false
/// negative.
///
/// The filter uses double hashing instead of `k` independent hash functions.
#[derive(Debug, PartialEq)]
pub struct BloomFilter {
    /// Raw bytes exposed as bit array
    inner: BitArrayReader,

    /// Bit count
    m: usize,

    /// Number of hash probes
    k: usize,
}

impl BloomFilter {
    /// Encoded size in bytes.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        8 + 8 + self.inner.bytes().len()
    }

    pub fn encode_into<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u64::<LittleEndian>(self.m as u64)?;
        writer.write_u64::<LittleEndian>(self.k as u64)?;
        writer.write_all(self.inner.bytes())?;
        Ok(())
    }

    pub fn decode_from<R: Read>(reader: &mut R) -> Result<Self, crate::DecodeError> {
        use crate::coding::eof;

        let m = eof(reader.read_u64::<LittleEndian>())? as usize;
        let k = eof(reader.read_u64::<LittleEndian>())? as usize;

        // NOTE: The size guard keeps a corrupt length from forcing a huge
        // allocation before the read fails
        if k == 0 || m == 0 || m % 8 != 0 || m > MAX_FILTER_BITS {
            return Err(crate::DecodeError::Malformed("bloom filter dimensions"));
        }

        let mut bytes = vec![0; m / 8];
        eof(reader.read_exact(&mut bytes))?;

        Ok(Self {
            inner: BitArrayReader::new(bytes.into()),
            m,
            k,
        })
    }

    /// Returns `true` if the key may be contained.
    ///
    /// Will never have a false negative.
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        self.contains_hash(crate::hash::hash64(key))
    }

    /// Returns `true` if the hash may be contained.
    #[must_use]
    pub fn contains_hash(&self, mut h1: u64) -> bool {
        let mut h2 = secondary_hash(h1);

        for i in 1..=(self.k as u64) {
            let idx = h1 % (self.m as u64);

            // NOTE: Index is in bounds because of the modulo
            #[allow(clippy::cast_possible_truncation)]
            if !self.inner.get(idx as usize) {
                return false;
            }

            h1 = h1.wrapping_add(h2);
            h2 = h2.wrapping_mul(i);
        }

        true
    }
}

/// Bloom filter builder
///
/// Key hashes are buffered during table construction (the key count is not
/// known up front), then baked into a filter sized for the configured false
/// positive rate.
#[derive(Debug)]
pub struct Builder {
    /// Raw bytes exposed as bit array
    inner: BitArrayBuilder,

    /// Bit count
    m: usize,

    /// Number of hash probes
    k: usize,
}

impl Builder {
    /// Constructs a bloom filter that can hold `n` items
    /// while maintaining a certain false positive rate `fpr`.
    #[must_use]
    pub fn with_fp_rate(n: usize, fpr: f32) -> Self {
        use std::f32::consts::LN_2;

        assert!(n > 0);

        // NOTE: Some sensible minimum
        let fpr = fpr.max(0.000_000_1);

        let m = Self::calculate_m(n, fpr);
        let bpk = m / n;
        let k = (((bpk as f32) * LN_2) as usize).max(1);

        Self {
            inner: BitArrayBuilder::with_capacity(m / 8),
            m,
            k,
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    #[allow(clippy::cast_sign_loss)]
    fn calculate_m(n: usize, fp_rate: f32) -> usize {
        use std::f32::consts::LN_2;

        let n = n as f32;
        let ln2_squared = LN_2.powi(2);

        let numerator = n * fp_rate.ln();
        let m = -(numerator / ln2_squared);

        // Round up to next byte
        ((m / 8.0).ceil() * 8.0) as usize
    }

    /// Adds a key hash to the filter.
    pub fn set_with_hash(&mut self, mut h1: u64) {
        let mut h2 = secondary_hash(h1);

        for i in 1..=(self.k as u64) {
            let idx = h1 % (self.m as u64);

            // NOTE: Index is in bounds because of the modulo
            #[allow(clippy::cast_possible_truncation)]
            self.inner.enable_bit(idx as usize);

            h1 = h1.wrapping_add(h2);
            h2 = h2.wrapping_mul(i);
        }
    }

    /// Gets the hash of a key.
    #[must_use]
    pub fn get_hash(key: &[u8]) -> u64 {
        crate::hash::hash64(key)
    }

    #[must_use]
    pub fn build(self) -> BloomFilter {
        BloomFilter {
            inner: BitArrayReader::new(self.inner.bytes().into()),
            m: self.m,
            k: self.k,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn bloom_calculate_m() {
        assert_eq!(9_592, Builder::calculate_m(1_000, 0.01));
        assert_eq!(4_800, Builder::calculate_m(1_000, 0.1));
        assert_eq!(4_792_536, Builder::calculate_m(1_000_000, 0.1));
    }

    #[test]
    fn bloom_basic() {
        let mut builder = Builder::with_fp_rate(10, 0.0001);

        let keys = [
            b"item0" as &[u8],
            b"item1",
            b"item2",
            b"item3",
            b"item4",
            b"item5",
            b"item6",
            b"item7",
            b"item8",
            b"item9",
        ];

        for key in &keys {
            builder.set_with_hash(Builder::get_hash(key));
        }

        let filter = builder.build();

        for key in &keys {
            assert!(filter.contains(key));
        }

        assert!(!filter.contains(b"asdasdasdasdasdasdasd"));
    }

    #[test]
    fn bloom_serde_round_trip() -> crate::Result<()> {
        let mut builder = Builder::with_fp_rate(10, 0.0001);

        let keys = [
            b"item0" as &[u8],
            b"item1",
            b"item2",
            b"item3",
            b"item4",
            b"item5",
            b"item6",
            b"item7",
            b"item8",
            b"item9",
        ];

        for key in &keys {
            builder.set_with_hash(Builder::get_hash(key));
        }

        let filter = builder.build();

        let mut bytes = vec![];
        filter.encode_into(&mut bytes)?;

        #[allow(clippy::expect_used)]
        let copy = BloomFilter::decode_from(&mut &bytes[..]).expect("should decode");

        assert_eq!(filter, copy);

        for key in &keys {
            assert!(copy.contains(key));
        }
        assert!(!copy.contains(b"item10"));
        assert!(!copy.contains(b"cxycxycxy"));

        Ok(())
    }

    #[test]
    fn bloom_fpr() {
        let item_count = 100_000;
        let wanted_fpr = 0.1;

        let mut builder = Builder::with_fp_rate(item_count, wanted_fpr);

        for key in (0..item_count).map(|_| nanoid::nanoid!()) {
            builder.set_with_hash(Builder::get_hash(key.as_bytes()));
        }

        let filter = builder.build();

        let mut false_positives = 0;

        for key in (0..item_count).map(|_| nanoid::nanoid!()) {
            if filter.contains(key.as_bytes()) {
                false_positives += 1;
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let fpr = false_positives as f32 / item_count as f32;
        assert!(fpr < 0.13);
    }
}
