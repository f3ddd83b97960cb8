use crate::key::Key;
use crate::Slice;

/// User defined key
pub type UserKey = Slice;

/// User defined data (blob of bytes)
#[allow(clippy::module_name_repetitions)]
pub type UserValue = Slice;

/// Snapshot id - a monotonically increasing counter
///
/// Every successful write receives a fresh snapshot id.
///
/// A tuple with a higher snapshot id shadows a tuple with the
/// same user key and a lower snapshot id. This enables MVCC.
///
/// Stale versions are lazily garbage-collected during compaction.
pub type SnapshotId = u64;

/// Generation id - a monotonically increasing counter identifying
/// a memtable + write-ahead log pair, or a sorted table file
pub type GenerationId = u64;

/// Internal representation of KV pairs
#[derive(Clone, Eq)]
pub struct Tuple {
    /// Internal key
    pub key: Key,

    /// User-defined value - an arbitrary byte array
    ///
    /// An empty value marks a tombstone (logical delete).
    pub value: UserValue,
}

impl Tuple {
    /// Creates a new [`Tuple`].
    ///
    /// # Panics
    ///
    /// Panics if the key is empty or longer than 2^32 bytes,
    /// or the value is longer than 2^32 bytes.
    pub fn new<V: Into<UserValue>>(key: Key, value: V) -> Self {
        let value = value.into();

        assert!(!key.user_key.is_empty(), "key may not be empty");
        assert!(
            u32::try_from(value.len()).is_ok(),
            "values can be 2^32 bytes in length"
        );

        Self { key, value }
    }

    /// Creates a new [`Tuple`] from its parts.
    pub fn from_components<K: Into<UserKey>, V: Into<UserValue>>(
        user_key: K,
        value: V,
        snapshot_id: SnapshotId,
    ) -> Self {
        let key = Key::new(user_key, snapshot_id);
        Self::new(key, value)
    }

    /// Creates a new tombstone.
    pub fn new_tombstone<K: Into<UserKey>>(user_key: K, snapshot_id: SnapshotId) -> Self {
        let key = Key::new(user_key, snapshot_id);
        Self::new(key, vec![])
    }

    /// An empty value is the tombstone marker.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.value.is_empty()
    }

    /// Size of the encoded tuple inside a record block.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        // u32 key len + key + u64 snapshot + u32 value len + value
        4 + self.key.user_key.len() + 8 + 4 + self.value.len()
    }
}

impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Ord for Tuple {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

impl PartialOrd for Tuple {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Debug for Tuple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} => {:?}",
            self.key,
            if self.value.len() >= 64 {
                format!("[ ... {} bytes ]", self.value.len())
            } else {
                format!("{:?}", self.value)
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn tuple_tombstone() {
        let tombstone = Tuple::new_tombstone(*b"abc", 5);
        assert!(tombstone.is_tombstone());

        let value = Tuple::from_components(*b"abc", *b"def", 5);
        assert!(!value.is_tombstone());
    }

    #[test]
    fn tuple_ordering_shadows_first() {
        let newer = Tuple::from_components(*b"abc", *b"new", 2);
        let older = Tuple::from_components(*b"abc", *b"old", 1);
        assert!(newer < older);
    }
}
