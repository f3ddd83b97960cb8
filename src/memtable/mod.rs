use crate::key::Key;
use crate::value::{GenerationId, SnapshotId, Tuple, UserValue};
use crossbeam_skiplist::SkipMap;
use std::ops::Bound::{Included, Unbounded};
use std::sync::atomic::{AtomicU64, Ordering};

/// The memtable serves as an intermediary, ephemeral, sorted storage for new tuples
///
/// When it exceeds the configured size threshold it is frozen and flushed
/// to a sorted table file; until the flush lands it stays readable.
pub struct Memtable {
    /// Generation shared with the paired write-ahead log
    generation: GenerationId,

    /// The actual content, stored in a lock-free skiplist.
    items: SkipMap<Key, UserValue>,

    /// Approximate memtable size.
    ///
    /// If this grows too large, the memtable is frozen and flushed.
    approximate_size: AtomicU64,

    /// Highest snapshot id ever inserted, tracked for O(1) recovery.
    max_snapshot: AtomicU64,
}

impl Memtable {
    #[must_use]
    pub fn new(generation: GenerationId) -> Self {
        Self {
            generation,
            items: SkipMap::new(),
            approximate_size: AtomicU64::default(),
            max_snapshot: AtomicU64::default(),
        }
    }

    /// Returns the generation shared with the paired write-ahead log.
    #[must_use]
    pub fn generation(&self) -> GenerationId {
        self.generation
    }

    /// Inserts a tuple and returns the new approximate size.
    pub fn insert(&self, tuple: Tuple) -> u64 {
        // NOTE: Keys and values are each limited to 32-bit lengths
        #[allow(clippy::expect_used)]
        let item_size: u64 = (tuple.encoded_size() + std::mem::size_of::<Tuple>())
            .try_into()
            .expect("should fit into u64");

        let size_before = self.approximate_size.fetch_add(item_size, Ordering::AcqRel);

        self.max_snapshot
            .fetch_max(tuple.key.snapshot_id, Ordering::AcqRel);

        self.items.insert(tuple.key, tuple.value);

        size_before + item_size
    }

    /// Returns the newest tuple for the key visible at `snapshot`, if any.
    pub fn get(&self, key: &[u8], snapshot: SnapshotId) -> Option<Tuple> {
        // The skiplist is sorted by (user key, snapshot descending), so the
        // smallest entry >= (key, snapshot) is the newest version that is
        // visible at `snapshot` - if its user key still matches.
        let lower_bound = Key::new(key, snapshot);

        let entry = self.items.range(lower_bound..).next()?;

        if &*entry.key().user_key == key {
            Some(Tuple {
                key: entry.key().clone(),
                value: entry.value().clone(),
            })
        } else {
            None
        }
    }

    /// Creates an iterator over all tuples.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = Tuple> + '_ {
        self.items.iter().map(|entry| Tuple {
            key: entry.key().clone(),
            value: entry.value().clone(),
        })
    }

    /// Materializes the tuples of an ascending scan starting at `start`.
    ///
    /// The copy is bounded by the memtable size threshold and lets range
    /// iterators own their data without borrowing the skiplist.
    #[must_use]
    pub fn scan_ascending(&self, start: Option<&Key>) -> Vec<Tuple> {
        let range = match start {
            Some(start) => (Included(start.clone()), Unbounded),
            None => (Unbounded, Unbounded),
        };

        self.items
            .range(range)
            .map(|entry| Tuple {
                key: entry.key().clone(),
                value: entry.value().clone(),
            })
            .collect()
    }

    /// Materializes the tuples of a descending scan starting at `start`.
    #[must_use]
    pub fn scan_descending(&self, start: Option<&Key>) -> Vec<Tuple> {
        let range = match start {
            Some(start) => (Unbounded, Included(start.clone())),
            None => (Unbounded, Unbounded),
        };

        let mut items: Vec<Tuple> = self
            .items
            .range(range)
            .map(|entry| Tuple {
                key: entry.key().clone(),
                value: entry.value().clone(),
            })
            .collect();

        items.reverse();
        items
    }

    /// Gets the approximate size of the memtable in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.approximate_size.load(Ordering::Acquire)
    }

    /// Counts the number of tuples in the memtable.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the memtable is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the highest snapshot id in the memtable.
    #[must_use]
    pub fn max_snapshot(&self) -> Option<SnapshotId> {
        if self.is_empty() {
            None
        } else {
            Some(self.max_snapshot.load(Ordering::Acquire))
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SnapshotId;
    use test_log::test;

    #[test]
    fn memtable_mvcc_point_read() {
        let memtable = Memtable::new(0);

        memtable.insert(Tuple::from_components(*b"key-1", *b"value-1", 1));

        assert_eq!(None, memtable.get(b"key", SnapshotId::MAX));

        let item = memtable.get(b"key-1", SnapshotId::MAX);
        #[allow(clippy::unwrap_used)]
        let item = item.unwrap();
        assert_eq!(*b"value-1", &*item.value);

        memtable.insert(Tuple::from_components(*b"key-1", *b"value-2", 2));

        for (snapshot, expected) in [
            (1, b"value-1" as &[u8]),
            (2, b"value-2"),
            (SnapshotId::MAX, b"value-2"),
        ] {
            let item = memtable.get(b"key-1", snapshot);
            #[allow(clippy::unwrap_used)]
            let item = item.unwrap();
            assert_eq!(expected, &*item.value);
        }
    }

    #[test]
    fn memtable_get_ignores_prefix_match() {
        let memtable = Memtable::new(0);

        memtable.insert(Tuple::from_components(*b"abc0", *b"xyz", 1));
        memtable.insert(Tuple::from_components(*b"abc", *b"def", 255));

        #[allow(clippy::unwrap_used)]
        let item = memtable.get(b"abc", SnapshotId::MAX).unwrap();
        assert_eq!(*b"def", &*item.value);

        #[allow(clippy::unwrap_used)]
        let item = memtable.get(b"abc0", SnapshotId::MAX).unwrap();
        assert_eq!(*b"xyz", &*item.value);
    }

    #[test]
    fn memtable_get_below_first_write_sees_nothing() {
        let memtable = Memtable::new(0);

        memtable.insert(Tuple::from_components(*b"abc", *b"def", 5));

        assert_eq!(None, memtable.get(b"abc", 4));
    }

    #[test]
    fn memtable_size_grows() {
        let memtable = Memtable::new(0);

        let before = memtable.size();
        memtable.insert(Tuple::from_components(*b"abc", *b"def", 1));
        assert!(memtable.size() > before);
        assert_eq!(Some(1), memtable.max_snapshot());
    }

    #[test]
    fn memtable_scan_orders_versions_newest_first() {
        let memtable = Memtable::new(0);

        memtable.insert(Tuple::from_components(*b"a", *b"old", 1));
        memtable.insert(Tuple::from_components(*b"a", *b"new", 2));
        memtable.insert(Tuple::from_components(*b"b", *b"b", 3));

        let items = memtable.scan_ascending(None);
        assert_eq!(3, items.len());
        assert_eq!(2, items[0].key.snapshot_id);
        assert_eq!(1, items[1].key.snapshot_id);
        assert_eq!(*b"b", &*items[2].key.user_key);

        let items = memtable.scan_descending(None);
        assert_eq!(*b"b", &*items[0].key.user_key);
        assert_eq!(1, items[1].key.snapshot_id);
        assert_eq!(2, items[2].key.snapshot_id);
    }
}
