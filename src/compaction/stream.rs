use crate::value::{SnapshotId, Tuple, UserKey};
use std::collections::VecDeque;

/// Applies version retention rules to a raw merge of table iterators
///
/// Input must be in ascending key order with all versions present
/// (no MVCC eviction). For each user key:
///
/// - the newest tuple is always kept,
/// - every older tuple whose snapshot id is at or above the GC floor is
///   kept, because a retained snapshot may still read it,
/// - everything else is dropped.
///
/// A newest-version tombstone below the floor is dropped too, but only if
/// the merge covers the oldest sorted table (otherwise a version buried in
/// an older table would resurrect) and no older kept version follows it
/// (otherwise that version would become visible again).
pub struct CompactionStream<I: Iterator<Item = crate::Result<Tuple>>> {
    inner: I,
    gc_floor: SnapshotId,
    evict_tombstones: bool,

    current_key: Option<UserKey>,
    kept_newest: bool,

    /// Tombstone held back until we know whether an older version of its
    /// key must be kept
    pending_tombstone: Option<Tuple>,

    out: VecDeque<Tuple>,
}

impl<I: Iterator<Item = crate::Result<Tuple>>> CompactionStream<I> {
    pub fn new(inner: I, gc_floor: SnapshotId, evict_tombstones: bool) -> Self {
        Self {
            inner,
            gc_floor,
            evict_tombstones,
            current_key: None,
            kept_newest: false,
            pending_tombstone: None,
            out: VecDeque::new(),
        }
    }
}

impl<I: Iterator<Item = crate::Result<Tuple>>> Iterator for CompactionStream<I> {
    type Item = crate::Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(tuple) = self.out.pop_front() {
                return Some(Ok(tuple));
            }

            let Some(item) = self.inner.next() else {
                // A still-pending tombstone shadowed nothing that survives,
                // so it is dropped with the stream
                self.pending_tombstone = None;
                return None;
            };

            let tuple = match item {
                Ok(tuple) => tuple,
                Err(e) => return Some(Err(e)),
            };

            if self.current_key.as_ref() != Some(&tuple.key.user_key) {
                self.current_key = Some(tuple.key.user_key.clone());
                self.kept_newest = false;
                self.pending_tombstone = None;
            }

            if self.kept_newest {
                // Older version: survives only if a retained snapshot
                // may still read it
                if tuple.key.snapshot_id >= self.gc_floor {
                    // The shadowing tombstone has to stay, or this version
                    // would become visible to newer reads again
                    if let Some(tombstone) = self.pending_tombstone.take() {
                        self.out.push_back(tombstone);
                    }

                    self.out.push_back(tuple);
                }

                continue;
            }

            self.kept_newest = true;

            if tuple.is_tombstone()
                && self.evict_tombstones
                && tuple.key.snapshot_id < self.gc_floor
            {
                self.pending_tombstone = Some(tuple);
                continue;
            }

            self.out.push_back(tuple);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn stream(
        tuples: Vec<Tuple>,
        gc_floor: SnapshotId,
        evict_tombstones: bool,
    ) -> Vec<Tuple> {
        #[allow(clippy::unwrap_used)]
        CompactionStream::new(tuples.into_iter().map(Ok), gc_floor, evict_tombstones)
            .collect::<crate::Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn stream_keeps_newest_drops_shadows() {
        let tuples = vec![
            Tuple::from_components(*b"a", *b"v3", 3),
            Tuple::from_components(*b"a", *b"v2", 2),
            Tuple::from_components(*b"a", *b"v1", 1),
            Tuple::from_components(*b"b", *b"v1", 1),
        ];

        let kept = stream(tuples, 10, true);

        assert_eq!(
            vec![
                Tuple::from_components(*b"a", *b"v3", 3),
                Tuple::from_components(*b"b", *b"v1", 1),
            ],
            kept,
        );
    }

    #[test]
    fn stream_keeps_versions_at_or_above_floor() {
        let tuples = vec![
            Tuple::from_components(*b"a", *b"v3", 3),
            Tuple::from_components(*b"a", *b"v2", 2),
            Tuple::from_components(*b"a", *b"v1", 1),
        ];

        let kept = stream(tuples, 2, true);

        assert_eq!(
            vec![
                Tuple::from_components(*b"a", *b"v3", 3),
                Tuple::from_components(*b"a", *b"v2", 2),
            ],
            kept,
        );
    }

    #[test]
    fn stream_drops_tombstone_and_shadows_at_oldest_level() {
        let tuples = vec![
            Tuple::new_tombstone(*b"a", 3),
            Tuple::from_components(*b"a", *b"v1", 1),
            Tuple::from_components(*b"b", *b"v1", 1),
        ];

        let kept = stream(tuples, 10, true);

        assert_eq!(vec![Tuple::from_components(*b"b", *b"v1", 1)], kept);
    }

    #[test]
    fn stream_keeps_tombstone_when_not_at_oldest_level() {
        let tuples = vec![
            Tuple::new_tombstone(*b"a", 3),
            Tuple::from_components(*b"a", *b"v1", 1),
        ];

        let kept = stream(tuples, 10, false);

        assert_eq!(vec![Tuple::new_tombstone(*b"a", 3)], kept);
    }

    #[test]
    fn stream_keeps_tombstone_over_retained_version() {
        let tuples = vec![
            Tuple::new_tombstone(*b"a", 3),
            Tuple::from_components(*b"a", *b"v2", 2),
            Tuple::from_components(*b"a", *b"v1", 1),
        ];

        // Snapshot 2 is retained: v2 must stay readable, so the tombstone
        // must stay too, or newer reads would see v2 again
        let kept = stream(tuples, 2, true);

        assert_eq!(
            vec![
                Tuple::new_tombstone(*b"a", 3),
                Tuple::from_components(*b"a", *b"v2", 2),
            ],
            kept,
        );
    }

    #[test]
    fn stream_keeps_recent_tombstone() {
        let tuples = vec![
            Tuple::new_tombstone(*b"a", 5),
            Tuple::from_components(*b"a", *b"v1", 1),
        ];

        // Tombstone at or above the floor is not eligible for eviction
        let kept = stream(tuples, 5, true);

        assert_eq!(vec![Tuple::new_tombstone(*b"a", 5)], kept);
    }
}
