use crate::SnapshotId;
use std::collections::BTreeMap;
use std::sync::{
    atomic::{
        AtomicU64,
        Ordering::{Acquire, SeqCst},
    },
    Mutex,
};

/// Thread-safe snapshot id allocator and retained-set tracker
///
/// Ids increase strictly monotonically; the id returned by a write is
/// greater than every id handed out before it.
///
/// Retaining an id pins it: compaction will not garbage-collect versions
/// that are still visible at any retained snapshot.
#[derive(Default, Debug)]
pub struct Snapshots {
    counter: AtomicU64,
    retained: Mutex<BTreeMap<SnapshotId, usize>>,
}

impl Snapshots {
    /// Creates a new allocator, setting the counter to some previous value.
    #[must_use]
    pub fn with_last(last: SnapshotId) -> Self {
        Self {
            counter: AtomicU64::new(last),
            retained: Mutex::new(BTreeMap::new()),
        }
    }

    /// Returns the most recently allocated snapshot id.
    #[must_use]
    pub fn current(&self) -> SnapshotId {
        self.counter.load(Acquire)
    }

    /// Allocates the next snapshot id.
    pub fn next(&self) -> SnapshotId {
        let id = self.counter.fetch_add(1, SeqCst) + 1;
        assert!(id < SnapshotId::MAX, "ran out of snapshot ids");
        id
    }

    /// Pins a snapshot id against garbage collection.
    pub fn retain(&self, id: SnapshotId) {
        // NOTE: Lock poisoning is unrecoverable
        #[allow(clippy::expect_used)]
        let mut retained = self.retained.lock().expect("lock is poisoned");
        *retained.entry(id).or_insert(0) += 1;
    }

    /// Unpins a previously retained snapshot id.
    pub fn release(&self, id: SnapshotId) {
        // NOTE: Lock poisoning is unrecoverable
        #[allow(clippy::expect_used)]
        let mut retained = self.retained.lock().expect("lock is poisoned");

        if let Some(count) = retained.get_mut(&id) {
            *count -= 1;

            if *count == 0 {
                retained.remove(&id);
            }
        }
    }

    /// Returns `true` if any snapshot is currently retained.
    #[must_use]
    pub fn has_retained(&self) -> bool {
        // NOTE: Lock poisoning is unrecoverable
        #[allow(clippy::expect_used)]
        let retained = self.retained.lock().expect("lock is poisoned");
        !retained.is_empty()
    }

    /// The garbage collection floor.
    ///
    /// Compaction may drop shadowed versions and tombstones only for ids
    /// strictly below this. With no retained snapshots, everything up to
    /// the current id is eligible.
    #[must_use]
    pub fn gc_floor(&self) -> SnapshotId {
        // NOTE: Lock poisoning is unrecoverable
        #[allow(clippy::expect_used)]
        let retained = self.retained.lock().expect("lock is poisoned");

        retained
            .first_key_value()
            .map_or_else(|| self.current() + 1, |(id, _)| *id)
    }
}
