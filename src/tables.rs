use crate::key::Key;
use crate::memtable::Memtable;
use crate::table::SsTable;
use crate::value::{GenerationId, Tuple};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, RwLock};
use std::sync::Arc;

/// Monotonic allocator for generation ids
///
/// At open time it is seeded with max(existing generations) + 1, so ids
/// are never reused across restarts.
#[derive(Debug, Default)]
pub struct GenerationCounter(std::sync::atomic::AtomicU64);

impl GenerationCounter {
    /// Creates a counter that will hand out `next` first.
    #[must_use]
    pub fn with_next(next: GenerationId) -> Self {
        Self(std::sync::atomic::AtomicU64::new(next))
    }

    /// Allocates the next generation id.
    pub fn next(&self) -> GenerationId {
        self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }
}

/// A live table: either an in-memory memtable or an on-disk sorted table
///
/// Handles are cheap to clone; cloning extends the lifetime of the
/// underlying table, which keeps files from being unlinked under a reader.
#[derive(Clone)]
pub enum TableHandle {
    /// Memtable (the writable one, or a frozen one awaiting flush)
    Memory(Arc<Memtable>),

    /// Immutable sorted table file
    Sorted(Arc<SsTable>),
}

impl TableHandle {
    /// Returns the generation id of this table.
    #[must_use]
    pub fn generation(&self) -> GenerationId {
        match self {
            Self::Memory(memtable) => memtable.generation(),
            Self::Sorted(table) => table.generation(),
        }
    }

    /// Point-probes this table for the newest tuple visible at the
    /// key's snapshot.
    pub fn get(&self, key: &Key) -> crate::Result<Option<Tuple>> {
        match self {
            Self::Memory(memtable) => Ok(memtable.get(&key.user_key, key.snapshot_id)),
            Self::Sorted(table) => table.get(key),
        }
    }
}

impl std::fmt::Debug for TableHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory(memtable) => write!(f, "Memory:{}", memtable.generation()),
            Self::Sorted(table) => write!(f, "{table:?}"),
        }
    }
}

/// The ordered set of live tables, keyed by generation
///
/// Readers copy the handle list under a read lock; the writer, the flush
/// worker and the compactor mutate it under a write lock held only for the
/// swap itself. A swap is the single linearization point for flush and
/// compaction visibility.
#[derive(Default)]
pub struct Tables {
    inner: RwLock<BTreeMap<GenerationId, TableHandle>>,

    /// Generations currently being compacted, so concurrent compactions
    /// stay disjoint
    compacting: Mutex<HashSet<GenerationId>>,
}

impl Tables {
    /// Returns all live tables, newest generation first.
    ///
    /// The returned handles pin their tables for as long as they are held.
    #[must_use]
    pub fn read(&self) -> Vec<TableHandle> {
        // NOTE: Lock poisoning is unrecoverable
        #[allow(clippy::expect_used)]
        let inner = self.inner.read().expect("lock is poisoned");

        inner.values().rev().cloned().collect()
    }

    /// Returns all sorted tables, newest generation first.
    #[must_use]
    pub fn sorted_tables(&self) -> Vec<Arc<SsTable>> {
        // NOTE: Lock poisoning is unrecoverable
        #[allow(clippy::expect_used)]
        let inner = self.inner.read().expect("lock is poisoned");

        inner
            .values()
            .rev()
            .filter_map(|handle| match handle {
                TableHandle::Sorted(table) => Some(table.clone()),
                TableHandle::Memory(_) => None,
            })
            .collect()
    }

    /// Generation of the oldest live sorted table, if any.
    #[must_use]
    pub fn oldest_sorted_generation(&self) -> Option<GenerationId> {
        // NOTE: Lock poisoning is unrecoverable
        #[allow(clippy::expect_used)]
        let inner = self.inner.read().expect("lock is poisoned");

        inner.iter().find_map(|(generation, handle)| match handle {
            TableHandle::Sorted(_) => Some(*generation),
            TableHandle::Memory(_) => None,
        })
    }

    /// Registers a new table.
    pub fn insert(&self, handle: TableHandle) {
        // NOTE: Lock poisoning is unrecoverable
        #[allow(clippy::expect_used)]
        let mut inner = self.inner.write().expect("lock is poisoned");

        let prev = inner.insert(handle.generation(), handle);
        debug_assert!(prev.is_none(), "generation ids are never reused");
    }

    /// Atomically replaces the `remove` generations with `add`.
    ///
    /// Removed sorted tables are flagged so their files are unlinked once
    /// the last outstanding reference drops.
    pub fn swap(&self, remove: &[GenerationId], add: Option<TableHandle>) {
        // NOTE: Lock poisoning is unrecoverable
        #[allow(clippy::expect_used)]
        let mut inner = self.inner.write().expect("lock is poisoned");

        for generation in remove {
            if let Some(TableHandle::Sorted(table)) = inner.remove(generation) {
                table.mark_dropped();
            }
        }

        if let Some(handle) = add {
            inner.insert(handle.generation(), handle);
        }
    }

    /// Number of live tables.
    #[must_use]
    pub fn len(&self) -> usize {
        // NOTE: Lock poisoning is unrecoverable
        #[allow(clippy::expect_used)]
        let inner = self.inner.read().expect("lock is poisoned");
        inner.len()
    }

    /// Returns `true` if there are no live tables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Claims a set of generations for compaction.
    ///
    /// Returns `false` without claiming anything if any generation is
    /// already part of an in-flight compaction.
    pub fn begin_compaction(&self, generations: &[GenerationId]) -> bool {
        // NOTE: Lock poisoning is unrecoverable
        #[allow(clippy::expect_used)]
        let mut compacting = self.compacting.lock().expect("lock is poisoned");

        if generations.iter().any(|gen| compacting.contains(gen)) {
            return false;
        }

        compacting.extend(generations.iter().copied());
        true
    }

    /// Releases generations claimed with [`Tables::begin_compaction`].
    pub fn end_compaction(&self, generations: &[GenerationId]) {
        // NOTE: Lock poisoning is unrecoverable
        #[allow(clippy::expect_used)]
        let mut compacting = self.compacting.lock().expect("lock is poisoned");

        for generation in generations {
            compacting.remove(generation);
        }
    }
}
