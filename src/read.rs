use crate::key::Key;
use crate::merge::{BoxedIterator, MergeIterator};
use crate::metrics::Metrics;
use crate::tables::{TableHandle, Tables};
use crate::value::{SnapshotId, Tuple};
use std::sync::Arc;

/// Read path over the live table set
///
/// Point reads probe tables newest-generation first and stop at the first
/// hit; range reads merge per-table iterators. Tombstones are surfaced as
/// tuples with empty values - the database façade maps them to `None`.
pub struct TableReader {
    tables: Arc<Tables>,
    metrics: Arc<Metrics>,
}

impl TableReader {
    pub fn new(tables: Arc<Tables>, metrics: Arc<Metrics>) -> Self {
        Self { tables, metrics }
    }

    /// Returns the newest tuple for the key visible at the key's snapshot.
    pub fn get(&self, key: &Key) -> crate::Result<Option<Tuple>> {
        for handle in self.tables.read() {
            if let Some(tuple) = handle.get(key)? {
                self.metrics
                    .observe_read((key.user_key.len() + tuple.value.len()) as u64);
                return Ok(Some(tuple));
            }
        }

        self.metrics.observe_read(key.user_key.len() as u64);
        Ok(None)
    }

    /// Merged iterator over all live tables, newest visible version of each
    /// user key only, tombstones included.
    pub fn ascending(
        &self,
        start: Option<&[u8]>,
        snapshot: SnapshotId,
    ) -> MergeIterator<'static> {
        self.metrics.observe_scan();

        let start = start.map(Key::scan_floor);
        let sources = Self::sources(&self.tables.read(), start.as_ref(), false);

        MergeIterator::with_direction(sources, false)
            .evict_old_versions(true)
            .snapshot(snapshot)
    }

    /// Descending counterpart of [`TableReader::ascending`].
    pub fn descending(
        &self,
        start: Option<&[u8]>,
        snapshot: SnapshotId,
    ) -> MergeIterator<'static> {
        self.metrics.observe_scan();

        let start = start.map(Key::scan_ceiling);
        let sources = Self::sources(&self.tables.read(), start.as_ref(), true);

        MergeIterator::with_direction(sources, true)
            .evict_old_versions(true)
            .snapshot(snapshot)
    }

    /// Builds one direction-aware iterator per live table.
    ///
    /// Memtable contents are materialized up front (bounded by the memtable
    /// size threshold), so the returned sources own all of their data;
    /// sorted-table iterators pin their file via the table handle.
    fn sources(
        handles: &[TableHandle],
        start: Option<&Key>,
        descending: bool,
    ) -> Vec<BoxedIterator<'static>> {
        handles
            .iter()
            .map(|handle| -> BoxedIterator<'static> {
                match handle {
                    TableHandle::Memory(memtable) => {
                        let items = if descending {
                            memtable.scan_descending(start)
                        } else {
                            memtable.scan_ascending(start)
                        };

                        Box::new(items.into_iter().map(Ok))
                    }
                    TableHandle::Sorted(table) => {
                        if descending {
                            Box::new(table.iter_rev(start.cloned()))
                        } else {
                            Box::new(table.iter(start.cloned()))
                        }
                    }
                }
            })
            .collect()
    }
}
