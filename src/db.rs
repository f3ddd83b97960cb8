use crate::compaction::Compactor;
use crate::descriptor_table::DescriptorTable;
use crate::executor::Executor;
use crate::flush::FlushContext;
use crate::memtable::Memtable;
use crate::merge::MergeIterator;
use crate::metrics::Metrics;
use crate::read::TableReader;
use crate::snapshot::Snapshots;
use crate::stop_signal::StopSignal;
use crate::tables::{GenerationCounter, TableHandle, Tables};
use crate::value::{SnapshotId, UserKey, UserValue};
use crate::wal::Wal;
use crate::write::TableWriter;
use crate::{Config, KvPair};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use crate::compaction::worker::CompactionHandle;

/// How many table file handles stay pooled at once
const DESCRIPTOR_CACHE_CAPACITY: usize = 256;

/// Iterator over visible records, oldest-shadowed versions and tombstones
/// already filtered out
///
/// Captures its snapshot id and table references at creation: tuples
/// written later are invisible, and no table file it reads from can be
/// unlinked while it lives.
pub struct DbIterator {
    inner: MergeIterator<'static>,
}

impl Iterator for DbIterator {
    type Item = crate::Result<KvPair>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next()? {
                Ok(tuple) if tuple.is_tombstone() => {}
                Ok(tuple) => return Some(Ok((tuple.key.user_key, tuple.value))),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

struct DbInner {
    tables: Arc<Tables>,
    snapshots: Arc<Snapshots>,
    metrics: Arc<Metrics>,
    writer: TableWriter,
    reader: TableReader,
    compactor: Arc<Compactor>,
    flush_executor: Arc<Executor>,
    stop_signal: StopSignal,
    closed: AtomicBool,
    read_only: Arc<AtomicBool>,
}

impl Drop for DbInner {
    fn drop(&mut self) {
        log::trace!("dropping database");
        self.shutdown();
    }
}

impl DbInner {
    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        log::debug!("closing database");

        self.stop_signal.send();

        // Flush jobs drain first so compactions see the final table set
        self.flush_executor.shutdown();
        self.compactor.shutdown();
    }

    fn guard_open(&self) -> crate::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(crate::Error::Closed);
        }

        Ok(())
    }
}

/// A snapshot-consistent embedded key-value store
///
/// Cloning is cheap and shares the same underlying database.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DbInner>,
}

impl Database {
    /// Opens a database, recovering existing state from the directory.
    ///
    /// Committed table files are loaded; corrupt ones are quarantined.
    /// Write-ahead logs without a committed table are replayed and
    /// their memtables scheduled for flushing.
    pub(crate) fn open(config: Config) -> crate::Result<Self> {
        log::info!("opening database at {:?}", config.path);

        let caches = Arc::new(crate::Caches::with_capacity_bytes(
            config.record_block_cache_bytes,
            config.index_block_cache_bytes,
        ));

        let descriptors = Arc::new(DescriptorTable::new(DESCRIPTOR_CACHE_CAPACITY));

        let state = crate::recover::recover(&config, &caches, &descriptors)?;

        let tables = Arc::new(Tables::default());

        for handle in state.handles {
            tables.insert(handle);
        }

        let snapshots = Arc::new(Snapshots::with_last(state.last_snapshot));
        let generations = Arc::new(GenerationCounter::with_next(state.next_generation));
        let metrics = Arc::new(Metrics::default());
        let stop_signal = StopSignal::default();
        let read_only = Arc::new(AtomicBool::new(false));

        let compactor = Arc::new(Compactor::new(
            config.clone(),
            tables.clone(),
            caches.clone(),
            descriptors.clone(),
            snapshots.clone(),
            metrics.clone(),
            generations.clone(),
            stop_signal.clone(),
            read_only.clone(),
        ));

        let flush_executor = Arc::new(Executor::new("flush", 1, config.flush_queue_len));

        let flush_ctx = Arc::new(FlushContext {
            config: config.clone(),
            tables: tables.clone(),
            caches,
            descriptors,
            metrics: metrics.clone(),
            read_only: read_only.clone(),
            compactor: compactor.clone(),
        });

        // Fresh writable generation
        let generation = generations.next();
        let wal = Wal::create(&config.path, generation)?;
        let memtable = Arc::new(Memtable::new(generation));
        tables.insert(TableHandle::Memory(memtable.clone()));

        let writer = TableWriter::new(
            config,
            tables.clone(),
            snapshots.clone(),
            generations,
            flush_executor.clone(),
            flush_ctx.clone(),
            read_only.clone(),
            memtable,
            wal,
        );

        let reader = TableReader::new(tables.clone(), metrics.clone());

        // Recovered memtables flush in the background, oldest first
        for memtable in state.frozen_memtables {
            let ctx = flush_ctx.clone();
            flush_executor.submit(move || crate::flush::run(&ctx, &memtable))?;
        }

        Ok(Self {
            inner: Arc::new(DbInner {
                tables,
                snapshots,
                metrics,
                writer,
                reader,
                compactor,
                flush_executor,
                stop_signal,
                closed: AtomicBool::new(false),
                read_only,
            }),
        })
    }

    /// Writes a key-value pair, returning its snapshot id.
    ///
    /// An empty value acts as a delete, see [`Database::delete`].
    ///
    /// # Errors
    ///
    /// Returns error if an I/O error occurred, the database is closed,
    /// or it degraded to read-only.
    pub fn put<K: Into<UserKey>, V: Into<UserValue>>(
        &self,
        key: K,
        value: V,
    ) -> crate::Result<SnapshotId> {
        self.write(key.into(), value.into(), false)
    }

    /// Like [`Database::put`], but fsyncs the write-ahead log before
    /// returning.
    pub fn put_fsync<K: Into<UserKey>, V: Into<UserValue>>(
        &self,
        key: K,
        value: V,
    ) -> crate::Result<SnapshotId> {
        self.write(key.into(), value.into(), true)
    }

    /// Deletes a key by writing a tombstone, returning its snapshot id.
    ///
    /// Older versions stay readable at their snapshots until compaction
    /// reclaims them.
    pub fn delete<K: Into<UserKey>>(&self, key: K) -> crate::Result<SnapshotId> {
        self.write(key.into(), UserValue::default(), false)
    }

    fn write(
        &self,
        key: UserKey,
        value: UserValue,
        fsync: bool,
    ) -> crate::Result<SnapshotId> {
        self.inner.guard_open()?;

        self.inner
            .metrics
            .observe_write((key.len() + value.len()) as u64);

        self.inner.writer.write(key, value, fsync)
    }

    /// Returns the newest visible value for a key.
    pub fn get<K: AsRef<[u8]>>(&self, key: K) -> crate::Result<Option<UserValue>> {
        self.get_at(key, self.inner.snapshots.current())
    }

    /// Returns the value for a key as it was at the given snapshot.
    pub fn get_at<K: AsRef<[u8]>>(
        &self,
        key: K,
        snapshot: SnapshotId,
    ) -> crate::Result<Option<UserValue>> {
        self.inner.guard_open()?;

        let key = crate::Key::new(key.as_ref(), snapshot);
        let tuple = self.inner.reader.get(&key)?;

        Ok(tuple
            .filter(|tuple| !tuple.is_tombstone())
            .map(|tuple| tuple.value))
    }

    /// The most recently allocated snapshot id.
    #[must_use]
    pub fn current_snapshot(&self) -> SnapshotId {
        self.inner.snapshots.current()
    }

    /// Pins a snapshot id: compaction will not reclaim versions that are
    /// still visible at it.
    pub fn retain_snapshot(&self, snapshot: SnapshotId) {
        self.inner.snapshots.retain(snapshot);
    }

    /// Releases a pin taken with [`Database::retain_snapshot`].
    pub fn release_snapshot(&self, snapshot: SnapshotId) {
        self.inner.snapshots.release(snapshot);
    }

    /// Iterates records in ascending key order, optionally from a start
    /// key, at the given snapshot (or the current one).
    pub fn ascending_iterator(
        &self,
        start: Option<&[u8]>,
        snapshot: Option<SnapshotId>,
    ) -> crate::Result<DbIterator> {
        self.inner.guard_open()?;

        let snapshot = snapshot.unwrap_or_else(|| self.inner.snapshots.current());

        Ok(DbIterator {
            inner: self.inner.reader.ascending(start, snapshot),
        })
    }

    /// Iterates records in descending key order, optionally from a start
    /// key, at the given snapshot (or the current one).
    pub fn descending_iterator(
        &self,
        start: Option<&[u8]>,
        snapshot: Option<SnapshotId>,
    ) -> crate::Result<DbIterator> {
        self.inner.guard_open()?;

        let snapshot = snapshot.unwrap_or_else(|| self.inner.snapshots.current());

        Ok(DbIterator {
            inner: self.inner.reader.descending(start, snapshot),
        })
    }

    /// Rotates the active memtable out and waits until every outstanding
    /// flush (including the rotated one) has landed on disk.
    pub fn flush(&self) -> crate::Result<()> {
        self.inner.guard_open()?;

        self.inner.writer.rotate_active()?;

        // The flush worker is a single FIFO lane; once this marker runs,
        // all previously queued flushes have completed
        let (sender, receiver) = crossbeam_channel::bounded(1);

        self.inner.flush_executor.submit(move || {
            let _ = sender.send(());
        })?;

        receiver.recv().map_err(|_| crate::Error::Closed)
    }

    /// Schedules a compaction round, returning a handle to wait on.
    ///
    /// With compaction disabled this is a no-op whose handle resolves
    /// immediately.
    pub fn compact(&self) -> crate::Result<CompactionHandle> {
        self.inner.guard_open()?;
        self.inner.compactor.schedule()
    }

    /// Number of live tables (memtables + sorted tables).
    #[must_use]
    pub fn table_count(&self) -> usize {
        self.inner.tables.len()
    }

    /// Operation counters.
    #[must_use]
    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    /// Writes the operation counters to the log.
    pub fn log_metrics(&self) {
        self.inner.metrics.log_metrics();
    }

    /// Returns `true` if the database degraded to read-only after
    /// persistent background failure.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.inner.read_only.load(Ordering::Acquire)
    }

    /// Closes the database.
    ///
    /// Idempotent; blocks until background flushes and compactions have
    /// quiesced. Buffered writes survive in the write-ahead log and are
    /// replayed on the next open.
    pub fn close(&self) {
        self.inner.shutdown();
    }
}
