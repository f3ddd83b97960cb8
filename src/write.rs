use crate::executor::Executor;
use crate::flush::FlushContext;
use crate::memtable::Memtable;
use crate::snapshot::Snapshots;
use crate::tables::{GenerationCounter, TableHandle, Tables};
use crate::value::{SnapshotId, Tuple, UserKey, UserValue};
use crate::wal::Wal;
use crate::Config;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// The writable memtable and its paired write-ahead log
struct ActiveGeneration {
    memtable: Arc<Memtable>,
    wal: Wal,
}

/// Write path: WAL append, memtable insert, snapshot allocation, rotation
///
/// Writes serialize on a mutex guarding the active memtable + WAL pair;
/// the critical section is short (append + insert). Readers never take it.
pub struct TableWriter {
    config: Config,
    tables: Arc<Tables>,
    snapshots: Arc<Snapshots>,
    generations: Arc<GenerationCounter>,
    flush_executor: Arc<Executor>,
    flush_ctx: Arc<FlushContext>,
    read_only: Arc<AtomicBool>,

    active: Mutex<ActiveGeneration>,
}

impl TableWriter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        tables: Arc<Tables>,
        snapshots: Arc<Snapshots>,
        generations: Arc<GenerationCounter>,
        flush_executor: Arc<Executor>,
        flush_ctx: Arc<FlushContext>,
        read_only: Arc<AtomicBool>,
        memtable: Arc<Memtable>,
        wal: Wal,
    ) -> Self {
        Self {
            config,
            tables,
            snapshots,
            generations,
            flush_executor,
            flush_ctx,
            read_only,
            active: Mutex::new(ActiveGeneration { memtable, wal }),
        }
    }

    /// Writes a tuple and returns its snapshot id.
    ///
    /// The returned id is strictly greater than the id of every prior
    /// write, and the tuple is readable at it the moment this returns.
    pub fn write(
        &self,
        user_key: UserKey,
        value: UserValue,
        fsync: bool,
    ) -> crate::Result<SnapshotId> {
        if self.read_only.load(Ordering::Acquire) {
            return Err(crate::Error::ReadOnly);
        }

        // NOTE: Lock poisoning is unrecoverable
        #[allow(clippy::expect_used)]
        let mut active = self.active.lock().expect("lock is poisoned");

        let snapshot_id = self.snapshots.next();
        let tuple = Tuple::from_components(user_key, value, snapshot_id);

        active
            .wal
            .append(&tuple, fsync || self.config.fsync_on_write)?;

        let new_size = active.memtable.insert(tuple);

        if new_size > self.config.memtable_max_bytes {
            self.rotate(&mut active)?;
        }

        Ok(snapshot_id)
    }

    /// Rotates the active memtable out if it holds anything,
    /// scheduling its flush.
    pub fn rotate_active(&self) -> crate::Result<()> {
        // NOTE: Lock poisoning is unrecoverable
        #[allow(clippy::expect_used)]
        let mut active = self.active.lock().expect("lock is poisoned");

        if active.memtable.is_empty() {
            return Ok(());
        }

        self.rotate(&mut active)
    }

    /// Freezes the active memtable + WAL pair, installs a fresh one under
    /// the next generation id, and hands the frozen memtable to the flush
    /// worker. Failing to allocate the new WAL is a capacity error.
    fn rotate(&self, active: &mut ActiveGeneration) -> crate::Result<()> {
        let generation = self.generations.next();

        let wal = Wal::create(&self.config.path, generation).map_err(|e| match e {
            crate::Error::Io(e) => crate::Error::Capacity(e),
            e => e,
        })?;

        let memtable = Arc::new(Memtable::new(generation));
        self.tables.insert(TableHandle::Memory(memtable.clone()));

        let frozen = std::mem::replace(active, ActiveGeneration { memtable, wal });

        log::debug!(
            "rotated memtable {} ({} bytes), next generation is {generation}",
            frozen.memtable.generation(),
            frozen.memtable.size(),
        );

        // The frozen WAL handle closes here; the file stays until the
        // flush worker swapped the table in
        let frozen_memtable = frozen.memtable;

        let ctx = self.flush_ctx.clone();
        self.flush_executor
            .submit(move || crate::flush::run(&ctx, &frozen_memtable))?;

        Ok(())
    }
}
