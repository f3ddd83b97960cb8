use crate::compaction::Compactor;
use crate::descriptor_table::DescriptorTable;
use crate::memtable::Memtable;
use crate::metrics::Metrics;
use crate::table::{SsTable, TableBuilder};
use crate::tables::{TableHandle, Tables};
use crate::{Caches, Config};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Everything the flush worker needs to turn a frozen memtable into a
/// sorted table file
pub struct FlushContext {
    pub config: Config,
    pub tables: Arc<Tables>,
    pub caches: Arc<Caches>,
    pub descriptors: Arc<DescriptorTable>,
    pub metrics: Arc<Metrics>,
    pub read_only: Arc<AtomicBool>,
    pub compactor: Arc<Compactor>,
}

/// Flushes a frozen memtable, retrying with backoff.
///
/// Persistent failure degrades the database to read-only; the memtable's
/// write-ahead log stays on disk, so nothing is lost across a restart.
pub fn run(ctx: &FlushContext, memtable: &Arc<Memtable>) {
    for attempt in 0u32..4 {
        match flush_memtable(ctx, memtable) {
            Ok(()) => {
                ctx.metrics.observe_flush();
                ctx.compactor.maybe_schedule();
                return;
            }
            Err(e) => {
                log::warn!(
                    "flush of memtable {} failed (attempt {attempt}): {e}",
                    memtable.generation(),
                );

                std::thread::sleep(std::time::Duration::from_millis(10 << attempt));
            }
        }
    }

    log::error!(
        "flush of memtable {} failed persistently, degrading to read-only",
        memtable.generation(),
    );

    ctx.read_only.store(true, Ordering::Release);
}

/// Streams a frozen memtable into `<generation>.table` and swaps it into
/// the registry. The swap is the linearization point; the write-ahead log
/// is removed right after it.
fn flush_memtable(ctx: &FlushContext, memtable: &Arc<Memtable>) -> crate::Result<()> {
    let generation = memtable.generation();
    let wal_path = crate::file::wal_file_path(&ctx.config.path, generation);

    if memtable.is_empty() {
        log::debug!("dropping empty memtable {generation}");

        ctx.tables.swap(&[generation], None);
        remove_wal(&wal_path);
        return Ok(());
    }

    log::debug!(
        "flushing memtable {generation} ({} tuples) to table file",
        memtable.len(),
    );

    // A previous failed attempt may have left a partial file behind
    let table_path = crate::file::table_file_path(&ctx.config.path, generation);
    if table_path.try_exists()? {
        std::fs::remove_file(&table_path)?;
    }

    let mut writer = TableBuilder::new(generation, &ctx.config)?;

    for tuple in memtable.iter() {
        writer.write(tuple)?;
    }

    writer.finish()?;

    let table = SsTable::open(
        &ctx.config.path,
        generation,
        ctx.caches.clone(),
        ctx.descriptors.clone(),
    )?;

    ctx.tables
        .swap(&[generation], Some(TableHandle::Sorted(Arc::new(table))));

    // From here on the table file is authoritative; a WAL that outlives
    // it (crash before this unlink) is detected as stale at startup
    remove_wal(&wal_path);

    log::debug!("flushed memtable {generation}");

    Ok(())
}

fn remove_wal(path: &std::path::Path) {
    if let Err(e) = std::fs::remove_file(path) {
        log::warn!("failed to remove write-ahead log {path:?}: {e}");
    }
}
