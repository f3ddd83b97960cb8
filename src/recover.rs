use crate::descriptor_table::DescriptorTable;
use crate::file::{BROKEN_EXT, TABLE_EXT, WAL_EXT};
use crate::memtable::Memtable;
use crate::table::SsTable;
use crate::tables::TableHandle;
use crate::value::{GenerationId, SnapshotId};
use crate::{Caches, Config};
use std::collections::BTreeSet;
use std::sync::Arc;

/// State reconstructed from the database directory at open time
pub struct RecoveredState {
    /// Every surviving table, sorted and in-memory
    pub handles: Vec<TableHandle>,

    /// Memtables rebuilt from orphaned write-ahead logs; they must be
    /// scheduled for flushing once the database is up
    pub frozen_memtables: Vec<Arc<Memtable>>,

    /// First generation id to hand out
    pub next_generation: GenerationId,

    /// Highest snapshot id seen anywhere on disk
    pub last_snapshot: SnapshotId,
}

/// Scans the database directory and rebuilds the live table set.
///
/// - A `.table` file with a valid trailer is opened; a corrupt one is
///   quarantined (renamed `.broken`) and skipped.
/// - A `.write` log without a healthy table of the same generation is
///   replayed into a frozen memtable; its CRC-clean prefix survives a
///   crash mid-append. A log whose table exists is a leftover from a
///   crash between flush and log removal, and is deleted.
pub fn recover(
    config: &Config,
    caches: &Arc<Caches>,
    descriptors: &Arc<DescriptorTable>,
) -> crate::Result<RecoveredState> {
    std::fs::create_dir_all(&config.path)?;

    let mut table_generations = BTreeSet::new();
    let mut wal_generations = BTreeSet::new();

    for dir_entry in std::fs::read_dir(&config.path)? {
        let path = dir_entry?.path();

        match crate::file::parse_file_name(&path) {
            Some((generation, TABLE_EXT)) => {
                table_generations.insert(generation);
            }
            Some((generation, WAL_EXT)) => {
                wal_generations.insert(generation);
            }
            _ => {
                log::debug!("ignoring unrelated file {path:?}");
            }
        }
    }

    let mut handles = Vec::new();
    let mut frozen_memtables = Vec::new();
    let mut healthy_tables = BTreeSet::new();
    let mut max_generation = None;
    let mut last_snapshot = 0;

    for &generation in &table_generations {
        max_generation = max_generation.max(Some(generation));

        match SsTable::open(&config.path, generation, caches.clone(), descriptors.clone()) {
            Ok(table) => {
                last_snapshot = last_snapshot.max(table.max_snapshot());
                healthy_tables.insert(generation);
                handles.push(TableHandle::Sorted(Arc::new(table)));
            }
            Err(e @ crate::Error::CorruptTable { .. }) => {
                quarantine(config, generation, &e);
            }
            Err(e) => return Err(e),
        }
    }

    for &generation in &wal_generations {
        max_generation = max_generation.max(Some(generation));

        let wal_path = crate::file::wal_file_path(&config.path, generation);

        if healthy_tables.contains(&generation) {
            // Flush completed but the log removal did not; the table
            // is authoritative
            log::debug!("removing stale write-ahead log {wal_path:?}");
            std::fs::remove_file(&wal_path)?;
            continue;
        }

        let tuples = crate::wal::replay(&wal_path)?;

        if tuples.is_empty() {
            log::debug!("removing empty write-ahead log {wal_path:?}");
            std::fs::remove_file(&wal_path)?;
            continue;
        }

        log::info!(
            "recovered {} tuples from write-ahead log {generation}",
            tuples.len(),
        );

        let memtable = Arc::new(Memtable::new(generation));

        for tuple in tuples {
            memtable.insert(tuple);
        }

        last_snapshot = last_snapshot.max(memtable.max_snapshot().unwrap_or(0));

        handles.push(TableHandle::Memory(memtable.clone()));
        frozen_memtables.push(memtable);
    }

    Ok(RecoveredState {
        handles,
        frozen_memtables,
        next_generation: max_generation.map_or(0, |generation| generation + 1),
        last_snapshot,
    })
}

/// Renames a table file that failed validation so it is out of the way
/// but can still be inspected.
fn quarantine(config: &Config, generation: GenerationId, error: &crate::Error) {
    let path = crate::file::table_file_path(&config.path, generation);
    let broken = path.with_extension(format!("{TABLE_EXT}.{BROKEN_EXT}"));

    log::warn!("table {generation} failed to open ({error}), quarantining as {broken:?}");

    if let Err(e) = std::fs::rename(&path, &broken) {
        log::error!("failed to quarantine table file {path:?}: {e}");
    }
}
