use super::stream::CompactionStream;
use super::{Choice, CompactionStrategy};
use crate::descriptor_table::DescriptorTable;
use crate::executor::Executor;
use crate::merge::{BoxedIterator, MergeIterator};
use crate::metrics::Metrics;
use crate::snapshot::Snapshots;
use crate::stop_signal::StopSignal;
use crate::table::{SsTable, TableBuilder};
use crate::tables::{GenerationCounter, TableHandle, Tables};
use crate::{Caches, CompactionPolicy, Config, GenerationId};
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Completion handle of a scheduled compaction
pub struct CompactionHandle(Receiver<crate::Result<()>>);

impl CompactionHandle {
    /// Blocks until the compaction finished, surfacing its result.
    pub fn wait(self) -> crate::Result<()> {
        self.0.recv().map_err(|_| crate::Error::Closed)?
    }
}

/// Drives background merging of sorted tables
///
/// Each trigger consults the configured strategy, claims the chosen input
/// set (concurrent compactions stay disjoint), merge-streams the inputs
/// through the retention filter into a next-generation table, and installs
/// it with a single atomic registry swap. Input files are unlinked once
/// their last reader reference drops.
pub struct Compactor {
    config: Config,
    tables: Arc<Tables>,
    caches: Arc<Caches>,
    descriptors: Arc<DescriptorTable>,
    snapshots: Arc<Snapshots>,
    metrics: Arc<Metrics>,
    generations: Arc<GenerationCounter>,
    stop_signal: StopSignal,
    read_only: Arc<AtomicBool>,
    executor: Executor,
}

impl Compactor {
    /// Creates a new compactor.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        tables: Arc<Tables>,
        caches: Arc<Caches>,
        descriptors: Arc<DescriptorTable>,
        snapshots: Arc<Snapshots>,
        metrics: Arc<Metrics>,
        generations: Arc<GenerationCounter>,
        stop_signal: StopSignal,
        read_only: Arc<AtomicBool>,
    ) -> Self {
        let executor = Executor::new("compaction", config.compaction_workers, 8);

        Self {
            config,
            tables,
            caches,
            descriptors,
            snapshots,
            metrics,
            generations,
            stop_signal,
            read_only,
            executor,
        }
    }

    fn strategy(&self) -> Option<Box<dyn CompactionStrategy>> {
        match self.config.compaction_policy {
            CompactionPolicy::SizeTiered => Some(Box::new(super::SizeTiered::default())),
            CompactionPolicy::Full => Some(Box::new(super::Major)),
            CompactionPolicy::Disabled => None,
        }
    }

    /// Schedules a compaction round and returns a waitable handle.
    pub fn schedule(self: &Arc<Self>) -> crate::Result<CompactionHandle> {
        let (sender, receiver) = bounded(1);
        let this = self.clone();

        self.executor.submit(move || {
            let _ = sender.send(this.run_once());
        })?;

        Ok(CompactionHandle(receiver))
    }

    /// Fire-and-forget trigger, used after a flush lands.
    ///
    /// Errors are retried with backoff; persistent failure degrades the
    /// database to read-only.
    pub fn maybe_schedule(self: &Arc<Self>) {
        if self.config.compaction_policy == CompactionPolicy::Disabled {
            return;
        }

        let this = self.clone();

        let submitted = self.executor.submit(move || {
            for attempt in 0u32..3 {
                if this.stop_signal.is_stopped() {
                    return;
                }

                match this.run_once() {
                    Ok(()) => return,
                    Err(e) => {
                        log::warn!("compaction attempt {attempt} failed: {e}");
                        std::thread::sleep(std::time::Duration::from_millis(10 << attempt));
                    }
                }
            }

            log::error!("compaction failed persistently, degrading to read-only");
            this.read_only.store(true, Ordering::Release);
        });

        if submitted.is_err() {
            log::debug!("compactor is shut down, skipping trigger");
        }
    }

    /// Consults the strategy once and performs its choice.
    fn run_once(&self) -> crate::Result<()> {
        let Some(strategy) = self.strategy() else {
            return Ok(());
        };

        let choice = strategy.choose(&self.tables.sorted_tables(), &self.config);

        match choice {
            Choice::Merge(generations) => {
                log::trace!(
                    "{} chose {generations:?} for merging",
                    strategy.get_name(),
                );

                self.merge(&generations)
            }
            Choice::DoNothing => {
                log::trace!("{} chose to do nothing", strategy.get_name());
                Ok(())
            }
        }
    }

    fn merge(&self, generations: &[GenerationId]) -> crate::Result<()> {
        if !self.tables.begin_compaction(generations) {
            log::debug!("{generations:?} overlap an in-flight compaction, skipping");
            return Ok(());
        }

        let result = self.merge_claimed(generations);
        self.tables.end_compaction(generations);
        result
    }

    fn merge_claimed(&self, generations: &[GenerationId]) -> crate::Result<()> {
        let start = Instant::now();

        let inputs: Vec<Arc<SsTable>> = {
            let live = self.tables.sorted_tables();

            generations
                .iter()
                .filter_map(|generation| {
                    live.iter()
                        .find(|table| table.generation() == *generation)
                        .cloned()
                })
                .collect()
        };

        if inputs.len() != generations.len() {
            log::debug!("some of {generations:?} are gone, skipping compaction");
            return Ok(());
        }

        // Tombstones may only fall away when no older table could
        // resurrect a buried version of their key
        let evict_tombstones = self
            .tables
            .oldest_sorted_generation()
            .is_some_and(|oldest| generations.contains(&oldest));

        let gc_floor = self.snapshots.gc_floor();

        let sources: Vec<BoxedIterator<'_>> = inputs
            .iter()
            .map(|table| -> BoxedIterator<'_> { Box::new(table.iter(None)) })
            .collect();

        let merged = MergeIterator::new(sources);
        let stream = CompactionStream::new(merged, gc_floor, evict_tombstones);

        let output_generation = self.generations.next();
        let mut writer = TableBuilder::new(output_generation, &self.config)?;

        for (idx, item) in stream.enumerate() {
            writer.write(item?)?;

            if idx % 10_000 == 0 && self.stop_signal.is_stopped() {
                log::debug!("stopping amidst compaction because of stop signal");
                return writer.abort();
            }
        }

        match writer.finish()? {
            Some(trailer) => {
                let table = SsTable::open(
                    &self.config.path,
                    output_generation,
                    self.caches.clone(),
                    self.descriptors.clone(),
                )?;

                self.tables
                    .swap(generations, Some(TableHandle::Sorted(Arc::new(table))));

                log::debug!(
                    "compacted {generations:?} into table {output_generation} \
                     ({} tuples) in {}ms",
                    trailer.tuple_count,
                    start.elapsed().as_millis(),
                );
            }
            None => {
                // Everything was dropped; the inputs simply disappear
                self.tables.swap(generations, None);

                log::debug!(
                    "compacted {generations:?} into nothing in {}ms",
                    start.elapsed().as_millis(),
                );
            }
        }

        self.metrics.observe_compaction();

        Ok(())
    }

    /// Drains queued compactions and joins the workers.
    pub fn shutdown(&self) {
        self.executor.shutdown();
    }
}
