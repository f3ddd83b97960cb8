use crate::table::index_block::IndexBlock;
use crate::table::record_block::RecordBlock;
use crate::GenerationId;
use quick_cache::{
    sync::{Cache as QuickCache, DefaultLifecycle, GuardResult},
    OptionsBuilder, Weighter,
};
use std::sync::Arc;

/// Blocks are addressed by the owning table's generation and their
/// position in the file.
type CacheKey = (GenerationId, u64);

#[derive(Clone)]
struct RecordBlockWeighter;

impl Weighter<CacheKey, Arc<RecordBlock>> for RecordBlockWeighter {
    fn weight(&self, _: &CacheKey, block: &Arc<RecordBlock>) -> u64 {
        u64::from(block.raw_size)
    }
}

#[derive(Clone)]
struct IndexBlockWeighter;

impl Weighter<CacheKey, Arc<IndexBlock>> for IndexBlockWeighter {
    fn weight(&self, _: &CacheKey, block: &Arc<IndexBlock>) -> u64 {
        u64::from(block.raw_size)
    }
}

fn build_cache<V: Clone, W: Weighter<CacheKey, V> + Clone>(
    bytes: u64,
    weighter: W,
) -> QuickCache<CacheKey, V, W, rustc_hash::FxBuildHasher> {
    // NOTE: Nothing we can do if it fails
    #[allow(clippy::expect_used)]
    let opts = OptionsBuilder::new()
        .weight_capacity(bytes)
        .hot_allocation(0.9)
        .estimated_items_capacity(1_000_000)
        .build()
        .expect("cache options should be valid");

    #[allow(clippy::default_trait_access)]
    QuickCache::with_options(opts, weighter, Default::default(), DefaultLifecycle::default())
}

/// Bounded, byte-weighted caches for record and index blocks
///
/// Decoded blocks are cached after being read from disk, which speeds up
/// repeated probes into hot key ranges.
///
/// Cache misses are single-flight: concurrent misses for the same block
/// share one disk read through the cache's placeholder guards.
pub struct Caches {
    record_blocks: QuickCache<CacheKey, Arc<RecordBlock>, RecordBlockWeighter, rustc_hash::FxBuildHasher>,
    index_blocks: QuickCache<CacheKey, Arc<IndexBlock>, IndexBlockWeighter, rustc_hash::FxBuildHasher>,
}

impl Caches {
    /// Creates caches with roughly the given byte capacities.
    #[must_use]
    pub fn with_capacity_bytes(record_block_bytes: u64, index_block_bytes: u64) -> Self {
        Self {
            record_blocks: build_cache(record_block_bytes, RecordBlockWeighter),
            index_blocks: build_cache(index_block_bytes, IndexBlockWeighter),
        }
    }

    /// Returns the amount of cached record block bytes.
    #[must_use]
    pub fn record_block_size(&self) -> u64 {
        self.record_blocks.weight()
    }

    /// Returns the amount of cached index block bytes.
    #[must_use]
    pub fn index_block_size(&self) -> u64 {
        self.index_blocks.weight()
    }

    /// Gets a record block, loading and caching it on miss.
    ///
    /// Concurrent misses for the same key share a single `load` call.
    pub(crate) fn record_block(
        &self,
        key: CacheKey,
        load: impl FnOnce() -> crate::Result<RecordBlock>,
    ) -> crate::Result<Arc<RecordBlock>> {
        match self.record_blocks.get_value_or_guard(&key, None) {
            GuardResult::Value(block) => Ok(block),
            GuardResult::Guard(guard) => {
                let block = Arc::new(load()?);
                let _ = guard.insert(block.clone());
                Ok(block)
            }
            GuardResult::Timeout => unreachable!("no timeout configured"),
        }
    }

    /// Gets an index block, loading and caching it on miss.
    pub(crate) fn index_block(
        &self,
        key: CacheKey,
        load: impl FnOnce() -> crate::Result<IndexBlock>,
    ) -> crate::Result<Arc<IndexBlock>> {
        match self.index_blocks.get_value_or_guard(&key, None) {
            GuardResult::Value(block) => Ok(block),
            GuardResult::Guard(guard) => {
                let block = Arc::new(load()?);
                let _ = guard.insert(block.clone());
                Ok(block)
            }
            GuardResult::Timeout => unreachable!("no timeout configured"),
        }
    }
}
