use crate::GenerationId;
use quick_cache::{sync::Cache as QuickCache, UnitWeighter};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

/// Caches open file handles to table files
///
/// Bounded so a store with many table files does not run into the OS file
/// descriptor limit: evicted handles simply close, and the next reader
/// reopens the file and reinserts it.
///
/// Handles are shared (`Arc<File>`) and all reads through them are
/// positional, so readers never contend on a seek cursor.
pub struct DescriptorTable {
    inner: QuickCache<GenerationId, Arc<File>, UnitWeighter, rustc_hash::FxBuildHasher>,
}

impl DescriptorTable {
    /// Creates a new descriptor table that caches up to `capacity` handles.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        use quick_cache::sync::DefaultLifecycle;

        #[allow(clippy::default_trait_access)]
        let quick_cache = QuickCache::with(
            capacity,
            capacity as u64,
            UnitWeighter,
            Default::default(),
            DefaultLifecycle::default(),
        );

        Self { inner: quick_cache }
    }

    /// Returns the cached handle for a generation, if any.
    #[must_use]
    pub fn access(&self, generation: GenerationId) -> Option<Arc<File>> {
        self.inner.get(&generation)
    }

    /// Caches a handle for a generation.
    pub fn insert(&self, generation: GenerationId, file: Arc<File>) {
        self.inner.insert(generation, file);
    }

    /// Returns the handle for a generation, opening and caching it on miss.
    pub fn access_or_open(
        &self,
        generation: GenerationId,
        path: &Path,
    ) -> std::io::Result<Arc<File>> {
        if let Some(file) = self.access(generation) {
            return Ok(file);
        }

        log::trace!("reopening table file handle {path:?}");

        let file = Arc::new(File::open(path)?);
        self.insert(generation, file.clone());

        Ok(file)
    }

    /// Drops the cached handle for a generation.
    ///
    /// Called when a table is retired, so the descriptor closes without
    /// waiting for eviction.
    pub fn remove(&self, generation: GenerationId) {
        self.inner.remove(&generation);
    }

    /// Number of cached handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if no handles are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
