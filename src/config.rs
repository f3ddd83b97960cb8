use crate::Database;
use std::path::{Path, PathBuf};

/// Which compaction strategy drives background merging
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CompactionPolicy {
    /// Size-tiered compaction: tables of similar size are merged
    /// once enough of them accumulate.
    SizeTiered,

    /// Full compaction: every table file is merged into one.
    /// Only runs when scheduled (after flushes and on manual triggers).
    Full,

    /// No automatic compaction. Manual `compact` calls are no-ops.
    Disabled,
}

/// Database configuration builder
///
/// # Examples
///
/// ```
/// # let folder = tempfile::tempdir()?;
/// use heftydb::{CompactionPolicy, Config};
///
/// let db = Config::new(&folder)
///     .memtable_max_bytes(8 * 1_024 * 1_024)
///     .compaction_policy(CompactionPolicy::SizeTiered)
///     .open()?;
/// #
/// # Ok::<(), heftydb::Error>(())
/// ```
#[derive(Clone, Debug)]
pub struct Config {
    /// Database directory
    #[doc(hidden)]
    pub path: PathBuf,

    /// Memtable size threshold that triggers rotation + flush
    #[doc(hidden)]
    pub memtable_max_bytes: u64,

    /// Target size of record blocks inside table files
    #[doc(hidden)]
    pub record_block_size: u32,

    /// Target size of index blocks inside table files
    #[doc(hidden)]
    pub index_block_size: u32,

    /// Desired false positive rate of per-table bloom filters
    #[doc(hidden)]
    pub bloom_false_positive_rate: f32,

    /// Compaction strategy to use
    #[doc(hidden)]
    pub compaction_policy: CompactionPolicy,

    /// Capacity of the record block cache in bytes
    #[doc(hidden)]
    pub record_block_cache_bytes: u64,

    /// Capacity of the index block cache in bytes
    #[doc(hidden)]
    pub index_block_cache_bytes: u64,

    /// Whether every write fsyncs the write-ahead log
    #[doc(hidden)]
    pub fsync_on_write: bool,

    /// Length of the flush job queue
    #[doc(hidden)]
    pub flush_queue_len: usize,

    /// Number of compaction worker threads
    #[doc(hidden)]
    pub compaction_workers: usize,
}

const DEFAULT_FILE_FOLDER: &str = ".heftydb.data";

impl Default for Config {
    fn default() -> Self {
        Self {
            path: DEFAULT_FILE_FOLDER.into(),
            memtable_max_bytes: /* 4 MiB */ 4 * 1_024 * 1_024,
            record_block_size: /* 64 KiB */ 64 * 1_024,
            index_block_size: /* 4 KiB */ 4_096,
            bloom_false_positive_rate: 0.01,
            compaction_policy: CompactionPolicy::SizeTiered,
            record_block_cache_bytes: /* 16 MiB */ 16 * 1_024 * 1_024,
            index_block_cache_bytes: /* 8 MiB */ 8 * 1_024 * 1_024,
            fsync_on_write: false,
            flush_queue_len: 4,
            compaction_workers: 2,
        }
    }
}

impl Config {
    /// Initializes a new config for the given database folder.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().into(),
            ..Default::default()
        }
    }

    /// Sets the memtable size threshold.
    ///
    /// When the active memtable exceeds it, the memtable is frozen
    /// and flushed to a sorted table file in the background.
    ///
    /// Defaults to 4 MiB.
    #[must_use]
    pub fn memtable_max_bytes(mut self, bytes: u64) -> Self {
        assert!(bytes > 0);
        self.memtable_max_bytes = bytes;
        self
    }

    /// Sets the record block target size.
    ///
    /// Defaults to 64 KiB.
    #[must_use]
    pub fn record_block_size(mut self, bytes: u32) -> Self {
        assert!(bytes >= 1_024);
        self.record_block_size = bytes;
        self
    }

    /// Sets the index block target size.
    ///
    /// Defaults to 4 KiB.
    #[must_use]
    pub fn index_block_size(mut self, bytes: u32) -> Self {
        assert!(bytes >= 256);
        self.index_block_size = bytes;
        self
    }

    /// Sets the desired bloom filter false positive rate.
    ///
    /// Defaults to 1%.
    #[must_use]
    pub fn bloom_false_positive_rate(mut self, rate: f32) -> Self {
        assert!(rate > 0.0 && rate < 1.0);
        self.bloom_false_positive_rate = rate;
        self
    }

    /// Sets the compaction strategy.
    ///
    /// Defaults to [`CompactionPolicy::SizeTiered`].
    #[must_use]
    pub fn compaction_policy(mut self, policy: CompactionPolicy) -> Self {
        self.compaction_policy = policy;
        self
    }

    /// Sets the record block cache capacity.
    ///
    /// Defaults to 16 MiB.
    #[must_use]
    pub fn record_block_cache_bytes(mut self, bytes: u64) -> Self {
        self.record_block_cache_bytes = bytes;
        self
    }

    /// Sets the index block cache capacity.
    ///
    /// Defaults to 8 MiB.
    #[must_use]
    pub fn index_block_cache_bytes(mut self, bytes: u64) -> Self {
        self.index_block_cache_bytes = bytes;
        self
    }

    /// Makes every write fsync the write-ahead log before returning.
    ///
    /// Defaults to `false`; individual writes can still opt in.
    #[must_use]
    pub fn fsync_on_write(mut self, fsync: bool) -> Self {
        self.fsync_on_write = fsync;
        self
    }

    /// Sets the number of compaction worker threads.
    ///
    /// Defaults to 2.
    #[must_use]
    pub fn compaction_workers(mut self, workers: usize) -> Self {
        assert!(workers > 0);
        self.compaction_workers = workers;
        self
    }

    /// Opens the database, recovering existing state from disk.
    ///
    /// # Errors
    ///
    /// Returns error if an I/O error occurred.
    pub fn open(self) -> crate::Result<Database> {
        Database::open(self)
    }
}
