use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

/// Cheap, always-on operation counters.
///
/// Each operation reports through a single `observe_*` hook instead of
/// wrapping every iterator in a metering decorator.
#[derive(Debug, Default)]
pub struct Metrics {
    pub(crate) writes: AtomicU64,
    pub(crate) reads: AtomicU64,
    pub(crate) scans: AtomicU64,
    pub(crate) bytes_written: AtomicU64,
    pub(crate) bytes_read: AtomicU64,
    pub(crate) flushes: AtomicU64,
    pub(crate) compactions: AtomicU64,
}

impl Metrics {
    pub(crate) fn observe_write(&self, bytes: u64) {
        self.writes.fetch_add(1, Relaxed);
        self.bytes_written.fetch_add(bytes, Relaxed);
    }

    pub(crate) fn observe_read(&self, bytes: u64) {
        self.reads.fetch_add(1, Relaxed);
        self.bytes_read.fetch_add(bytes, Relaxed);
    }

    pub(crate) fn observe_scan(&self) {
        self.scans.fetch_add(1, Relaxed);
    }

    pub(crate) fn observe_flush(&self) {
        self.flushes.fetch_add(1, Relaxed);
    }

    pub(crate) fn observe_compaction(&self) {
        self.compactions.fetch_add(1, Relaxed);
    }

    /// Number of completed write operations.
    #[must_use]
    pub fn writes(&self) -> u64 {
        self.writes.load(Relaxed)
    }

    /// Number of completed point reads.
    #[must_use]
    pub fn reads(&self) -> u64 {
        self.reads.load(Relaxed)
    }

    /// Number of created range scans.
    #[must_use]
    pub fn scans(&self) -> u64 {
        self.scans.load(Relaxed)
    }

    /// Number of memtable flushes that completed.
    #[must_use]
    pub fn flushes(&self) -> u64 {
        self.flushes.load(Relaxed)
    }

    /// Number of compactions that completed.
    #[must_use]
    pub fn compactions(&self) -> u64 {
        self.compactions.load(Relaxed)
    }

    /// Writes a one-line summary of all counters to the log.
    pub fn log_metrics(&self) {
        log::info!(
            "metrics: writes={} ({}B), reads={} ({}B), scans={}, flushes={}, compactions={}",
            self.writes.load(Relaxed),
            self.bytes_written.load(Relaxed),
            self.reads.load(Relaxed),
            self.bytes_read.load(Relaxed),
            self.scans.load(Relaxed),
            self.flushes.load(Relaxed),
            self.compactions.load(Relaxed),
        );
    }
}
