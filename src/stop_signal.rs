use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// A shared boolean that tells background workers to wind down.
///
/// Long-running merges poll this at block granularity so `close` does not
/// have to wait for an entire compaction to finish.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    /// Sends the stop signal.
    pub fn send(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns `true` if the signal was sent.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
