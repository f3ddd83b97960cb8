use crossbeam_channel::{bounded, Sender};
use std::sync::Mutex;
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed pool of worker threads draining a bounded job queue.
///
/// `submit` applies backpressure: it blocks while the queue is full.
/// `shutdown` lets queued jobs drain, then joins all workers; it is
/// idempotent and safe to call from multiple threads.
pub struct Executor {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Executor {
    /// Spawns `worker_count` named worker threads with a queue of `queue_len` jobs.
    #[must_use]
    pub fn new(name: &str, worker_count: usize, queue_len: usize) -> Self {
        assert!(worker_count > 0);
        assert!(queue_len > 0);

        let (sender, receiver) = bounded::<Job>(queue_len);

        let workers = (0..worker_count)
            .map(|idx| {
                let receiver = receiver.clone();

                // NOTE: Spawning named threads only fails on OOM
                #[allow(clippy::expect_used)]
                std::thread::Builder::new()
                    .name(format!("heftydb-{name}-{idx}"))
                    .spawn(move || {
                        while let Ok(job) = receiver.recv() {
                            job();
                        }
                    })
                    .expect("should spawn worker thread")
            })
            .collect();

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        }
    }

    /// Enqueues a job, blocking while the queue is full.
    ///
    /// # Errors
    ///
    /// Fails with [`crate::Error::Closed`] after `shutdown`.
    pub fn submit<F: FnOnce() + Send + 'static>(&self, job: F) -> crate::Result<()> {
        // NOTE: Lock poisoning is unrecoverable
        #[allow(clippy::expect_used)]
        let sender = self.sender.lock().expect("lock is poisoned");

        match &*sender {
            Some(sender) => sender
                .send(Box::new(job))
                .map_err(|_| crate::Error::Closed),
            None => Err(crate::Error::Closed),
        }
    }

    /// Drains the queue and joins all workers.
    pub fn shutdown(&self) {
        // NOTE: Lock poisoning is unrecoverable
        #[allow(clippy::expect_used)]
        let sender = self.sender.lock().expect("lock is poisoned").take();

        // Workers exit once the channel is disconnected and drained
        drop(sender);

        // NOTE: Lock poisoning is unrecoverable
        #[allow(clippy::expect_used)]
        let workers = std::mem::take(&mut *self.workers.lock().expect("lock is poisoned"));

        for worker in workers {
            if worker.join().is_err() {
                log::error!("background worker panicked during shutdown");
            }
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::Executor;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };
    use test_log::test;

    #[test]
    fn executor_runs_jobs() {
        let executor = Executor::new("test", 2, 16);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..100 {
            let counter = counter.clone();
            executor
                .submit(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .expect("executor is open");
        }

        executor.shutdown();
        assert_eq!(100, counter.load(Ordering::SeqCst));
    }

    #[test]
    fn executor_rejects_after_shutdown() {
        let executor = Executor::new("test", 1, 4);
        executor.shutdown();
        assert!(executor.submit(|| {}).is_err());
    }

    #[test]
    fn executor_shutdown_is_idempotent() {
        let executor = Executor::new("test", 1, 4);
        executor.shutdown();
        executor.shutdown();
    }
}
