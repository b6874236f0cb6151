//! Bounded worker pool for asynchronous result callbacks

use crossbeam_channel::{bounded, Sender, TrySendError};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::config::CallbackConfig;
use crate::error::GraphError;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs gather-and-notify jobs off the caller thread.
///
/// The queue is bounded: when every slot is taken the new job is dropped
/// and its results stay buffered for the next gather. `shutdown` runs the
/// jobs already queued and joins the workers.
pub struct CallbackWorker {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    dropped: Arc<AtomicU64>,
}

impl CallbackWorker {
    pub fn new(config: &CallbackConfig) -> Result<Self, GraphError> {
        config.validate()?;

        let (sender, receiver) = bounded::<Job>(config.queue_depth);
        let mut workers = Vec::with_capacity(config.workers);
        for index in 0..config.workers {
            let receiver = receiver.clone();
            let worker = thread::Builder::new()
                .name(format!("mediagraph-callback-{index}"))
                .spawn(move || {
                    for job in receiver {
                        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                            log::error!("Result callback panicked");
                        }
                    }
                })
                .map_err(|e| GraphError::Engine(format!("failed to spawn callback worker: {e}")))?;
            workers.push(worker);
        }

        Ok(Self {
            sender: Some(sender),
            workers,
            dropped: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Queue a job. Returns false when it was dropped.
    pub fn execute<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(sender) = &self.sender else {
            return false;
        };

        match sender.try_send(Box::new(job)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                log::warn!("Callback queue full, dropping result job ({dropped} dropped so far)");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Jobs dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn shutdown(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::warn!("Callback worker panicked");
            }
        }
    }
}

impl Drop for CallbackWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn config(workers: usize, queue_depth: usize) -> CallbackConfig {
        CallbackConfig {
            workers,
            queue_depth,
        }
    }

    #[test]
    fn test_jobs_run_before_shutdown_returns() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut worker = CallbackWorker::new(&config(2, 8)).unwrap();
        for _ in 0..8 {
            let ran = Arc::clone(&ran);
            assert!(worker.execute(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            }));
        }

        worker.shutdown();
        assert_eq!(ran.load(Ordering::SeqCst), 8);
        assert!(!worker.execute(|| {}));
    }

    #[test]
    fn test_full_queue_drops_jobs() {
        let worker = CallbackWorker::new(&config(1, 1)).unwrap();
        let (started_tx, started_rx) = unbounded();
        let (release_tx, release_rx) = unbounded::<()>();

        assert!(worker.execute(move || {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        }));
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // The running job holds the only worker; one job fits in the queue
        assert!(worker.execute(|| {}));
        assert!(!worker.execute(|| {}));
        assert_eq!(worker.dropped(), 1);

        release_tx.send(()).unwrap();
    }

    #[test]
    fn test_panicking_job_keeps_worker_alive() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut worker = CallbackWorker::new(&config(1, 4)).unwrap();
        assert!(worker.execute(|| panic!("callback failed")));
        let counter = Arc::clone(&ran);
        assert!(worker.execute(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        worker.shutdown();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(CallbackWorker::new(&config(0, 1)).is_err());
    }
}
