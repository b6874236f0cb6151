use crossbeam_channel::{bounded, select, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use super::{send_evicting, ResultBuffer};

/// Blocking poller over one output stream.
///
/// `next()` waits until a result is queued or the stream is closed. After
/// close, queued results are still handed out and `next()` then returns
/// `None`. Pushes evict the oldest queued result when full.
pub struct StreamPoller<T> {
    capacity: usize,
    tx: Sender<T>,
    rx: Receiver<T>,
    // Never sent on; dropping the sender wakes every blocked `next()`
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl<T> StreamPoller<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        let (shutdown_tx, shutdown_rx) = bounded(0);
        Self {
            capacity,
            tx,
            rx,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx,
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Number of results waiting to be read
    pub fn queue_size(&self) -> usize {
        self.rx.len()
    }

    /// Block until a result is available, or return `None` once the stream
    /// is closed and drained.
    pub fn next(&self) -> Option<T> {
        if let Ok(item) = self.rx.try_recv() {
            return Some(item);
        }
        select! {
            recv(self.rx) -> item => item.ok(),
            recv(self.shutdown_rx) -> _closed => self.rx.try_recv().ok(),
        }
    }

    /// Like [`next`](Self::next), giving up after `timeout`.
    pub fn next_timeout(&self, timeout: Duration) -> Option<T> {
        if let Ok(item) = self.rx.try_recv() {
            return Some(item);
        }
        select! {
            recv(self.rx) -> item => item.ok(),
            recv(self.shutdown_rx) -> _closed => self.rx.try_recv().ok(),
            default(timeout) => None,
        }
    }
}

impl<T: Clone + Send> ResultBuffer<T> for StreamPoller<T> {
    fn push(&self, item: T) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }

        send_evicting(&self.tx, &self.rx, self.capacity, &self.dropped, item);
    }

    fn try_pop(&self) -> Option<T> {
        if self.queue_size() < 1 {
            return None;
        }
        self.rx.try_recv().ok()
    }

    fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        self.next_timeout(timeout)
    }

    fn drain(&self) -> Vec<T> {
        self.rx.try_iter().take(self.capacity).collect()
    }

    fn len(&self) -> usize {
        self.queue_size()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
