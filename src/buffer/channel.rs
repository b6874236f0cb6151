use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::{send_evicting, ResultBuffer};

/// Lock-free bounded buffer over a crossbeam channel.
///
/// Overflow is handled by dequeuing the oldest entry and retrying the send.
/// With several producers racing the bound is best effort: a push that keeps
/// losing the race gives up and is counted as dropped. Reads always remove.
pub struct ChannelBuffer<T> {
    capacity: usize,
    tx: Sender<T>,
    rx: Receiver<T>,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl<T> ChannelBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self {
            capacity,
            tx,
            rx,
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }
}

impl<T: Clone + Send> ResultBuffer<T> for ChannelBuffer<T> {
    fn push(&self, item: T) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }

        send_evicting(&self.tx, &self.rx, self.capacity, &self.dropped, item);
    }

    fn try_pop(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    fn drain(&self) -> Vec<T> {
        self.rx.try_iter().take(self.capacity).collect()
    }

    fn len(&self) -> usize {
        self.rx.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
