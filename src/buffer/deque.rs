use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{ReadPolicy, ResultBuffer};

struct DequeState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Mutex-guarded bounded deque.
///
/// The critical section is a push/evict or a front read, never a decode, so
/// the engine thread is only held up for a few instructions.
pub struct DequeBuffer<T> {
    capacity: usize,
    policy: ReadPolicy,
    state: Mutex<DequeState<T>>,
    dropped: AtomicU64,
}

impl<T> DequeBuffer<T> {
    pub fn new(capacity: usize, policy: ReadPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            policy,
            state: Mutex::new(DequeState {
                items: VecDeque::with_capacity(capacity + 1),
                closed: false,
            }),
            dropped: AtomicU64::new(0),
        }
    }

    // A panicking observer must not take the stream down with it
    fn lock(&self) -> MutexGuard<'_, DequeState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone + Send> ResultBuffer<T> for DequeBuffer<T> {
    fn push(&self, item: T) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.items.push_back(item);
        while state.items.len() > self.capacity {
            state.items.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn try_pop(&self) -> Option<T> {
        let mut state = self.lock();
        match self.policy {
            ReadPolicy::PeekRetain => state.items.front().cloned(),
            ReadPolicy::PopOnce => state.items.pop_front(),
        }
    }

    fn drain(&self) -> Vec<T> {
        let mut state = self.lock();
        match self.policy {
            ReadPolicy::PeekRetain => state.items.iter().cloned().collect(),
            ReadPolicy::PopOnce => state.items.drain(..).collect(),
        }
    }

    fn len(&self) -> usize {
        self.lock().items.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn close(&self) {
        self.lock().closed = true;
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
