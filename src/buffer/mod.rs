//! Bounded result exchange between engine threads and the caller
//!
//! Each output stream gets its own buffer holding at most `capacity` of the
//! most recent results. Producers never block: when a push overflows the
//! buffer, the oldest entries are evicted first. Consumers poll without
//! blocking and get `None` when nothing is buffered.
//!
//! Three strategies are available:
//! - [`DequeBuffer`]: mutex-guarded deque, strict bound, both read policies
//! - [`ChannelBuffer`]: lock-free bounded channel, best-effort bound
//! - [`StreamPoller`]: channel with a blocking `next()` that ends when the
//!   stream closes

mod channel;
mod deque;
mod poller;

pub use channel::ChannelBuffer;
pub use deque::DequeBuffer;
pub use poller::StreamPoller;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::GraphError;

/// Default number of results retained per stream
pub const DEFAULT_CAPACITY: usize = 2;

/// Lossy, latest-wins exchange point for one output stream
pub trait ResultBuffer<T>: Send + Sync {
    /// Append a result, evicting the oldest entries past capacity.
    /// A no-op once the buffer is closed.
    fn push(&self, item: T);

    /// Oldest retained result, or `None` when empty
    fn try_pop(&self) -> Option<T>;

    /// Like `try_pop`, but buffers with a blocking read wait up to `timeout`
    fn pop_timeout(&self, _timeout: Duration) -> Option<T> {
        self.try_pop()
    }

    /// All retained results in push order
    fn drain(&self) -> Vec<T>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn capacity(&self) -> usize;

    /// Stop accepting pushes. Retained results stay readable.
    ///
    /// The lock-free strategies check the flag before sending, so a push
    /// already in flight when `close` runs may still land. Sessions stop the
    /// engine before closing its buffers.
    fn close(&self);

    fn is_closed(&self) -> bool;

    /// Results evicted by overflow so far
    fn dropped(&self) -> u64;
}

/// Send `item` on a bounded channel, evicting from the front while it is full.
///
/// Racing producers can keep refilling the freed slot; after `capacity + 1`
/// attempts the item itself is counted as dropped.
pub(crate) fn send_evicting<T>(
    tx: &Sender<T>,
    rx: &Receiver<T>,
    capacity: usize,
    dropped: &AtomicU64,
    item: T,
) {
    let mut item = item;
    for _ in 0..=capacity {
        match tx.try_send(item) {
            Ok(()) => return,
            Err(TrySendError::Full(back)) => {
                if rx.try_recv().is_ok() {
                    dropped.fetch_add(1, Ordering::Relaxed);
                }
                item = back;
            }
            Err(TrySendError::Disconnected(_)) => return,
        }
    }
    dropped.fetch_add(1, Ordering::Relaxed);
}

/// Whether reading a result removes it from the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadPolicy {
    /// Reads leave the entry in place until a newer push evicts it
    PeekRetain,
    /// Each entry is returned at most once
    #[default]
    PopOnce,
}

/// Synchronization strategy backing a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferStrategy {
    #[default]
    Mutex,
    LockFree,
    Poller,
}

impl BufferStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BufferStrategy::Mutex => "mutex",
            BufferStrategy::LockFree => "lock_free",
            BufferStrategy::Poller => "poller",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub capacity: usize,
    pub strategy: BufferStrategy,
    pub policy: ReadPolicy,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            strategy: BufferStrategy::Mutex,
            policy: ReadPolicy::PopOnce,
        }
    }
}

impl BufferConfig {
    pub fn new(capacity: usize, strategy: BufferStrategy, policy: ReadPolicy) -> Self {
        Self {
            capacity,
            strategy,
            policy,
        }
    }

    pub fn validate(&self) -> Result<(), GraphError> {
        if self.capacity == 0 {
            return Err(GraphError::InvalidConfig(
                "buffer capacity must be at least 1".to_string(),
            ));
        }
        if self.policy == ReadPolicy::PeekRetain && self.strategy != BufferStrategy::Mutex {
            return Err(GraphError::InvalidConfig(format!(
                "peek_retain reads need the mutex strategy, not {}",
                self.strategy.as_str()
            )));
        }
        Ok(())
    }

    /// Build an empty buffer for this configuration
    pub fn build<T>(&self) -> Result<Arc<dyn ResultBuffer<T>>, GraphError>
    where
        T: Clone + Send + 'static,
    {
        self.validate()?;
        Ok(match self.strategy {
            BufferStrategy::Mutex => Arc::new(DequeBuffer::new(self.capacity, self.policy)),
            BufferStrategy::LockFree => Arc::new(ChannelBuffer::new(self.capacity)),
            BufferStrategy::Poller => Arc::new(StreamPoller::new(self.capacity)),
        })
    }
}
