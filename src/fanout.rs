//! Multi-stream fan-out
//!
//! Owns one result buffer per declared output and gathers them in declaration
//! order. Ordering by declaration, not by arrival, lets fixed-layout callers
//! index into the concatenated results using only the per-stream counts.

use std::ops::Range;
use std::sync::Arc;

use crate::buffer::{BufferConfig, BufferStrategy, ResultBuffer};
use crate::engine::GraphEngine;
use crate::error::GraphError;
use crate::packet::Packet;

/// Results of one gather: concatenated items plus a count per stream
#[derive(Debug, Clone, PartialEq)]
pub struct Gathered<T> {
    pub items: Vec<T>,
    pub counts: Vec<usize>,
}

impl<T> Gathered<T> {
    pub fn empty(streams: usize) -> Self {
        Self {
            items: Vec::new(),
            counts: vec![0; streams],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Range of `items` that came from stream `index`
    pub fn range(&self, index: usize) -> Range<usize> {
        let start: usize = self.counts.iter().take(index).sum();
        let len = self.counts.get(index).copied().unwrap_or(0);
        start..start + len
    }

    pub fn slice(&self, index: usize) -> &[T] {
        &self.items[self.range(index)]
    }
}

struct Slot<T> {
    stream: String,
    buffer: Arc<dyn ResultBuffer<T>>,
}

pub struct StreamFanOut<T> {
    slots: Vec<Slot<T>>,
}

impl<T: Clone + Send + 'static> StreamFanOut<T> {
    /// Fan-out over pre-built buffers, one per stream
    pub fn from_buffers(slots: Vec<(String, Arc<dyn ResultBuffer<T>>)>) -> Self {
        Self {
            slots: slots
                .into_iter()
                .map(|(stream, buffer)| Slot { stream, buffer })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn streams(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|slot| slot.stream.as_str())
    }

    pub fn buffer(&self, index: usize) -> Option<&Arc<dyn ResultBuffer<T>>> {
        self.slots.get(index).map(|slot| &slot.buffer)
    }

    /// Drain every stream in declaration order
    pub fn gather_all(&self) -> Gathered<T> {
        let mut gathered = Gathered::empty(self.slots.len());
        for (count, slot) in gathered.counts.iter_mut().zip(&self.slots) {
            let items = slot.buffer.drain();
            *count = items.len();
            gathered.items.extend(items);
        }
        gathered
    }

    pub fn close_all(&self) {
        for slot in &self.slots {
            slot.buffer.close();
        }
    }

    /// Results evicted by overflow, per stream
    pub fn dropped(&self) -> Vec<u64> {
        self.slots.iter().map(|slot| slot.buffer.dropped()).collect()
    }
}

impl StreamFanOut<Packet> {
    /// Create a buffer per stream and register it with the engine.
    ///
    /// The first registration failure aborts the whole fan-out: a session
    /// never runs with only some of its outputs observed.
    pub fn register(
        engine: &mut dyn GraphEngine,
        streams: &[String],
        config: &BufferConfig,
    ) -> Result<Self, GraphError> {
        config.validate()?;

        let mut slots = Vec::with_capacity(streams.len());
        for stream in streams {
            let buffer: Arc<dyn ResultBuffer<Packet>> = match config.strategy {
                BufferStrategy::Poller => {
                    let poller: Arc<dyn ResultBuffer<Packet>> =
                        engine.add_output_stream_poller(stream, config.capacity)?;
                    poller
                }
                _ => {
                    let buffer = config.build::<Packet>()?;
                    let sink = Arc::clone(&buffer);
                    engine.observe_output_stream(stream, Box::new(move |packet| sink.push(packet)))?;
                    buffer
                }
            };
            log::debug!(
                "Observing '{}' ({} strategy, capacity {})",
                stream,
                config.strategy.as_str(),
                config.capacity
            );
            slots.push((stream.clone(), buffer));
        }

        Ok(Self::from_buffers(slots))
    }
}
