//! Graph engine seam
//!
//! The execution engine is external: the adapter configures it, observes its
//! output streams and feeds it packets. [`GraphEngine`] is the narrow
//! interface the session layer talks to. The embedding application installs
//! an [`EngineFactory`] once per process so sessions created through the C
//! boundary can get an engine instance.

mod loopback;

pub use loopback::{Calculator, LoopbackEngine};

use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::buffer::{ResultBuffer, StreamPoller};
use crate::config::GraphConfig;
use crate::error::GraphError;
use crate::packet::Packet;

/// Called on an engine thread for every packet delivered on an observed stream
pub type PacketObserver = Box<dyn Fn(Packet) + Send + Sync>;

/// Values handed to the graph at initialization
#[derive(Debug, Clone, PartialEq)]
pub enum SidePacket {
    Blob(Arc<[u8]>),
    Int(i64),
    Text(String),
}

impl SidePacket {
    pub fn blob(bytes: &[u8]) -> Self {
        SidePacket::Blob(Arc::from(bytes))
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            SidePacket::Blob(bytes) => Some(bytes),
            _ => None,
        }
    }
}

pub type SidePackets = BTreeMap<String, SidePacket>;

/// An external graph execution runtime
pub trait GraphEngine: Send + Sync {
    /// Load the graph description together with its side packets
    fn initialize(&mut self, config: &GraphConfig, side_packets: SidePackets) -> Result<(), GraphError>;

    /// Attach an observer to an output stream. Must happen before `start_run`.
    fn observe_output_stream(&mut self, stream: &str, observer: PacketObserver) -> Result<(), GraphError>;

    fn start_run(&mut self) -> Result<(), GraphError>;

    /// Queue a packet on an input stream. Timestamps must increase per stream.
    fn add_packet(&self, stream: &str, packet: Packet) -> Result<(), GraphError>;

    fn close_input_stream(&mut self, stream: &str) -> Result<(), GraphError>;

    /// Block until every queued packet has been processed
    fn wait_until_done(&mut self) -> Result<(), GraphError>;

    /// Poller fed by `stream`, closed by the caller when the session ends.
    fn add_output_stream_poller(
        &mut self,
        stream: &str,
        capacity: usize,
    ) -> Result<Arc<StreamPoller<Packet>>, GraphError> {
        let poller = Arc::new(StreamPoller::new(capacity));
        let sink = Arc::clone(&poller);
        self.observe_output_stream(stream, Box::new(move |packet| sink.push(packet)))?;
        Ok(poller)
    }
}

/// Creates a fresh engine per session
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> Box<dyn GraphEngine>;
}

impl<F> EngineFactory for F
where
    F: Fn() -> Box<dyn GraphEngine> + Send + Sync,
{
    fn create(&self) -> Box<dyn GraphEngine> {
        self()
    }
}

static ENGINE_FACTORY: Lazy<RwLock<Option<Arc<dyn EngineFactory>>>> = Lazy::new(|| RwLock::new(None));

/// Install the engine used by sessions created through the C boundary.
/// Replaces any previously installed factory.
pub fn install_engine_factory(factory: Arc<dyn EngineFactory>) {
    *ENGINE_FACTORY.write().unwrap_or_else(PoisonError::into_inner) = Some(factory);
    log::debug!("Graph engine factory installed");
}

pub fn uninstall_engine_factory() {
    ENGINE_FACTORY
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
}

/// New engine from the installed factory
pub fn create_engine() -> Result<Box<dyn GraphEngine>, GraphError> {
    let factory = ENGINE_FACTORY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
        .ok_or(GraphError::NoEngine)?;
    Ok(factory.create())
}
