//! In-process loopback engine
//!
//! Runs a caller-supplied [`Calculator`] over every input packet and delivers
//! its outputs to the registered observers, either on the submitting thread
//! (`inline`) or on a dedicated worker thread (`threaded`). It stands in for
//! the external runtime in tests, the CLI simulator and hosts without a real
//! graph backend. It enforces the same contract a real engine does: side
//! packets present, observers registered before start, strictly increasing
//! timestamps per input stream.

use crossbeam_channel::{unbounded, Sender};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{GraphEngine, PacketObserver, SidePacket, SidePackets};
use crate::config::GraphConfig;
use crate::error::GraphError;
use crate::packet::{Packet, Payload};
use crate::timestamp::Timestamp;

type CalculatorFn = dyn Fn(&str, &Packet) -> Vec<(String, Payload)> + Send + Sync;

/// Maps one input packet to `(output stream, payload)` pairs
#[derive(Clone)]
pub struct Calculator(Arc<CalculatorFn>);

impl Calculator {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&str, &Packet) -> Vec<(String, Payload)> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Produces no output at all
    pub fn silent() -> Self {
        Self::new(|_, _| Vec::new())
    }

    pub fn run(&self, input_stream: &str, packet: &Packet) -> Vec<(String, Payload)> {
        (self.0)(input_stream, packet)
    }
}

enum Mode {
    Inline,
    Threaded { latency: Duration },
}

struct Router {
    calculator: Calculator,
    observers: HashMap<String, Vec<PacketObserver>>,
}

impl Router {
    fn dispatch(&self, input_stream: &str, packet: &Packet) {
        for (stream, payload) in self.calculator.run(input_stream, packet) {
            let Some(observers) = self.observers.get(&stream) else {
                continue;
            };
            let output = Packet::new(payload, packet.timestamp());
            for observer in observers {
                observer(output.clone());
            }
        }
    }
}

pub struct LoopbackEngine {
    calculator: Calculator,
    mode: Mode,
    config: Option<GraphConfig>,
    side_packets: SidePackets,
    pending_observers: HashMap<String, Vec<PacketObserver>>,
    router: Option<Arc<Router>>,
    input: Mutex<Option<Sender<(String, Packet)>>>,
    open_inputs: Mutex<HashSet<String>>,
    last_timestamps: Mutex<HashMap<String, Timestamp>>,
    reject_packets: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LoopbackEngine {
    /// Outputs are delivered before `add_packet` returns
    pub fn inline(calculator: Calculator) -> Self {
        Self::with_mode(calculator, Mode::Inline)
    }

    /// Outputs are delivered from a worker thread after `latency`
    pub fn threaded(calculator: Calculator, latency: Duration) -> Self {
        Self::with_mode(calculator, Mode::Threaded { latency })
    }

    fn with_mode(calculator: Calculator, mode: Mode) -> Self {
        Self {
            calculator,
            mode,
            config: None,
            side_packets: SidePackets::new(),
            pending_observers: HashMap::new(),
            router: None,
            input: Mutex::new(None),
            open_inputs: Mutex::new(HashSet::new()),
            last_timestamps: Mutex::new(HashMap::new()),
            reject_packets: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Switch that makes `add_packet` fail while set
    pub fn rejection_switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.reject_packets)
    }

    pub fn side_packet(&self, name: &str) -> Option<&SidePacket> {
        self.side_packets.get(name)
    }

    fn config(&self) -> Result<&GraphConfig, GraphError> {
        self.config
            .as_ref()
            .ok_or_else(|| GraphError::Engine("graph is not initialized".to_string()))
    }

    fn shutdown_worker(&mut self) {
        lock(&self.input).take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("Loopback worker panicked");
            }
        }
    }
}

impl GraphEngine for LoopbackEngine {
    fn initialize(&mut self, config: &GraphConfig, side_packets: SidePackets) -> Result<(), GraphError> {
        if self.config.is_some() {
            return Err(GraphError::Engine("graph is already initialized".to_string()));
        }

        for name in &config.input_side_packets {
            match side_packets.get(name) {
                None => {
                    return Err(GraphError::InvalidModel(format!(
                        "missing side packet '{name}'"
                    )))
                }
                Some(SidePacket::Blob(bytes)) if bytes.is_empty() => {
                    return Err(GraphError::InvalidModel(format!("side packet '{name}' is empty")))
                }
                Some(_) => {}
            }
        }

        self.config = Some(config.clone());
        self.side_packets = side_packets;
        Ok(())
    }

    fn observe_output_stream(&mut self, stream: &str, observer: PacketObserver) -> Result<(), GraphError> {
        let registration_error = |reason: &str| GraphError::StreamRegistration {
            stream: stream.to_string(),
            reason: reason.to_string(),
        };

        if self.router.is_some() {
            return Err(registration_error("graph is already running"));
        }
        let config = self.config().map_err(|e| registration_error(&e.to_string()))?;
        if !config.is_observable(stream) {
            return Err(registration_error("no such stream in graph"));
        }

        self.pending_observers
            .entry(stream.to_string())
            .or_default()
            .push(observer);
        Ok(())
    }

    fn start_run(&mut self) -> Result<(), GraphError> {
        if self.router.is_some() {
            return Err(GraphError::EngineStart("graph is already running".to_string()));
        }
        let inputs: HashSet<String> = self
            .config()
            .map_err(|e| GraphError::EngineStart(e.to_string()))?
            .input_streams
            .iter()
            .cloned()
            .collect();

        let router = Arc::new(Router {
            calculator: self.calculator.clone(),
            observers: std::mem::take(&mut self.pending_observers),
        });

        if let Mode::Threaded { latency } = self.mode {
            let (tx, rx) = unbounded::<(String, Packet)>();
            let worker_router = Arc::clone(&router);
            let worker = thread::Builder::new()
                .name("loopback-graph".to_string())
                .spawn(move || {
                    for (stream, packet) in rx {
                        if !latency.is_zero() {
                            thread::sleep(latency);
                        }
                        worker_router.dispatch(&stream, &packet);
                    }
                })
                .map_err(|e| GraphError::EngineStart(e.to_string()))?;
            *lock(&self.input) = Some(tx);
            self.worker = Some(worker);
        }

        *lock(&self.open_inputs) = inputs;
        self.router = Some(router);
        Ok(())
    }

    fn add_packet(&self, stream: &str, packet: Packet) -> Result<(), GraphError> {
        let rejected = |reason: String| GraphError::Submission {
            stream: stream.to_string(),
            reason,
        };

        let Some(router) = &self.router else {
            return Err(rejected("graph is not running".to_string()));
        };
        if self.reject_packets.load(Ordering::Acquire) {
            return Err(rejected("packet rejected".to_string()));
        }
        if !lock(&self.open_inputs).contains(stream) {
            return Err(rejected("input stream is not open".to_string()));
        }

        {
            let mut last = lock(&self.last_timestamps);
            if let Some(prev) = last.get(stream) {
                if packet.timestamp() <= *prev {
                    return Err(rejected(format!(
                        "timestamp {} does not advance past {}",
                        packet.timestamp(),
                        prev
                    )));
                }
            }
            last.insert(stream.to_string(), packet.timestamp());
        }

        match self.mode {
            Mode::Inline => {
                router.dispatch(stream, &packet);
                Ok(())
            }
            Mode::Threaded { .. } => match lock(&self.input).as_ref() {
                Some(tx) => tx
                    .send((stream.to_string(), packet))
                    .map_err(|_| rejected("graph worker has stopped".to_string())),
                None => Err(rejected("graph is shutting down".to_string())),
            },
        }
    }

    fn close_input_stream(&mut self, stream: &str) -> Result<(), GraphError> {
        let remaining = {
            let mut open = lock(&self.open_inputs);
            if !open.remove(stream) {
                return Err(GraphError::Engine(format!("input stream '{stream}' is not open")));
            }
            open.len()
        };
        if remaining == 0 {
            lock(&self.input).take();
        }
        Ok(())
    }

    fn wait_until_done(&mut self) -> Result<(), GraphError> {
        lock(&self.open_inputs).clear();
        self.shutdown_worker();
        Ok(())
    }
}

impl Drop for LoopbackEngine {
    fn drop(&mut self) {
        self.shutdown_worker();
    }
}
