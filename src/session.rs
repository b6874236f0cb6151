//! Session lifecycle
//!
//! A [`DetectorSession`] owns one engine instance and the result buffers of
//! all its declared outputs. It moves `Uninitialized -> Running -> Disposed`
//! exactly once; a disposed session is never restarted.

use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::buffer::BufferConfig;
use crate::config::{validate_streams, GraphConfig};
use crate::engine::{GraphEngine, SidePackets};
use crate::error::GraphError;
use crate::fanout::{Gathered, StreamFanOut};
use crate::packet::{Packet, Payload};
use crate::timestamp::{MonotonicClock, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Running,
    Disposed,
}

/// Everything needed to bring a session up
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub graph: GraphConfig,
    pub input_stream: String,
    /// Observed output streams, in the order results are gathered
    pub outputs: Vec<String>,
    pub side_packets: SidePackets,
    pub buffer: BufferConfig,
}

pub struct DetectorSession {
    id: Uuid,
    state: SessionState,
    engine: Box<dyn GraphEngine>,
    input_stream: String,
    fanout: Option<Arc<StreamFanOut<Packet>>>,
    clock: MonotonicClock,
}

impl DetectorSession {
    fn new(engine: Box<dyn GraphEngine>) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Uninitialized,
            engine,
            input_stream: String::new(),
            fanout: None,
            clock: MonotonicClock::new(),
        }
    }

    /// Configure the engine, observe every declared output and start the run.
    ///
    /// Any failure drops the engine: there is no partially running session
    /// and no retry.
    pub fn start(engine: Box<dyn GraphEngine>, spec: SessionSpec) -> Result<Self, GraphError> {
        let mut session = Self::new(engine);
        match session.start_engine(spec) {
            Ok(()) => {
                session.state = SessionState::Running;
                Ok(session)
            }
            Err(e) => {
                log::warn!("Session {} failed to start: {}", session.id, e);
                session.state = SessionState::Disposed;
                Err(e)
            }
        }
    }

    fn start_engine(&mut self, spec: SessionSpec) -> Result<(), GraphError> {
        validate_streams(spec.outputs.iter().map(String::as_str))?;
        if !spec.graph.is_input(&spec.input_stream) {
            return Err(GraphError::InvalidConfig(format!(
                "graph has no input stream '{}'",
                spec.input_stream
            )));
        }

        log::info!("Session {}: initializing graph ({} nodes)", self.id, spec.graph.node_count);
        self.engine.initialize(&spec.graph, spec.side_packets)?;

        let fanout = StreamFanOut::register(self.engine.as_mut(), &spec.outputs, &spec.buffer)?;

        log::info!(
            "Session {}: starting graph with {} observed outputs",
            self.id,
            fanout.len()
        );
        self.engine.start_run()?;

        self.input_stream = spec.input_stream;
        self.fanout = Some(Arc::new(fanout));
        Ok(())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    fn ensure_running(&self) -> Result<&Arc<StreamFanOut<Packet>>, GraphError> {
        match (self.state, &self.fanout) {
            (SessionState::Running, Some(fanout)) => Ok(fanout),
            (SessionState::Disposed, _) => Err(GraphError::SessionDisposed),
            _ => Err(GraphError::Engine("session is not running".to_string())),
        }
    }

    /// Submit one packet at a fresh timestamp.
    ///
    /// An engine rejection is logged and returned; the session keeps running.
    pub fn submit(&self, payload: Payload) -> Result<Timestamp, GraphError> {
        self.ensure_running()?;

        let timestamp = self.clock.now();
        match self
            .engine
            .add_packet(&self.input_stream, Packet::new(payload, timestamp))
        {
            Ok(()) => Ok(timestamp),
            Err(e) => {
                log::warn!("Session {}: add packet failed: {}", self.id, e);
                Err(e)
            }
        }
    }

    /// Non-blocking drain of every output, in declaration order
    pub fn gather(&self) -> Result<Gathered<Packet>, GraphError> {
        Ok(self.ensure_running()?.gather_all())
    }

    /// Shared handle to the output buffers, for gathers off the caller thread
    pub fn fanout(&self) -> Result<Arc<StreamFanOut<Packet>>, GraphError> {
        self.ensure_running().map(Arc::clone)
    }

    /// Close the input, wait for in-flight packets to drain and close every
    /// buffer. Blocks proportionally to the work still queued in the engine.
    /// Calling it again is a no-op.
    pub fn dispose(&mut self) {
        match self.state {
            SessionState::Disposed => return,
            SessionState::Uninitialized => {
                self.state = SessionState::Disposed;
                return;
            }
            SessionState::Running => {}
        }
        self.state = SessionState::Disposed;

        log::info!("Session {}: shutting down", self.id);
        match self.engine.close_input_stream(&self.input_stream) {
            Ok(()) => {
                if let Err(e) = self.engine.wait_until_done() {
                    log::warn!("Session {}: error in wait_until_done: {}", self.id, e);
                }
            }
            Err(e) => log::warn!("Session {}: error closing input stream: {}", self.id, e),
        }

        if let Some(fanout) = &self.fanout {
            fanout.close_all();
        }
    }
}

impl Drop for DetectorSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferStrategy, ReadPolicy};
    use crate::engine::{Calculator, LoopbackEngine};
    use crate::tensor::Tensor;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const GRAPH: &str = r#"
        input_stream: "in"
        output_stream: "out1"
        output_stream: "out2"
    "#;

    fn spec(buffer: BufferConfig) -> SessionSpec {
        SessionSpec {
            graph: GraphConfig::parse(GRAPH).unwrap(),
            input_stream: "in".to_string(),
            outputs: vec!["out1".to_string(), "out2".to_string()],
            side_packets: SidePackets::new(),
            buffer,
        }
    }

    // Forwards every input to "out1" only
    fn out1_only() -> Calculator {
        Calculator::new(|_, packet| vec![("out1".to_string(), packet.payload().clone())])
    }

    fn value(v: f32) -> Payload {
        Payload::Tensors(vec![Tensor::vector(vec![v])])
    }

    #[test]
    fn test_two_outputs_end_to_end() {
        let engine = Box::new(LoopbackEngine::inline(out1_only()));
        let session = DetectorSession::start(engine, spec(BufferConfig::default())).unwrap();
        assert_eq!(session.state(), SessionState::Running);

        let stamps: Vec<Timestamp> = [1.0, 2.0, 3.0]
            .into_iter()
            .map(|v| session.submit(value(v)).unwrap())
            .collect();

        let gathered = session.gather().unwrap();
        assert_eq!(gathered.counts, vec![2, 0]);
        let got: Vec<Timestamp> = gathered.items.iter().map(Packet::timestamp).collect();
        assert_eq!(got, stamps[1..].to_vec());
        assert_eq!(gathered.items[1].payload(), &value(3.0));
    }

    #[test]
    fn test_peek_retain_replays_latest() {
        let buffer = BufferConfig::new(1, BufferStrategy::Mutex, ReadPolicy::PeekRetain);
        let engine = Box::new(LoopbackEngine::inline(out1_only()));
        let session = DetectorSession::start(engine, spec(buffer)).unwrap();

        session.submit(value(1.0)).unwrap();
        assert_eq!(session.gather().unwrap().counts, vec![1, 0]);
        assert_eq!(session.gather().unwrap().counts, vec![1, 0]);
    }

    #[test]
    fn test_pop_once_does_not_replay() {
        let engine = Box::new(LoopbackEngine::inline(out1_only()));
        let session = DetectorSession::start(engine, spec(BufferConfig::default())).unwrap();

        session.submit(value(1.0)).unwrap();
        assert_eq!(session.gather().unwrap().counts, vec![1, 0]);
        assert_eq!(session.gather().unwrap().counts, vec![0, 0]);
    }

    #[test]
    fn test_calls_after_dispose_are_rejected() {
        let engine = Box::new(LoopbackEngine::inline(out1_only()));
        let mut session = DetectorSession::start(engine, spec(BufferConfig::default())).unwrap();

        session.dispose();
        assert_eq!(session.state(), SessionState::Disposed);
        assert!(matches!(session.submit(value(1.0)), Err(GraphError::SessionDisposed)));
        assert!(matches!(session.gather(), Err(GraphError::SessionDisposed)));

        session.dispose();
        assert!(matches!(session.submit(value(2.0)), Err(GraphError::SessionDisposed)));
    }

    #[test]
    fn test_registration_failure_aborts_start() {
        let mut bad = spec(BufferConfig::default());
        bad.outputs.push("missing".to_string());

        let result = DetectorSession::start(Box::new(LoopbackEngine::inline(out1_only())), bad);
        match result {
            Err(err) => assert!(matches!(err, GraphError::StreamRegistration { .. })),
            Ok(_) => panic!("session started with an unobservable output"),
        }
    }

    #[test]
    fn test_unknown_input_stream_aborts_start() {
        let mut bad = spec(BufferConfig::default());
        bad.input_stream = "camera".to_string();
        let result = DetectorSession::start(Box::new(LoopbackEngine::inline(out1_only())), bad);
        assert!(matches!(result, Err(GraphError::InvalidConfig(_))));
    }

    #[test]
    fn test_submission_failure_keeps_session_running() {
        let engine = LoopbackEngine::inline(out1_only());
        let switch = engine.rejection_switch();
        let session = DetectorSession::start(Box::new(engine), spec(BufferConfig::default())).unwrap();

        switch.store(true, Ordering::Release);
        assert!(matches!(session.submit(value(1.0)), Err(GraphError::Submission { .. })));
        assert!(session.is_running());
        assert_eq!(session.gather().unwrap().counts, vec![0, 0]);

        switch.store(false, Ordering::Release);
        session.submit(value(2.0)).unwrap();
        assert_eq!(session.gather().unwrap().counts, vec![1, 0]);
    }

    #[test]
    fn test_dispose_waits_for_in_flight_packets() {
        let processed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&processed);
        let calculator = Calculator::new(move |_, packet| {
            counter.fetch_add(1, Ordering::SeqCst);
            vec![("out1".to_string(), packet.payload().clone())]
        });

        let engine = Box::new(LoopbackEngine::threaded(calculator, Duration::from_millis(2)));
        let mut session = DetectorSession::start(engine, spec(BufferConfig::default())).unwrap();
        for v in 0..10 {
            session.submit(value(v as f32)).unwrap();
        }

        session.dispose();
        assert_eq!(processed.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_poller_strategy_session() {
        let buffer = BufferConfig::new(2, BufferStrategy::Poller, ReadPolicy::PopOnce);
        let engine = Box::new(LoopbackEngine::inline(out1_only()));
        let session = DetectorSession::start(engine, spec(buffer)).unwrap();

        session.submit(value(1.0)).unwrap();
        session.submit(value(2.0)).unwrap();
        session.submit(value(3.0)).unwrap();
        let gathered = session.gather().unwrap();
        assert_eq!(gathered.counts, vec![2, 0]);
        assert_eq!(gathered.items[0].payload(), &value(2.0));
    }
}
