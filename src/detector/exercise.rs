use std::sync::{Arc, Mutex, PoisonError};

use crate::buffer::{BufferConfig, BufferStrategy, ReadPolicy, ResultBuffer};
use crate::config::GraphConfig;
use crate::engine::{GraphEngine, SidePacket, SidePackets};
use crate::error::GraphError;
use crate::packet::{Packet, Payload};
use crate::session::{DetectorSession, SessionSpec, SessionState};
use crate::tensor::{Tensor, CLASSIFIER_INPUT_SHAPE};
use crate::types::Landmark;

pub const INPUT_TENSORS: &str = "input_tensors";
pub const OUTPUT_TENSORS: &str = "output_tensors";
pub const MODEL_BLOB: &str = "model_blob";

pub(crate) fn model_side_packets(model: &[u8]) -> Result<SidePackets, GraphError> {
    if model.is_empty() {
        return Err(GraphError::InvalidModel(format!("{MODEL_BLOB} is empty")));
    }
    let mut packets = SidePackets::new();
    packets.insert(MODEL_BLOB.to_string(), SidePacket::blob(model));
    Ok(packets)
}

/// First value of the first tensor in a classifier output packet
pub(crate) fn first_score(packet: &Packet) -> Option<&[f32]> {
    match packet.payload() {
        Payload::Tensors(tensors) => tensors.first().map(Tensor::data),
        other => {
            log::warn!("Expected tensors on '{OUTPUT_TENSORS}', got {}", other.kind());
            None
        }
    }
}

/// Scores exercise repetitions from pose landmarks.
///
/// Safe to call from several threads: the input tensor is guarded by a
/// mutex for the whole submission. The result read is the oldest of the two
/// most recent outputs and stays readable until newer results evict it.
pub struct ExerciseDetector {
    session: DetectorSession,
    results: Arc<dyn ResultBuffer<Packet>>,
    input: Mutex<Tensor>,
}

impl ExerciseDetector {
    pub fn create(engine: Box<dyn GraphEngine>, graph: &str, model: &[u8]) -> Result<Self, GraphError> {
        let graph = GraphConfig::parse(graph)?;
        let side_packets = model_side_packets(model)?;

        let session = DetectorSession::start(
            engine,
            SessionSpec {
                graph,
                input_stream: INPUT_TENSORS.to_string(),
                outputs: vec![OUTPUT_TENSORS.to_string()],
                side_packets,
                buffer: BufferConfig::new(2, BufferStrategy::Mutex, ReadPolicy::PeekRetain),
            },
        )?;
        let results = session
            .fanout()?
            .buffer(0)
            .cloned()
            .ok_or_else(|| GraphError::Engine("output buffer missing".to_string()))?;
        log::info!("Exercise detector {} ready", session.id());

        Ok(Self {
            session,
            results,
            input: Mutex::new(Tensor::zeros(&CLASSIFIER_INPUT_SHAPE)),
        })
    }

    /// Submit up to 66 landmarks and return the current score, or 0.0 when
    /// no result has arrived yet.
    pub fn process(&self, landmarks: &[Landmark]) -> Result<f32, GraphError> {
        if self.session.state() == SessionState::Disposed {
            return Err(GraphError::SessionDisposed);
        }

        {
            let mut input = self.input.lock().unwrap_or_else(PoisonError::into_inner);
            input.write_landmarks(landmarks)?;
            self.session.submit(Payload::Tensors(vec![input.clone()]))?;
        }

        Ok(self
            .results
            .try_pop()
            .and_then(|packet| first_score(&packet).and_then(|values| values.first().copied()))
            .unwrap_or(0.0))
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn dispose(&mut self) {
        self.session.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Calculator, LoopbackEngine};
    use crate::tensor::CLASSIFIER_LANDMARK_COUNT;
    use crate::testing::{self, CLASSIFIER_GRAPH};
    use std::thread;

    fn detector(calculator: Calculator) -> ExerciseDetector {
        ExerciseDetector::create(
            Box::new(LoopbackEngine::inline(calculator)),
            CLASSIFIER_GRAPH,
            b"model",
        )
        .unwrap()
    }

    fn landmarks(x: f32, n: usize) -> Vec<Landmark> {
        vec![Landmark::new(x, 0.0, 0.0, 1.0); n]
    }

    #[test]
    fn test_score_reads_oldest_retained_result() {
        let detector = detector(testing::classifier_calculator());

        assert_eq!(detector.process(&landmarks(1.0, 2)).unwrap(), 2.0);
        // Two results retained now; the older one is read
        assert_eq!(detector.process(&landmarks(1.0, 3)).unwrap(), 2.0);
        assert_eq!(detector.process(&landmarks(1.0, 4)).unwrap(), 3.0);
    }

    #[test]
    fn test_no_result_scores_zero() {
        let detector = detector(Calculator::silent());
        assert_eq!(detector.process(&landmarks(1.0, 66)).unwrap(), 0.0);
    }

    #[test]
    fn test_too_many_landmarks_rejected() {
        let detector = detector(testing::classifier_calculator());
        let result = detector.process(&landmarks(1.0, CLASSIFIER_LANDMARK_COUNT + 1));
        assert!(matches!(result, Err(GraphError::InvalidInput(_))));
        assert_eq!(detector.state(), SessionState::Running);
    }

    #[test]
    fn test_concurrent_process_calls() {
        let detector = Arc::new(detector(testing::classifier_calculator()));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let detector = Arc::clone(&detector);
                thread::spawn(move || {
                    for _ in 0..50 {
                        detector.process(&landmarks(0.5, 10)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(detector.process(&landmarks(0.5, 10)).unwrap(), 5.0);
    }

    #[test]
    fn test_empty_model_rejected() {
        let result = ExerciseDetector::create(
            Box::new(LoopbackEngine::inline(Calculator::silent())),
            CLASSIFIER_GRAPH,
            &[],
        );
        assert!(matches!(result, Err(GraphError::InvalidModel(_))));
    }

    #[test]
    fn test_process_after_dispose() {
        let mut detector = detector(testing::classifier_calculator());
        detector.dispose();
        assert!(matches!(
            detector.process(&landmarks(1.0, 1)),
            Err(GraphError::SessionDisposed)
        ));
    }
}
