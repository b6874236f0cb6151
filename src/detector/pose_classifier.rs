use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use super::exercise::{first_score, model_side_packets, INPUT_TENSORS, OUTPUT_TENSORS};
use crate::buffer::{BufferConfig, BufferStrategy, ReadPolicy, ResultBuffer, DEFAULT_CAPACITY};
use crate::config::GraphConfig;
use crate::engine::GraphEngine;
use crate::error::GraphError;
use crate::packet::{Packet, Payload};
use crate::session::{DetectorSession, SessionSpec, SessionState};
use crate::tensor::{Tensor, CLASSIFIER_INPUT_SHAPE, CLASSIFIER_LANDMARK_COUNT};
use crate::types::Landmark;

/// Confidence plus per-joint feedback scores of one classified pose
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub confidence: f32,
    pub feedbacks: Vec<f32>,
}

impl Classification {
    fn from_scores(scores: &[f32]) -> Self {
        Self {
            confidence: scores.first().copied().unwrap_or(f32::NAN),
            feedbacks: scores.iter().skip(1).copied().collect(),
        }
    }

    /// Copy feedbacks into `out`; slots the model did not produce are NaN.
    pub fn write_feedbacks(&self, out: &mut [f32]) {
        out.fill(f32::NAN);
        for (slot, value) in out.iter_mut().zip(&self.feedbacks) {
            *slot = *value;
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoseClassifierOptions {
    /// Block up to this long for a result instead of returning `None`
    pub wait_for_result: Option<Duration>,
}

/// Classifies a pose from normalized and world landmarks (66 in total).
///
/// Results come from a stream poller. `classify` takes `&mut self`: the
/// input tensor is rewritten in place on every call.
pub struct PoseClassifier {
    session: DetectorSession,
    poller: Arc<dyn ResultBuffer<Packet>>,
    input: Tensor,
    options: PoseClassifierOptions,
}

impl PoseClassifier {
    pub fn create(engine: Box<dyn GraphEngine>, graph: &str, model: &[u8]) -> Result<Self, GraphError> {
        Self::create_with_options(engine, graph, model, PoseClassifierOptions::default())
    }

    pub fn create_with_options(
        engine: Box<dyn GraphEngine>,
        graph: &str,
        model: &[u8],
        options: PoseClassifierOptions,
    ) -> Result<Self, GraphError> {
        let graph = GraphConfig::parse(graph)?;
        let side_packets = model_side_packets(model)?;

        let session = DetectorSession::start(
            engine,
            SessionSpec {
                graph,
                input_stream: INPUT_TENSORS.to_string(),
                outputs: vec![OUTPUT_TENSORS.to_string()],
                side_packets,
                buffer: BufferConfig::new(DEFAULT_CAPACITY, BufferStrategy::Poller, ReadPolicy::PopOnce),
            },
        )?;
        let poller = session
            .fanout()?
            .buffer(0)
            .cloned()
            .ok_or_else(|| GraphError::Engine("output poller missing".to_string()))?;
        log::info!("Pose classifier {} ready", session.id());

        Ok(Self {
            session,
            poller,
            input: Tensor::zeros(&CLASSIFIER_INPUT_SHAPE),
            options,
        })
    }

    /// Submit exactly 66 landmarks and return the next queued result, if any.
    pub fn classify(&mut self, landmarks: &[Landmark]) -> Result<Option<Classification>, GraphError> {
        if self.session.state() == SessionState::Disposed {
            return Err(GraphError::SessionDisposed);
        }
        if landmarks.len() != CLASSIFIER_LANDMARK_COUNT {
            return Err(GraphError::InvalidInput(format!(
                "pose classifier needs {} landmarks, got {}",
                CLASSIFIER_LANDMARK_COUNT,
                landmarks.len()
            )));
        }

        self.input.write_landmarks(landmarks)?;
        self.session.submit(Payload::Tensors(vec![self.input.clone()]))?;

        let packet = match self.options.wait_for_result {
            Some(timeout) => self.poller.pop_timeout(timeout),
            None => self.poller.try_pop(),
        };
        Ok(packet.and_then(|packet| first_score(&packet).map(Classification::from_scores)))
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn dispose(&mut self) {
        self.session.dispose();
    }
}
