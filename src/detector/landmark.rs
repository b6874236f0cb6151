use serde::Serialize;
use std::sync::Arc;

use super::callback::CallbackWorker;
use crate::config::DetectorConfig;
use crate::engine::{GraphEngine, SidePacket, SidePackets};
use crate::error::GraphError;
use crate::fanout::Gathered;
use crate::frame::{FrameFormat, FrameInput, ImageFrame};
use crate::packet::{Packet, Payload};
use crate::session::{DetectorSession, SessionSpec, SessionState};
use crate::types::{Landmark, OutputDecl};

pub const DETECTION_MODEL_BLOB: &str = "detection_model_blob";
pub const LANDMARK_MODEL_BLOB: &str = "landmark_model_blob";
pub const HAND_MODEL_BLOB: &str = "hand_model_blob";
pub const HAND_RECROP_MODEL_BLOB: &str = "hand_recrop_model_blob";

/// Model buffers handed to the graph as side packets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectorModels {
    pub detection: Vec<u8>,
    pub landmark: Vec<u8>,
    pub hand: Vec<u8>,
    pub hand_recrop: Vec<u8>,
}

impl DetectorModels {
    pub fn new(detection: impl Into<Vec<u8>>, landmark: impl Into<Vec<u8>>) -> Self {
        Self {
            detection: detection.into(),
            landmark: landmark.into(),
            ..Self::default()
        }
    }

    pub fn with_hand_models(mut self, hand: impl Into<Vec<u8>>, hand_recrop: impl Into<Vec<u8>>) -> Self {
        self.hand = hand.into();
        self.hand_recrop = hand_recrop.into();
        self
    }

    /// Pose models are required; hand models are passed only when present.
    pub fn side_packets(&self) -> Result<SidePackets, GraphError> {
        let mut packets = SidePackets::new();
        for (name, blob) in [
            (DETECTION_MODEL_BLOB, &self.detection),
            (LANDMARK_MODEL_BLOB, &self.landmark),
        ] {
            if blob.is_empty() {
                return Err(GraphError::InvalidModel(format!("{name} is empty")));
            }
            packets.insert(name.to_string(), SidePacket::blob(blob));
        }
        for (name, blob) in [
            (HAND_MODEL_BLOB, &self.hand),
            (HAND_RECROP_MODEL_BLOB, &self.hand_recrop),
        ] {
            if !blob.is_empty() {
                packets.insert(name.to_string(), SidePacket::blob(blob));
            }
        }
        Ok(packets)
    }
}

/// Landmarks of one `process` call.
///
/// `counts[i]` is the number of features decoded from output `i`; each
/// feature is a fixed block of 33 (pose) or 21 (hand) landmarks, and the
/// blocks are concatenated in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LandmarkOutput {
    pub landmarks: Vec<Landmark>,
    pub counts: Vec<u8>,
}

impl LandmarkOutput {
    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }

    pub fn total_features(&self) -> usize {
        self.counts.iter().map(|&c| usize::from(c)).sum()
    }
}

/// Decode one gather into fixed-size landmark blocks
pub(crate) fn decode_gathered(outputs: &[OutputDecl], gathered: &Gathered<Packet>) -> LandmarkOutput {
    let mut output = LandmarkOutput {
        landmarks: Vec::new(),
        counts: Vec::with_capacity(outputs.len()),
    };

    for (index, decl) in outputs.iter().enumerate() {
        let mut features = 0usize;
        for packet in gathered.slice(index) {
            let room = usize::from(u8::MAX) - features;
            features += decode_packet(decl, packet, room, &mut output.landmarks);
        }
        output.counts.push(u8::try_from(features).unwrap_or(u8::MAX));
    }

    output
}

fn decode_packet(decl: &OutputDecl, packet: &Packet, room: usize, out: &mut Vec<Landmark>) -> usize {
    let Payload::LandmarkLists(lists) = packet.payload() else {
        log::warn!(
            "Cannot decode {} packet on '{}' as {:?}",
            packet.payload().kind(),
            decl.stream,
            decl.feature_type
        );
        return 0;
    };

    let size = decl.feature_type.landmark_count();
    let mut decoded = 0;
    for list in lists.iter().take(room) {
        let start = out.len();
        out.extend(list.iter().take(size).copied());
        out.resize(start + size, Landmark::default());
        decoded += 1;
    }
    decoded
}

/// Pose and hand landmark detection over a caller-supplied graph
pub struct LandmarkDetector {
    session: DetectorSession,
    outputs: Arc<[OutputDecl]>,
    frame_format: FrameFormat,
    callbacks: CallbackWorker,
}

impl LandmarkDetector {
    pub fn create(
        engine: Box<dyn GraphEngine>,
        config: DetectorConfig,
        models: DetectorModels,
    ) -> Result<Self, GraphError> {
        let graph = config.validate()?;
        let input_stream = config.resolve_input_stream(&graph)?;
        let side_packets = models.side_packets()?;
        let callbacks = CallbackWorker::new(&config.callback)?;

        let session = DetectorSession::start(
            engine,
            SessionSpec {
                graph,
                input_stream,
                outputs: config.outputs.iter().map(|o| o.stream.clone()).collect(),
                side_packets,
                buffer: config.buffer,
            },
        )?;
        log::info!(
            "Landmark detector {} ready with {} outputs",
            session.id(),
            config.outputs.len()
        );

        Ok(Self {
            session,
            outputs: config.outputs.into(),
            frame_format: config.frame_format,
            callbacks,
        })
    }

    pub fn outputs(&self) -> &[OutputDecl] {
        &self.outputs
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    fn submit_frame(&self, frame: &FrameInput<'_>) -> Result<(), GraphError> {
        if self.session.state() == SessionState::Disposed {
            return Err(GraphError::SessionDisposed);
        }

        let image = ImageFrame::from_input(frame, self.frame_format).map_err(|e| {
            log::warn!("Session {}: dropping frame: {}", self.session.id(), e);
            e
        })?;
        self.session.submit(Payload::Image(image))?;
        Ok(())
    }

    /// Submit a frame and return whatever results are buffered right now.
    ///
    /// Results usually lag the submitted frame; an empty output with zero
    /// counts is a normal answer.
    pub fn process(&self, frame: &FrameInput<'_>) -> Result<LandmarkOutput, GraphError> {
        self.submit_frame(frame)?;
        let gathered = self.session.gather()?;
        Ok(decode_gathered(&self.outputs, &gathered))
    }

    /// Submit a frame and deliver the buffered results to `callback` from a
    /// worker thread. The callback is skipped when the worker queue is full.
    pub fn process_with<F>(&self, frame: &FrameInput<'_>, callback: F) -> Result<(), GraphError>
    where
        F: FnOnce(LandmarkOutput) + Send + 'static,
    {
        self.submit_frame(frame)?;

        let fanout = self.session.fanout()?;
        let outputs = Arc::clone(&self.outputs);
        self.callbacks.execute(move || {
            let output = decode_gathered(&outputs, &fanout.gather_all());
            callback(output);
        });
        Ok(())
    }

    /// Callback jobs dropped on a full queue
    pub fn dropped_callbacks(&self) -> u64 {
        self.callbacks.dropped()
    }

    /// Shut the graph down and wait for pending callbacks. Idempotent.
    pub fn dispose(&mut self) {
        self.session.dispose();
        self.callbacks.shutdown();
    }
}

impl Drop for LandmarkDetector {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferConfig, BufferStrategy, ReadPolicy};
    use crate::engine::{Calculator, LoopbackEngine};
    use crate::testing::{self, POSE_GRAPH};
    use crate::timestamp::Timestamp;
    use crate::types::{FeatureType, InputType, HAND_LANDMARK_COUNT, POSE_LANDMARK_COUNT};
    use crossbeam_channel::unbounded;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn pose_outputs() -> Vec<OutputDecl> {
        vec![
            OutputDecl::new(FeatureType::NormalizedLandmarks, "pose_landmarks"),
            OutputDecl::new(FeatureType::WorldLandmarks, "pose_world_landmarks"),
            OutputDecl::new(FeatureType::NormalizedHandLandmarks, "hand_landmarks"),
        ]
    }

    fn detector(outputs: Vec<OutputDecl>) -> LandmarkDetector {
        LandmarkDetector::create(
            Box::new(LoopbackEngine::inline(testing::pose_calculator())),
            DetectorConfig::new(POSE_GRAPH, outputs),
            testing::detector_models(),
        )
        .unwrap()
    }

    #[test]
    fn test_process_returns_blocks_in_declared_order() {
        let detector = detector(pose_outputs());
        let pixels = vec![0u8; 4 * 2 * 3];

        let output = detector
            .process(&FrameInput::new(&pixels, 4, 2, InputType::Rgb))
            .unwrap();

        assert_eq!(output.counts, vec![1, 1, 2]);
        assert_eq!(output.total_features(), 4);
        assert_eq!(
            output.landmarks.len(),
            2 * POSE_LANDMARK_COUNT + 2 * HAND_LANDMARK_COUNT
        );
        // Pose landmarks carry the frame size
        assert_eq!(output.landmarks[0].x, 4.0);
        assert_eq!(output.landmarks[0].y, 2.0);
    }

    #[test]
    fn test_results_are_read_once() {
        let detector = detector(pose_outputs());
        let pixels = vec![0u8; 2 * 2 * 3];
        let frame = FrameInput::new(&pixels, 2, 2, InputType::Rgb);

        assert_eq!(detector.process(&frame).unwrap().counts, vec![1, 1, 2]);
        assert_eq!(detector.process(&frame).unwrap().counts, vec![1, 1, 2]);
    }

    #[test]
    fn test_no_result_yields_zero_counts() {
        let detector = LandmarkDetector::create(
            Box::new(LoopbackEngine::inline(Calculator::silent())),
            DetectorConfig::new(POSE_GRAPH, pose_outputs()),
            testing::detector_models(),
        )
        .unwrap();

        let pixels = vec![0u8; 3];
        let output = detector
            .process(&FrameInput::new(&pixels, 1, 1, InputType::Rgb))
            .unwrap();
        assert_eq!(output.counts, vec![0, 0, 0]);
        assert!(output.is_empty());
    }

    #[test]
    fn test_peek_retain_replays_previous_result() {
        let mut config = DetectorConfig::new(POSE_GRAPH, pose_outputs()[..1].to_vec());
        config.buffer = BufferConfig::new(2, BufferStrategy::Mutex, ReadPolicy::PeekRetain);
        let detector = LandmarkDetector::create(
            Box::new(LoopbackEngine::inline(testing::pose_calculator())),
            config,
            testing::detector_models(),
        )
        .unwrap();

        let pixels = vec![0u8; 3];
        let frame = FrameInput::new(&pixels, 1, 1, InputType::Rgb);
        assert_eq!(detector.process(&frame).unwrap().counts, vec![1]);
        assert_eq!(detector.process(&frame).unwrap().counts, vec![2]);
        assert_eq!(detector.process(&frame).unwrap().counts, vec![2]);
    }

    #[test]
    fn test_short_and_long_lists_are_padded_and_truncated() {
        let decls = vec![
            OutputDecl::new(FeatureType::NormalizedLandmarks, "pose"),
            OutputDecl::new(FeatureType::WorldHandLandmarks, "hand"),
        ];
        let short = vec![Landmark::new(1.0, 1.0, 1.0, 1.0); 5];
        let long = vec![Landmark::new(2.0, 2.0, 2.0, 1.0); 40];
        let gathered = Gathered {
            items: vec![
                Packet::new(Payload::LandmarkLists(vec![short]), Timestamp(1)),
                Packet::new(Payload::LandmarkLists(vec![long]), Timestamp(1)),
            ],
            counts: vec![1, 1],
        };

        let output = decode_gathered(&decls, &gathered);
        assert_eq!(output.counts, vec![1, 1]);
        assert_eq!(output.landmarks.len(), POSE_LANDMARK_COUNT + HAND_LANDMARK_COUNT);
        assert_eq!(output.landmarks[4].x, 1.0);
        assert_eq!(output.landmarks[5], Landmark::default());
        assert_eq!(output.landmarks[POSE_LANDMARK_COUNT].x, 2.0);
    }

    #[test]
    fn test_undecodable_packet_counts_zero() {
        let decls = vec![OutputDecl::new(FeatureType::NormalizedLandmarks, "pose")];
        let gathered = Gathered {
            items: vec![Packet::new(Payload::Tensors(Vec::new()), Timestamp(1))],
            counts: vec![1],
        };
        let output = decode_gathered(&decls, &gathered);
        assert_eq!(output.counts, vec![0]);
        assert!(output.landmarks.is_empty());
    }

    #[test]
    fn test_feature_count_saturates_at_u8() {
        let decls = vec![OutputDecl::new(FeatureType::NormalizedHandLandmarks, "hands")];
        let many = vec![Vec::new(); 300];
        let gathered = Gathered {
            items: vec![Packet::new(Payload::LandmarkLists(many), Timestamp(1))],
            counts: vec![1],
        };
        let output = decode_gathered(&decls, &gathered);
        assert_eq!(output.counts, vec![u8::MAX]);
        assert_eq!(output.landmarks.len(), 255 * HAND_LANDMARK_COUNT);
    }

    #[test]
    fn test_bad_frame_keeps_detector_running() {
        let detector = detector(pose_outputs());
        let pixels = vec![0u8; 5];

        let err = detector
            .process(&FrameInput::new(&pixels, 2, 2, InputType::Rgb))
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidFrame(_)));
        assert_eq!(detector.state(), SessionState::Running);
    }

    #[test]
    fn test_empty_model_is_construction_failure() {
        let result = LandmarkDetector::create(
            Box::new(LoopbackEngine::inline(testing::pose_calculator())),
            DetectorConfig::new(POSE_GRAPH, pose_outputs()),
            DetectorModels::new(Vec::new(), b"landmark".to_vec()),
        );
        assert!(matches!(result, Err(GraphError::InvalidModel(_))));
    }

    #[test]
    fn test_hand_models_only_passed_when_present() {
        let packets = testing::detector_models().side_packets().unwrap();
        assert!(!packets.contains_key(HAND_MODEL_BLOB));

        let packets = testing::detector_models()
            .with_hand_models(b"hand".to_vec(), b"recrop".to_vec())
            .side_packets()
            .unwrap();
        assert_eq!(
            packets.get(HAND_RECROP_MODEL_BLOB).and_then(SidePacket::as_blob),
            Some(&b"recrop"[..])
        );
    }

    #[test]
    fn test_process_after_dispose() {
        let mut detector = detector(pose_outputs());
        detector.dispose();
        detector.dispose();

        let pixels = vec![0u8; 3];
        let result = detector.process(&FrameInput::new(&pixels, 1, 1, InputType::Rgb));
        assert!(matches!(result, Err(GraphError::SessionDisposed)));
    }

    #[test]
    fn test_process_with_delivers_on_worker() {
        let mut detector = LandmarkDetector::create(
            Box::new(LoopbackEngine::threaded(
                testing::pose_calculator(),
                Duration::from_millis(1),
            )),
            DetectorConfig::new(POSE_GRAPH, pose_outputs()),
            testing::detector_models(),
        )
        .unwrap();

        let (tx, rx) = unbounded();
        let pixels = vec![0u8; 3];
        for _ in 0..3 {
            let tx = tx.clone();
            detector
                .process_with(&FrameInput::new(&pixels, 1, 1, InputType::Rgb), move |output| {
                    tx.send(output.counts.len()).unwrap();
                })
                .unwrap();
        }

        detector.dispose();
        drop(tx);
        let delivered: Vec<usize> = rx.iter().collect();
        assert!(!delivered.is_empty());
        assert!(delivered.iter().all(|&len| len == 3));
    }
}
