//! Graphs and calculators shared by the facade and C boundary tests

use std::sync::Arc;

use crate::detector::DetectorModels;
use crate::engine::{install_engine_factory, Calculator, GraphEngine, LoopbackEngine};
use crate::packet::Payload;
use crate::tensor::{Tensor, VALUES_PER_LANDMARK};
use crate::types::{Category, Landmark, HAND_LANDMARK_COUNT, POSE_LANDMARK_COUNT};

pub const POSE_GRAPH: &str = r#"
input_stream: "input_video"
output_stream: "pose_landmarks"
output_stream: "pose_world_landmarks"
output_stream: "hand_landmarks"
input_side_packet: "detection_model_blob"
input_side_packet: "landmark_model_blob"
"#;

pub const CLASSIFIER_GRAPH: &str = r#"
input_stream: "input_tensors"
output_stream: "output_tensors"
input_side_packet: "model_blob"
"#;

pub fn detector_models() -> DetectorModels {
    DetectorModels::new(b"detection".to_vec(), b"landmark".to_vec())
}

/// One pose per frame on both pose streams, with x and y set to the frame
/// size, and two empty-position hands.
pub fn pose_calculator() -> Calculator {
    Calculator::new(|_, packet| match packet.payload() {
        Payload::Image(frame) => {
            let pose = vec![
                Landmark::new(frame.width() as f32, frame.height() as f32, 0.0, 1.0);
                POSE_LANDMARK_COUNT
            ];
            let hands = vec![vec![Landmark::default(); HAND_LANDMARK_COUNT]; 2];
            vec![
                (
                    "pose_landmarks".to_string(),
                    Payload::LandmarkLists(vec![pose.clone()]),
                ),
                (
                    "pose_world_landmarks".to_string(),
                    Payload::LandmarkLists(vec![pose]),
                ),
                ("hand_landmarks".to_string(), Payload::LandmarkLists(hands)),
            ]
        }
        _ => Vec::new(),
    })
}

/// Output tensor `[sum of x, 0.5, 0.25]` for every input tensor
pub fn classifier_calculator() -> Calculator {
    Calculator::new(|_, packet| match packet.payload() {
        Payload::Tensors(tensors) => {
            let sum: f32 = tensors
                .first()
                .map(|t| t.data().iter().step_by(VALUES_PER_LANDMARK).sum())
                .unwrap_or(0.0);
            vec![(
                "output_tensors".to_string(),
                Payload::Tensors(vec![Tensor::vector(vec![sum, 0.5, 0.25])]),
            )]
        }
        _ => Vec::new(),
    })
}

/// A "Thumb_Up" right hand for every frame
pub fn gesture_calculator() -> Calculator {
    Calculator::new(|_, packet| match packet.payload() {
        Payload::Image(_) => {
            let hand = vec![Landmark::new(0.5, 0.5, 0.0, 1.0); HAND_LANDMARK_COUNT];
            vec![
                (
                    "hand_landmarks".to_string(),
                    Payload::LandmarkLists(vec![hand.clone()]),
                ),
                (
                    "hand_world_landmarks".to_string(),
                    Payload::LandmarkLists(vec![hand]),
                ),
                (
                    "handedness".to_string(),
                    Payload::Classifications(vec![vec![Category::new("Right", 0.98)]]),
                ),
                (
                    "hand_gestures".to_string(),
                    Payload::Classifications(vec![vec![
                        Category::new("Open_Palm", 0.05),
                        Category::new("Thumb_Up", 0.9),
                    ]]),
                ),
            ]
        }
        _ => Vec::new(),
    })
}

/// Routes by input stream to the pose, classifier or gesture calculator
pub fn combined_calculator() -> Calculator {
    let pose = pose_calculator();
    let classifier = classifier_calculator();
    let gesture = gesture_calculator();
    Calculator::new(move |stream, packet| match stream {
        "input_tensors" => classifier.run(stream, packet),
        "image" => gesture.run(stream, packet),
        _ => pose.run(stream, packet),
    })
}

/// Install an inline loopback engine running [`combined_calculator`]
pub fn install_loopback_factory() {
    let factory = || -> Box<dyn GraphEngine> { Box::new(LoopbackEngine::inline(combined_calculator())) };
    install_engine_factory(Arc::new(factory));
}
