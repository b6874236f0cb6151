//! Detector and classifier facades
//!
//! Each facade owns one [`DetectorSession`](crate::session::DetectorSession)
//! and translates between caller data (frames, landmark arrays) and engine
//! packets:
//!
//! - [`LandmarkDetector`]: frames in, pose/hand landmarks out, with a
//!   synchronous `process` and a callback-driven `process_with`
//! - [`ExerciseDetector`]: landmarks in, a single score out
//! - [`PoseClassifier`]: landmarks in, confidence plus feedbacks out
//! - [`GestureClassifier`]: frames in, recognized hand gestures out

mod callback;
mod exercise;
mod gesture;
mod landmark;
mod pose_classifier;

pub use callback::CallbackWorker;
pub use exercise::{ExerciseDetector, INPUT_TENSORS, MODEL_BLOB, OUTPUT_TENSORS};
pub use gesture::{GestureClassifier, GestureOptions, GestureResult, RunningMode, GESTURE_GRAPH};
pub use landmark::{
    DetectorModels, LandmarkDetector, LandmarkOutput, DETECTION_MODEL_BLOB, HAND_MODEL_BLOB,
    HAND_RECROP_MODEL_BLOB, LANDMARK_MODEL_BLOB,
};
pub use pose_classifier::{Classification, PoseClassifier, PoseClassifierOptions};
