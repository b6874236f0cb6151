//! C boundary behavior when the host never installed a graph engine.
//!
//! Runs as its own binary so the process-wide engine factory stays empty.

use std::ffi::{CStr, CString};
use std::ptr;

use mediagraph::engine::uninstall_engine_factory;
use mediagraph::ffi::*;
use mediagraph::FeatureType;

const GRAPH: &str = r#"
input_stream: "input_video"
output_stream: "pose_landmarks"
input_side_packet: "detection_model_blob"
input_side_packet: "landmark_model_blob"
"#;

unsafe fn last_error() -> String {
    let error = mediagraph_last_error();
    assert!(!error.is_null());
    CStr::from_ptr(error).to_str().unwrap().to_string()
}

#[test]
fn test_create_without_engine_fails() {
    uninstall_engine_factory();

    unsafe {
        let graph = CString::new(GRAPH).unwrap();
        let name = CString::new("pose_landmarks").unwrap();
        let outputs = [MediagraphOutput {
            feature_type: FeatureType::NormalizedLandmarks as i32,
            name: name.as_ptr(),
        }];

        let detector = mediagraph_detector_create(
            graph.as_ptr(),
            b"detection".as_ptr(),
            9,
            b"landmark".as_ptr(),
            8,
            ptr::null(),
            0,
            ptr::null(),
            0,
            outputs.as_ptr(),
            1,
            None,
        );
        assert!(detector.is_null());
        assert_eq!(last_error(), "No graph engine installed");

        let model = b"model";
        let exercise = mediagraph_exercise_detector_create(graph.as_ptr(), model.as_ptr(), model.len());
        assert!(exercise.is_null());
        assert_eq!(last_error(), "No graph engine installed");

        let gestures = mediagraph_gesture_classifier_create(model.as_ptr(), model.len());
        assert!(gestures.is_null());
        assert_eq!(last_error(), "No graph engine installed");
    }
}
