//! FFI bindings for Mediagraph
//!
//! C-compatible entry points for the detector and classifier facades.
//! Handles are opaque heap pointers created by `*_create` and released by
//! `*_free`. Functions that fail return NULL (or a negative status) and store
//! a message retrievable with `mediagraph_last_error`. Strings returned by
//! this module must be freed with `mediagraph_free_string`, landmark arrays
//! with `mediagraph_landmarks_free`.
//!
//! Sessions get their engine from the factory installed with
//! [`install_engine_factory`](crate::engine::install_engine_factory).

use std::cell::RefCell;
use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::slice;

use crate::config::DetectorConfig;
use crate::detector::{
    DetectorModels, ExerciseDetector, GestureClassifier, GestureOptions, LandmarkDetector,
    PoseClassifier,
};
use crate::engine::create_engine;
use crate::error::GraphError;
use crate::frame::FrameInput;
use crate::tensor::CLASSIFIER_LANDMARK_COUNT;
use crate::types::{FeatureType, Flip, InputType, Landmark, OutputDecl};

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Set the last error message
fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Clear the last error message
fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Record `result`'s error, if any, as the last error
fn record<T>(result: Result<T, GraphError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            set_last_error(&e.to_string());
            None
        }
    }
}

/// Run `f`, turning a panic into `fallback` plus a last error
fn guard<T>(fallback: T, f: impl FnOnce() -> T) -> T {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            log::error!("Panic caught at the C boundary");
            set_last_error("Internal error");
            fallback
        }
    }
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Borrow a caller buffer; NULL or zero length is an empty slice
unsafe fn bytes<'a>(data: *const u8, len: usize) -> &'a [u8] {
    if data.is_null() || len == 0 {
        return &[];
    }
    slice::from_raw_parts(data, len)
}

/// Validate frame parameters and borrow the pixel buffer
unsafe fn frame_from_raw<'a>(
    data: *const u8,
    width: i32,
    height: i32,
    input_type: i32,
    flip: i32,
) -> Result<FrameInput<'a>, GraphError> {
    if data.is_null() {
        return Err(GraphError::InvalidFrame("null frame data".to_string()));
    }
    let (Ok(width), Ok(height)) = (u32::try_from(width), u32::try_from(height)) else {
        return Err(GraphError::InvalidFrame(format!("bad frame size {width}x{height}")));
    };
    let input_type = InputType::try_from(input_type)?;
    let flip = Flip::try_from(flip)?;

    let len = width as usize * height as usize * input_type.channels();
    let pixels = slice::from_raw_parts(data, len);
    Ok(FrameInput::new(pixels, width, height, input_type).with_flip(flip))
}

// ============================================================================
// Landmark Detector API
// ============================================================================

/// One declared output: how to decode it and which stream it comes from
#[repr(C)]
pub struct MediagraphOutput {
    pub feature_type: i32,
    pub name: *const c_char,
}

/// Receives the results of `mediagraph_detector_process_async` on a worker
/// thread. The pointers are only valid for the duration of the call.
pub type MediagraphResultCallback = unsafe extern "C" fn(
    ctx: *const c_void,
    landmarks: *const Landmark,
    num_features: *const u8,
    num_features_len: u8,
);

/// Caller context handed back to the result callback
struct CallbackContext(*const c_void);

// The caller guarantees the context outlives the detector
unsafe impl Send for CallbackContext {}

impl CallbackContext {
    fn get(&self) -> *const c_void {
        self.0
    }
}

/// Opaque handle to a LandmarkDetector
pub struct DetectorHandle {
    detector: LandmarkDetector,
    callback: Option<MediagraphResultCallback>,
}

unsafe fn read_outputs(outputs: *const MediagraphOutput, num_outputs: u8) -> Result<Vec<OutputDecl>, GraphError> {
    if outputs.is_null() || num_outputs == 0 {
        return Err(GraphError::InvalidConfig("no outputs declared".to_string()));
    }

    slice::from_raw_parts(outputs, usize::from(num_outputs))
        .iter()
        .map(|output| {
            let feature_type = FeatureType::try_from(output.feature_type)?;
            let name = cstr_to_string(output.name)
                .ok_or_else(|| GraphError::InvalidConfig("invalid output name pointer".to_string()))?;
            Ok(OutputDecl::new(feature_type, name))
        })
        .collect()
}

/// Create a landmark detector.
///
/// # Safety
/// - `graph` must be a valid null-terminated C string.
/// - Each model pointer must reference at least its length in bytes, or be
///   NULL with length 0. Hand models are optional.
/// - `outputs` must point to `num_outputs` entries whose names are valid C strings.
/// - Returns NULL on error; call `mediagraph_last_error` to get the error message.
/// - Must be freed with `mediagraph_detector_free`.
#[no_mangle]
pub unsafe extern "C" fn mediagraph_detector_create(
    graph: *const c_char,
    detection_model: *const u8,
    d_len: usize,
    landmark_model: *const u8,
    l_len: usize,
    hand_model: *const u8,
    h_len: usize,
    hand_recrop_model: *const u8,
    hr_len: usize,
    outputs: *const MediagraphOutput,
    num_outputs: u8,
    callback: Option<MediagraphResultCallback>,
) -> *mut DetectorHandle {
    clear_last_error();

    let graph_str = match cstr_to_string(graph) {
        Some(s) => s,
        None => {
            set_last_error("Invalid graph string pointer");
            return ptr::null_mut();
        }
    };

    guard(ptr::null_mut(), || {
        let Some(decls) = record(read_outputs(outputs, num_outputs)) else {
            return ptr::null_mut();
        };
        let models = DetectorModels::new(bytes(detection_model, d_len), bytes(landmark_model, l_len))
            .with_hand_models(bytes(hand_model, h_len), bytes(hand_recrop_model, hr_len));

        let created = create_engine()
            .and_then(|engine| LandmarkDetector::create(engine, DetectorConfig::new(graph_str, decls), models));
        match record(created) {
            Some(detector) => Box::into_raw(Box::new(DetectorHandle { detector, callback })),
            None => {
                log::warn!("Error initializing detector: {}", last_error_message());
                ptr::null_mut()
            }
        }
    })
}

/// Submit a frame and return the landmarks buffered so far.
///
/// # Safety
/// - `detector` must be a valid pointer returned by `mediagraph_detector_create`.
/// - `data` must hold `width * height * channels` bytes for `input_type`.
/// - `num_features` must point to `num_features_len` writable bytes, at least
///   one per declared output. `out_len` must be writable.
/// - Returns NULL when there is no result (last error unset) or on error.
///   A non-NULL array must be freed with `mediagraph_landmarks_free`.
#[no_mangle]
pub unsafe extern "C" fn mediagraph_detector_process(
    detector: *mut DetectorHandle,
    data: *const u8,
    width: i32,
    height: i32,
    input_type: i32,
    flip: i32,
    num_features: *mut u8,
    num_features_len: u8,
    out_len: *mut usize,
) -> *mut Landmark {
    clear_last_error();

    if detector.is_null() {
        set_last_error("Null detector pointer");
        return ptr::null_mut();
    }
    if num_features.is_null() || out_len.is_null() {
        set_last_error("Null output pointer");
        return ptr::null_mut();
    }
    *out_len = 0;

    let handle = &*detector;
    if usize::from(num_features_len) < handle.detector.outputs().len() {
        set_last_error("num_features is shorter than the declared outputs");
        return ptr::null_mut();
    }

    guard(ptr::null_mut(), || {
        let Some(frame) = record(frame_from_raw(data, width, height, input_type, flip)) else {
            return ptr::null_mut();
        };
        let Some(output) = record(handle.detector.process(&frame)) else {
            return ptr::null_mut();
        };

        let counts = slice::from_raw_parts_mut(num_features, usize::from(num_features_len));
        counts.fill(0);
        counts[..output.counts.len()].copy_from_slice(&output.counts);

        if output.landmarks.is_empty() {
            return ptr::null_mut();
        }
        let landmarks = output.landmarks.into_boxed_slice();
        *out_len = landmarks.len();
        Box::into_raw(landmarks) as *mut Landmark
    })
}

/// Submit a frame; the buffered results are delivered to the callback given
/// at creation, from a worker thread.
///
/// # Safety
/// - `detector` must be a valid pointer returned by `mediagraph_detector_create`.
/// - `data` must hold `width * height * channels` bytes for `input_type`.
/// - `callback_ctx` must stay valid until `mediagraph_detector_dispose` returns.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn mediagraph_detector_process_async(
    detector: *mut DetectorHandle,
    data: *const u8,
    width: i32,
    height: i32,
    input_type: i32,
    flip: i32,
    callback_ctx: *const c_void,
) -> i32 {
    clear_last_error();

    if detector.is_null() {
        set_last_error("Null detector pointer");
        return -1;
    }
    let handle = &*detector;
    let Some(callback) = handle.callback else {
        set_last_error("Detector was created without a result callback");
        return -1;
    };

    guard(-1, || {
        let Some(frame) = record(frame_from_raw(data, width, height, input_type, flip)) else {
            return -1;
        };

        let ctx = CallbackContext(callback_ctx);
        let submitted = handle.detector.process_with(&frame, move |output| {
            let landmarks = if output.landmarks.is_empty() {
                ptr::null()
            } else {
                output.landmarks.as_ptr()
            };
            let len = u8::try_from(output.counts.len()).unwrap_or(u8::MAX);
            callback(ctx.get(), landmarks, output.counts.as_ptr(), len);
        });
        match record(submitted) {
            Some(()) => 0,
            None => -1,
        }
    })
}

/// Shut the detector's graph down and wait for pending callbacks.
///
/// # Safety
/// - `detector` must be a valid pointer returned by `mediagraph_detector_create`, or NULL.
/// - Later process calls fail; the handle must still be freed.
#[no_mangle]
pub unsafe extern "C" fn mediagraph_detector_dispose(detector: *mut DetectorHandle) {
    if !detector.is_null() {
        (*detector).detector.dispose();
    }
}

/// Free a detector, disposing it first if needed.
///
/// # Safety
/// - `detector` must be a valid pointer returned by `mediagraph_detector_create`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn mediagraph_detector_free(detector: *mut DetectorHandle) {
    if !detector.is_null() {
        drop(Box::from_raw(detector));
    }
}

/// Free a landmark array returned by `mediagraph_detector_process`.
///
/// # Safety
/// - `landmarks` and `len` must be exactly as returned, or `landmarks` NULL.
#[no_mangle]
pub unsafe extern "C" fn mediagraph_landmarks_free(landmarks: *mut Landmark, len: usize) {
    if !landmarks.is_null() {
        drop(Box::from_raw(ptr::slice_from_raw_parts_mut(landmarks, len)));
    }
}

// ============================================================================
// Exercise Detector API
// ============================================================================

/// Opaque handle to an ExerciseDetector
pub struct ExerciseDetectorHandle {
    detector: ExerciseDetector,
}

/// Create an exercise detector.
///
/// # Safety
/// - `graph` must be a valid null-terminated C string.
/// - `model` must reference `m_len` bytes.
/// - Returns NULL on error. Must be freed with `mediagraph_exercise_detector_free`.
#[no_mangle]
pub unsafe extern "C" fn mediagraph_exercise_detector_create(
    graph: *const c_char,
    model: *const u8,
    m_len: usize,
) -> *mut ExerciseDetectorHandle {
    clear_last_error();

    let graph_str = match cstr_to_string(graph) {
        Some(s) => s,
        None => {
            set_last_error("Invalid graph string pointer");
            return ptr::null_mut();
        }
    };

    guard(ptr::null_mut(), || {
        let created = create_engine().and_then(|engine| ExerciseDetector::create(engine, &graph_str, bytes(model, m_len)));
        match record(created) {
            Some(detector) => Box::into_raw(Box::new(ExerciseDetectorHandle { detector })),
            None => ptr::null_mut(),
        }
    })
}

/// Submit landmarks and return the current score.
///
/// # Safety
/// - `detector` must be a valid pointer returned by `mediagraph_exercise_detector_create`.
/// - `landmarks` must point to `len` landmarks (at most 66).
/// - Returns 0.0 when no result is available or on error; check
///   `mediagraph_last_error` to tell them apart.
#[no_mangle]
pub unsafe extern "C" fn mediagraph_exercise_detector_process(
    detector: *mut ExerciseDetectorHandle,
    landmarks: *const Landmark,
    len: usize,
) -> f32 {
    clear_last_error();

    if detector.is_null() {
        set_last_error("Null detector pointer");
        return 0.0;
    }
    if landmarks.is_null() && len > 0 {
        set_last_error("Null landmarks pointer");
        return 0.0;
    }
    let handle = &*detector;
    let landmarks: &[Landmark] = if len == 0 {
        &[]
    } else {
        slice::from_raw_parts(landmarks, len)
    };

    guard(0.0, || record(handle.detector.process(landmarks)).unwrap_or(0.0))
}

/// # Safety
/// - `detector` must be a valid pointer returned by `mediagraph_exercise_detector_create`, or NULL.
#[no_mangle]
pub unsafe extern "C" fn mediagraph_exercise_detector_dispose(detector: *mut ExerciseDetectorHandle) {
    if !detector.is_null() {
        (*detector).detector.dispose();
    }
}

/// # Safety
/// - `detector` must be a valid pointer returned by `mediagraph_exercise_detector_create`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn mediagraph_exercise_detector_free(detector: *mut ExerciseDetectorHandle) {
    if !detector.is_null() {
        drop(Box::from_raw(detector));
    }
}

// ============================================================================
// Pose Classifier API
// ============================================================================

/// Opaque handle to a PoseClassifier
pub struct PoseClassifierHandle {
    classifier: PoseClassifier,
}

/// Create a pose classifier.
///
/// # Safety
/// - `graph` must be a valid null-terminated C string.
/// - `model` must reference `m_len` bytes.
/// - Returns NULL on error. Must be freed with `mediagraph_pose_classifier_free`.
#[no_mangle]
pub unsafe extern "C" fn mediagraph_pose_classifier_create(
    graph: *const c_char,
    model: *const u8,
    m_len: usize,
) -> *mut PoseClassifierHandle {
    clear_last_error();

    let graph_str = match cstr_to_string(graph) {
        Some(s) => s,
        None => {
            set_last_error("Invalid graph string pointer");
            return ptr::null_mut();
        }
    };

    guard(ptr::null_mut(), || {
        let created = create_engine().and_then(|engine| PoseClassifier::create(engine, &graph_str, bytes(model, m_len)));
        match record(created) {
            Some(classifier) => Box::into_raw(Box::new(PoseClassifierHandle { classifier })),
            None => ptr::null_mut(),
        }
    })
}

/// Classify 66 landmarks (33 normalized followed by 33 world landmarks).
///
/// # Safety
/// - `classifier` must be a valid pointer returned by `mediagraph_pose_classifier_create`.
/// - `landmarks` must point to 66 landmarks.
/// - `confidence` must be writable; `feedbacks` must point to
///   `feedbacks_len` writable floats (NULL when `feedbacks_len` is 0).
/// - Must not be called concurrently on the same handle.
/// - Returns 1 when a result was written, 0 when none was ready, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn mediagraph_pose_classifier_process(
    classifier: *mut PoseClassifierHandle,
    landmarks: *const Landmark,
    confidence: *mut f32,
    feedbacks: *mut f32,
    feedbacks_len: usize,
) -> i32 {
    clear_last_error();

    if classifier.is_null() {
        set_last_error("Null classifier pointer");
        return -1;
    }
    if landmarks.is_null() || confidence.is_null() || (feedbacks.is_null() && feedbacks_len > 0) {
        set_last_error("Null input or output pointer");
        return -1;
    }
    let handle = &mut *classifier;
    let landmarks = slice::from_raw_parts(landmarks, CLASSIFIER_LANDMARK_COUNT);

    guard(-1, || match record(handle.classifier.classify(landmarks)) {
        Some(Some(result)) => {
            *confidence = result.confidence;
            if feedbacks_len > 0 {
                result.write_feedbacks(slice::from_raw_parts_mut(feedbacks, feedbacks_len));
            }
            1
        }
        Some(None) => 0,
        None => -1,
    })
}

/// # Safety
/// - `classifier` must be a valid pointer returned by `mediagraph_pose_classifier_create`, or NULL.
#[no_mangle]
pub unsafe extern "C" fn mediagraph_pose_classifier_dispose(classifier: *mut PoseClassifierHandle) {
    if !classifier.is_null() {
        (*classifier).classifier.dispose();
    }
}

/// # Safety
/// - `classifier` must be a valid pointer returned by `mediagraph_pose_classifier_create`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn mediagraph_pose_classifier_free(classifier: *mut PoseClassifierHandle) {
    if !classifier.is_null() {
        drop(Box::from_raw(classifier));
    }
}

// ============================================================================
// Gesture Classifier API
// ============================================================================

/// Opaque handle to a GestureClassifier
pub struct GestureClassifierHandle {
    classifier: GestureClassifier,
}

/// Create a live-stream gesture classifier tracking up to two hands.
///
/// # Safety
/// - `model` must reference `model_len` bytes.
/// - Returns NULL on error. Must be freed with `mediagraph_gesture_classifier_free`.
#[no_mangle]
pub unsafe extern "C" fn mediagraph_gesture_classifier_create(
    model: *const u8,
    model_len: usize,
) -> *mut GestureClassifierHandle {
    clear_last_error();

    guard(ptr::null_mut(), || {
        let created = create_engine().and_then(|engine| {
            GestureClassifier::create(engine, bytes(model, model_len), GestureOptions::default())
        });
        match record(created) {
            Some(classifier) => Box::into_raw(Box::new(GestureClassifierHandle { classifier })),
            None => ptr::null_mut(),
        }
    })
}

/// Submit a frame for gesture recognition.
///
/// # Safety
/// - `classifier` must be a valid pointer returned by `mediagraph_gesture_classifier_create`.
/// - `data` must hold `width * height * channels` bytes for `input_type`.
/// - Returns 1 when a result was collected, 0 when none was ready, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn mediagraph_gesture_classifier_recognize(
    classifier: *mut GestureClassifierHandle,
    data: *const u8,
    width: i32,
    height: i32,
    input_type: i32,
    flip: i32,
) -> i32 {
    clear_last_error();

    if classifier.is_null() {
        set_last_error("Null classifier pointer");
        return -1;
    }
    let handle = &*classifier;

    guard(-1, || {
        let Some(frame) = record(frame_from_raw(data, width, height, input_type, flip)) else {
            return -1;
        };
        match record(handle.classifier.recognize(&frame)) {
            Some(Some(_)) => 1,
            Some(None) => 0,
            None => -1,
        }
    })
}

/// Name of the highest scoring gesture in the latest result.
///
/// # Safety
/// - `classifier` must be a valid pointer returned by `mediagraph_gesture_classifier_create`.
/// - Returns a newly allocated string that must be freed with `mediagraph_free_string`.
/// - Returns NULL when nothing has been recognized yet.
#[no_mangle]
pub unsafe extern "C" fn mediagraph_gesture_classifier_top_gesture(
    classifier: *mut GestureClassifierHandle,
) -> *mut c_char {
    clear_last_error();

    if classifier.is_null() {
        set_last_error("Null classifier pointer");
        return ptr::null_mut();
    }
    let handle = &*classifier;

    handle
        .classifier
        .latest()
        .and_then(|result| result.top_gesture().map(|gesture| string_to_cstr(&gesture.name)))
        .unwrap_or(ptr::null_mut())
}

/// # Safety
/// - `classifier` must be a valid pointer returned by `mediagraph_gesture_classifier_create`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn mediagraph_gesture_classifier_free(classifier: *mut GestureClassifierHandle) {
    if !classifier.is_null() {
        drop(Box::from_raw(classifier));
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Mediagraph functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Mediagraph function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn mediagraph_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

fn last_error_message() -> String {
    LAST_ERROR.with(|e| {
        e.borrow()
            .as_ref()
            .map(|cstr| cstr.to_string_lossy().into_owned())
            .unwrap_or_default()
    })
}

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next Mediagraph function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn mediagraph_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the Mediagraph library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn mediagraph_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
