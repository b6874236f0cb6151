//! Mediagraph - C-linkage adapter around an on-device media graph engine
//!
//! Mediagraph submits camera frames or landmark tensors to a graph engine and
//! hands results back to the caller through bounded, lossy result buffers:
//! each observed output stream keeps only its most recent results, producers
//! never block, and consumers poll without waiting.
//!
//! ## Modules
//!
//! - **Result buffers**: three interchangeable strategies behind one trait
//! - **Sessions**: engine lifecycle, per-stream fan-out, timestamping
//! - **Detectors**: landmark, exercise, pose classification and gesture facades
//! - **FFI**: the C ABI consumed by foreign-language bindings

pub mod buffer;
pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod fanout;
pub mod frame;
pub mod packet;
pub mod session;
pub mod tensor;
pub mod timestamp;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

#[cfg(test)]
pub(crate) mod testing;

pub use buffer::{BufferConfig, BufferStrategy, ReadPolicy, ResultBuffer};
pub use config::{CallbackConfig, DetectorConfig, GraphConfig};
pub use detector::{
    Classification, DetectorModels, ExerciseDetector, GestureClassifier, GestureOptions,
    GestureResult, LandmarkDetector, LandmarkOutput, PoseClassifier, RunningMode,
};
pub use engine::{install_engine_factory, EngineFactory, GraphEngine, LoopbackEngine};
pub use error::GraphError;
pub use frame::{FrameFormat, FrameInput};
pub use session::{DetectorSession, SessionState};
pub use types::{FeatureType, Flip, InputType, Landmark, OutputDecl};

/// Mediagraph version reported by the C ABI and the CLI
pub const MEDIAGRAPH_VERSION: &str = env!("CARGO_PKG_VERSION");
