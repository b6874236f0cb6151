//! Core types shared by the buffers, sessions and the C boundary
//!
//! Landmarks, pixel formats, flip modes and output declarations. Types that
//! cross the C boundary are `#[repr(C)]` or carry explicit discriminants.

use serde::{Deserialize, Serialize};

use crate::error::GraphError;

/// Number of landmarks in a body pose feature
pub const POSE_LANDMARK_COUNT: usize = 33;

/// Number of landmarks in a hand feature
pub const HAND_LANDMARK_COUNT: usize = 21;

/// A single point estimate produced by a pose or hand model
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub visibility: f32,
    pub presence: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32, visibility: f32) -> Self {
        Self {
            x,
            y,
            z,
            visibility,
            presence: 0.0,
        }
    }
}

/// Pixel layout of a caller-supplied frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Rgb = 0,
    Rgba = 1,
    Bgr = 2,
}

impl InputType {
    /// Bytes per pixel for this layout
    pub fn channels(&self) -> usize {
        match self {
            InputType::Rgb | InputType::Bgr => 3,
            InputType::Rgba => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InputType::Rgb => "rgb",
            InputType::Rgba => "rgba",
            InputType::Bgr => "bgr",
        }
    }
}

impl TryFrom<i32> for InputType {
    type Error = GraphError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(InputType::Rgb),
            1 => Ok(InputType::Rgba),
            2 => Ok(InputType::Bgr),
            other => Err(GraphError::InvalidFrame(format!(
                "unsupported input type {other}"
            ))),
        }
    }
}

/// Flip applied to a frame before submission (OpenCV flip codes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flip {
    Horizontal = 1,
    Vertical = 0,
    Both = -1,
    #[default]
    None = -2,
}

impl TryFrom<i32> for Flip {
    type Error = GraphError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Flip::Horizontal),
            0 => Ok(Flip::Vertical),
            -1 => Ok(Flip::Both),
            -2 => Ok(Flip::None),
            other => Err(GraphError::InvalidFrame(format!("unsupported flip code {other}"))),
        }
    }
}

/// Selects how a result packet is decoded into landmark arrays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureType {
    NormalizedLandmarks = 0,
    WorldLandmarks = 1,
    NormalizedHandLandmarks = 2,
    WorldHandLandmarks = 3,
}

impl FeatureType {
    /// Fixed number of landmarks in one decoded feature
    pub fn landmark_count(&self) -> usize {
        match self {
            FeatureType::NormalizedLandmarks | FeatureType::WorldLandmarks => POSE_LANDMARK_COUNT,
            FeatureType::NormalizedHandLandmarks | FeatureType::WorldHandLandmarks => {
                HAND_LANDMARK_COUNT
            }
        }
    }

    pub fn is_hand(&self) -> bool {
        matches!(
            self,
            FeatureType::NormalizedHandLandmarks | FeatureType::WorldHandLandmarks
        )
    }
}

impl TryFrom<i32> for FeatureType {
    type Error = GraphError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FeatureType::NormalizedLandmarks),
            1 => Ok(FeatureType::WorldLandmarks),
            2 => Ok(FeatureType::NormalizedHandLandmarks),
            3 => Ok(FeatureType::WorldHandLandmarks),
            other => Err(GraphError::InvalidConfig(format!(
                "unknown feature type {other}"
            ))),
        }
    }
}

/// One declared output of a session: how to decode it and where it comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDecl {
    pub feature_type: FeatureType,
    pub stream: String,
}

impl OutputDecl {
    pub fn new(feature_type: FeatureType, stream: impl Into<String>) -> Self {
        Self {
            feature_type,
            stream: stream.into(),
        }
    }
}

/// A scored label, as produced by classification streams
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub score: f32,
}

impl Category {
    pub fn new(name: impl Into<String>, score: f32) -> Self {
        Self {
            name: name.into(),
            score,
        }
    }
}
