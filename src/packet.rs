//! Timestamped packets flowing into and out of the engine

use std::sync::Arc;

use crate::frame::ImageFrame;
use crate::tensor::Tensor;
use crate::timestamp::Timestamp;
use crate::types::{Category, Landmark};

/// Contents of a packet
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Image(ImageFrame),
    Tensors(Vec<Tensor>),
    /// One landmark list per detected feature (pose, hand)
    LandmarkLists(Vec<Vec<Landmark>>),
    /// One category list per detected feature
    Classifications(Vec<Vec<Category>>),
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Image(_) => "image",
            Payload::Tensors(_) => "tensors",
            Payload::LandmarkLists(_) => "landmark_lists",
            Payload::Classifications(_) => "classifications",
        }
    }
}

/// One timestamped unit of data. Cloning shares the payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    timestamp: Timestamp,
    payload: Arc<Payload>,
}

impl Packet {
    pub fn new(payload: Payload, timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            payload: Arc::new(payload),
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Same payload, different timestamp
    pub fn at(&self, timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            payload: Arc::clone(&self.payload),
        }
    }
}
