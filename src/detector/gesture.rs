use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::buffer::{BufferConfig, BufferStrategy, ReadPolicy, ResultBuffer};
use crate::config::GraphConfig;
use crate::engine::{GraphEngine, SidePacket, SidePackets};
use crate::error::GraphError;
use crate::fanout::{Gathered, StreamFanOut};
use crate::frame::{FrameFormat, FrameInput, ImageFrame};
use crate::packet::{Packet, Payload};
use crate::session::{DetectorSession, SessionSpec, SessionState};
use crate::timestamp::Timestamp;
use crate::types::{Category, Landmark};

/// Graph run by every gesture classifier
pub const GESTURE_GRAPH: &str = r#"
input_stream: "image"
output_stream: "hand_gestures"
output_stream: "handedness"
output_stream: "hand_landmarks"
output_stream: "hand_world_landmarks"
input_side_packet: "model_blob"
input_side_packet: "num_hands"
input_side_packet: "running_mode"
"#;

const IMAGE: &str = "image";
const HAND_GESTURES: &str = "hand_gestures";
const HANDEDNESS: &str = "handedness";
const HAND_LANDMARKS: &str = "hand_landmarks";
const HAND_WORLD_LANDMARKS: &str = "hand_world_landmarks";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunningMode {
    /// Wait for the result of each frame
    Image,
    /// Like `Image`, for consecutive frames of one video
    Video,
    /// Return whatever result is ready; results lag the frames
    #[default]
    LiveStream,
}

impl RunningMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunningMode::Image => "image",
            RunningMode::Video => "video",
            RunningMode::LiveStream => "live_stream",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureOptions {
    pub num_hands: u32,
    pub running_mode: RunningMode,
    /// How long `Image` and `Video` modes wait for a result
    pub result_timeout_ms: u64,
    pub frame_format: FrameFormat,
}

impl Default for GestureOptions {
    fn default() -> Self {
        Self {
            num_hands: 2,
            running_mode: RunningMode::LiveStream,
            result_timeout_ms: 1000,
            frame_format: FrameFormat::Srgb,
        }
    }
}

impl GestureOptions {
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.num_hands == 0 {
            return Err(GraphError::InvalidConfig("num_hands must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Gestures and hand landmarks recognized in one frame, one entry per hand
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GestureResult {
    pub timestamp: Timestamp,
    pub gestures: Vec<Vec<Category>>,
    pub handedness: Vec<Vec<Category>>,
    pub hand_landmarks: Vec<Vec<Landmark>>,
    pub hand_world_landmarks: Vec<Vec<Landmark>>,
}

impl GestureResult {
    fn from_packets(
        gestures: &Packet,
        handedness: Option<&Packet>,
        landmarks: Option<&Packet>,
        world_landmarks: Option<&Packet>,
    ) -> Self {
        Self {
            timestamp: gestures.timestamp(),
            gestures: categories(gestures),
            handedness: handedness.map(categories).unwrap_or_default(),
            hand_landmarks: landmarks.map(landmark_lists).unwrap_or_default(),
            hand_world_landmarks: world_landmarks.map(landmark_lists).unwrap_or_default(),
        }
    }

    /// Highest scoring gesture over all hands
    pub fn top_gesture(&self) -> Option<&Category> {
        self.gestures
            .iter()
            .flatten()
            .max_by(|a, b| a.score.total_cmp(&b.score))
    }
}

type Listener = Box<dyn Fn(&GestureResult) + Send + Sync>;

fn categories(packet: &Packet) -> Vec<Vec<Category>> {
    match packet.payload() {
        Payload::Classifications(lists) => lists.clone(),
        other => {
            log::warn!("Expected classifications, got {}", other.kind());
            Vec::new()
        }
    }
}

fn landmark_lists(packet: &Packet) -> Vec<Vec<Landmark>> {
    match packet.payload() {
        Payload::LandmarkLists(lists) => lists.clone(),
        other => {
            log::warn!("Expected landmark lists, got {}", other.kind());
            Vec::new()
        }
    }
}

/// Recognizes hand gestures in caller frames
pub struct GestureClassifier {
    session: DetectorSession,
    fanout: Arc<StreamFanOut<Packet>>,
    options: GestureOptions,
    latest: Mutex<Option<GestureResult>>,
    listener: Option<Listener>,
}

impl GestureClassifier {
    pub fn create(engine: Box<dyn GraphEngine>, model: &[u8], options: GestureOptions) -> Result<Self, GraphError> {
        options.validate()?;
        if model.is_empty() {
            return Err(GraphError::InvalidModel("gesture model is empty".to_string()));
        }

        let mut side_packets = SidePackets::new();
        side_packets.insert("model_blob".to_string(), SidePacket::blob(model));
        side_packets.insert("num_hands".to_string(), SidePacket::Int(i64::from(options.num_hands)));
        side_packets.insert(
            "running_mode".to_string(),
            SidePacket::Text(options.running_mode.as_str().to_string()),
        );

        let session = DetectorSession::start(
            engine,
            SessionSpec {
                graph: GraphConfig::parse(GESTURE_GRAPH)?,
                input_stream: IMAGE.to_string(),
                outputs: [HAND_GESTURES, HANDEDNESS, HAND_LANDMARKS, HAND_WORLD_LANDMARKS]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                side_packets,
                buffer: BufferConfig::new(1, BufferStrategy::Poller, ReadPolicy::PopOnce),
            },
        )?;
        let fanout = session.fanout()?;
        log::info!(
            "Gesture classifier {} ready ({} hands, {})",
            session.id(),
            options.num_hands,
            options.running_mode.as_str()
        );

        Ok(Self {
            session,
            fanout,
            options,
            latest: Mutex::new(None),
            listener: None,
        })
    }

    /// Called with every recognized result, on the thread that collected it
    pub fn with_listener<F>(mut self, listener: F) -> Self
    where
        F: Fn(&GestureResult) + Send + Sync + 'static,
    {
        self.listener = Some(Box::new(listener));
        self
    }

    /// Submit a frame and collect a result.
    ///
    /// In live-stream mode this is whatever result is ready, possibly from an
    /// earlier frame; the other modes wait up to the configured timeout.
    pub fn recognize(&self, frame: &FrameInput<'_>) -> Result<Option<GestureResult>, GraphError> {
        if self.session.state() == SessionState::Disposed {
            return Err(GraphError::SessionDisposed);
        }

        let image = ImageFrame::from_input(frame, self.options.frame_format)?;
        self.session.submit(Payload::Image(image))?;

        let collected = match self.options.running_mode {
            RunningMode::LiveStream => assemble(&self.fanout.gather_all()),
            RunningMode::Image | RunningMode::Video => self.wait_for_result(),
        };
        let Some(result) = collected else {
            return Ok(None);
        };

        for (hand, gestures) in result.gestures.iter().enumerate() {
            for gesture in gestures {
                log::info!("Hand {} gesture {} ({:.2})", hand, gesture.name, gesture.score);
            }
        }
        if let Some(listener) = &self.listener {
            listener(&result);
        }
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(result.clone());
        Ok(Some(result))
    }

    /// Wait for a gesture packet, then for the packets of the other three
    /// streams carrying its timestamp. One deadline bounds the whole wait.
    fn wait_for_result(&self) -> Option<GestureResult> {
        let deadline = Instant::now() + Duration::from_millis(self.options.result_timeout_ms);
        let gestures = self.fanout.buffer(0)?.pop_timeout(remaining(deadline))?;
        let timestamp = gestures.timestamp();

        let sibling = |index: usize| {
            self.fanout
                .buffer(index)
                .and_then(|buffer| wait_for_timestamp(buffer.as_ref(), timestamp, deadline))
        };
        let handedness = sibling(1);
        let landmarks = sibling(2);
        let world_landmarks = sibling(3);

        Some(GestureResult::from_packets(
            &gestures,
            handedness.as_ref(),
            landmarks.as_ref(),
            world_landmarks.as_ref(),
        ))
    }

    /// Most recent result collected by `recognize`
    pub fn latest(&self) -> Option<GestureResult> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn dispose(&mut self) {
        self.session.dispose();
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

/// Pop from `buffer` until the packet stamped `timestamp` shows up.
/// Older packets belong to frames already answered and are discarded.
fn wait_for_timestamp(
    buffer: &dyn ResultBuffer<Packet>,
    timestamp: Timestamp,
    deadline: Instant,
) -> Option<Packet> {
    loop {
        let packet = buffer.pop_timeout(remaining(deadline))?;
        match packet.timestamp().cmp(&timestamp) {
            CmpOrdering::Equal => return Some(packet),
            CmpOrdering::Less => continue,
            CmpOrdering::Greater => {
                log::debug!("No packet at {}, next one is {}", timestamp, packet.timestamp());
                return None;
            }
        }
    }
}

/// Pair the newest gesture packet with the other streams' packets of the same timestamp
fn assemble(gathered: &Gathered<Packet>) -> Option<GestureResult> {
    let gestures = gathered.slice(0).last()?;
    let matching = |index: usize| {
        gathered
            .slice(index)
            .iter()
            .rev()
            .find(|packet| packet.timestamp() == gestures.timestamp())
    };

    Some(GestureResult::from_packets(gestures, matching(1), matching(2), matching(3)))
}
