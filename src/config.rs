//! Configuration
//!
//! Two layers: [`GraphConfig`] is parsed from the textual graph description
//! handed over by the caller and tells which streams and side packets the
//! graph declares; [`DetectorConfig`] carries everything the session layer
//! needs on top (declared outputs, buffer policy, frame layout, callback
//! pool) and can be loaded from JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;

use crate::buffer::BufferConfig;
use crate::error::GraphError;
use crate::frame::FrameFormat;
use crate::types::OutputDecl;

/// Upper bound on declared outputs; per-stream counts cross the C boundary as `u8`
pub const MAX_OUTPUTS: usize = u8::MAX as usize;

/// Streams and side packets declared by a graph description
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphConfig {
    pub input_streams: Vec<String>,
    pub output_streams: Vec<String>,
    pub input_side_packets: Vec<String>,
    /// Streams produced by nodes; observable even when not graph outputs
    pub node_output_streams: Vec<String>,
    pub node_count: usize,
}

impl GraphConfig {
    /// Parse the subset of the text graph format the adapter relies on:
    /// top-level `input_stream`, `output_stream` and `input_side_packet`
    /// fields, and `output_stream` fields inside `node { ... }` blocks.
    /// Other fields are skipped but must still be well formed.
    pub fn parse(text: &str) -> Result<Self, GraphError> {
        let tokens = tokenize(text)?;
        let mut config = GraphConfig::default();
        let mut pos = 0;
        parse_block(&tokens, &mut pos, None, 0, &mut config)?;

        if config.input_streams.is_empty() {
            return Err(GraphError::InvalidConfig(
                "graph declares no input stream".to_string(),
            ));
        }
        Ok(config)
    }

    /// Whether an observer can be attached to `stream`
    pub fn is_observable(&self, stream: &str) -> bool {
        self.output_streams.iter().any(|s| s == stream)
            || self.node_output_streams.iter().any(|s| s == stream)
    }

    pub fn is_input(&self, stream: &str) -> bool {
        self.input_streams.iter().any(|s| s == stream)
    }

    /// The stream frames are submitted to: the first declared input
    pub fn primary_input(&self) -> Option<&str> {
        self.input_streams.first().map(String::as_str)
    }
}

impl FromStr for GraphConfig {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GraphConfig::parse(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Colon,
    Open,
    Close,
}

fn tokenize(text: &str) -> Result<Vec<(Token, usize)>, GraphError> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    let mut line = 1;

    while let Some(c) = chars.next() {
        match c {
            '\n' => line += 1,
            c if c.is_whitespace() || c == ',' || c == ';' => {}
            '#' => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        line += 1;
                        break;
                    }
                }
            }
            ':' => tokens.push((Token::Colon, line)),
            '{' | '<' => tokens.push((Token::Open, line)),
            '}' | '>' => tokens.push((Token::Close, line)),
            '"' | '\'' => {
                let quote = c;
                let mut value = String::new();
                let mut terminated = false;
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                value.push(escaped);
                            }
                        }
                        c if c == quote => {
                            terminated = true;
                            break;
                        }
                        '\n' => break,
                        c => value.push(c),
                    }
                }
                if !terminated {
                    return Err(GraphError::InvalidConfig(format!(
                        "unterminated string on line {line}"
                    )));
                }
                tokens.push((Token::Str(value), line));
            }
            c => {
                let mut ident = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_whitespace() || ":{}<>\"'#,;".contains(next) {
                        break;
                    }
                    ident.push(next);
                    chars.next();
                }
                tokens.push((Token::Ident(ident), line));
            }
        }
    }

    Ok(tokens)
}

fn parse_block(
    tokens: &[(Token, usize)],
    pos: &mut usize,
    parent: Option<&str>,
    depth: usize,
    config: &mut GraphConfig,
) -> Result<(), GraphError> {
    loop {
        let Some((token, line)) = tokens.get(*pos) else {
            if depth == 0 {
                return Ok(());
            }
            return Err(GraphError::InvalidConfig("unclosed block at end of graph".to_string()));
        };
        let line = *line;

        match token {
            Token::Close => {
                if depth == 0 {
                    return Err(GraphError::InvalidConfig(format!(
                        "unexpected closing brace on line {line}"
                    )));
                }
                *pos += 1;
                return Ok(());
            }
            Token::Ident(name) => {
                *pos += 1;
                if matches!(tokens.get(*pos), Some((Token::Colon, _))) {
                    *pos += 1;
                }

                match tokens.get(*pos) {
                    Some((Token::Open, _)) => {
                        *pos += 1;
                        if depth == 0 && name == "node" {
                            config.node_count += 1;
                        }
                        parse_block(tokens, pos, Some(name), depth + 1, config)?;
                    }
                    Some((Token::Str(value), _)) => {
                        record_field(name, value, parent, depth, config);
                        *pos += 1;
                    }
                    Some((Token::Ident(value), _)) => {
                        if is_stream_field(name) {
                            return Err(GraphError::InvalidConfig(format!(
                                "{name} must be quoted on line {line}, got {value}"
                            )));
                        }
                        *pos += 1;
                    }
                    _ => {
                        return Err(GraphError::InvalidConfig(format!(
                            "missing value for '{name}' on line {line}"
                        )));
                    }
                }
            }
            _ => {
                return Err(GraphError::InvalidConfig(format!(
                    "expected a field name on line {line}"
                )));
            }
        }
    }
}

fn is_stream_field(name: &str) -> bool {
    matches!(name, "input_stream" | "output_stream" | "input_side_packet" | "output_side_packet")
}

fn record_field(name: &str, value: &str, parent: Option<&str>, depth: usize, config: &mut GraphConfig) {
    let stream = strip_tag(value).to_string();
    match (depth, parent, name) {
        (0, _, "input_stream") => config.input_streams.push(stream),
        (0, _, "output_stream") => config.output_streams.push(stream),
        (0, _, "input_side_packet") => config.input_side_packets.push(stream),
        (1, Some("node"), "output_stream") => config.node_output_streams.push(stream),
        _ => {}
    }
}

/// `TAG:name` and `TAG:index:name` both refer to stream `name`
fn strip_tag(value: &str) -> &str {
    value.rsplit(':').next().unwrap_or(value)
}

/// Result-callback worker pool for asynchronous processing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackConfig {
    pub workers: usize,
    /// Pending gather jobs before new ones are dropped
    pub queue_depth: usize,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            queue_depth: 4,
        }
    }
}

impl CallbackConfig {
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.workers == 0 || self.queue_depth == 0 {
            return Err(GraphError::InvalidConfig(
                "callback pool needs at least one worker and one queue slot".to_string(),
            ));
        }
        Ok(())
    }
}

/// Full configuration of a landmark detector session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Text graph description
    pub graph: String,
    /// Declared outputs, in the order results are reported
    pub outputs: Vec<OutputDecl>,
    /// Stream frames are submitted to; defaults to the graph's first input
    #[serde(default)]
    pub input_stream: Option<String>,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub frame_format: FrameFormat,
    #[serde(default)]
    pub callback: CallbackConfig,
}

impl DetectorConfig {
    pub fn new(graph: impl Into<String>, outputs: Vec<OutputDecl>) -> Self {
        Self {
            graph: graph.into(),
            outputs,
            input_stream: None,
            buffer: BufferConfig::default(),
            frame_format: FrameFormat::default(),
            callback: CallbackConfig::default(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, GraphError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Check every section and return the parsed graph
    pub fn validate(&self) -> Result<GraphConfig, GraphError> {
        let graph = GraphConfig::parse(&self.graph)?;
        validate_outputs(&self.outputs)?;
        self.buffer.validate()?;
        self.callback.validate()?;

        if let Some(input) = &self.input_stream {
            if !graph.is_input(input) {
                return Err(GraphError::InvalidConfig(format!(
                    "graph has no input stream '{input}'"
                )));
            }
        }
        Ok(graph)
    }

    /// Stream frames go to
    pub fn resolve_input_stream(&self, graph: &GraphConfig) -> Result<String, GraphError> {
        self.input_stream
            .clone()
            .or_else(|| graph.primary_input().map(str::to_string))
            .ok_or_else(|| GraphError::InvalidConfig("graph declares no input stream".to_string()))
    }
}

/// Output declarations must be non-empty, fit a `u8` count and be unique
pub fn validate_outputs(outputs: &[OutputDecl]) -> Result<(), GraphError> {
    validate_streams(outputs.iter().map(|output| output.stream.as_str()))
}

/// Observed stream names: at least one, at most [`MAX_OUTPUTS`], unique, non-empty
pub fn validate_streams<'a>(streams: impl IntoIterator<Item = &'a str>) -> Result<(), GraphError> {
    let mut seen = HashSet::new();
    for stream in streams {
        if stream.is_empty() {
            return Err(GraphError::InvalidConfig("output stream name is empty".to_string()));
        }
        if !seen.insert(stream) {
            return Err(GraphError::InvalidConfig(format!(
                "output stream '{stream}' declared twice"
            )));
        }
    }

    if seen.is_empty() {
        return Err(GraphError::InvalidConfig("no outputs declared".to_string()));
    }
    if seen.len() > MAX_OUTPUTS {
        return Err(GraphError::InvalidConfig(format!(
            "{} outputs declared, at most {} supported",
            seen.len(),
            MAX_OUTPUTS
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferStrategy, ReadPolicy};
    use crate::types::FeatureType;
    use pretty_assertions::assert_eq;

    const POSE_GRAPH: &str = r#"
        # Pose tracking on CPU
        input_stream: "input_video"
        output_stream: "pose_landmarks"
        output_stream: "pose_world_landmarks"
        input_side_packet: "detection_model_blob"
        input_side_packet: "landmark_model_blob"

        node {
          calculator: "FlowLimiterCalculator"
          input_stream: "input_video"
          input_stream: "FINISHED:pose_landmarks"
          input_stream_info: {
            tag_index: "FINISHED"
            back_edge: true
          }
          output_stream: "throttled_input_video"
        }

        node {
          calculator: "PoseLandmarkCpu"
          input_side_packet: "MODEL:landmark_model_blob"
          input_stream: "IMAGE:throttled_input_video"
          output_stream: "LANDMARKS:pose_landmarks"
          output_stream: "WORLD_LANDMARKS:pose_world_landmarks"
          output_stream: "ROI:0:roi_from_landmarks"
          node_options: {
            [type.googleapis.com/mediapipe.PoseLandmarkOptions] {
              model_complexity: 1
              smooth_landmarks: true
            }
          }
        }
    "#;

    #[test]
    fn test_parse_pose_graph() {
        let graph = GraphConfig::parse(POSE_GRAPH).unwrap();

        assert_eq!(graph.input_streams, vec!["input_video"]);
        assert_eq!(graph.output_streams, vec!["pose_landmarks", "pose_world_landmarks"]);
        assert_eq!(
            graph.input_side_packets,
            vec!["detection_model_blob", "landmark_model_blob"]
        );
        assert_eq!(
            graph.node_output_streams,
            vec![
                "throttled_input_video",
                "pose_landmarks",
                "pose_world_landmarks",
                "roi_from_landmarks"
            ]
        );
        assert_eq!(graph.node_count, 2);
        assert!(graph.is_observable("roi_from_landmarks"));
        assert!(!graph.is_observable("input_video"));
        assert_eq!(graph.primary_input(), Some("input_video"));
    }

    #[test]
    fn test_unbalanced_braces_rejected() {
        let missing_close = "input_stream: \"in\"\nnode {\n output_stream: \"out\"\n";
        assert!(GraphConfig::parse(missing_close).is_err());

        let extra_close = "input_stream: \"in\"\n}\n";
        assert!(GraphConfig::parse(extra_close).is_err());
    }

    #[test]
    fn test_unquoted_stream_rejected() {
        let err = GraphConfig::parse("input_stream: input_video").unwrap_err();
        assert!(err.to_string().contains("must be quoted"));
    }

    #[test]
    fn test_unterminated_string_rejected() {
        assert!(GraphConfig::parse("input_stream: \"input_video\noutput_stream: \"x\"").is_err());
    }

    #[test]
    fn test_graph_without_input_rejected() {
        assert!(GraphConfig::parse("output_stream: \"out\"").is_err());
        assert!(GraphConfig::parse("").is_err());
    }

    #[test]
    fn test_detector_config_from_json() {
        let json = r#"{
            "graph": "input_stream: \"input_video\"\noutput_stream: \"pose_landmarks\"",
            "outputs": [
                {"feature_type": "normalized_landmarks", "stream": "pose_landmarks"}
            ],
            "buffer": {"capacity": 1, "policy": "peek_retain"}
        }"#;

        let config = DetectorConfig::from_json(json).unwrap();
        assert_eq!(config.buffer.capacity, 1);
        assert_eq!(config.buffer.strategy, BufferStrategy::Mutex);
        assert_eq!(config.buffer.policy, ReadPolicy::PeekRetain);
        assert_eq!(config.callback, CallbackConfig::default());

        let graph = config.validate().unwrap();
        assert_eq!(config.resolve_input_stream(&graph).unwrap(), "input_video");
    }

    #[test]
    fn test_duplicate_outputs_rejected() {
        let outputs = vec![
            OutputDecl::new(FeatureType::NormalizedLandmarks, "pose_landmarks"),
            OutputDecl::new(FeatureType::WorldLandmarks, "pose_landmarks"),
        ];
        assert!(validate_outputs(&outputs).is_err());
        assert!(validate_outputs(&[]).is_err());
    }

    #[test]
    fn test_unknown_input_stream_rejected() {
        let mut config = DetectorConfig::new(
            "input_stream: \"input_video\"\noutput_stream: \"pose_landmarks\"",
            vec![OutputDecl::new(FeatureType::NormalizedLandmarks, "pose_landmarks")],
        );
        config.input_stream = Some("camera".to_string());
        assert!(config.validate().is_err());
    }
}
