use std::collections::{BTreeMap, VecDeque};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Maximum number of points retained in a track tail.
pub const TRACK_TAIL_CAPACITY: usize = 3600;

/// Milliseconds since the Unix epoch, used as the receipt stamp everywhere.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// A named, typed stream on the upstream pub/sub transport.
///
/// Identity is the `name`; `message_type` is fixed by the first subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    pub message_type: String,
}

impl Channel {
    pub fn new(name: impl Into<String>, message_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message_type: message_type.into(),
        }
    }

    /// The decoded payload shape for this channel, if the type is supported.
    pub fn kind(&self) -> Option<MessageKind> {
        MessageKind::from_type_name(&self.message_type)
    }
}

/// The fixed set of payload shapes the bridge understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Bool,
    Number,
    Text,
    /// `sensor_msgs/NavSatFix`
    Fix,
    /// `nav_msgs/Odometry`
    Odometry,
    /// `geometry_msgs/PoseStamped`
    Pose,
    /// `nav_msgs/Path`
    Path,
    /// `diagnostic_msgs/DiagnosticStatus`
    Diagnostic,
}

impl MessageKind {
    /// Map a ROS type name (`pkg/msg/Type` or `pkg/Type`) to a kind.
    pub fn from_type_name(type_name: &str) -> Option<Self> {
        let mut parts = type_name.split('/');
        let package = parts.next()?;
        let name = parts.next_back()?;
        let kind = match (package, name) {
            ("std_msgs", "Bool") => Self::Bool,
            (
                "std_msgs",
                "Float32" | "Float64" | "Int8" | "Int16" | "Int32" | "Int64" | "UInt8" | "UInt16"
                | "UInt32" | "UInt64",
            ) => Self::Number,
            ("std_msgs", "String") => Self::Text,
            ("sensor_msgs", "NavSatFix") => Self::Fix,
            ("nav_msgs", "Odometry") => Self::Odometry,
            ("geometry_msgs", "PoseStamped") => Self::Pose,
            ("nav_msgs", "Path") => Self::Path,
            ("diagnostic_msgs", "DiagnosticStatus") => Self::Diagnostic,
            _ => return None,
        };
        Some(kind)
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

/// Orientation quaternion, ROS field order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Quaternion {
    pub fn identity() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 1.0,
        }
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

/// A local (east, north) position plus orientation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub position: Point,
    pub orientation: Quaternion,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoFix {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PathValue {
    pub poses: Vec<Pose>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticStatus {
    pub name: String,
    pub level: u8,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub hardware_id: String,
    #[serde(default)]
    pub values: Vec<KeyValue>,
}

/// A decoded channel message.
///
/// Serialized without a tag so the durable snapshot and the viewer
/// envelopes carry the natural JSON shape (`true`, `3.5`, `{"latitude":..}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelValue {
    Bool(bool),
    Number(f64),
    Text(String),
    Fix(GeoFix),
    Pose(Pose),
    Path(PathValue),
    Diagnostic(DiagnosticStatus),
}

impl ChannelValue {
    /// Decode a raw transport message of the given kind.
    ///
    /// Scalar kinds read the `data` field. Odometry is reduced to its pose.
    pub fn decode(kind: MessageKind, channel: &str, msg: &Value) -> Result<Self, RimcoError> {
        let malformed = |details: String| RimcoError::Decode {
            channel: channel.to_string(),
            details,
        };
        let data = || msg.get("data").ok_or_else(|| malformed("missing `data` field".into()));

        let value = match kind {
            MessageKind::Bool => ChannelValue::Bool(
                data()?
                    .as_bool()
                    .ok_or_else(|| malformed("`data` is not a bool".into()))?,
            ),
            MessageKind::Number => ChannelValue::Number(
                data()?
                    .as_f64()
                    .ok_or_else(|| malformed("`data` is not a number".into()))?,
            ),
            MessageKind::Text => ChannelValue::Text(
                data()?
                    .as_str()
                    .ok_or_else(|| malformed("`data` is not a string".into()))?
                    .to_string(),
            ),
            MessageKind::Fix => ChannelValue::Fix(
                serde_json::from_value(msg.clone()).map_err(|e| malformed(e.to_string()))?,
            ),
            MessageKind::Odometry => {
                let pose = msg
                    .pointer("/pose/pose")
                    .ok_or_else(|| malformed("missing `pose.pose`".into()))?;
                ChannelValue::Pose(
                    serde_json::from_value(pose.clone()).map_err(|e| malformed(e.to_string()))?,
                )
            }
            MessageKind::Pose => {
                let pose = msg
                    .get("pose")
                    .ok_or_else(|| malformed("missing `pose`".into()))?;
                ChannelValue::Pose(
                    serde_json::from_value(pose.clone()).map_err(|e| malformed(e.to_string()))?,
                )
            }
            MessageKind::Path => {
                let poses = msg
                    .get("poses")
                    .and_then(Value::as_array)
                    .ok_or_else(|| malformed("missing `poses` array".into()))?;
                let poses = poses
                    .iter()
                    .map(|stamped| {
                        let pose = stamped.get("pose").unwrap_or(stamped);
                        serde_json::from_value(pose.clone())
                    })
                    .collect::<Result<Vec<Pose>, _>>()
                    .map_err(|e| malformed(e.to_string()))?;
                ChannelValue::Path(PathValue { poses })
            }
            MessageKind::Diagnostic => ChannelValue::Diagnostic(
                serde_json::from_value(msg.clone()).map_err(|e| malformed(e.to_string()))?,
            ),
        };
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// Cache entries and track state
// ---------------------------------------------------------------------------

/// Last known value of a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub data: ChannelValue,
    #[serde(rename = "timestampMs", alias = "stamp")]
    pub timestamp_ms: i64,
}

/// Last known severity of a diagnostic component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringEntry {
    pub level: u8,
    pub stamp: i64,
}

/// A geographic point, serialized as `[lat, lon]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

impl From<[f64; 2]> for LatLon {
    fn from([lat, lon]: [f64; 2]) -> Self {
        Self { lat, lon }
    }
}

impl From<LatLon> for [f64; 2] {
    fn from(p: LatLon) -> Self {
        [p.lat, p.lon]
    }
}

/// Renderable state of one configured track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackState {
    pub tail: VecDeque<LatLon>,
    pub last: Option<LatLon>,
    pub yaw: Option<f64>,
    pub color: Option<String>,
    pub display_name: String,
}

impl TrackState {
    pub fn new(display_name: impl Into<String>, color: Option<String>, yaw: Option<f64>) -> Self {
        Self {
            tail: VecDeque::new(),
            last: None,
            yaw,
            color,
            display_name: display_name.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Viewer envelopes
// ---------------------------------------------------------------------------

/// Payload of a `track` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TrackUpdate {
    Point {
        point: LatLon,
        yaw: Option<f64>,
        color: Option<String>,
    },
    /// A whole planned path; viewers replace the tail with `points`.
    Path {
        points: Vec<LatLon>,
        yaw: Option<f64>,
        color: Option<String>,
    },
    Heading {
        yaw: f64,
    },
    Cleared {
        cleared: bool,
    },
}

/// Full bootstrap state sent to a newly connected viewer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub values: BTreeMap<String, SnapshotEntry>,
    pub monitoring: BTreeMap<String, MonitoringEntry>,
    pub tracks: BTreeMap<String, TrackState>,
    pub settings: Value,
}

/// Envelope pushed to viewers over the persistent connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ViewerEvent {
    Snapshot(Snapshot),
    Value {
        topic: String,
        data: ChannelValue,
    },
    Monitoring {
        name: String,
        level: u8,
        stamp: i64,
    },
    Track {
        name: String,
        data: TrackUpdate,
    },
    Ping,
}

// ---------------------------------------------------------------------------
// Action sessions
// ---------------------------------------------------------------------------

/// Lifecycle of one proxied action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionState {
    Starting,
    Waiting,
    Accepted,
    Finished,
}

/// Server-push event of an action stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ActionEvent {
    Start {
        session: Uuid,
        pid: Option<u32>,
        command: String,
    },
    Line {
        text: String,
    },
    Waiting,
    Accepted,
    Success,
    Failure {
        reason: String,
    },
    Error {
        message: String,
    },
    End {
        code: Option<i32>,
    },
}

impl ActionEvent {
    /// The SSE event name.
    pub fn kind(&self) -> &'static str {
        match self {
            ActionEvent::Start { .. } => "start",
            ActionEvent::Line { .. } => "line",
            ActionEvent::Waiting => "waiting",
            ActionEvent::Accepted => "accepted",
            ActionEvent::Success => "success",
            ActionEvent::Failure { .. } => "failure",
            ActionEvent::Error { .. } => "error",
            ActionEvent::End { .. } => "end",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ActionEvent::End { .. })
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Global error type spanning transport, persistence, decoding and subprocess failures.
#[derive(Error, Debug)]
pub enum RimcoError {
    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("Persistence Error: {0}")]
    Persistence(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),

    #[error("Malformed message on {channel}: {details}")]
    Decode { channel: String, details: String },

    #[error("Unsupported message type: {0}")]
    UnsupportedType(String),

    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Unknown track: {0}")]
    UnknownTrack(String),

    #[error("Subprocess Error: {0}")]
    Subprocess(String),

    #[error("Configuration Error: {0}")]
    Config(String),
}
