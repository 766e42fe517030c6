//! Wire protocol for the control and stream channels
//!
//! Control messages are JSON envelopes of the form
//! `{"type": "...", "payload": {...}}`. The payload is optional for message
//! types whose fields are all optional. Parsing is two-stage (envelope, then
//! typed payload) so a malformed payload is reported against the right
//! message type instead of failing the whole envelope.
//!
//! The dedicated stream channel speaks one JSON auth message and then binary
//! audio frames only: a type byte, a little-endian u16 payload length, and
//! the Opus payload.

use crate::quality::{BitrateMode, Quality};
use crate::track::Track;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Type byte of a binary audio frame on either channel.
pub const FRAME_TYPE_AUDIO: u8 = 0x01;

/// Bytes of framing overhead per audio frame (type byte + u16 length).
pub const FRAME_HEADER_LEN: usize = 3;

// ========================================
// Binary audio framing
// ========================================

/// Wrap an encoded Opus payload in the stream framing.
pub fn encode_audio_frame(payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= u16::MAX as usize);
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.push(FRAME_TYPE_AUDIO);
    frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Split a framed audio message back into its Opus payload.
///
/// Returns `None` for an unknown type byte or a length mismatch.
pub fn decode_audio_frame(frame: &[u8]) -> Option<&[u8]> {
    if frame.len() < FRAME_HEADER_LEN || frame[0] != FRAME_TYPE_AUDIO {
        return None;
    }
    let len = u16::from_le_bytes([frame[1], frame[2]]) as usize;
    let payload = &frame[FRAME_HEADER_LEN..];
    if payload.len() != len {
        return None;
    }
    Some(payload)
}

// ========================================
// Client → server control messages
// ========================================

/// Playback control action names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Play,
    Pause,
    Stop,
    Next,
    Previous,
    Seek,
    PlayIndex,
    AddToQueue,
    RemoveFromQueue,
    ClearQueue,
    AddArtist,
    AddAlbum,
}

impl ControlAction {
    /// Parse a wire action name; `None` for unknown actions.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "play" => Self::Play,
            "pause" => Self::Pause,
            "stop" => Self::Stop,
            "next" => Self::Next,
            "previous" => Self::Previous,
            "seek" => Self::Seek,
            "play_index" => Self::PlayIndex,
            "add_to_queue" => Self::AddToQueue,
            "remove_from_queue" => Self::RemoveFromQueue,
            "clear_queue" => Self::ClearQueue,
            "add_artist" => Self::AddArtist,
            "add_album" => Self::AddAlbum,
            _ => return None,
        })
    }
}

/// Queue message action names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueAction {
    List,
    Add,
    Remove,
    Clear,
}

impl QueueAction {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "list" => Self::List,
            "add" => Self::Add,
            "remove" => Self::Remove,
            "clear" => Self::Clear,
            _ => return None,
        })
    }
}

/// `subscribe` payload: optional encoder preferences.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscribePayload {
    #[serde(default)]
    pub quality: Option<Quality>,
    #[serde(default)]
    pub bitrate_mode: Option<BitrateMode>,
}

/// `control` payload: an action name plus its arguments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlPayload {
    pub action: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub position_sec: Option<f64>,
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
}

/// `search` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchPayload {
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// `queue` payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueuePayload {
    pub action: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub index: Option<usize>,
}

/// Parsed client control-channel message.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    Subscribe(SubscribePayload),
    Unsubscribe,
    Control(ControlPayload),
    Search(SearchPayload),
    Queue(QueuePayload),
}

/// Why a client message failed to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Not valid JSON, or no `type` field.
    Malformed(String),
    /// Valid envelope with an unrecognized `type`.
    UnknownType(String),
    /// Known type, but the payload is missing required fields.
    BadPayload(String),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Option<Value>,
}

impl ClientMessage {
    /// Parse a control-channel text message.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|e| ParseError::Malformed(e.to_string()))?;
        let payload = envelope.payload.unwrap_or(Value::Null);

        fn typed<T: serde::de::DeserializeOwned>(payload: Value) -> Result<T, ParseError> {
            let value = if payload.is_null() {
                Value::Object(Default::default())
            } else {
                payload
            };
            serde_json::from_value(value).map_err(|e| ParseError::BadPayload(e.to_string()))
        }

        match envelope.kind.as_str() {
            "subscribe" => Ok(Self::Subscribe(typed(payload)?)),
            "unsubscribe" => Ok(Self::Unsubscribe),
            "control" => Ok(Self::Control(typed(payload)?)),
            "search" => Ok(Self::Search(typed(payload)?)),
            "queue" => Ok(Self::Queue(typed(payload)?)),
            other => Err(ParseError::UnknownType(other.to_string())),
        }
    }
}

/// First (and only expected) client message on the dedicated stream channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamClientMessage {
    Auth { token: Uuid },
}

// ========================================
// Server → client messages
// ========================================

/// Structured error codes carried by `error` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidRequest,
    InvalidPath,
    InvalidIndex,
    Unavailable,
    PlaybackError,
    NotFound,
    UnknownAction,
    InitError,
}

/// Full playback state snapshot, sent on subscribe and after every
/// state-changing operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub playing: bool,
    pub paused: bool,
    pub track: Option<Track>,
    pub position_sec: f64,
    pub queue_length: usize,
    pub queue_index: usize,
    pub source_format: String,
    pub source_rate: u32,
    pub quality: Quality,
    pub bitrate: u32,
    pub bitrate_mode: BitrateMode,
}

/// Server-originated control-channel (and stream auth) messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once when the control connection is accepted; carries the
    /// credentials for the dedicated stream channel.
    Hello {
        session_id: Uuid,
        stream_token: Uuid,
        stream_port: u16,
    },
    State(StateSnapshot),
    /// Periodic position report while streaming (~1 Hz).
    Position {
        position_sec: f64,
        duration_sec: u32,
    },
    SearchResults {
        query: String,
        count: usize,
        results: Vec<Track>,
    },
    QueueList {
        queue: Vec<Track>,
        current_index: usize,
        length: usize,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
    AuthOk,
    AuthFailed {
        reason: String,
    },
}

impl ServerMessage {
    /// Convenience constructor for error replies.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }
}
