//! Frames and message bodies exchanged over the duplex channel.

use crate::capture::{CaptureEvent, EditEvent, KeyEvent};
use crate::error::Result;
use crate::risk::RiskLevel;
use serde::{Deserialize, Serialize};

pub const STATUS_DESTINATION: &str = "/user/queue/session-status";
pub const ALERT_DESTINATION: &str = "/user/queue/anomaly-alerts";
pub const ERROR_DESTINATION: &str = "/user/queue/errors";

const KEYSTROKE_PREFIX: &str = "/app/sessions/";
const KEYSTROKE_SUFFIX: &str = "/keystrokes";

/// Session-scoped destination for outbound batches.
pub fn keystroke_destination(session_id: &str) -> String {
    format!("{}{}{}", KEYSTROKE_PREFIX, session_id, KEYSTROKE_SUFFIX)
}

/// Session id from a keystroke destination.
pub fn keystroke_session(destination: &str) -> Option<&str> {
    destination
        .strip_prefix(KEYSTROKE_PREFIX)?
        .strip_suffix(KEYSTROKE_SUFFIX)
        .filter(|id| !id.is_empty() && !id.contains('/'))
}

/// Envelope: one JSON object per WebSocket text message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub destination: String,
    pub body: serde_json::Value,
}

impl Frame {
    pub fn new(destination: impl Into<String>, body: &impl Serialize) -> Result<Self> {
        Ok(Self {
            destination: destination.into(),
            body: serde_json::to_value(body)?,
        })
    }
}

/// Outbound batch of raw events for one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireBatch {
    pub session_id: String,
    pub events: Vec<KeyEvent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edits: Vec<EditEvent>,
}

impl WireBatch {
    pub fn from_capture(session_id: impl Into<String>, batch: &[CaptureEvent]) -> Self {
        let mut events = Vec::new();
        let mut edits = Vec::new();
        for e in batch {
            match e {
                CaptureEvent::Key(k) => events.push(k.clone()),
                CaptureEvent::Edit(ed) => edits.push(ed.clone()),
            }
        }
        Self {
            session_id: session_id.into(),
            events,
            edits,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len() + self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub session_id: String,
    pub status: String,
    pub total_keystrokes: u64,
    pub anomaly_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyAlert {
    pub id: String,
    pub session_id: String,
    #[serde(rename = "type")]
    pub alert_type: String,
    pub severity: RiskLevel,
    pub message: String,
    pub confidence: f64,
}

/// Server → client messages.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Status(SessionStatus),
    Alert(AnomalyAlert),
    Error(String),
}

impl InboundMessage {
    /// `None` for destinations this client does not consume.
    pub fn from_frame(frame: Frame) -> Option<Result<Self>> {
        let parsed = match frame.destination.as_str() {
            STATUS_DESTINATION => serde_json::from_value(frame.body).map(InboundMessage::Status),
            ALERT_DESTINATION => serde_json::from_value(frame.body).map(InboundMessage::Alert),
            ERROR_DESTINATION => serde_json::from_value(frame.body).map(InboundMessage::Error),
            _ => return None,
        };
        Some(parsed.map_err(Into::into))
    }
}
