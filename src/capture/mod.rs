//! Keystroke capture: privacy-stripped event types, key classification, dwell/flight
//! timing, batching and teardown persistence.
//!
//! Nothing in this module keeps the literal key beyond the press→release pair needed
//! to derive dwell time.

mod buffer;
mod classify;
mod edits;
mod pipeline;
mod timing;
mod unload;

pub use buffer::{EventBuffer, FlushCallback};
pub use edits::EditSummary;
pub use pipeline::CapturePipeline;
pub use timing::KeyTimingTracker;
pub use unload::{
    BufferAccessor, LifecycleBus, LifecycleHooks, LifecycleSignal, ListenerId, SaveFn,
    UnloadPersister,
};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyEventType {
    Keydown,
    Keyup,
}

/// Coarse key class. The only trace of *which* key was pressed that leaves the capture surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyCategory {
    Letter,
    Digit,
    Punctuation,
    Modifier,
    Navigation,
    Function,
    Other,
}

impl KeyCategory {
    /// Letters and digits count toward words-per-minute.
    pub fn is_character(self) -> bool {
        matches!(self, KeyCategory::Letter | KeyCategory::Digit)
    }
}

/// A single physical key transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyEvent {
    pub event_type: KeyEventType,
    pub key_category: KeyCategory,
    pub timestamp_ms: i64,
    /// Press → release of the same key; set on releases only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dwell_time_ms: Option<i64>,
    /// Previous release → this press; set on presses only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flight_time_ms: Option<i64>,
}

/// Largest timestamp a capture surface can produce (2^53 - 1, exact in a double).
pub const MAX_TIMESTAMP_MS: i64 = 9_007_199_254_740_991;
/// Dwell or flight times beyond a day either way are treated as missing.
pub const MAX_DURATION_MS: i64 = 86_400_000;

impl KeyEvent {
    pub fn is_press(&self) -> bool {
        self.event_type == KeyEventType::Keydown
    }

    /// Bounds check for events from untrusted senders. `None` for a timestamp outside
    /// `[0, MAX_TIMESTAMP_MS]`; out-of-range durations are cleared.
    pub fn sanitized(&self) -> Option<KeyEvent> {
        if !(0..=MAX_TIMESTAMP_MS).contains(&self.timestamp_ms) {
            return None;
        }
        let bounded = |d: Option<i64>| d.filter(|v| (-MAX_DURATION_MS..=MAX_DURATION_MS).contains(v));
        Some(KeyEvent {
            dwell_time_ms: bounded(self.dwell_time_ms),
            flight_time_ms: bounded(self.flight_time_ms),
            ..self.clone()
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditKind {
    Insert,
    Delete,
    Replace,
    CursorMove,
    Paste,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditSource {
    Keyboard,
    Paste,
    AiSuggestion,
}

/// Structural document change. Carries a length delta, never content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditEvent {
    pub kind: EditKind,
    pub length_delta: i64,
    pub source: EditSource,
    pub timestamp_ms: i64,
}

/// Anything the capture surface pushes into the event buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "event", rename_all = "snake_case")]
pub enum CaptureEvent {
    Key(KeyEvent),
    Edit(EditEvent),
}

impl CaptureEvent {
    pub fn as_key(&self) -> Option<&KeyEvent> {
        match self {
            CaptureEvent::Key(k) => Some(k),
            CaptureEvent::Edit(_) => None,
        }
    }

    pub fn as_edit(&self) -> Option<&EditEvent> {
        match self {
            CaptureEvent::Edit(e) => Some(e),
            CaptureEvent::Key(_) => None,
        }
    }
}

impl From<KeyEvent> for CaptureEvent {
    fn from(e: KeyEvent) -> Self {
        CaptureEvent::Key(e)
    }
}

impl From<EditEvent> for CaptureEvent {
    fn from(e: EditEvent) -> Self {
        CaptureEvent::Edit(e)
    }
}
