//! Dwell and flight time derivation from raw press/release transitions.

use super::{KeyCategory, KeyEvent, KeyEventType};
use std::collections::HashMap;

/// Tracks open presses and the last release so each transition can be emitted as a
/// [`KeyEvent`] with its derived durations. The key name is held only while the key is down.
#[derive(Debug, Default)]
pub struct KeyTimingTracker {
    pressed: HashMap<String, i64>,
    last_release: Option<i64>,
}

impl KeyTimingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_down(&mut self, key: &str, timestamp_ms: i64) -> KeyEvent {
        let flight_time_ms = self.last_release.map(|r| timestamp_ms.saturating_sub(r));
        // auto-repeat keeps the original press time
        self.pressed.entry(key.to_string()).or_insert(timestamp_ms);
        KeyEvent {
            event_type: KeyEventType::Keydown,
            key_category: KeyCategory::classify(key),
            timestamp_ms,
            dwell_time_ms: None,
            flight_time_ms,
        }
    }

    pub fn key_up(&mut self, key: &str, timestamp_ms: i64) -> KeyEvent {
        let dwell_time_ms = self.pressed.remove(key).map(|p| timestamp_ms.saturating_sub(p));
        self.last_release = Some(timestamp_ms);
        KeyEvent {
            event_type: KeyEventType::Keyup,
            key_category: KeyCategory::classify(key),
            timestamp_ms,
            dwell_time_ms,
            flight_time_ms: None,
        }
    }

    pub fn record(&mut self, key: &str, event_type: KeyEventType, timestamp_ms: i64) -> KeyEvent {
        match event_type {
            KeyEventType::Keydown => self.key_down(key, timestamp_ms),
            KeyEventType::Keyup => self.key_up(key, timestamp_ms),
        }
    }

    /// Keys currently held down.
    pub fn held(&self) -> usize {
        self.pressed.len()
    }
}
