//! Client-side aggregation: capture batches → windows → feature vectors.

use super::{aggregate_from, window_of, FeatureVector, WindowParams};
use crate::capture::{CaptureEvent, KeyEvent};
use crate::compute::WindowCompute;
use std::sync::{Mutex, MutexGuard};

/// Windows the live stream of one session with the client error-indicator category.
///
/// Windows are anchored at the first timestamp the session produced and held open
/// across batches; a window is emitted once an event at or past its end arrives, or on
/// [`finish`](WindowCompute::finish). For in-order input the emitted vectors equal
/// [`aggregate`](super::aggregate) over the whole stream.
pub struct LiveAggregator {
    session_id: String,
    params: WindowParams,
    state: Mutex<LiveState>,
}

#[derive(Debug, Default, Clone)]
struct LiveState {
    anchor: Option<i64>,
    latest: Option<i64>,
    /// Events of windows not yet emitted
    open: Vec<KeyEvent>,
}

impl LiveAggregator {
    pub fn new(session_id: impl Into<String>, params: WindowParams) -> Self {
        Self {
            session_id: session_id.into(),
            params,
            state: Mutex::new(LiveState::default()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Feed a mixed capture batch; edit events are ignored.
    pub fn push(&self, batch: &[CaptureEvent]) -> Vec<FeatureVector> {
        let keys: Vec<KeyEvent> = batch.iter().filter_map(|e| e.as_key().cloned()).collect();
        self.compute(&keys)
    }

    /// Events held in windows that have not been emitted yet.
    pub fn open_events(&self) -> usize {
        self.state().open.len()
    }

    fn state(&self) -> MutexGuard<'_, LiveState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl WindowCompute for LiveAggregator {
    fn compute(&self, events: &[KeyEvent]) -> Vec<FeatureVector> {
        let mut state = self.state();
        // work on a copy so a panic mid-extraction leaves the committed state intact
        let mut next = state.clone();
        if next.anchor.is_none() {
            next.anchor = events.iter().map(|e| e.timestamp_ms).min();
        }
        for e in events {
            next.latest = next.latest.max(Some(e.timestamp_ms));
            next.open.push(e.clone());
        }
        let (Some(anchor), Some(latest)) = (next.anchor, next.latest) else {
            return Vec::new();
        };

        // every window strictly before the one holding `latest` is complete
        let (current_start, _) = window_of(anchor, latest, self.params.window_ms);
        let (done, open): (Vec<KeyEvent>, Vec<KeyEvent>) = next
            .open
            .into_iter()
            .partition(|e| e.timestamp_ms < current_start);
        let vectors = aggregate_from(&self.session_id, anchor, &done, &self.params);

        next.open = open;
        *state = next;
        vectors
    }

    fn finish(&self) -> Vec<FeatureVector> {
        let mut state = self.state();
        let Some(anchor) = state.anchor else {
            return Vec::new();
        };
        let vectors = aggregate_from(&self.session_id, anchor, &state.open, &self.params);
        state.open.clear();
        vectors
    }
}
