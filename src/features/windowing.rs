//! Fixed-size, non-overlapping windowing over a session's key events.

use super::{extract_window, FeatureVector, WindowParams};
use crate::capture::KeyEvent;

/// Split `events` into `[first + k·W, first + (k+1)·W)` windows and extract one vector
/// per non-empty window, in window order. Empty windows are skipped, so callers must not
/// assume a contiguous sequence. Input order does not matter.
pub fn aggregate(session_id: &str, events: &[KeyEvent], params: &WindowParams) -> Vec<FeatureVector> {
    match events.iter().map(|e| e.timestamp_ms).min() {
        Some(first) => aggregate_from(session_id, first, events, params),
        None => Vec::new(),
    }
}

/// [`aggregate`] on the grid anchored at `anchor` instead of the earliest event.
/// Events before the anchor land in earlier windows of the same grid.
pub fn aggregate_from(
    session_id: &str,
    anchor: i64,
    events: &[KeyEvent],
    params: &WindowParams,
) -> Vec<FeatureVector> {
    let mut sorted = events.to_vec();
    sorted.sort_by_key(|e| e.timestamp_ms);

    let mut out = Vec::new();
    let mut rest = sorted.as_slice();
    while let Some(head) = rest.first() {
        // jump straight to the window holding the next event
        let (window_start, window_end) = window_of(anchor, head.timestamp_ms, params.window_ms);
        let len = rest
            .iter()
            .take_while(|e| window_of(anchor, e.timestamp_ms, params.window_ms).0 == window_start)
            .count();
        out.push(extract_window(
            session_id,
            &rest[..len],
            window_start,
            window_end,
            params,
        ));
        rest = &rest[len..];
    }
    out
}

/// Bounds of the grid window holding `ts`. Saturates at the ends of the i64 range.
pub fn window_of(anchor: i64, ts: i64, window_ms: i64) -> (i64, i64) {
    let width = i128::from(window_ms.max(1));
    let offset = (i128::from(ts) - i128::from(anchor)).div_euclid(width);
    let start = i128::from(anchor) + offset * width;
    (saturate(start), saturate(start + width))
}

fn saturate(v: i128) -> i64 {
    v.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
}
