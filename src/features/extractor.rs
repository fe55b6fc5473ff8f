//! Per-window feature extraction. Pure and deterministic: every accumulation is over
//! integer milliseconds, so input order inside a window cannot change the result.
//! Sums are widened to i128 so no i64 input can overflow them.

use super::{FeatureVector, WindowParams};
use crate::capture::KeyEvent;

/// Characters per standard word.
const WORD_LENGTH: f64 = 5.0;

/// Compute the feature vector for `events`, which lie in `[window_start, window_end)`.
pub fn extract_window(
    session_id: &str,
    events: &[KeyEvent],
    window_start: i64,
    window_end: i64,
    params: &WindowParams,
) -> FeatureVector {
    let duration = window_end.saturating_sub(window_start);

    let presses: Vec<&KeyEvent> = events.iter().filter(|e| e.is_press()).collect();
    let char_press_ts: Vec<i64> = presses
        .iter()
        .filter(|e| e.key_category.is_character())
        .map(|e| e.timestamp_ms)
        .collect();
    let dwells: Vec<i64> = events.iter().filter_map(|e| e.dwell_time_ms).collect();
    let flights: Vec<i64> = events.iter().filter_map(|e| e.flight_time_ms).collect();
    let error_presses = presses
        .iter()
        .filter(|e| e.key_category == params.error_category)
        .count();

    FeatureVector {
        session_id: session_id.to_string(),
        window_start,
        window_end,
        keystroke_count: presses.len() as u32,
        avg_wpm: words_per_minute(char_press_ts.len(), duration),
        wpm_std_dev: wpm_std_dev(&char_press_ts, window_start, window_end, params.sub_window_ms),
        avg_dwell_ms: mean(&dwells),
        avg_flight_ms: mean(&flights),
        flight_time_entropy: flight_time_entropy(
            flights.iter().copied(),
            params.entropy_bucket_ms,
            params.entropy_ceiling_ms,
        ),
        error_rate: ratio(error_presses, presses.len()),
        pause_count: flights
            .iter()
            .filter(|&&f| f > params.pause_threshold_ms)
            .count() as u32,
        burst_pause_ratio: burst_pause_ratio(&flights, &dwells, params.pause_threshold_ms, duration),
    }
}

/// Words per minute for `char_presses` characters over `duration_ms`; 0 for a non-positive duration.
pub fn words_per_minute(char_presses: usize, duration_ms: i64) -> f64 {
    if duration_ms <= 0 {
        return 0.0;
    }
    (char_presses as f64 / WORD_LENGTH) * (60_000.0 / duration_ms as f64)
}

/// Shannon entropy (bits) of flight times bucketed `bucket_ms` wide from 0, with
/// everything at or above `ceiling_ms` in one last bucket. Negative values are dropped.
pub fn flight_time_entropy(
    flights: impl IntoIterator<Item = i64>,
    bucket_ms: i64,
    ceiling_ms: i64,
) -> f64 {
    let bucket = bucket_ms.max(1);
    let last = (ceiling_ms.max(0) / bucket) as usize;
    let mut bins = vec![0u64; last + 1];
    let mut total = 0u64;
    for f in flights {
        if f < 0 {
            continue;
        }
        let idx = ((f / bucket) as usize).min(last);
        bins[idx] += 1;
        total += 1;
    }
    if total == 0 {
        return 0.0;
    }
    let n = total as f64;
    let h = bins
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / n;
            -p * p.log2()
        })
        .sum::<f64>();
    // a single occupied bin sums to -0.0
    if h > 0.0 {
        h
    } else {
        0.0
    }
}

fn wpm_std_dev(char_press_ts: &[i64], start: i64, end: i64, sub_window_ms: i64) -> f64 {
    let duration = end.saturating_sub(start);
    if duration <= 0 || sub_window_ms <= 0 {
        return 0.0;
    }
    let n = (i128::from(duration) + i128::from(sub_window_ms) - 1) / i128::from(sub_window_ms);
    let n = usize::try_from(n).unwrap_or(usize::MAX);
    if n < 2 {
        return 0.0;
    }
    let mut counts = vec![0usize; n];
    for &ts in char_press_ts {
        if ts < start || ts >= end {
            continue;
        }
        counts[((ts - start) / sub_window_ms) as usize] += 1;
    }
    let rates: Vec<f64> = counts
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            let s = start.saturating_add((i as i64).saturating_mul(sub_window_ms));
            let e = s.saturating_add(sub_window_ms).min(end);
            words_per_minute(c, e - s)
        })
        .collect();
    sample_std_dev(&rates)
}

fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let m = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / (n - 1.0);
    var.sqrt()
}

fn mean(values: &[i64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|&v| i128::from(v)).sum::<i128>() as f64 / values.len() as f64
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        return 0.0;
    }
    num as f64 / den as f64
}

/// Share of the window spent in sub-threshold gaps plus key holds, clamped to [0,1].
fn burst_pause_ratio(flights: &[i64], dwells: &[i64], pause_threshold_ms: i64, duration: i64) -> f64 {
    if duration <= 0 {
        return 0.0;
    }
    let gaps: i128 = flights
        .iter()
        .filter(|&&f| (0..=pause_threshold_ms).contains(&f))
        .map(|&f| i128::from(f))
        .sum();
    let holds: i128 = dwells.iter().filter(|&&d| d >= 0).map(|&d| i128::from(d)).sum();
    ((gaps + holds) as f64 / duration as f64).clamp(0.0, 1.0)
}
