//! Statistical keystroke features over fixed, non-overlapping time windows.
//!
//! [`aggregate`] is the single windowing core. [`LiveAggregator`] runs it incrementally
//! over batches from the capture surface, holding open windows between batches;
//! [`StoredAggregator`] runs it over events read back from the store. Both produce
//! identical vectors for identical events and parameters.

mod extractor;
mod pipeline;
mod stored;
mod windowing;

pub use extractor::{extract_window, flight_time_entropy, words_per_minute};
pub use pipeline::LiveAggregator;
pub use stored::{EventSource, StoredAggregator};
pub use windowing::{aggregate, aggregate_from, window_of};

use crate::capture::KeyCategory;
use serde::{Deserialize, Serialize};

/// Statistical summary of one window of one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FeatureVector {
    pub session_id: String,
    pub window_start: i64,
    pub window_end: i64,
    /// Press events in the window
    pub keystroke_count: u32,
    pub avg_wpm: f64,
    /// Sample standard deviation of WPM over 1-second sub-windows
    pub wpm_std_dev: f64,
    pub avg_dwell_ms: f64,
    pub avg_flight_ms: f64,
    pub flight_time_entropy: f64,
    /// Fraction of presses in the error-indicator category, in [0,1]
    pub error_rate: f64,
    pub pause_count: u32,
    /// In [0,1]
    pub burst_pause_ratio: f64,
}

/// Windowing and extraction parameters. See [`crate::config::FeaturesConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowParams {
    pub window_ms: i64,
    pub sub_window_ms: i64,
    pub pause_threshold_ms: i64,
    pub entropy_bucket_ms: i64,
    pub entropy_ceiling_ms: i64,
    pub error_category: KeyCategory,
}

impl Default for WindowParams {
    fn default() -> Self {
        crate::config::FeaturesConfig::default().live_params()
    }
}
