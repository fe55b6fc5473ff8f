//! Offline threshold calibration over genuine, AI-assisted and copy-paste sessions.

mod calibrator;
mod stats;

pub use calibrator::{
    load_sessions, load_thresholds, save_thresholds, CalibrationReport, LabeledSession, Metric,
    MetricSummary, Scenario, ScenarioStats, SessionData, ThresholdCalibrator,
    ThresholdRecommendation, LIMITATIONS,
};
pub use stats::{mean, median, midpoint_split, Split};
