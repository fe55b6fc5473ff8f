//! Risk scoring over calibrated thresholds.

mod engine;

pub use engine::{RiskEngine, RiskLevel, RiskResult, PASTE_ALERT, TIMING_ALERT};
