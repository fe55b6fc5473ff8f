//! Applies a calibrated threshold table to feature vectors; produces risk level and alerts.

use crate::calibration::ThresholdRecommendation;
use crate::capture::EditSummary;
use crate::config::RiskConfig;
use crate::features::FeatureVector;
use crate::transport::AnomalyAlert;
use serde::{Deserialize, Serialize};

pub const TIMING_ALERT: &str = "timing_anomaly";
pub const PASTE_ALERT: &str = "paste_dominated";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn from_score(score: f64, config: &RiskConfig) -> Self {
        if score >= config.high_threshold {
            RiskLevel::High
        } else if score >= config.medium_threshold {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// Risk result for a single window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskResult {
    pub session_id: String,
    pub window_start: i64,
    pub score: f64,
    pub level: RiskLevel,
    /// Metrics that landed on the non-genuine side
    pub flagged: Vec<String>,
}

pub struct RiskEngine {
    config: RiskConfig,
    thresholds: Vec<ThresholdRecommendation>,
}

impl RiskEngine {
    /// Thresholds below `min_separability` are dropped here and never vote.
    pub fn new(config: RiskConfig, thresholds: Vec<ThresholdRecommendation>) -> Self {
        let thresholds = thresholds
            .into_iter()
            .filter(|t| t.separability >= config.min_separability && t.separability > 0.0)
            .collect();
        Self { config, thresholds }
    }

    /// Number of thresholds that vote.
    pub fn active_thresholds(&self) -> usize {
        self.thresholds.len()
    }

    pub fn score(&self, vector: &FeatureVector) -> RiskResult {
        let mut total = 0.0;
        let mut against = 0.0;
        let mut flagged = Vec::new();
        for t in &self.thresholds {
            total += t.separability;
            if t.flags(vector) {
                against += t.separability;
                flagged.push(t.metric.name().to_string());
            }
        }
        let score = if total > 0.0 { against / total } else { 0.0 };
        RiskResult {
            session_id: vector.session_id.clone(),
            window_start: vector.window_start,
            score,
            level: RiskLevel::from_score(score, &self.config),
            flagged,
        }
    }

    /// Alert for a window scoring medium or high. Windows without presses never alert.
    pub fn evaluate(&self, vector: &FeatureVector) -> Option<AnomalyAlert> {
        if vector.keystroke_count == 0 {
            return None;
        }
        let result = self.score(vector);
        if result.level == RiskLevel::Low {
            return None;
        }
        Some(AnomalyAlert {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: result.session_id,
            alert_type: TIMING_ALERT.to_string(),
            severity: result.level,
            message: format!(
                "window at {} deviates on {}",
                result.window_start,
                result.flagged.join(", ")
            ),
            confidence: result.score,
        })
    }

    pub fn evaluate_edits(&self, session_id: &str, summary: &EditSummary) -> Option<AnomalyAlert> {
        if summary.paste_ratio <= self.config.paste_ratio_alert {
            return None;
        }
        let severity = RiskLevel::from_score(summary.paste_ratio, &self.config);
        Some(AnomalyAlert {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            alert_type: PASTE_ALERT.to_string(),
            // Above the alert ratio is at least medium
            severity: severity.max(RiskLevel::Medium),
            message: format!(
                "{} of {} inserted characters were pasted",
                summary.paste_chars,
                summary.inserted_chars()
            ),
            confidence: summary.paste_ratio,
        })
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }
}
