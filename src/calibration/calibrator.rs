//! Threshold calibration from scenario-labeled sessions.

use super::stats::{mean, median, midpoint_split};
use crate::error::Result;
use crate::features::FeatureVector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// Experimental condition a calibration session was recorded under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    /// Genuine direct typing
    Direct,
    AiTyping,
    CopyPaste,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Metric {
    AvgWpm,
    WpmStdDev,
    AvgDwellMs,
    AvgFlightMs,
    FlightTimeEntropy,
    ErrorRate,
    PauseCount,
    BurstPauseRatio,
}

impl Metric {
    pub const ALL: [Metric; 8] = [
        Metric::AvgWpm,
        Metric::WpmStdDev,
        Metric::AvgDwellMs,
        Metric::AvgFlightMs,
        Metric::FlightTimeEntropy,
        Metric::ErrorRate,
        Metric::PauseCount,
        Metric::BurstPauseRatio,
    ];

    /// Wire name, matching the feature vector field.
    pub fn name(self) -> &'static str {
        match self {
            Metric::AvgWpm => "avgWpm",
            Metric::WpmStdDev => "wpmStdDev",
            Metric::AvgDwellMs => "avgDwellMs",
            Metric::AvgFlightMs => "avgFlightMs",
            Metric::FlightTimeEntropy => "flightTimeEntropy",
            Metric::ErrorRate => "errorRate",
            Metric::PauseCount => "pauseCount",
            Metric::BurstPauseRatio => "burstPauseRatio",
        }
    }

    pub fn value(self, v: &FeatureVector) -> f64 {
        match self {
            Metric::AvgWpm => v.avg_wpm,
            Metric::WpmStdDev => v.wpm_std_dev,
            Metric::AvgDwellMs => v.avg_dwell_ms,
            Metric::AvgFlightMs => v.avg_flight_ms,
            Metric::FlightTimeEntropy => v.flight_time_entropy,
            Metric::ErrorRate => v.error_rate,
            Metric::PauseCount => v.pause_count as f64,
            Metric::BurstPauseRatio => v.burst_pause_ratio,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Metric::AvgWpm => "average words per minute",
            Metric::WpmStdDev => "WPM variability",
            Metric::AvgDwellMs => "average dwell time (ms)",
            Metric::AvgFlightMs => "average flight time (ms)",
            Metric::FlightTimeEntropy => "flight-time entropy",
            Metric::ErrorRate => "error-indicator rate",
            Metric::PauseCount => "pause count",
            Metric::BurstPauseRatio => "burst/pause ratio",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionData {
    pub session_id: String,
    pub vectors: Vec<FeatureVector>,
    pub total_keystrokes: u64,
    pub total_edits: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabeledSession {
    pub participant_id: String,
    pub scenario: Scenario,
    pub session: SessionData,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub mean: f64,
    pub median: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioStats {
    /// Sessions in the scenario
    pub count: usize,
    #[serde(flatten)]
    pub metrics: BTreeMap<Metric, MetricSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdRecommendation {
    pub metric: Metric,
    pub threshold: f64,
    pub description: String,
    pub separability: f64,
    pub genuine_above: bool,
}

impl ThresholdRecommendation {
    /// Whether `v` falls on the non-genuine side of the cut.
    pub fn flags(&self, v: &FeatureVector) -> bool {
        let x = self.metric.value(v);
        if self.genuine_above {
            x < self.threshold
        } else {
            x > self.threshold
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationReport {
    pub scenario_stats: BTreeMap<Scenario, ScenarioStats>,
    /// Sorted by descending separability
    pub thresholds: Vec<ThresholdRecommendation>,
    pub limitations: Vec<String>,
}

pub const LIMITATIONS: [&str; 4] = [
    "Small sample size: thresholds come from a limited number of participants and sessions and may not generalize.",
    "Lab conditions: sessions were recorded in a controlled setting, not in the field.",
    "Scenario realism: scripted AI-assisted and copy-paste sessions approximate, but do not reproduce, real misuse.",
    "Metric independence: metrics are scored one at a time although many are correlated.",
];

pub struct ThresholdCalibrator {
    metrics: Vec<Metric>,
}

impl Default for ThresholdCalibrator {
    fn default() -> Self {
        Self {
            metrics: Metric::ALL.to_vec(),
        }
    }
}

impl ThresholdCalibrator {
    pub fn new(metrics: Vec<Metric>) -> Self {
        Self { metrics }
    }

    /// Pool every vector of every session per scenario and summarize each metric.
    /// Thresholds are recommended only when both direct and copy-paste data are present.
    pub fn calibrate(&self, sessions: &[LabeledSession]) -> CalibrationReport {
        let mut groups: BTreeMap<Scenario, (usize, Vec<&FeatureVector>)> = BTreeMap::new();
        for s in sessions {
            let entry = groups.entry(s.scenario).or_default();
            entry.0 += 1;
            entry.1.extend(s.session.vectors.iter());
        }

        let pooled = |vectors: &[&FeatureVector], metric: Metric| -> Vec<f64> {
            vectors.iter().map(|v| metric.value(v)).collect()
        };

        let scenario_stats = groups
            .iter()
            .map(|(scenario, (count, vectors))| {
                let metrics = self
                    .metrics
                    .iter()
                    .map(|&m| {
                        let values = pooled(vectors, m);
                        (
                            m,
                            MetricSummary {
                                mean: mean(&values),
                                median: median(&values),
                            },
                        )
                    })
                    .collect();
                (
                    *scenario,
                    ScenarioStats {
                        count: *count,
                        metrics,
                    },
                )
            })
            .collect();

        let mut thresholds = Vec::new();
        if let (Some((_, genuine)), Some((_, copied))) =
            (groups.get(&Scenario::Direct), groups.get(&Scenario::CopyPaste))
        {
            for &m in &self.metrics {
                let split = midpoint_split(&pooled(genuine, m), &pooled(copied, m));
                thresholds.push(ThresholdRecommendation {
                    metric: m,
                    threshold: split.threshold,
                    description: format!(
                        "{} {} {:.2} suggests genuine typing",
                        m.label(),
                        if split.genuine_above { "at or above" } else { "at or below" },
                        split.threshold
                    ),
                    separability: split.separability,
                    genuine_above: split.genuine_above,
                });
            }
            thresholds.sort_by(|a, b| b.separability.total_cmp(&a.separability));
        }

        info!(
            sessions = sessions.len(),
            scenarios = groups.len(),
            thresholds = thresholds.len(),
            "calibration complete"
        );

        CalibrationReport {
            scenario_stats,
            thresholds,
            limitations: LIMITATIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

pub fn load_sessions(path: &Path) -> Result<Vec<LabeledSession>> {
    let data = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

pub fn load_thresholds(path: &Path) -> Result<Vec<ThresholdRecommendation>> {
    let data = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

pub fn save_thresholds(path: &Path, thresholds: &[ThresholdRecommendation]) -> Result<()> {
    std::fs::write(path, serde_json::to_string_pretty(thresholds)?)?;
    Ok(())
}
