//! Application configuration shared by the capture client, the ingest server and the CLI.

use crate::capture::KeyCategory;
use crate::features::WindowParams;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Data directory (encrypted event store)
    pub data_dir: PathBuf,
    /// Environment variable holding the store secret
    pub store_secret_env: String,
    /// Event buffering and compute offload
    pub capture: CaptureConfig,
    /// Windowing and feature extraction parameters
    pub features: FeaturesConfig,
    /// Realtime duplex channel to the ingest server
    pub transport: TransportConfig,
    /// HTTP uplink (session lifecycle, beacon saves)
    pub uplink: UplinkConfig,
    /// Ingest server
    pub server: ServerConfig,
    /// Threshold application
    pub risk: RiskConfig,
    /// Logging
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Flush once this many events are buffered
    pub buffer_max_size: usize,
    /// Flush this long after the first unflushed push (milliseconds)
    pub buffer_max_interval_ms: u64,
    /// Run feature computation on a worker thread
    pub background_compute: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    pub window_ms: i64,
    /// Sub-window width for the WPM standard deviation
    pub sub_window_ms: i64,
    /// Flight times strictly above this count as pauses
    pub pause_threshold_ms: i64,
    pub entropy_bucket_ms: i64,
    /// Flight times at or above this land in the last histogram bin
    pub entropy_ceiling_ms: i64,
    /// Error indicator used by the live (client) aggregator
    pub client_error_category: KeyCategory,
    /// Error indicator used by the stored (server) aggregator
    pub server_error_category: KeyCategory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub enabled: bool,
    /// WebSocket endpoint
    pub endpoint: String,
    /// Drain cadence (milliseconds)
    pub publish_interval_ms: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Upper bound on a single publish call
    pub publish_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UplinkConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Event batches older than this are pruned at startup
    pub retention_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Score at or above this is high risk (0.0–1.0)
    pub high_threshold: f64,
    /// Score at or above this is medium risk
    pub medium_threshold: f64,
    /// Thresholds below this separability do not vote
    pub min_separability: f64,
    /// Paste share of inserted characters that raises an alert
    pub paste_ratio_alert: f64,
    /// Calibrated threshold table (output of `typeproof calibrate --output`)
    pub thresholds_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".typeproof"),
            store_secret_env: "TYPEPROOF_STORE_SECRET".to_string(),
            capture: CaptureConfig::default(),
            features: FeaturesConfig::default(),
            transport: TransportConfig::default(),
            uplink: UplinkConfig::default(),
            server: ServerConfig::default(),
            risk: RiskConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            buffer_max_size: 50,
            buffer_max_interval_ms: 500,
            background_compute: true,
        }
    }
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            window_ms: 5000,
            sub_window_ms: 1000,
            pause_threshold_ms: 2000,
            entropy_bucket_ms: 10,
            entropy_ceiling_ms: 200,
            client_error_category: KeyCategory::Navigation,
            server_error_category: KeyCategory::Modifier,
        }
    }
}

impl FeaturesConfig {
    fn params(&self, error_category: KeyCategory) -> WindowParams {
        WindowParams {
            window_ms: self.window_ms,
            sub_window_ms: self.sub_window_ms,
            pause_threshold_ms: self.pause_threshold_ms,
            entropy_bucket_ms: self.entropy_bucket_ms,
            entropy_ceiling_ms: self.entropy_ceiling_ms,
            error_category,
        }
    }

    /// Parameters for windowing a live event stream on the client.
    pub fn live_params(&self) -> WindowParams {
        self.params(self.client_error_category)
    }

    /// Parameters for windowing persisted events on the server.
    pub fn stored_params(&self) -> WindowParams {
        self.params(self.server_error_category)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "ws://127.0.0.1:8080/ws".to_string(),
            publish_interval_ms: 200,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            publish_timeout_ms: 2000,
        }
    }
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            timeout_secs: 15,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            retention_days: 30,
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            high_threshold: 0.8,
            medium_threshold: 0.5,
            min_separability: 0.6,
            paste_ratio_alert: 0.5,
            thresholds_path: None,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}

impl AppConfig {
    /// Load from JSON file if present; otherwise return default
    pub fn load(path: &std::path::Path) -> Self {
        if path.exists() {
            if let Ok(data) = std::fs::read_to_string(path) {
                if let Ok(c) = serde_json::from_str::<AppConfig>(&data) {
                    return c;
                }
            }
        }
        Self::default()
    }

    /// Store secret from the configured environment variable, if set.
    pub fn store_secret(&self) -> Option<String> {
        std::env::var(&self.store_secret_env)
            .ok()
            .filter(|s| !s.is_empty())
    }
}
