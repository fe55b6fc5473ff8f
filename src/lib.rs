//! typeproof: keystroke-dynamics capture and scoring.
//!
//! Modular structure:
//! - [`capture`] - Key classification, dwell/flight timing, batching, teardown persistence
//! - [`features`] - Fixed-window statistical feature extraction (live and stored)
//! - [`compute`] - Off-thread feature computation with inline fallback
//! - [`transport`] - Realtime duplex channel with reconnect and backoff
//! - [`calibration`] - Threshold calibration from labeled sessions
//! - [`risk`] - Threshold application and anomaly alerts
//! - [`storage`] - Encrypted server-side storage
//! - [`server`] - Ingest service and HTTP/WebSocket API
//! - [`logging`] - Structured JSON logging

pub mod calibration;
pub mod capture;
pub mod compute;
pub mod config;
pub mod error;
pub mod features;
pub mod logging;
pub mod risk;
pub mod server;
pub mod session;
pub mod storage;
pub mod transport;
pub mod uplink;

pub use calibration::{CalibrationReport, ThresholdCalibrator};
pub use capture::{CaptureEvent, CapturePipeline, EventBuffer, KeyEvent, UnloadPersister};
pub use compute::ComputeDispatcher;
pub use config::AppConfig;
pub use error::{Error, Result};
pub use features::{FeatureVector, LiveAggregator, StoredAggregator};
pub use logging::StructuredLogger;
pub use risk::RiskEngine;
pub use server::IngestService;
pub use storage::SecureStore;
pub use transport::RealtimeTransport;
pub use uplink::UplinkClient;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
