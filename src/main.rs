//! typeproof entrypoint: ingest server, offline calibration, stored-session replay and
//! recorded-capture playback against a running server.

use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use typeproof::{
    calibration::{self, ThresholdCalibrator},
    capture::{CaptureEvent, CapturePipeline, KeyEventType, LifecycleBus, LifecycleSignal, SaveFn},
    config::AppConfig,
    error::Error,
    logging::StructuredLogger,
    risk::RiskEngine,
    server::{self, IngestService},
    storage::SecureStore,
    transport::{RealtimeTransport, TransportEvent, WsConnector},
    uplink::UplinkClient,
};

type BoxResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser)]
#[command(name = "typeproof", version, about = "Keystroke-dynamics capture and scoring")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the ingest server
    Serve,
    /// Calibrate thresholds from a JSON list of labeled sessions
    Calibrate {
        #[arg(long)]
        input: PathBuf,
        /// Write the threshold table here
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Re-derive a stored session's feature vectors
    Replay {
        #[arg(long)]
        session: String,
    },
    /// Play a recorded key log through the client pipeline
    Capture {
        /// JSON lines: {"key","type","timestampMs"}
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        document: String,
        /// Sleep between events to reproduce the recorded timing
        #[arg(long)]
        paced: bool,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordedKey {
    key: String,
    #[serde(rename = "type")]
    event_type: KeyEventType,
    timestamp_ms: i64,
}

fn open_store(config: &AppConfig) -> BoxResult<Arc<SecureStore>> {
    let secret = config.store_secret().ok_or_else(|| {
        Error::Crypto(format!("{} is not set", config.store_secret_env))
    })?;
    std::fs::create_dir_all(&config.data_dir)?;
    let store_path = config.data_dir.join("store.db");
    Ok(Arc::new(SecureStore::open(&store_path, secret.as_bytes())?))
}

fn risk_engine(config: &AppConfig) -> RiskEngine {
    let thresholds = match config.risk.thresholds_path.as_deref() {
        Some(path) => calibration::load_thresholds(path).unwrap_or_else(|e| {
            warn!(path = ?path, error = %e, "threshold table unreadable; timing alerts disabled");
            Vec::new()
        }),
        None => Vec::new(),
    };
    let engine = RiskEngine::new(config.risk.clone(), thresholds);
    info!(active = engine.active_thresholds(), "risk engine ready");
    engine
}

async fn serve(config: AppConfig) -> BoxResult<()> {
    let store = open_store(&config)?;
    let ingest = Arc::new(IngestService::new(store, &config.features, risk_engine(&config)));

    let retention = config.server.retention_days;
    let pruner = Arc::clone(&ingest);
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(3600));
        loop {
            tick.tick().await;
            let pruner = Arc::clone(&pruner);
            match tokio::task::spawn_blocking(move || pruner.prune(retention)).await {
                Ok(Err(e)) => warn!(error = %e, "retention prune failed"),
                Err(e) => warn!(error = %e, "retention task failed"),
                Ok(Ok(_)) => {}
            }
        }
    });

    tokio::select! {
        res = server::run_server(&config.server.bind_addr, ingest) => res?,
        _ = tokio::signal::ctrl_c() => info!("typeproof server stopping"),
    }
    Ok(())
}

fn calibrate(input: &Path, output: Option<&Path>) -> BoxResult<()> {
    let sessions = calibration::load_sessions(input)?;
    let report = ThresholdCalibrator::default().calibrate(&sessions);
    if let Some(path) = output {
        calibration::save_thresholds(path, &report.thresholds)?;
        info!(path = ?path, count = report.thresholds.len(), "threshold table written");
    }
    StructuredLogger::emit_json(&report, &mut std::io::stdout().lock())?;
    Ok(())
}

fn replay(config: &AppConfig, session_id: &str) -> BoxResult<()> {
    let ingest = IngestService::new(open_store(config)?, &config.features, risk_engine(config));
    let vectors = ingest.derive(session_id)?;
    let mut out = std::io::stdout().lock();
    for v in &vectors {
        StructuredLogger::emit_json(v, &mut out)?;
    }
    info!(session_id, windows = vectors.len(), "replay complete");
    Ok(())
}

async fn capture(config: AppConfig, input: &Path, document: &str, paced: bool) -> BoxResult<()> {
    let uplink = UplinkClient::new(&config.uplink)?;
    let session = uplink.start_session(document).await?;
    let session_id = session.id.clone();

    let transport = if config.transport.enabled {
        let connector = Arc::new(WsConnector::new(config.transport.endpoint.clone()));
        let t = Arc::new(RealtimeTransport::new(
            session_id.clone(),
            config.transport.clone(),
            connector,
        ));
        let mut events = t.subscribe();
        tokio::spawn(async move {
            while let Ok(ev) = events.recv().await {
                match ev {
                    TransportEvent::Inbound(msg) => info!(?msg, "server message"),
                    TransportEvent::PublishFailed { count, error } => {
                        debug!(count, %error, "publish deferred")
                    }
                    _ => {}
                }
            }
        });
        t.connect()?;
        Some(t)
    } else {
        None
    };

    let bus = Arc::new(LifecycleBus::new());
    let stop = Arc::new(AtomicBool::new(false));
    {
        let bus = Arc::clone(&bus);
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::SeqCst);
            bus.emit(LifecycleSignal::Destroyed);
        })?;
    }

    let save: SaveFn = {
        let runtime = tokio::runtime::Handle::current();
        let uplink = uplink.clone();
        let session_id = session_id.clone();
        Arc::new(move |events: Vec<CaptureEvent>| {
            let uplink = uplink.clone();
            let session_id = session_id.clone();
            runtime.spawn(async move { uplink.save_beacon(&session_id, &events).await });
        })
    };

    let pipeline = CapturePipeline::new(
        session_id.clone(),
        &config.capture,
        config.features.live_params(),
        transport,
        Some(bus),
        save,
    );

    let reader = BufReader::new(std::fs::File::open(input)?);
    let mut last_ts: Option<i64> = None;
    for line in reader.lines() {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let rec: RecordedKey = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "skipping unreadable key record");
                continue;
            }
        };
        if paced {
            if let Some(prev) = last_ts {
                let gap = (rec.timestamp_ms - prev).max(0) as u64;
                tokio::time::sleep(Duration::from_millis(gap)).await;
            }
        }
        last_ts = Some(rec.timestamp_ms);
        pipeline.record_key(&rec.key, rec.event_type, rec.timestamp_ms);
    }

    let local = pipeline.close().await;
    let closed = uplink.close_session(&session_id).await?;
    info!(
        session_id = %session_id,
        local_windows = local.len(),
        server_windows = closed.window_count,
        keystrokes = closed.session.total_keystrokes,
        anomalies = closed.session.anomaly_count,
        "capture finished"
    );
    let mut out = std::io::stdout().lock();
    for v in &local {
        StructuredLogger::emit_json(v, &mut out)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> BoxResult<()> {
    let cli = Cli::parse();
    let config_path = std::env::var("TYPEPROOF_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.json"));
    let config = AppConfig::load(&config_path);

    StructuredLogger::init(config.log.json, &config.log.level);
    info!(version = typeproof::VERSION, config = ?config_path, "typeproof starting");

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Calibrate { input, output } => calibrate(&input, output.as_deref()),
        Command::Replay { session } => replay(&config, &session),
        Command::Capture {
            input,
            document,
            paced,
        } => capture(config, &input, &document, paced).await,
    }
}
