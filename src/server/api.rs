//! HTTP + WebSocket surface for the ingest service.
//!
//! Endpoints:
//! - GET /health - Health check
//! - POST /sessions - Start a session
//! - GET /sessions/:id - Session status
//! - POST /sessions/:id/close - Close and materialize the vector rollup
//! - GET /sessions/:id/vectors - Feature vectors (rollup or derived)
//! - POST /sessions/:id/events - Best-effort beacon save
//! - WS /ws - Duplex keystroke channel

use super::ingest::IngestService;
use crate::capture::CaptureEvent;
use crate::error::Error;
use crate::features::FeatureVector;
use crate::session::Session;
use crate::transport::{
    keystroke_session, Frame, WireBatch, ALERT_DESTINATION, ERROR_DESTINATION,
    STATUS_DESTINATION,
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct AppState {
    pub ingest: Arc<IngestService>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionRequest {
    pub document_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseResponse {
    pub session: Session,
    pub window_count: usize,
}

pub fn create_router(ingest: Arc<IngestService>) -> Router {
    let state = Arc::new(AppState { ingest });

    Router::new()
        .route("/health", get(health))
        .route("/sessions", post(create_session))
        .route("/sessions/:id", get(get_session))
        .route("/sessions/:id/close", post(close_session))
        .route("/sessions/:id/vectors", get(get_vectors))
        .route("/sessions/:id/events", post(save_beacon))
        .route("/ws", get(websocket_handler))
        .with_state(state)
}

fn status_of(e: &Error) -> StatusCode {
    match e {
        Error::UnknownSession(_) => StatusCode::NOT_FOUND,
        Error::SessionClosed(_) => StatusCode::CONFLICT,
        _ => {
            warn!(error = %e, "request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Run a store-bound call off the async workers.
async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, StatusCode>
where
    T: Send + 'static,
    F: FnOnce(&IngestService) -> crate::error::Result<T> + Send + 'static,
{
    let ingest = state.ingest.clone();
    match tokio::task::spawn_blocking(move || f(&ingest)).await {
        Ok(res) => res.map_err(|e| status_of(&e)),
        Err(e) => {
            warn!(error = %e, "store task failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::VERSION.to_string(),
    })
}

async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewSessionRequest>,
) -> Result<(StatusCode, Json<Session>), StatusCode> {
    let session = blocking(&state, move |s| s.start_session(&req.document_id)).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Session>, StatusCode> {
    blocking(&state, move |s| s.session(&id)).await.map(Json)
}

async fn close_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CloseResponse>, StatusCode> {
    let (session, vectors) = blocking(&state, move |s| s.close_session(&id)).await?;
    Ok(Json(CloseResponse {
        session,
        window_count: vectors.len(),
    }))
}

async fn get_vectors(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<FeatureVector>>, StatusCode> {
    blocking(&state, move |s| s.vectors(&id)).await.map(Json)
}

/// Beacon from a page being torn down: accepted into an open session, no alerts returned.
async fn save_beacon(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(events): Json<Vec<CaptureEvent>>,
) -> Result<StatusCode, StatusCode> {
    let batch = WireBatch::from_capture(id, &events);
    if batch.is_empty() {
        return Ok(StatusCode::ACCEPTED);
    }
    blocking(&state, move |s| s.ingest(&batch)).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn websocket_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Client frames in, status/alert/error frames out, in request order.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let (mut tx, mut rx) = socket.split();
    info!("realtime client connected");

    while let Some(msg) = rx.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        for frame in respond(&state, &text).await {
            let json = match serde_json::to_string(&frame) {
                Ok(j) => j,
                Err(e) => {
                    warn!(error = %e, "frame encode failed");
                    continue;
                }
            };
            if tx.send(Message::Text(json)).await.is_err() {
                debug!("realtime client went away mid-reply");
                return;
            }
        }
    }
    info!("realtime client disconnected");
}

async fn respond(state: &AppState, text: &str) -> Vec<Frame> {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => return error_frame(format!("malformed frame: {}", e)),
    };
    let Some(session_id) = keystroke_session(&frame.destination).map(str::to_string) else {
        return error_frame(format!("unknown destination {}", frame.destination));
    };
    let mut batch: WireBatch = match serde_json::from_value(frame.body) {
        Ok(b) => b,
        Err(e) => return error_frame(format!("malformed batch: {}", e)),
    };
    // The destination names the session
    batch.session_id = session_id;

    let outcome = match blocking(state, move |s| s.ingest(&batch)).await {
        Ok(o) => o,
        Err(code) => return error_frame(format!("ingest rejected: {}", code)),
    };

    let mut out = Vec::with_capacity(1 + outcome.alerts.len());
    if let Ok(f) = Frame::new(STATUS_DESTINATION, &outcome.status) {
        out.push(f);
    }
    out.extend(
        outcome
            .alerts
            .iter()
            .filter_map(|a| Frame::new(ALERT_DESTINATION, a).ok()),
    );
    out
}

fn error_frame(message: String) -> Vec<Frame> {
    debug!(%message, "rejecting frame");
    Frame::new(ERROR_DESTINATION, &message).into_iter().collect()
}

/// Bind and serve until the process is stopped.
pub async fn run_server(addr: &str, ingest: Arc<IngestService>) -> crate::error::Result<()> {
    let router = create_router(ingest);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "ingest server listening");
    axum::serve(listener, router).await?;
    Ok(())
}
