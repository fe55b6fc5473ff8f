//! Ingest server: persists batches, scores completed windows, serves vectors.

mod api;
mod ingest;

pub use api::{create_router, run_server, AppState, CloseResponse, HealthResponse, NewSessionRequest};
pub use ingest::{IngestOutcome, IngestService};
