//! Realtime duplex transport to the ingest server.

mod backoff;
mod realtime;
mod wire;
mod ws;

pub use backoff::Backoff;
pub use realtime::{
    Connection, ConnectionState, Connector, FrameSink, RealtimeTransport, TransportEvent,
};
pub use wire::{
    keystroke_destination, keystroke_session, AnomalyAlert, Frame, InboundMessage, SessionStatus,
    WireBatch, ALERT_DESTINATION, ERROR_DESTINATION, STATUS_DESTINATION,
};
pub use ws::WsConnector;
