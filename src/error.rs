//! Error types for the capture, storage and transport layers.
//!
//! The windowing and feature core is pure and never fails; everything that
//! touches disk, the network or a lock returns [`Result`].

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("payload decode error: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("session {0} is closed")]
    SessionClosed(String),

    #[error("transport is not connected")]
    NotConnected,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
