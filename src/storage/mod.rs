//! Encrypted server-side storage for sessions, raw event batches and vector rollups.

mod encrypted;

pub use encrypted::SecureStore;
