//! Server-side aggregation over persisted events.

use super::{aggregate, FeatureVector, WindowParams};
use crate::capture::KeyEvent;
use crate::error::Result;
use std::sync::Arc;

/// Persistence collaborator that can hand back a session's raw key events and hold a
/// materialized vector rollup.
pub trait EventSource: Send + Sync {
    fn key_events(&self, session_id: &str) -> Result<Vec<KeyEvent>>;
    fn store_rollup(&self, session_id: &str, vectors: &[FeatureVector]) -> Result<()>;
    /// `None` when no rollup has been materialized.
    fn load_rollup(&self, session_id: &str) -> Result<Option<Vec<FeatureVector>>>;
}

/// Stateless; safe to share across concurrent requests for different sessions.
pub struct StoredAggregator<S: ?Sized> {
    source: Arc<S>,
    params: WindowParams,
}

impl<S: EventSource + ?Sized> StoredAggregator<S> {
    pub fn new(source: Arc<S>, params: WindowParams) -> Self {
        Self { source, params }
    }

    pub fn params(&self) -> &WindowParams {
        &self.params
    }

    /// Recompute the session's vectors from its stored events.
    pub fn derive(&self, session_id: &str) -> Result<Vec<FeatureVector>> {
        let events = self.source.key_events(session_id)?;
        Ok(aggregate(session_id, &events, &self.params))
    }

    /// Derive and persist the rollup; returns what was stored.
    pub fn materialize(&self, session_id: &str) -> Result<Vec<FeatureVector>> {
        let vectors = self.derive(session_id)?;
        self.source.store_rollup(session_id, &vectors)?;
        Ok(vectors)
    }

    /// Rollup if one exists, otherwise derived on demand.
    pub fn vectors(&self, session_id: &str) -> Result<Vec<FeatureVector>> {
        match self.source.load_rollup(session_id)? {
            Some(v) => Ok(v),
            None => self.derive(session_id),
        }
    }
}
