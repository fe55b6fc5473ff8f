//! Batch ingest: persist, count, window, score.
//!
//! Scoring is incremental. Each open session keeps the key events of its not yet scored
//! windows in memory, seeded once from the store, so a batch only costs its own events.
//! Windows sit on the grid anchored at the session's first stored key event.

use crate::capture::{EditEvent, EditSummary, KeyEvent};
use crate::config::FeaturesConfig;
use crate::error::{Error, Result};
use crate::features::{aggregate_from, window_of, FeatureVector, StoredAggregator, WindowParams};
use crate::risk::RiskEngine;
use crate::session::Session;
use crate::storage::SecureStore;
use crate::transport::{AnomalyAlert, SessionStatus, WireBatch};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// What the client hears back after a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub status: SessionStatus,
    pub alerts: Vec<AnomalyAlert>,
}

#[derive(Debug)]
struct Progress {
    anchor: Option<i64>,
    latest: Option<i64>,
    /// End of the last window already scored
    scored_until: Option<i64>,
    /// Key events of windows not scored yet
    pending: Vec<KeyEvent>,
    edits: EditSummary,
    paste_alerted: bool,
}

/// Per-session scoring state. `None` until seeded from the store; reset to `None` when
/// an ingest fails half way, so the next one reseeds.
struct Slot {
    touched_at: AtomicI64,
    progress: Mutex<Option<Progress>>,
}

pub struct IngestService {
    store: Arc<SecureStore>,
    aggregator: StoredAggregator<SecureStore>,
    params: WindowParams,
    risk: RiskEngine,
    progress: Mutex<HashMap<String, Arc<Slot>>>,
}

impl IngestService {
    pub fn new(store: Arc<SecureStore>, features: &FeaturesConfig, risk: RiskEngine) -> Self {
        let params = features.stored_params();
        let aggregator = StoredAggregator::new(store.clone(), params);
        Self {
            store,
            aggregator,
            params,
            risk,
            progress: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<SecureStore> {
        &self.store
    }

    pub fn start_session(&self, document_id: &str) -> Result<Session> {
        let session = self.store.create_session(document_id)?;
        info!(session_id = %session.id, document_id, "session started");
        Ok(session)
    }

    pub fn session(&self, id: &str) -> Result<Session> {
        self.store
            .get_session(id)?
            .ok_or_else(|| Error::UnknownSession(id.to_string()))
    }

    fn open_session(&self, id: &str) -> Result<Session> {
        let session = self.session(id)?;
        if !session.is_open() {
            return Err(Error::SessionClosed(id.to_string()));
        }
        Ok(session)
    }

    /// Sessions with scoring state in memory.
    pub fn tracked_sessions(&self) -> usize {
        self.progress.lock().map_or(0, |p| p.len())
    }

    fn slot(&self, id: &str) -> Result<Arc<Slot>> {
        let mut progress = self
            .progress
            .lock()
            .map_err(|_| Error::LockPoisoned("ingest progress"))?;
        let slot = progress.entry(id.to_string()).or_insert_with(|| {
            Arc::new(Slot {
                touched_at: AtomicI64::new(0),
                progress: Mutex::new(None),
            })
        });
        slot.touched_at.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        Ok(Arc::clone(slot))
    }

    /// Persist one batch and score the windows it completed. Events the session already
    /// stored are neither counted nor scored again, so re-sent batches are harmless.
    pub fn ingest(&self, batch: &WireBatch) -> Result<IngestOutcome> {
        let id = batch.session_id.as_str();
        self.open_session(id)?;

        let keys: Vec<KeyEvent> = batch.events.iter().filter_map(KeyEvent::sanitized).collect();
        if keys.len() < batch.events.len() {
            warn!(
                session_id = id,
                dropped = batch.events.len() - keys.len(),
                "key events with out-of-range timestamps dropped"
            );
        }

        let slot = self.slot(id)?;
        // a panic mid-ingest leaves the slot unseeded, so the state is safe to reuse
        let mut guard = slot
            .progress
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // taken out so a failure below leaves the slot unseeded
        let mut progress = match guard.take() {
            Some(p) => p,
            None => self.seed(id)?,
        };

        let fresh_keys = self.store.append_key_events(id, &keys)?;
        let fresh_edits = self.store.append_edit_events(id, &batch.edits)?;
        let presses = fresh_keys.iter().filter(|e| e.is_press()).count() as u64;
        let duplicates = keys.len() + batch.edits.len() - fresh_keys.len() - fresh_edits.len();

        let alerts = self.score(id, &mut progress, fresh_keys, &fresh_edits);
        self.store
            .add_counters(id, presses, fresh_edits.len() as u64, alerts.len() as u64)?;
        *guard = Some(progress);
        drop(guard);

        for a in &alerts {
            warn!(session_id = id, alert_type = %a.alert_type, severity = ?a.severity, "anomaly alert");
        }
        let status = self.session(id)?.status();
        debug!(
            session_id = id,
            events = batch.events.len(),
            edits = batch.edits.len(),
            duplicates,
            alerts = alerts.len(),
            "batch ingested"
        );
        Ok(IngestOutcome { status, alerts })
    }

    /// Scoring state for a session not in memory: everything up to the window holding
    /// the latest stored event counts as scored.
    fn seed(&self, id: &str) -> Result<Progress> {
        let keys = self.store.load_key_events(id)?;
        let edits = EditSummary::from_edits(&self.store.load_edit_events(id)?);
        let anchor = keys.iter().map(|e| e.timestamp_ms).min();
        let latest = keys.iter().map(|e| e.timestamp_ms).max();
        let scored_until = anchor
            .zip(latest)
            .map(|(a, l)| window_of(a, l, self.params.window_ms).0);
        let pending = keys
            .into_iter()
            .filter(|e| scored_until.map_or(true, |s| e.timestamp_ms >= s))
            .collect();
        let paste_alerted = self.risk.evaluate_edits(id, &edits).is_some();
        debug!(session_id = id, scored_until, "ingest progress seeded");
        Ok(Progress {
            anchor,
            latest,
            scored_until,
            pending,
            edits,
            paste_alerted,
        })
    }

    fn score(
        &self,
        id: &str,
        p: &mut Progress,
        keys: Vec<KeyEvent>,
        edits: &[EditEvent],
    ) -> Vec<AnomalyAlert> {
        let mut alerts = Vec::new();

        if let Some(batch_first) = keys.iter().map(|e| e.timestamp_ms).min() {
            let anchor = *p.anchor.get_or_insert(batch_first);
            p.latest = p.latest.max(keys.iter().map(|e| e.timestamp_ms).max());
            // late events for windows already scored are stored but not scored
            let until = p.scored_until;
            p.pending
                .extend(keys.into_iter().filter(|e| until.map_or(true, |u| e.timestamp_ms >= u)));

            if let Some(latest) = p.latest {
                let (current, _) = window_of(anchor, latest, self.params.window_ms);
                let (done, open): (Vec<KeyEvent>, Vec<KeyEvent>) = std::mem::take(&mut p.pending)
                    .into_iter()
                    .partition(|e| e.timestamp_ms < current);
                p.pending = open;
                let completed = aggregate_from(id, anchor, &done, &self.params);
                if let Some(last) = completed.last() {
                    p.scored_until = p.scored_until.max(Some(last.window_end));
                }
                alerts.extend(completed.iter().filter_map(|v| self.risk.evaluate(v)));
            }
        }

        if !edits.is_empty() {
            p.edits.extend(edits);
            if !p.paste_alerted {
                if let Some(alert) = self.risk.evaluate_edits(id, &p.edits) {
                    p.paste_alerted = true;
                    alerts.push(alert);
                }
            }
        }
        alerts
    }

    /// Close the session and materialize its rollup. Closing twice re-materializes.
    pub fn close_session(&self, id: &str) -> Result<(Session, Vec<FeatureVector>)> {
        let session = self.store.close_session(id)?;
        let vectors = self.aggregator.materialize(id)?;
        if let Ok(mut progress) = self.progress.lock() {
            progress.remove(id);
        }
        info!(session_id = id, windows = vectors.len(), "session closed");
        Ok((session, vectors))
    }

    pub fn vectors(&self, id: &str) -> Result<Vec<FeatureVector>> {
        self.session(id)?;
        self.aggregator.vectors(id)
    }

    /// Re-derive from raw events, ignoring any rollup.
    pub fn derive(&self, id: &str) -> Result<Vec<FeatureVector>> {
        self.session(id)?;
        self.aggregator.derive(id)
    }

    /// Delete raw batches older than `days` and forget the scoring state of sessions
    /// idle since then.
    pub fn prune(&self, days: u32) -> Result<u64> {
        let cutoff = (Utc::now() - chrono::Duration::days(i64::from(days))).timestamp_millis();
        let n = self.store.prune_before(cutoff)?;
        let evicted = {
            let mut progress = self
                .progress
                .lock()
                .map_err(|_| Error::LockPoisoned("ingest progress"))?;
            let before = progress.len();
            progress.retain(|_, slot| slot.touched_at.load(Ordering::Relaxed) > cutoff);
            before - progress.len()
        };
        if n > 0 || evicted > 0 {
            info!(batches = n, sessions = evicted, days, "pruned old event batches");
        }
        Ok(n)
    }
}
