//! One capture session wired end to end: timing → buffer → {compute, transport}, with
//! unflushed events persisted on teardown.

use super::{
    BufferAccessor, CaptureEvent, EditEvent, EditSummary, EventBuffer, KeyEventType,
    KeyTimingTracker, LifecycleHooks, SaveFn, UnloadPersister,
};
use crate::compute::{ComputeDispatcher, DispatchMode, VectorSink};
use crate::config::CaptureConfig;
use crate::features::{FeatureVector, LiveAggregator, WindowParams};
use crate::transport::RealtimeTransport;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{info, warn};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct CapturePipeline {
    session_id: String,
    tracker: Mutex<KeyTimingTracker>,
    buffer: EventBuffer<CaptureEvent>,
    dispatcher: Arc<ComputeDispatcher>,
    vectors: Arc<Mutex<Vec<FeatureVector>>>,
    edits: Mutex<Vec<EditEvent>>,
    transport: Option<Arc<RealtimeTransport>>,
    persister: UnloadPersister,
}

impl CapturePipeline {
    /// Build and attach. `hooks = None` runs without unload persistence.
    pub fn new(
        session_id: impl Into<String>,
        capture: &CaptureConfig,
        params: WindowParams,
        transport: Option<Arc<RealtimeTransport>>,
        hooks: Option<Arc<dyn LifecycleHooks>>,
        save: SaveFn,
    ) -> Self {
        let session_id = session_id.into();
        let vectors = Arc::new(Mutex::new(Vec::new()));

        let sink: VectorSink = {
            let vectors = Arc::clone(&vectors);
            Arc::new(move |v: FeatureVector| lock(&vectors).push(v))
        };
        let aggregator = Arc::new(LiveAggregator::new(session_id.clone(), params));
        let dispatcher = Arc::new(ComputeDispatcher::new(
            aggregator,
            sink,
            capture.background_compute,
        ));

        let buffer = {
            let dispatcher = Arc::clone(&dispatcher);
            let transport = transport.clone();
            EventBuffer::new(
                capture.buffer_max_size,
                Duration::from_millis(capture.buffer_max_interval_ms),
                Arc::new(move |batch: Vec<CaptureEvent>| {
                    dispatcher.dispatch(&batch);
                    if let Some(t) = transport.as_ref() {
                        t.enqueue(batch);
                    }
                }),
            )
        };

        let accessor: BufferAccessor = {
            let buffer = buffer.clone();
            Arc::new(move || buffer.snapshot())
        };
        let persister = UnloadPersister::new(hooks, accessor, save);
        persister.attach();

        info!(session_id = %session_id, background = capture.background_compute, "capture started");
        Self {
            session_id,
            tracker: Mutex::new(KeyTimingTracker::new()),
            buffer,
            dispatcher,
            vectors,
            edits: Mutex::new(Vec::new()),
            transport,
            persister,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Classify and time one key transition. The key name is dropped here.
    pub fn record_key(&self, key: &str, event_type: KeyEventType, timestamp_ms: i64) {
        let event = lock(&self.tracker).record(key, event_type, timestamp_ms);
        self.buffer.push(CaptureEvent::Key(event));
    }

    pub fn record_edit(&self, edit: EditEvent) {
        lock(&self.edits).push(edit.clone());
        self.buffer.push(CaptureEvent::Edit(edit));
    }

    pub fn flush(&self) {
        self.buffer.flush();
    }

    /// Buffered but not yet flushed.
    pub fn pending(&self) -> usize {
        self.buffer.size()
    }

    /// Vectors computed so far, in arrival order.
    pub fn vectors(&self) -> Vec<FeatureVector> {
        self.dispatcher.poll();
        lock(&self.vectors).clone()
    }

    pub fn edit_summary(&self) -> EditSummary {
        EditSummary::from_edits(lock(&self.edits).iter())
    }

    pub fn compute_mode(&self) -> DispatchMode {
        self.dispatcher.mode()
    }

    pub fn transport(&self) -> Option<&Arc<RealtimeTransport>> {
        self.transport.as_ref()
    }

    /// Flush everything, drain the compute backend (emitting the windows still open)
    /// and stop the transport. Returns every vector the session produced.
    pub async fn close(&self) -> Vec<FeatureVector> {
        self.persister.detach();
        self.buffer.flush();
        // joins the worker thread
        let dispatcher = Arc::clone(&self.dispatcher);
        if let Err(e) = tokio::task::spawn_blocking(move || dispatcher.shutdown()).await {
            warn!(session_id = %self.session_id, error = %e, "compute drain failed");
        }
        if let Some(t) = self.transport.as_ref() {
            if let Err(e) = t.flush().await {
                warn!(session_id = %self.session_id, error = %e, pending = t.pending(), "final publish failed");
            }
            t.disconnect();
        }
        let vectors = lock(&self.vectors).clone();
        info!(session_id = %self.session_id, windows = vectors.len(), "capture closed");
        vectors
    }
}
