//! Background compute dispatcher.
//!
//! Batches go to a dedicated worker thread over a channel; vectors come back through the
//! sink. If the worker cannot be spawned, stops, or panics while computing or delivering,
//! the dispatcher moves to inline computation on the calling thread for the rest of its
//! lifetime. Work the worker could not finish is handed back and completed inline, so
//! nothing is lost.

use super::WindowCompute;
use crate::capture::{CaptureEvent, KeyEvent};
use crate::features::FeatureVector;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, SendError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

pub const WORKER_THREAD_NAME: &str = "feature-worker";

/// Receives vectors one at a time, in window order per batch.
pub type VectorSink = Arc<dyn Fn(FeatureVector) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    Worker,
    Fallback,
}

enum Backend {
    Worker(Worker),
    Inline,
}

struct Worker {
    tx: Sender<Vec<KeyEvent>>,
    /// Work a failed worker hands back, in dispatch order
    returned: Receiver<Unfinished>,
    thread: JoinHandle<()>,
}

enum Unfinished {
    /// Not computed (or the computation panicked)
    Batch(Vec<KeyEvent>),
    /// Computed, not yet delivered
    Vectors(Vec<FeatureVector>),
}

pub struct ComputeDispatcher {
    backend: Mutex<Backend>,
    compute: Arc<dyn WindowCompute>,
    sink: VectorSink,
}

impl ComputeDispatcher {
    /// `background = false` (or no threads on the platform) starts directly in fallback mode.
    pub fn new(compute: Arc<dyn WindowCompute>, sink: VectorSink, background: bool) -> Self {
        let backend = if background {
            match spawn_worker(Arc::clone(&compute), Arc::clone(&sink)) {
                Ok(w) => Backend::Worker(w),
                Err(e) => {
                    warn!(error = %e, "compute worker unavailable; computing inline");
                    Backend::Inline
                }
            }
        } else {
            debug!("background compute disabled; computing inline");
            Backend::Inline
        };
        Self {
            backend: Mutex::new(backend),
            compute,
            sink,
        }
    }

    pub fn mode(&self) -> DispatchMode {
        match &*self.lock() {
            Backend::Worker(_) => DispatchMode::Worker,
            Backend::Inline => DispatchMode::Fallback,
        }
    }

    /// Compute vectors for the key events in `batch`. Never waits on a healthy worker.
    pub fn dispatch(&self, batch: &[CaptureEvent]) {
        let keys: Vec<KeyEvent> = batch.iter().filter_map(|e| e.as_key().cloned()).collect();
        if keys.is_empty() {
            return;
        }
        let mut backend = self.lock();
        self.recover(&mut backend);

        let pending = match &*backend {
            Backend::Worker(w) => match w.tx.send(keys) {
                Ok(()) => return,
                Err(SendError(back)) => back,
            },
            Backend::Inline => keys,
        };
        self.fall_back(&mut backend, "compute worker channel closed", None);
        self.run_inline(&pending);
    }

    /// Pick up a worker failure, switching to fallback if there is one.
    pub fn poll(&self) {
        let mut backend = self.lock();
        self.recover(&mut backend);
    }

    /// Let the worker finish queued batches, complete anything it handed back, then
    /// deliver the windows still open. Blocks until the worker exits. Later dispatches
    /// run inline.
    pub fn shutdown(&self) {
        let mut backend = self.lock();
        if let Backend::Worker(w) = std::mem::replace(&mut *backend, Backend::Inline) {
            self.drain(w, None);
        }
        self.deliver(self.compute.finish());
    }

    fn recover(&self, backend: &mut Backend) {
        let first = match backend {
            Backend::Worker(w) => {
                let first = w.returned.try_recv().ok();
                if first.is_none() && !w.thread.is_finished() {
                    return;
                }
                first
            }
            Backend::Inline => return,
        };
        self.fall_back(backend, "compute worker failed", first);
    }

    /// One-way transition; logs only on the actual switch.
    fn fall_back(&self, backend: &mut Backend, reason: &str, first: Option<Unfinished>) {
        if let Backend::Worker(w) = std::mem::replace(backend, Backend::Inline) {
            warn!(reason, "falling back to inline feature computation");
            self.drain(w, first);
        }
    }

    /// Close the worker's queue, wait for it, and complete handed-back work in order.
    /// A failed worker only forwards, so the wait is short.
    fn drain(&self, w: Worker, first: Option<Unfinished>) {
        let Worker {
            tx,
            returned,
            thread,
        } = w;
        drop(tx);
        if thread.join().is_err() {
            warn!("compute worker exited abnormally");
        }
        for work in first.into_iter().chain(returned.try_iter()) {
            match work {
                Unfinished::Batch(keys) => self.run_inline(&keys),
                Unfinished::Vectors(vectors) => self.deliver(vectors),
            }
        }
    }

    fn run_inline(&self, keys: &[KeyEvent]) {
        self.deliver(self.compute.compute(keys));
    }

    fn deliver(&self, vectors: Vec<FeatureVector>) {
        for v in vectors {
            (self.sink)(v);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Backend> {
        self.backend
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for ComputeDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_worker(compute: Arc<dyn WindowCompute>, sink: VectorSink) -> std::io::Result<Worker> {
    let (tx, rx) = mpsc::channel::<Vec<KeyEvent>>();
    let (returned_tx, returned) = mpsc::channel::<Unfinished>();
    let thread = thread::Builder::new()
        .name(WORKER_THREAD_NAME.to_string())
        .spawn(move || {
            let mut failed = false;
            while let Ok(batch) = rx.recv() {
                if failed {
                    let _ = returned_tx.send(Unfinished::Batch(batch));
                    continue;
                }
                if let Err(unfinished) = run_guarded(compute.as_ref(), &sink, batch) {
                    failed = true;
                    let _ = returned_tx.send(unfinished);
                }
            }
        })?;
    Ok(Worker {
        tx,
        returned,
        thread,
    })
}

/// Compute and deliver one batch, catching a panic on either side. On failure returns
/// whatever was not delivered.
fn run_guarded(
    compute: &dyn WindowCompute,
    sink: &VectorSink,
    batch: Vec<KeyEvent>,
) -> Result<(), Unfinished> {
    let vectors = match panic::catch_unwind(AssertUnwindSafe(|| compute.compute(&batch))) {
        Ok(v) => v,
        Err(_) => return Err(Unfinished::Batch(batch)),
    };
    for (i, v) in vectors.iter().enumerate() {
        let v = v.clone();
        if panic::catch_unwind(AssertUnwindSafe(|| sink(v))).is_err() {
            return Err(Unfinished::Vectors(vectors[i..].to_vec()));
        }
    }
    Ok(())
}
