//! Best-effort persistence of unflushed events when the capture surface is hidden or torn down.

use super::CaptureEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// Surface is about to become hidden (may come back)
    Hidden,
    /// Surface is about to be destroyed
    Destroyed,
}

pub type ListenerId = u64;
pub type LifecycleListener = Arc<dyn Fn(LifecycleSignal) + Send + Sync>;

/// Platform seam for page/window lifecycle notifications.
pub trait LifecycleHooks: Send + Sync {
    fn add_listener(&self, listener: LifecycleListener) -> ListenerId;
    fn remove_listener(&self, id: ListenerId);
}

/// In-process lifecycle hooks. The binary feeds it from Ctrl-C.
#[derive(Default)]
pub struct LifecycleBus {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, LifecycleListener)>>,
}

impl LifecycleBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&self, signal: LifecycleSignal) {
        let listeners: Vec<LifecycleListener> = match self.listeners.lock() {
            Ok(l) => l.iter().map(|(_, f)| Arc::clone(f)).collect(),
            Err(_) => return,
        };
        for f in listeners {
            f(signal);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }
}

impl LifecycleHooks for LifecycleBus {
    fn add_listener(&self, listener: LifecycleListener) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut l) = self.listeners.lock() {
            l.push((id, listener));
        }
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        if let Ok(mut l) = self.listeners.lock() {
            l.retain(|(i, _)| *i != id);
        }
    }
}

/// Reads the unflushed buffer contents without draining them.
pub type BufferAccessor = Arc<dyn Fn() -> Vec<CaptureEvent> + Send + Sync>;
/// Durable save; must return promptly (spawn, don't wait).
pub type SaveFn = Arc<dyn Fn(Vec<CaptureEvent>) + Send + Sync>;

pub struct UnloadPersister {
    hooks: Option<Arc<dyn LifecycleHooks>>,
    accessor: BufferAccessor,
    save: SaveFn,
    listener: Mutex<Option<ListenerId>>,
}

impl UnloadPersister {
    pub fn new(
        hooks: Option<Arc<dyn LifecycleHooks>>,
        accessor: BufferAccessor,
        save: SaveFn,
    ) -> Self {
        Self {
            hooks,
            accessor,
            save,
            listener: Mutex::new(None),
        }
    }

    /// Subscribe to lifecycle signals. Repeated calls are no-ops.
    pub fn attach(&self) {
        let Ok(mut listener) = self.listener.lock() else {
            return;
        };
        if listener.is_some() {
            return;
        }
        let Some(hooks) = self.hooks.as_ref() else {
            debug!("no lifecycle hooks available; unload persistence disabled");
            return;
        };
        let accessor = Arc::clone(&self.accessor);
        let save = Arc::clone(&self.save);
        let id = hooks.add_listener(Arc::new(move |signal| {
            let pending = accessor();
            if pending.is_empty() {
                return;
            }
            info!(?signal, count = pending.len(), "persisting unflushed events");
            save(pending);
        }));
        *listener = Some(id);
    }

    /// Unsubscribe. No-op when not attached.
    pub fn detach(&self) {
        let Ok(mut listener) = self.listener.lock() else {
            return;
        };
        if let (Some(id), Some(hooks)) = (listener.take(), self.hooks.as_ref()) {
            hooks.remove_listener(id);
        }
    }

    pub fn is_attached(&self) -> bool {
        self.listener.lock().map(|l| l.is_some()).unwrap_or(false)
    }
}

impl Drop for UnloadPersister {
    fn drop(&mut self) {
        self.detach();
    }
}
