//! Size- or time-triggered event batching.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Receives each flushed batch. Must not push into the same buffer while it runs.
pub type FlushCallback<T> = Arc<dyn Fn(Vec<T>) + Send + Sync>;

/// Accumulates events and hands them off in batches: when `max_size` events are
/// buffered, or `max_interval` after the first unflushed push, whichever comes first.
///
/// The interval timer needs a tokio runtime on the pushing thread; without one only
/// size-triggered and explicit flushes happen.
pub struct EventBuffer<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    /// Serializes callback invocations so batches are delivered in flush order.
    delivery: Mutex<()>,
    on_flush: FlushCallback<T>,
    max_size: usize,
    max_interval: Duration,
}

struct State<T> {
    items: Vec<T>,
    timer: Option<JoinHandle<()>>,
    /// Bumped on every flush; a timer only fires for the generation it was armed in.
    generation: u64,
}

fn lock<U>(m: &Mutex<U>) -> MutexGuard<'_, U> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<T: Send + 'static> EventBuffer<T> {
    pub fn new(max_size: usize, max_interval: Duration, on_flush: FlushCallback<T>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    items: Vec::new(),
                    timer: None,
                    generation: 0,
                }),
                delivery: Mutex::new(()),
                on_flush,
                max_size: max_size.max(1),
                max_interval,
            }),
        }
    }

    pub fn push(&self, item: T) {
        let full = {
            let mut st = lock(&self.inner.state);
            st.items.push(item);
            if st.timer.is_none() {
                let generation = st.generation;
                st.timer = arm_timer(&self.inner, generation);
            }
            st.items.len() >= self.inner.max_size
        };
        if full {
            self.flush();
        }
    }

    /// Hand the current contents to the callback. No-op when empty; always cancels
    /// the pending timer.
    pub fn flush(&self) {
        self.inner.flush(None);
    }

    pub fn size(&self) -> usize {
        lock(&self.inner.state).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn max_size(&self) -> usize {
        self.inner.max_size
    }
}

impl<T: Clone> EventBuffer<T> {
    /// Copy of the unflushed contents, leaving the buffer untouched.
    pub fn snapshot(&self) -> Vec<T> {
        lock(&self.inner.state).items.clone()
    }
}

impl<T> Clone for EventBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Inner<T> {
    fn flush(&self, armed_in: Option<u64>) {
        let _delivery = lock(&self.delivery);
        let items = {
            let mut st = lock(&self.state);
            if let Some(generation) = armed_in {
                if generation != st.generation {
                    return;
                }
            }
            if let Some(timer) = st.timer.take() {
                if armed_in.is_none() {
                    timer.abort();
                }
            }
            st.generation += 1;
            std::mem::take(&mut st.items)
        };
        if !items.is_empty() {
            (self.on_flush)(items);
        }
    }
}

fn arm_timer<T: Send + 'static>(inner: &Arc<Inner<T>>, generation: u64) -> Option<JoinHandle<()>> {
    let runtime = tokio::runtime::Handle::try_current().ok()?;
    let weak: Weak<Inner<T>> = Arc::downgrade(inner);
    let delay = inner.max_interval;
    Some(runtime.spawn(async move {
        tokio::time::sleep(delay).await;
        if let Some(inner) = weak.upgrade() {
            inner.flush(Some(generation));
        }
    }))
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        if let Some(timer) = lock(&self.state).timer.take() {
            timer.abort();
        }
    }
}
