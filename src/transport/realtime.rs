//! Realtime transport: buffered raw events pushed over a persistent duplex channel at a
//! fixed cadence, with at-least-once, in-order delivery across reconnects.
//!
//! State machine: `Disconnected → Connecting → Connected → (error) Backoff → Connecting`.
//! Only [`RealtimeTransport::disconnect`] returns to a terminal `Disconnected`.

use super::backoff::Backoff;
use super::wire::{keystroke_destination, Frame, InboundMessage, WireBatch};
use crate::capture::CaptureEvent;
use crate::config::TransportConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Backoff,
}

/// What observers see. Failures are reported here, never raised to event producers.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    State(ConnectionState),
    Published { count: usize },
    PublishFailed { count: usize, error: String },
    ReconnectScheduled { delay_ms: u64 },
    Inbound(InboundMessage),
}

/// Outbound half of an open connection.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send(&self, frame: Frame) -> Result<()>;

    /// Best-effort graceful close.
    async fn close(&self) {}
}

/// An open connection: outbound sink plus inbound frames. The inbound channel closing,
/// or yielding an error, ends the connection.
pub struct Connection {
    pub sink: Arc<dyn FrameSink>,
    pub inbound: mpsc::Receiver<Result<Frame>>,
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Connection>;
}

#[derive(Clone)]
struct ActiveLink {
    sink: Arc<dyn FrameSink>,
    /// Notified when a publish on this link fails
    lost: Arc<Notify>,
}

struct Inner {
    session_id: String,
    destination: String,
    config: TransportConfig,
    connector: Arc<dyn Connector>,
    outgoing: Mutex<VecDeque<CaptureEvent>>,
    link: Mutex<Option<ActiveLink>>,
    /// Serializes drains so two batches are never in flight at once.
    flush_lock: tokio::sync::Mutex<()>,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<TransportEvent>,
    /// Set by `disconnect`; an aborting driver may not leave `Disconnected` afterwards.
    stopped: AtomicBool,
}

pub struct RealtimeTransport {
    inner: Arc<Inner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RealtimeTransport {
    pub fn new(
        session_id: impl Into<String>,
        config: TransportConfig,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let session_id = session_id.into();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                destination: keystroke_destination(&session_id),
                session_id,
                config,
                connector,
                outgoing: Mutex::new(VecDeque::new()),
                link: Mutex::new(None),
                flush_lock: tokio::sync::Mutex::new(()),
                state,
                events,
                stopped: AtomicBool::new(false),
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Start the connection driver and the publish cadence. No-op if already started.
    pub fn connect(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::Transport("no async runtime".to_string()))?;
        let mut tasks = lock(&self.tasks);
        if !tasks.is_empty() {
            return Ok(());
        }
        self.inner.stopped.store(false, Ordering::SeqCst);
        tasks.push(runtime.spawn(Arc::clone(&self.inner).drive()));
        tasks.push(runtime.spawn(Arc::clone(&self.inner).cadence()));
        Ok(())
    }

    /// Stop reconnecting and publishing. Buffered events stay queued.
    pub fn disconnect(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        if let Some(link) = lock(&self.inner.link).take() {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move { link.sink.close().await });
            }
        }
        self.inner.set_state(ConnectionState::Disconnected);
        info!(session_id = %self.inner.session_id, "transport disconnected");
    }

    pub fn enqueue(&self, events: impl IntoIterator<Item = CaptureEvent>) {
        lock(&self.inner.outgoing).extend(events);
    }

    /// Drain the buffer and publish it as one message. On failure the batch goes back to
    /// the front of the buffer.
    pub async fn flush(&self) -> Result<usize> {
        self.inner.flush().await
    }

    pub fn pending(&self) -> usize {
        lock(&self.inner.outgoing).len()
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.inner.events.subscribe()
    }
}

impl Drop for RealtimeTransport {
    fn drop(&mut self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        if state != ConnectionState::Disconnected && self.stopped.load(Ordering::SeqCst) {
            return;
        }
        self.state.send_replace(state);
        let _ = self.events.send(TransportEvent::State(state));
    }

    async fn flush(&self) -> Result<usize> {
        let _serial = self.flush_lock.lock().await;
        let batch: Vec<CaptureEvent> = lock(&self.outgoing).drain(..).collect();
        if batch.is_empty() {
            return Ok(0);
        }
        let count = batch.len();
        let link = lock(&self.link).clone();

        let result = match &link {
            None => Err(Error::NotConnected),
            Some(link) => self.publish(link, &batch).await,
        };

        match result {
            Ok(()) => {
                debug!(session_id = %self.session_id, count, "batch published");
                let _ = self.events.send(TransportEvent::Published { count });
                Ok(count)
            }
            Err(e) => {
                {
                    let mut q = lock(&self.outgoing);
                    for ev in batch.into_iter().rev() {
                        q.push_front(ev);
                    }
                }
                let _ = self.events.send(TransportEvent::PublishFailed {
                    count,
                    error: e.to_string(),
                });
                if let Some(failed) = link {
                    warn!(session_id = %self.session_id, error = %e, count, "publish failed; batch re-buffered");
                    let mut current = lock(&self.link);
                    if current.as_ref().is_some_and(|l| Arc::ptr_eq(&l.lost, &failed.lost)) {
                        *current = None;
                    }
                    failed.lost.notify_one();
                } else {
                    debug!(session_id = %self.session_id, count, "not connected; batch re-buffered");
                }
                Err(e)
            }
        }
    }

    async fn publish(&self, link: &ActiveLink, batch: &[CaptureEvent]) -> Result<()> {
        let body = WireBatch::from_capture(self.session_id.clone(), batch);
        let frame = Frame::new(self.destination.clone(), &body)?;
        let timeout = Duration::from_millis(self.config.publish_timeout_ms);
        match tokio::time::timeout(timeout, link.sink.send(frame)).await {
            Ok(r) => r,
            Err(_) => Err(Error::Transport("publish timed out".to_string())),
        }
    }

    async fn drive(self: Arc<Self>) {
        let mut backoff = Backoff::new(
            Duration::from_millis(self.config.initial_backoff_ms),
            Duration::from_millis(self.config.max_backoff_ms),
        );
        loop {
            self.set_state(ConnectionState::Connecting);
            match self.connector.connect().await {
                Ok(conn) => {
                    backoff.reset();
                    let lost = Arc::new(Notify::new());
                    *lock(&self.link) = Some(ActiveLink {
                        sink: conn.sink,
                        lost: Arc::clone(&lost),
                    });
                    self.set_state(ConnectionState::Connected);
                    info!(session_id = %self.session_id, "transport connected");
                    // resend whatever queued up while disconnected
                    let _ = self.flush().await;
                    self.pump(conn.inbound, lost).await;
                    lock(&self.link).take();
                }
                Err(e) => {
                    warn!(session_id = %self.session_id, error = %e, "transport connect failed");
                }
            }
            let delay = backoff.on_error();
            self.set_state(ConnectionState::Backoff);
            let _ = self.events.send(TransportEvent::ReconnectScheduled {
                delay_ms: delay.as_millis() as u64,
            });
            debug!(delay_ms = delay.as_millis() as u64, "reconnect scheduled");
            tokio::time::sleep(delay).await;
        }
    }

    async fn pump(&self, mut inbound: mpsc::Receiver<Result<Frame>>, lost: Arc<Notify>) {
        loop {
            tokio::select! {
                _ = lost.notified() => {
                    debug!(session_id = %self.session_id, "link dropped after publish failure");
                    return;
                }
                msg = inbound.recv() => match msg {
                    Some(Ok(frame)) => self.handle_inbound(frame),
                    Some(Err(e)) => {
                        warn!(session_id = %self.session_id, error = %e, "transport protocol error");
                        return;
                    }
                    None => {
                        info!(session_id = %self.session_id, "transport connection closed");
                        return;
                    }
                },
            }
        }
    }

    fn handle_inbound(&self, frame: Frame) {
        let destination = frame.destination.clone();
        match InboundMessage::from_frame(frame) {
            Some(Ok(msg)) => {
                let _ = self.events.send(TransportEvent::Inbound(msg));
            }
            Some(Err(e)) => warn!(%destination, error = %e, "malformed inbound message"),
            None => debug!(%destination, "ignoring inbound frame"),
        }
    }

    async fn cadence(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(Duration::from_millis(
            self.config.publish_interval_ms.max(1),
        ));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let _ = self.flush().await;
        }
    }
}
