//! Device controller
//!
//! Owns the single live link session and everything attached to it: the
//! inbox, the send gate, the background reader loop, the jog pacer, and the
//! console listener registry. All lifecycle ordering rules live here,
//! in particular the fixed shutdown order: signal the reader loop, stop and
//! join the pacer, join the reader, only then close the transport.

use crate::inbox::Inbox;
use crate::pacer::{self, PacerConfig, PacerContext};
use crate::transport::{LinkParams, SerialLink};
use jogkit_core::{
    shutdown_pair, ConsoleListener, ConsoleListenerHandle, Error, LinkError, PacerError, Result,
    ShutdownSignal,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Default deadline for acquiring the send gate and writing one command.
pub const SEND_DEADLINE: Duration = Duration::from_secs(2);

/// Deadline slice handed to each reader-loop read attempt. Expiry is a soft
/// timeout; the loop just calls again.
const READ_SLICE: Duration = Duration::from_millis(250);

/// Registered console listeners, notified on detached tasks so the link
/// core never blocks on a sink.
#[derive(Clone, Default)]
pub(crate) struct ListenerSet {
    inner: Arc<RwLock<HashMap<String, Arc<dyn ConsoleListener>>>>,
}

impl ListenerSet {
    fn add(&self, listener: Arc<dyn ConsoleListener>) -> ConsoleListenerHandle {
        let id = Uuid::new_v4().to_string();
        self.inner.write().insert(id.clone(), listener);
        ConsoleListenerHandle(id)
    }

    fn remove(&self, handle: &ConsoleListenerHandle) {
        self.inner.write().remove(&handle.0);
    }

    fn count(&self) -> usize {
        self.inner.read().len()
    }

    pub(crate) fn notify_sent(&self, command: &str) {
        for listener in self.inner.read().values().cloned() {
            let command = command.to_string();
            tokio::spawn(async move {
                listener.on_line_sent(&command).await;
            });
        }
    }

    pub(crate) fn notify_received(&self, line: &str) {
        for listener in self.inner.read().values().cloned() {
            let line = line.to_string();
            tokio::spawn(async move {
                listener.on_line_received(&line).await;
            });
        }
    }

    pub(crate) fn notify_fault(&self, message: &str) {
        for listener in self.inner.read().values().cloned() {
            let message = message.to_string();
            tokio::spawn(async move {
                listener.on_fault(&message).await;
            });
        }
    }
}

/// A spawned loop plus its shutdown signal.
struct TaskHandle {
    signal: ShutdownSignal,
    handle: JoinHandle<()>,
}

impl TaskHandle {
    fn is_live(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// Serialize one command through the send gate.
///
/// Acquires the write permit under `deadline`, re-validates that the link
/// is still open and the deadline not already spent, mirrors the command to
/// the console, and writes the line. The permit is released by guard drop on
/// every path. Deadline expiry or a closed link during the wait drops the
/// command silently; that is expected traffic during shutdown.
pub(crate) async fn gated_send_deadline(
    link: &SerialLink,
    gate: &Mutex<()>,
    listeners: &ListenerSet,
    command: &str,
    deadline: Duration,
) -> Result<()> {
    let started = Instant::now();

    let _permit = match tokio::time::timeout(deadline, gate.lock()).await {
        Ok(guard) => guard,
        Err(_) => {
            tracing::debug!(command, "send dropped, gate wait exceeded deadline");
            return Ok(());
        }
    };

    if !link.is_open() {
        tracing::debug!(command, "send dropped, link closed while waiting");
        return Ok(());
    }
    if started.elapsed() >= deadline {
        tracing::debug!(command, "send dropped, deadline spent before write");
        return Ok(());
    }

    listeners.notify_sent(command);
    match link.write_line(command).await {
        Ok(()) => Ok(()),
        Err(e) => {
            listeners.notify_fault(&format!("send failed: {e}"));
            Err(e)
        }
    }
}

pub(crate) async fn gated_send(
    link: &SerialLink,
    gate: &Mutex<()>,
    listeners: &ListenerSet,
    command: &str,
) -> Result<()> {
    gated_send_deadline(link, gate, listeners, command, SEND_DEADLINE).await
}

/// Controller for one board connection
///
/// Public operations: `connect`, `disconnect`, `send`, `wait_for_line`,
/// `start_pacer`, `stop_pacer`, `adjust_feed`. Everything shares one send
/// gate and one inbox; a fresh connect never reuses a disposed link.
pub struct DeviceController {
    link: RwLock<Option<Arc<SerialLink>>>,
    gate: Arc<Mutex<()>>,
    inbox: Arc<Inbox>,
    listeners: ListenerSet,
    reader: parking_lot::Mutex<Option<TaskHandle>>,
    pacer_task: parking_lot::Mutex<Option<TaskHandle>>,
    pacer_config: PacerConfig,
    feed: Arc<RwLock<f64>>,
}

impl DeviceController {
    /// Create a controller with the given pacer tuning
    pub fn new(pacer_config: PacerConfig) -> Self {
        let feed = pacer_config
            .initial_feed
            .clamp(pacer_config.feed_min, pacer_config.feed_max);
        Self {
            link: RwLock::new(None),
            gate: Arc::new(Mutex::new(())),
            inbox: Arc::new(Inbox::default()),
            listeners: ListenerSet::default(),
            reader: parking_lot::Mutex::new(None),
            pacer_task: parking_lot::Mutex::new(None),
            pacer_config,
            feed: Arc::new(RwLock::new(feed)),
        }
    }

    /// Whether a link session is open
    pub fn is_connected(&self) -> bool {
        self.link.read().as_ref().is_some_and(|l| l.is_open())
    }

    /// Whether the jog pacer loop is running
    pub fn is_pacing(&self) -> bool {
        self.pacer_task.lock().as_ref().is_some_and(|t| t.is_live())
    }

    /// Current feed rate in mm/min
    pub fn feed_rate(&self) -> f64 {
        *self.feed.read()
    }

    /// Open a session and start the reader loop
    pub async fn connect(&self, params: &LinkParams) -> Result<()> {
        if self.is_connected() {
            return Err(LinkError::AlreadyConnected.into());
        }

        let link = Arc::new(SerialLink::open(params).await?);
        self.inbox.clear();
        self.start_reader(link.clone())?;
        *self.link.write() = Some(link);
        Ok(())
    }

    /// Attach an already-open link (tests, diagnostics) and start the
    /// reader loop.
    pub fn attach(&self, link: SerialLink) -> Result<()> {
        if self.is_connected() {
            return Err(LinkError::AlreadyConnected.into());
        }
        let link = Arc::new(link);
        self.inbox.clear();
        self.start_reader(link.clone())?;
        *self.link.write() = Some(link);
        Ok(())
    }

    /// Tear the session down in the fixed order: signal the reader loop,
    /// stop and join the pacer, join the reader, then close the transport.
    /// Idempotent; a controller with no session does nothing.
    pub async fn disconnect(&self) {
        let reader = self.reader.lock().take();
        if let Some(task) = reader.as_ref() {
            task.signal.shutdown();
        }

        self.stop_pacer().await;

        if let Some(TaskHandle { handle, .. }) = reader {
            let _ = handle.await;
        }

        let link = self.link.write().take();
        if let Some(link) = link {
            link.close();
        }
    }

    /// Send one command line through the send gate with the default deadline
    pub async fn send(&self, command: &str) -> Result<()> {
        self.send_with_deadline(command, SEND_DEADLINE).await
    }

    /// Send one command line through the send gate.
    ///
    /// A controller with no open session drops the command silently; the
    /// console still shows nothing was written.
    pub async fn send_with_deadline(&self, command: &str, deadline: Duration) -> Result<()> {
        let link = self.link.read().clone();
        let Some(link) = link else {
            tracing::debug!(command, "send dropped, not connected");
            return Ok(());
        };
        gated_send_deadline(&link, &self.gate, &self.listeners, command, deadline).await
    }

    /// Block for the next inbound line, up to `timeout`.
    ///
    /// Consumes at most one line; `None` on deadline expiry or a race lost
    /// to a concurrent waiter.
    pub async fn wait_for_line(&self, timeout: Duration) -> Option<String> {
        self.inbox.wait_for_line(timeout).await
    }

    /// Send a command, then block for the next inbound line.
    ///
    /// The protocol has no one-to-one command/response framing; the line
    /// returned is whatever arrives next. No line within `timeout` is a
    /// [`LinkError::Timeout`].
    pub async fn send_and_await(&self, command: &str, timeout: Duration) -> Result<String> {
        self.send(command).await?;
        self.wait_for_line(timeout).await.ok_or_else(|| {
            LinkError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }
            .into()
        })
    }

    /// Adjust the feed rate by `steps` fixed increments, clamped to the
    /// configured range. Allowed while idle or pacing; a running pacer picks
    /// the new feed up on its next stroke. Returns the new feed.
    pub fn adjust_feed(&self, steps: i32) -> f64 {
        let mut feed = self.feed.write();
        *feed = (*feed + f64::from(steps) * self.pacer_config.feed_step)
            .clamp(self.pacer_config.feed_min, self.pacer_config.feed_max);
        *feed
    }

    /// Start the jog pacer.
    ///
    /// Rejected while already running or with no open session. Issues the
    /// setup sequence through the send gate, then spawns the pacing loop.
    pub async fn start_pacer(&self) -> Result<()> {
        let link = self
            .link
            .read()
            .clone()
            .filter(|l| l.is_open())
            .ok_or(PacerError::NotConnected)?;

        if self.is_pacing() {
            return Err(PacerError::AlreadyRunning.into());
        }

        for command in pacer::SETUP_COMMANDS {
            gated_send(&link, &self.gate, &self.listeners, command).await?;
        }

        let (signal, token) = shutdown_pair();
        let ctx = PacerContext {
            link,
            gate: self.gate.clone(),
            listeners: self.listeners.clone(),
            distance_mm: self.pacer_config.distance_mm,
            feed: self.feed.clone(),
        };
        let handle = tokio::spawn(pacer::run_pacer_loop(ctx, token));
        *self.pacer_task.lock() = Some(TaskHandle { signal, handle });
        Ok(())
    }

    /// Stop the jog pacer.
    ///
    /// Signals shutdown and joins the loop task to completion before
    /// anything else happens; then, only if the session is still open,
    /// best-effort returns the board to absolute positioning. Idempotent.
    pub async fn stop_pacer(&self) {
        let task = self.pacer_task.lock().take();
        let Some(TaskHandle { signal, handle }) = task else {
            return;
        };

        signal.shutdown();
        let _ = handle.await;

        let link = self.link.read().clone();
        if let Some(link) = link {
            if link.is_open() {
                // Failure here is swallowed; the board may already be gone.
                let _ = gated_send(&link, &self.gate, &self.listeners, pacer::RESTORE_ABSOLUTE).await;
            }
        }
    }

    /// Register a console listener
    pub fn register_listener(&self, listener: Arc<dyn ConsoleListener>) -> ConsoleListenerHandle {
        self.listeners.add(listener)
    }

    /// Unregister a console listener
    pub fn unregister_listener(&self, handle: &ConsoleListenerHandle) {
        self.listeners.remove(handle);
    }

    /// Number of registered console listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.count()
    }

    /// Currently open link, if any. Diagnostic access for probes that need
    /// the raw-byte operations.
    pub fn link(&self) -> Option<Arc<SerialLink>> {
        self.link.read().clone()
    }

    fn start_reader(&self, link: Arc<SerialLink>) -> Result<()> {
        let mut guard = self.reader.lock();
        if guard.as_ref().is_some_and(|t| t.is_live()) {
            return Err(Error::other("reader loop already running"));
        }

        let (signal, token) = shutdown_pair();
        let inbox = self.inbox.clone();
        let listeners = self.listeners.clone();
        let handle = tokio::spawn(run_reader_loop(link, inbox, listeners, token));
        *guard = Some(TaskHandle { signal, handle });
        Ok(())
    }
}

impl Default for DeviceController {
    fn default() -> Self {
        Self::new(PacerConfig::default())
    }
}

/// The background reader loop: pull lines off the link and publish them.
///
/// Soft timeouts keep it listening; blank lines are suppressed before
/// publication; an oversized frame is reported and skipped; cancellation and
/// a closed link end the loop cleanly; anything else is reported to the
/// console and ends the loop without taking the process down.
async fn run_reader_loop(
    link: Arc<SerialLink>,
    inbox: Arc<Inbox>,
    listeners: ListenerSet,
    token: jogkit_core::ShutdownToken,
) {
    loop {
        if token.is_shutdown() {
            break;
        }

        match link.read_line(READ_SLICE, &token).await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                listeners.notify_received(&line);
                inbox.push(line);
            }
            Ok(None) => {} // soft timeout, keep listening
            Err(e) if e.is_cancelled() || e.is_not_connected() => break,
            Err(Error::Link(LinkError::FrameTooLong { .. })) => {
                listeners.notify_fault("dropped oversized line with no terminator");
            }
            Err(e) => {
                listeners.notify_fault(&format!("reader loop stopped: {e}"));
                tracing::warn!("reader loop stopped: {e}");
                break;
            }
        }
    }

    tracing::debug!("reader loop stopped");
}
