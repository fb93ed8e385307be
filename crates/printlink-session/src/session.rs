//! Per-device connection state machine.
//!
//! ```text
//! idle ──connect()──▶ connecting ──open──▶ open ──close()──▶ closing ──▶ closed
//!                        │   └──close()──▶ closing            │
//!                        └──error/close──▶ closed ◀───────────┘
//!                                            ▲  timeout, error, peer close
//!                                            └──────── open
//! ```
//!
//! `closed` is terminal. A new [`Session`] is needed to try again.
//!
//! All transport events for one session are handled by a single task, so
//! frames reach the hub in the order they were received. The heartbeat
//! monitor and keepalive timers live inside that task and die with it.

use crate::error::SessionError;
use crate::liveness::Liveness;
use printlink_core::event::unix_millis;
use printlink_core::{ConnectionConfig, ConnectionId, DeviceChannel, EventHub, Topic};
use printlink_protocol::{codec, frames, FrameCategory};
use printlink_transport::{Connection, Endpoint, Transport};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// How long [`Session::shutdown`] waits for a graceful close.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Created, no connection attempted.
    Idle,
    /// Transport is opening.
    Connecting,
    /// Transport is open.
    Open,
    /// Close requested, transport shutting down.
    Closing,
    /// Terminal.
    Closed,
}

impl SessionState {
    /// Lowercase state name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session timing configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// How often the heartbeat monitor runs.
    pub check_interval: Duration,
    /// Silence after which an open session is declared dead.
    pub timeout: Duration,
    /// Interval of outbound keepalive frames, `None` to disable.
    pub keepalive_interval: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(45),
            keepalive_interval: Some(Duration::from_secs(30)),
        }
    }
}

enum Command {
    Send(String),
    Close,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Status announcements waiting to be published, in transition order.
///
/// Transitions race between caller threads and the session task. Each one is
/// queued under the lock that changes the state and only one thread drains
/// the queue at a time, so listeners always see the states in the order they
/// were entered. A transition made from inside a status listener is published
/// by the outer drainer after that listener returns.
#[derive(Default)]
struct StatusQueue {
    pending: Mutex<VecDeque<SessionState>>,
    draining: AtomicBool,
}

/// State shared between the session handle and its task.
struct Shared {
    id: ConnectionId,
    hub: Arc<EventHub>,
    state: watch::Sender<SessionState>,
    status: StatusQueue,
    /// Unix millis of the open or the last inbound frame, 0 before open.
    last_heartbeat_ms: AtomicU64,
}

impl Shared {
    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Move to `to` if the current state is in `from`, then announce it.
    fn transition(&self, from: &[SessionState], to: SessionState) -> bool {
        let mut previous = to;
        let changed = {
            let mut pending = lock(&self.status.pending);
            let changed = self.state.send_if_modified(|state| {
                if from.contains(state) {
                    previous = *state;
                    *state = to;
                    true
                } else {
                    false
                }
            });
            if changed {
                pending.push_back(to);
            }
            changed
        };

        if changed {
            debug!(connection = %self.id, from = %previous, to = %to, "Session transition");
            self.announce();
        }
        changed
    }

    /// Publish queued status changes unless another thread already is.
    fn announce(&self) {
        loop {
            if self.status.draining.swap(true, Ordering::SeqCst) {
                return;
            }
            loop {
                let next = lock(&self.status.pending).pop_front();
                let Some(state) = next else { break };
                self.publish(DeviceChannel::Status, json!({ "id": self.id, "state": state }));
            }
            self.status.draining.store(false, Ordering::SeqCst);

            // A transition may have queued after the last pop but seen the
            // drain flag still set
            if lock(&self.status.pending).is_empty() {
                return;
            }
        }
    }

    /// Move to `closed` from wherever the session is.
    fn close_out(&self) -> bool {
        self.transition(
            &[
                SessionState::Idle,
                SessionState::Connecting,
                SessionState::Open,
                SessionState::Closing,
            ],
            SessionState::Closed,
        )
    }

    fn publish(&self, channel: DeviceChannel, payload: Value) {
        self.hub.publish(&Topic::device(&self.id, channel), payload);
    }

    /// Report a transport failure and close.
    fn fail(&self, reason: String) {
        warn!(connection = %self.id, reason = %reason, "Session failed");
        self.publish(DeviceChannel::Error, json!({ "id": self.id, "reason": reason }));
        self.close_out();
    }
}

/// Handle to the running task.
struct Driver {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

/// A single device connection attempt.
pub struct Session {
    shared: Arc<Shared>,
    endpoint: Endpoint,
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    driver: Mutex<Option<Driver>>,
}

impl Session {
    /// Create an idle session for a connection config.
    #[must_use]
    pub fn new(
        connection: &ConnectionConfig,
        hub: Arc<EventHub>,
        transport: Arc<dyn Transport>,
        config: SessionConfig,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            shared: Arc::new(Shared {
                id: connection.id.clone(),
                hub,
                state,
                status: StatusQueue::default(),
                last_heartbeat_ms: AtomicU64::new(0),
            }),
            endpoint: Endpoint::new(connection.host.clone(), connection.control_port),
            transport,
            config,
            driver: Mutex::new(None),
        }
    }

    /// Connection ID.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.shared.id
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Subscribe to state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Unix millis of the last liveness signal: the open or the latest frame.
    #[must_use]
    pub fn last_heartbeat_at(&self) -> Option<u64> {
        match self.shared.last_heartbeat_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms),
        }
    }

    /// Start connecting. Must be called from within a tokio runtime.
    ///
    /// Returns as soon as the session is `connecting`; watch the state to
    /// learn when it opens.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless the session is `idle`.
    pub fn connect(&self) -> Result<(), SessionError> {
        if !self
            .shared
            .transition(&[SessionState::Idle], SessionState::Connecting)
        {
            return Err(SessionError::InvalidState {
                operation: "connect",
                state: self.state(),
            });
        }

        let (commands, rx) = mpsc::unbounded_channel();
        let task = SessionTask {
            shared: Arc::clone(&self.shared),
            transport: Arc::clone(&self.transport),
            endpoint: self.endpoint.clone(),
            config: self.config.clone(),
            commands: rx,
        };

        info!(
            connection = %self.shared.id,
            endpoint = %self.endpoint,
            transport = self.transport.name(),
            "Connecting"
        );
        let task = tokio::spawn(task.run());
        *lock(&self.driver) = Some(Driver { commands, task });
        Ok(())
    }

    /// Queue a payload for the device.
    ///
    /// Does not wait for the write; a failed write closes the session.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless the session is `open`, or a protocol
    /// error if the payload cannot be encoded.
    pub fn send(&self, payload: &Value) -> Result<(), SessionError> {
        let state = self.state();
        if state != SessionState::Open {
            return Err(SessionError::InvalidState {
                operation: "send",
                state,
            });
        }

        let text = codec::encode(payload)?;
        let driver = lock(&self.driver);
        let sent = driver
            .as_ref()
            .is_some_and(|d| d.commands.send(Command::Send(text)).is_ok());

        if !sent {
            return Err(SessionError::InvalidState {
                operation: "send",
                state: self.state(),
            });
        }
        Ok(())
    }

    /// Request a graceful close. Idempotent.
    pub fn close(&self) {
        if self.shared.transition(&[SessionState::Idle], SessionState::Closed) {
            return;
        }

        if !self.shared.transition(
            &[SessionState::Connecting, SessionState::Open],
            SessionState::Closing,
        ) {
            return;
        }

        let delivered = lock(&self.driver)
            .as_ref()
            .is_some_and(|d| d.commands.send(Command::Close).is_ok());
        if !delivered {
            // Task already gone
            self.shared.close_out();
        }
    }

    /// Close gracefully, then destroy.
    ///
    /// Waits a short grace period for the transport to close before the
    /// task is cancelled.
    pub async fn shutdown(&self) {
        self.close();

        let mut state = self.watch_state();
        let closed = state.wait_for(|s| *s == SessionState::Closed);
        if tokio::time::timeout(CLOSE_GRACE, closed).await.is_err() {
            warn!(connection = %self.shared.id, "Graceful close timed out");
        }

        self.destroy();
    }

    /// Cancel the task, its timers and the transport. State becomes `closed`.
    pub fn destroy(&self) {
        let driver = lock(&self.driver).take();
        if let Some(driver) = driver {
            driver.task.abort();
            trace!(connection = %self.shared.id, "Session task aborted");
        }
        self.shared.close_out();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.shared.id)
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

/// The task that owns the transport connection.
struct SessionTask {
    shared: Arc<Shared>,
    transport: Arc<dyn Transport>,
    endpoint: Endpoint,
    config: SessionConfig,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl SessionTask {
    async fn run(mut self) {
        let opened = tokio::select! {
            biased;

            // Only a close (or a dropped handle) can arrive before open
            _ = self.commands.recv() => {
                debug!(connection = %self.shared.id, "Close requested while connecting");
                self.shared.close_out();
                return;
            }
            result = self.transport.open(&self.endpoint) => result,
        };

        let mut conn = match opened {
            Ok(conn) => conn,
            Err(e) => {
                self.shared.fail(format!("connect to {} failed: {}", self.endpoint, e));
                return;
            }
        };

        if !self
            .shared
            .transition(&[SessionState::Connecting], SessionState::Open)
        {
            // Closed while the open was completing
            let _ = conn.close().await;
            self.shared.close_out();
            return;
        }

        self.shared
            .last_heartbeat_ms
            .store(unix_millis(), Ordering::Relaxed);
        info!(connection = %self.shared.id, endpoint = %self.endpoint, "Session open");
        self.drive(conn.as_mut()).await;
    }

    /// Event loop for an open connection. Returns once the session is closed.
    async fn drive(&mut self, conn: &mut dyn Connection) {
        let mut liveness = Liveness::new(self.config.timeout);
        let mut check = every(self.config.check_interval);
        let mut keepalive = self.config.keepalive_interval.map(every);

        loop {
            tokio::select! {
                inbound = conn.recv() => match inbound {
                    Ok(Some(text)) => {
                        if let Err(reason) = self.handle_frame(&text, &mut liveness) {
                            let _ = conn.close().await;
                            self.shared.fail(reason);
                            return;
                        }
                    }
                    Ok(None) => {
                        self.shared.fail("connection closed by device".to_string());
                        return;
                    }
                    Err(e) => {
                        self.shared.fail(format!("transport error: {}", e));
                        return;
                    }
                },

                command = self.commands.recv() => match command {
                    Some(Command::Send(text)) => {
                        trace!(connection = %self.shared.id, bytes = text.len(), "Writing frame");
                        if let Err(e) = conn.send(text).await {
                            self.shared.fail(format!("write failed: {}", e));
                            return;
                        }
                    }
                    Some(Command::Close) | None => {
                        if let Err(e) = conn.close().await {
                            debug!(connection = %self.shared.id, error = %e, "Transport close failed");
                        }
                        self.shared.close_out();
                        info!(connection = %self.shared.id, "Session closed");
                        return;
                    }
                },

                _ = check.tick() => {
                    if liveness.is_expired() {
                        self.time_out(&liveness);
                        let _ = conn.close().await;
                        return;
                    }
                }

                _ = next_tick(&mut keepalive) => {
                    let frame = frames::keepalive(unix_millis());
                    match codec::encode(&frame) {
                        Ok(text) => {
                            if let Err(e) = conn.send(text).await {
                                self.shared.fail(format!("keepalive failed: {}", e));
                                return;
                            }
                        }
                        Err(e) => warn!(connection = %self.shared.id, error = %e, "Keepalive encode failed"),
                    }
                }
            }
        }
    }

    /// Record liveness and republish one inbound frame.
    fn handle_frame(&self, text: &str, liveness: &mut Liveness) -> Result<(), String> {
        liveness.touch();
        self.shared
            .last_heartbeat_ms
            .store(unix_millis(), Ordering::Relaxed);

        let frame = codec::decode(text).map_err(|e| format!("malformed frame: {}", e))?;
        let channel = match frame.category() {
            FrameCategory::Heartbeat => DeviceChannel::Heartbeat,
            FrameCategory::Telemetry => DeviceChannel::Telemetry,
        };

        trace!(connection = %self.shared.id, channel = %channel, "Inbound frame");
        self.shared.publish(channel, frame.into_payload());
        Ok(())
    }

    fn time_out(&self, liveness: &Liveness) {
        let silent = liveness.silent_for();
        warn!(
            connection = %self.shared.id,
            silent_ms = silent.as_millis() as u64,
            "Heartbeat timeout"
        );

        self.shared.publish(
            DeviceChannel::Timeout,
            json!({
                "id": self.shared.id,
                "silentMs": silent.as_millis() as u64,
                "timeoutMs": liveness.timeout().as_millis() as u64,
            }),
        );
        self.shared.close_out();
    }
}

/// An interval whose first tick is one period from now.
fn every(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
