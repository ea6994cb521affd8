pub mod doctor;
pub mod ws;

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rover_proto::{Command, ConnectionState};
use serde::Deserialize;
use tokio::sync::{watch, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub use ws::WsConnector;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub url: String,
    pub reconnect_backoff_ms: u64,
    pub connect_timeout_ms: u64,
    /// Liveness check period while connected.
    pub keepalive_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            url: "ws://192.168.4.1:1606".into(),
            reconnect_backoff_ms: 2000,
            connect_timeout_ms: 5000,
            keepalive_ms: 100,
        }
    }
}

impl LinkConfig {
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_millis(self.keepalive_ms.max(1))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("send failed: {0}")]
    Send(String),
    #[error("connection closed")]
    Closed,
}

/// One established connection to the robot controller.
#[async_trait]
pub trait Session: Send {
    async fn send_text(&mut self, text: &str) -> Result<(), LinkError>;

    /// Non-blocking liveness check. Inbound traffic is consumed and ignored.
    fn poll_open(&mut self) -> bool;
}

#[async_trait]
pub trait Connector: Send {
    async fn connect(&mut self) -> Result<Box<dyn Session>, LinkError>;
}

#[derive(Debug, Default)]
struct Counters {
    sent: AtomicU64,
    dropped: AtomicU64,
    superseded: AtomicU64,
    connect_attempts: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub sent: u64,
    /// Not delivered: channel not connected or transmit failed.
    pub dropped: u64,
    /// Replaced by a newer command before it could be transmitted.
    pub superseded: u64,
    pub connect_attempts: u64,
}

/// Single pending command shared by every handle and the link task. A new
/// command always replaces the one waiting; nothing is ever refused.
#[derive(Debug, Default)]
struct Outbox {
    pending: Mutex<Option<Command>>,
    closed: AtomicBool,
    ready: Notify,
}

impl Outbox {
    fn put(&self, cmd: Command) -> Option<Command> {
        let replaced = self.slot().replace(cmd);
        self.ready.notify_one();
        replaced
    }

    fn take(&self) -> Option<Command> {
        self.slot().take()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Command>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits for a pending command. `None` once every handle is gone.
    async fn next(&self) -> Option<Command> {
        loop {
            if let Some(cmd) = self.take() {
                return Some(cmd);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.ready.notified().await;
        }
    }
}

/// Owned by the handles; the last one dropped closes the outbox.
#[derive(Debug)]
struct Sender(Arc<Outbox>);

impl Drop for Sender {
    fn drop(&mut self) {
        self.0.closed.store(true, Ordering::Release);
        self.0.ready.notify_one();
    }
}

/// Cloneable front end of the command channel. Safe to use from any thread;
/// nothing here ever waits on the network.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    outbox: Arc<Sender>,
    state: watch::Receiver<ConnectionState>,
    counters: Arc<Counters>,
}

impl LinkHandle {
    /// Best-effort, fire-and-forget. Without a live connection the command
    /// is dropped. Otherwise it replaces any command still waiting to go out.
    pub fn send(&self, cmd: Command) {
        if !self.state().is_connected() {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("link: not connected, dropping {}", cmd);
            return;
        }
        if let Some(old) = self.outbox.0.put(cmd) {
            self.counters.superseded.fetch_add(1, Ordering::Relaxed);
            debug!("link: {} superseded by {}", old, cmd);
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn stats(&self) -> LinkStats {
        LinkStats {
            sent: self.counters.sent.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            superseded: self.counters.superseded.load(Ordering::Relaxed),
            connect_attempts: self.counters.connect_attempts.load(Ordering::Relaxed),
        }
    }
}

/// The task that exclusively owns the robot connection. Commands arrive
/// through the outbox shared with the paired [`LinkHandle`]s.
pub struct CommandLink<C> {
    connector: C,
    cfg: LinkConfig,
    outbox: Arc<Outbox>,
    state: watch::Sender<ConnectionState>,
    counters: Arc<Counters>,
}

pub fn command_link<C: Connector>(connector: C, cfg: LinkConfig) -> (CommandLink<C>, LinkHandle) {
    let outbox = Arc::new(Outbox::default());
    let (state, state_rx) = watch::channel(ConnectionState::Connecting);
    let counters = Arc::new(Counters::default());
    let handle = LinkHandle {
        outbox: Arc::new(Sender(outbox.clone())),
        state: state_rx,
        counters: counters.clone(),
    };
    (CommandLink { connector, cfg, outbox, state, counters }, handle)
}

enum ServeEnd {
    Lost,
    HandlesDropped,
}

impl<C: Connector> CommandLink<C> {
    /// Connect, serve until the connection drops, back off, repeat. Never
    /// gives up; returns only once every [`LinkHandle`] has been dropped.
    pub async fn connect_and_serve(mut self) {
        loop {
            self.publish(ConnectionState::Connecting);
            let attempt = self.counters.connect_attempts.fetch_add(1, Ordering::Relaxed) + 1;

            let timeout = self.cfg.connect_timeout();
            let connect = tokio::time::timeout(timeout, self.connector.connect());
            let Some(result) = drop_commands_until(&self.outbox, &self.counters, connect).await else {
                break;
            };

            match result {
                Ok(Ok(mut session)) => {
                    info!("link: connected to {} (attempt {})", self.cfg.url, attempt);
                    self.publish(ConnectionState::Connected);
                    if let ServeEnd::HandlesDropped = self.serve(session.as_mut()).await {
                        break;
                    }
                    warn!("link: connection to {} lost", self.cfg.url);
                }
                Ok(Err(e)) => warn!("link: {} (attempt {})", e, attempt),
                Err(_) => warn!("link: {} (attempt {})", LinkError::ConnectTimeout(timeout), attempt),
            }

            self.publish(ConnectionState::Reconnecting);
            let backoff = tokio::time::sleep(self.cfg.reconnect_backoff());
            if drop_commands_until(&self.outbox, &self.counters, backoff).await.is_none() {
                break;
            }
        }
        info!("link: all handles dropped, stopping");
    }

    async fn serve(&mut self, session: &mut dyn Session) -> ServeEnd {
        let mut tick = tokio::time::interval(self.cfg.keepalive());
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                cmd = self.outbox.next() => {
                    let Some(cmd) = cmd else { return ServeEnd::HandlesDropped; };
                    // Anything sent while this write is in flight lands in the
                    // outbox and replaces its predecessor.
                    match session.send_text(cmd.token()).await {
                        Ok(()) => {
                            self.counters.sent.fetch_add(1, Ordering::Relaxed);
                            debug!("link: sent {}", cmd);
                        }
                        Err(e) => {
                            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                            warn!("link: {} dropped: {}", cmd, e);
                            if !session.poll_open() {
                                return ServeEnd::Lost;
                            }
                        }
                    }
                }
                _ = tick.tick() => {
                    if !session.poll_open() {
                        return ServeEnd::Lost;
                    }
                }
            }
        }
    }

    fn publish(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }
}

/// Runs `fut` while discarding whatever reaches the outbox: commands are
/// only ever transmitted on a live connection. `None` once all handles are gone.
async fn drop_commands_until<F: Future>(outbox: &Outbox, counters: &Counters, fut: F) -> Option<F::Output> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            out = &mut fut => return Some(out),
            cmd = outbox.next() => match cmd {
                Some(cmd) => {
                    counters.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!("link: not connected, dropping {}", cmd);
                }
                None => return None,
            },
        }
    }
}
