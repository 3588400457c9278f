//! Pooled outgoing connector
//!
//! Keeps a pool of WebSocket sessions to one peer at its configured size.
//! Every session is driven by its own slot task, which owns the socket and
//! reports exactly one close event when it ends. What happens next depends
//! only on the close reason: administrative closes end quietly, anything else
//! reaches the on-close service and, with auto-reconnect, one new connect
//! attempt after the reconnect delay.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::callbacks::{invoke_contained, CallbackContext, CallbackInvoker, LoggingInvoker};
use super::close::CloseReason;
use super::config::{ConnectorConfig, ConnectorSettings};
use super::slot::{Slot, SlotState};
use crate::pool::{
    lock_or_recover, ConnectionHandle, ConnectionPool, GrowOutcome, HandleChannels, HandleId,
    OutboundRequest, PoolStats, Removal,
};
use crate::transport::{
    wire, CloseFrame, Dialer, Frame, FrameSink, Inbound, Outbound, Session, WsDialer,
};
use crate::types::{GatehouseError, Result};

/// Default bound on a single callback invocation
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound on the closing handshake with a peer
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Collaborators shared by every connector in a process
#[derive(Clone)]
pub struct ConnectorRuntime {
    pub dialer: Arc<dyn Dialer>,
    pub invoker: Arc<dyn CallbackInvoker>,
    pub callback_timeout: Duration,
}

impl ConnectorRuntime {
    pub fn new(dialer: Arc<dyn Dialer>, invoker: Arc<dyn CallbackInvoker>) -> Self {
        Self {
            dialer,
            invoker,
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
        }
    }

    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }
}

impl Default for ConnectorRuntime {
    fn default() -> Self {
        Self::new(Arc::new(WsDialer::default()), Arc::new(LoggingInvoker))
    }
}

/// Connector status as reported by the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ConnectorStatus {
    pub id: u64,
    pub name: String,
    pub address: String,
    pub group: Option<String>,
    pub pool: PoolStats,
    pub grow_attempts: u64,
    pub reconnects: u64,
    pub last_alive: Option<DateTime<Utc>>,
}

/// A pool of sessions to one peer
pub struct PooledConnector {
    config: ConnectorConfig,
    settings: ConnectorSettings,
    pool: Arc<ConnectionPool>,
    runtime: ConnectorRuntime,
    grow_attempts: AtomicU64,
    reconnects: AtomicU64,
    last_alive: Mutex<Option<DateTime<Utc>>>,
}

impl PooledConnector {
    /// Create a connector; nothing is dialed until [`start`](Self::start)
    pub fn new(config: ConnectorConfig, runtime: ConnectorRuntime) -> Arc<Self> {
        let settings = config.resolved();
        let pool = ConnectionPool::new(
            config.name.clone(),
            config.pool_size,
            config.has_auto_reconnect,
        );

        Arc::new(Self {
            config,
            settings,
            pool,
            runtime,
            grow_attempts: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            last_alive: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn id(&self) -> u64 {
        self.config.id
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Fill the pool up to its target size
    pub fn start(self: &Arc<Self>) {
        info!(
            connector = %self.config.name,
            address = %self.config.address,
            size = self.config.pool_size,
            "Starting outgoing connector"
        );
        for _ in 0..self.config.pool_size {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.connect_slot().await });
        }
    }

    /// One growth attempt
    ///
    /// On admission the slot task is spawned; the caller decides what to do
    /// with a failure.
    pub async fn grow(self: &Arc<Self>) -> GrowOutcome<()> {
        self.grow_attempts.fetch_add(1, Ordering::SeqCst);

        let dialer = Arc::clone(&self.runtime.dialer);
        let config = &self.config;

        let outcome = self
            .pool
            .grow(|id| async move {
                debug!(connector = %config.name, handle = %id, "Connecting");
                let (handle, channels) = ConnectionHandle::new(id, config.wire);
                let mut session = dialer.dial(config).await?;

                let hello = wire::handshake(
                    config.wire,
                    &config.name,
                    config.username.as_deref(),
                    config.secret.as_deref(),
                )?;
                if let Some(frame) = hello {
                    session.sink.send(frame).await?;
                }

                Ok((Arc::clone(&handle), (handle, channels, session)))
            })
            .await;

        match outcome {
            GrowOutcome::Admitted(id, (handle, channels, session)) => {
                info!(connector = %self.config.name, handle = %id, "Connected");
                let this = Arc::clone(self);
                tokio::spawn(async move { this.run_slot(handle, channels, session).await });
                GrowOutcome::Admitted(id, ())
            }
            GrowOutcome::Discarded((_, _, mut session)) => {
                tokio::spawn(async move {
                    let _ = tokio::time::timeout(CLOSE_TIMEOUT, session.sink.close()).await;
                });
                GrowOutcome::Discarded(())
            }
            GrowOutcome::Skipped => GrowOutcome::Skipped,
            GrowOutcome::Failed(id, e) => GrowOutcome::Failed(id, e),
        }
    }

    async fn connect_slot(self: Arc<Self>) {
        if let GrowOutcome::Failed(id, e) = self.grow().await {
            if self.pool.is_draining() {
                debug!(
                    connector = %self.config.name,
                    handle = %id,
                    "Connector deleted while connecting: {}",
                    e
                );
                return;
            }
            warn!(connector = %self.config.name, handle = %id, "Could not connect: {}", e);
            self.after_failure(id, CloseReason::ConnectFailed(e.to_string()), true)
                .await;
        }
    }

    /// Exactly one connect attempt after the reconnect delay
    fn schedule_reconnect(self: &Arc<Self>) {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        let delay = self.settings.reconnect_delay;
        debug!(connector = %self.config.name, ?delay, "Scheduling reconnect");

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if this.pool.is_draining() {
                debug!(connector = %this.config.name, "Connector deleted, dropping reconnect");
                return;
            }
            this.connect_slot().await;
        });
    }

    /// Drive one admitted session until it closes
    async fn run_slot(
        self: Arc<Self>,
        handle: Arc<ConnectionHandle>,
        channels: HandleChannels,
        session: Session,
    ) {
        let id = handle.id();
        let mut slot = Slot::new();
        slot.advance(SlotState::Connecting);
        slot.advance(SlotState::Connected);

        let HandleChannels {
            mut outbound,
            mut close,
        } = channels;
        let Session {
            mut sink,
            mut stream,
        } = session;

        if let Some(service) = &self.config.on_connect_service {
            let ctx = CallbackContext::Connected {
                connector: self.config.name.clone(),
                handle: id.0,
            };
            self.invoke(service, &ctx).await;
        }

        let interval = self.settings.ping_interval;
        let mut ping = tokio::time::interval_at(Instant::now() + interval, interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let reason = loop {
            tokio::select! {
                requested = &mut close => {
                    // The handle itself is gone; nobody else can ask anymore.
                    break requested.unwrap_or(CloseReason::AdministrativeDelete);
                }
                Some((frame, ack)) = outbound.recv() => {
                    let result = sink.send(frame).await;
                    let failure = result.as_ref().err().map(ToString::to_string);
                    let _ = ack.send(result);
                    if let Some(e) = failure {
                        break CloseReason::TransportError(e);
                    }
                }
                frame = stream.next_frame() => match frame {
                    Some(Ok(Frame::Pong(_))) => handle.note_alive(),
                    Some(Ok(Frame::Ping(data))) => {
                        handle.note_alive();
                        if let Err(e) = sink.send(Frame::Pong(data)).await {
                            break CloseReason::TransportError(e.to_string());
                        }
                    }
                    Some(Ok(Frame::Close(frame))) => {
                        let (code, reason) = match frame {
                            Some(f) => (Some(f.code), f.reason),
                            None => (None, String::new()),
                        };
                        break CloseReason::PeerClosed { code, reason };
                    }
                    Some(Ok(frame)) => {
                        handle.note_alive();
                        let inbound = wire::decode_inbound(
                            self.config.wire,
                            self.config.data_format,
                            frame,
                        );
                        if let Some(inbound) = inbound {
                            self.on_message(id, inbound).await;
                        }
                    }
                    Some(Err(GatehouseError::Protocol(e))) => break CloseReason::ProtocolError(e),
                    Some(Err(e)) => break CloseReason::TransportError(e.to_string()),
                    None => break CloseReason::TransportError("connection reset".into()),
                },
                _ = ping.tick() => {
                    let outstanding = handle.record_missed_ping();
                    if outstanding > self.settings.pings_missed_threshold {
                        warn!(
                            connector = %self.config.name,
                            handle = %id,
                            missed = outstanding - 1,
                            "Peer stopped answering pings"
                        );
                        break CloseReason::LivenessTimeout;
                    }
                    if let Err(e) = sink.send(Frame::Ping(Vec::new())).await {
                        break CloseReason::TransportError(e.to_string());
                    }
                }
            }
        };

        slot.advance(SlotState::Closing);

        // A flagged handle was deleted on purpose whatever the socket said.
        let reason = if handle.is_delete_requested() {
            CloseReason::AdministrativeDelete
        } else {
            reason
        };

        // Leave the pool before the handshake; a closing session is never lent out.
        let removal = self.pool.remove(id, &reason);
        flush_outbound(id, &mut outbound, sink.as_mut(), &reason).await;

        if !matches!(reason, CloseReason::PeerClosed { .. }) {
            let goodbye = Frame::Close(Some(CloseFrame {
                code: reason.close_code(),
                reason: reason.to_string(),
            }));
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.send(goodbye)).await;
        }
        let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;

        slot.advance(SlotState::after_close(&reason, self.config.has_auto_reconnect));

        self.on_closed(id, reason, removal).await;
    }

    /// Handle the single close event of a session
    async fn on_closed(self: &Arc<Self>, id: HandleId, reason: CloseReason, removal: Removal) {
        match removal {
            Removal::NotLive => {
                debug!(
                    connector = %self.config.name,
                    handle = %id,
                    reason = %reason,
                    "Close event for a connection already removed"
                );
            }
            Removal::Removed { replace } => {
                if reason.is_administrative() {
                    debug!(connector = %self.config.name, handle = %id, reason = %reason, "Closed");
                    return;
                }
                info!(
                    connector = %self.config.name,
                    handle = %id,
                    reason = %reason,
                    "Remote server closed connection"
                );
                self.after_failure(id, reason, replace).await;
            }
        }
    }

    async fn after_failure(self: &Arc<Self>, id: HandleId, reason: CloseReason, replace: bool) {
        if let Some(service) = &self.config.on_close_service {
            let code = match &reason {
                CloseReason::PeerClosed { code, .. } => *code,
                other => Some(other.close_code()),
            };
            let ctx = CallbackContext::Closed {
                connector: self.config.name.clone(),
                handle: id.0,
                code,
                reason: reason.to_string(),
            };
            self.invoke(service, &ctx).await;
        }

        if replace && self.config.has_auto_reconnect && !self.pool.is_draining() {
            self.schedule_reconnect();
        }
    }

    async fn on_message(&self, id: HandleId, inbound: Inbound) {
        let Some(service) = &self.config.on_message_service else {
            debug!(connector = %self.config.name, handle = %id, "No on-message service, dropping message");
            return;
        };
        let ctx = CallbackContext::Message {
            connector: self.config.name.clone(),
            handle: id.0,
            data: inbound.to_value(),
        };
        self.invoke(service, &ctx).await;
    }

    async fn invoke(&self, service: &str, ctx: &CallbackContext) {
        invoke_contained(
            self.runtime.invoker.as_ref(),
            service,
            ctx,
            self.runtime.callback_timeout,
        )
        .await;
    }

    /// Send one payload over any free connection
    ///
    /// `timeout` bounds the wait for a connection; zero means fail at once
    /// when none is idle. A connection that closes before taking the frame is
    /// skipped for another one within the same deadline.
    pub async fn send(&self, data: impl Into<Outbound>, timeout: Duration) -> Result<()> {
        let data = data.into();
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let conn = self.pool.acquire(remaining).await?;
            debug!(connector = %self.config.name, handle = %conn.id(), "Sending");

            match conn.send(data.clone()).await {
                Err(GatehouseError::ConnectionClosed(_)) => {
                    debug!(
                        connector = %self.config.name,
                        handle = %conn.id(),
                        "Connection closed before the write, retrying"
                    );
                }
                result => return result,
            }
        }
    }

    /// Delete one session without replacing it
    pub fn delete_handle(&self, id: HandleId) -> bool {
        let removed = matches!(
            self.pool.remove(id, &CloseReason::AdministrativeDelete),
            Removal::Removed { .. }
        );
        if removed {
            info!(connector = %self.config.name, handle = %id, "Connection deleted");
        }
        removed
    }

    /// Delete the connector: close every session and stop growing
    pub fn delete(&self) {
        let closed = self.pool.drain(CloseReason::AdministrativeDelete);
        info!(connector = %self.config.name, closed, "Connector deleted");
    }

    /// Record that the peer is alive, resetting missed-ping counters
    pub fn note_alive(&self) {
        for handle in self.pool.live_handles() {
            handle.note_alive();
        }
        *lock_or_recover(&self.last_alive) = Some(Utc::now());
    }

    pub fn status(&self) -> ConnectorStatus {
        ConnectorStatus {
            id: self.config.id,
            name: self.config.name.clone(),
            address: self.config.address.clone(),
            group: self.config.group.clone(),
            pool: self.pool.stats(),
            grow_attempts: self.grow_attempts.load(Ordering::SeqCst),
            reconnects: self.reconnects.load(Ordering::SeqCst),
            last_alive: *lock_or_recover(&self.last_alive),
        }
    }
}

/// Settle frames queued before the slot stopped taking writes
///
/// After an administrative close the socket is still usable, so queued frames
/// are written. Otherwise each sender is told the connection is closed.
async fn flush_outbound(
    id: HandleId,
    outbound: &mut mpsc::Receiver<OutboundRequest>,
    sink: &mut dyn FrameSink,
    reason: &CloseReason,
) {
    outbound.close();
    while let Some((frame, ack)) = outbound.recv().await {
        let result = if reason.is_administrative() {
            tokio::time::timeout(CLOSE_TIMEOUT, sink.send(frame))
                .await
                .unwrap_or_else(|_| {
                    Err(GatehouseError::Transport(format!(
                        "write on connection {} timed out while closing",
                        id
                    )))
                })
        } else {
            Err(GatehouseError::ConnectionClosed(id.to_string()))
        };
        let _ = ack.send(result);
    }
}

impl std::fmt::Debug for PooledConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnector")
            .field("name", &self.config.name)
            .field("pool", &self.pool.stats())
            .finish()
    }
}
