//! Connection handles
//!
//! A handle is the pool's view of one live session. The session itself is
//! driven by a slot task; the handle talks to it over two channels: one for
//! outbound frames and a one-shot close request.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

use super::lock_or_recover;
use crate::connector::CloseReason;
use crate::transport::{wire, Frame, Outbound, WireVariant};
use crate::types::{GatehouseError, Result};

/// Buffered outbound frames per handle
const OUTBOUND_BUFFER: usize = 64;

/// Monotonically assigned handle identifier, unique within a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A frame waiting to be written, with the writer's acknowledgement
pub type OutboundRequest = (Frame, oneshot::Sender<Result<()>>);

/// Receiving ends owned by the slot task
pub struct HandleChannels {
    pub outbound: mpsc::Receiver<OutboundRequest>,
    pub close: oneshot::Receiver<CloseReason>,
}

/// One live session in a pool
pub struct ConnectionHandle {
    id: HandleId,
    variant: WireVariant,
    delete_requested: AtomicBool,
    outbound: mpsc::Sender<OutboundRequest>,
    close_tx: Mutex<Option<oneshot::Sender<CloseReason>>>,
    missed_pings: AtomicU32,
    connected_at: DateTime<Utc>,
    last_alive: Mutex<Option<DateTime<Utc>>>,
}

impl ConnectionHandle {
    /// Create a handle and the channels its slot task reads from
    pub fn new(id: HandleId, variant: WireVariant) -> (Arc<Self>, HandleChannels) {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let (close_tx, close_rx) = oneshot::channel();

        let handle = Arc::new(Self {
            id,
            variant,
            delete_requested: AtomicBool::new(false),
            outbound: outbound_tx,
            close_tx: Mutex::new(Some(close_tx)),
            missed_pings: AtomicU32::new(0),
            connected_at: Utc::now(),
            last_alive: Mutex::new(None),
        });

        (
            handle,
            HandleChannels {
                outbound: outbound_rx,
                close: close_rx,
            },
        )
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn variant(&self) -> WireVariant {
        self.variant
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Whether we asked for this handle to go away
    pub fn is_delete_requested(&self) -> bool {
        self.delete_requested.load(Ordering::SeqCst)
    }

    /// Flag the handle as deleted on purpose
    pub fn mark_delete_requested(&self) {
        self.delete_requested.store(true, Ordering::SeqCst);
    }

    /// Whether the slot task has gone away
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }

    /// Ask the slot task to close the session
    ///
    /// The delete flag is set before the request is delivered so the slot's
    /// close event can never be mistaken for a peer failure. Returns false if
    /// a close was already requested.
    pub fn request_close(&self, reason: CloseReason) -> bool {
        if reason.is_administrative() {
            self.mark_delete_requested();
        }
        match lock_or_recover(&self.close_tx).take() {
            // The slot task may already be gone; that is fine.
            Some(tx) => {
                let _ = tx.send(reason);
                true
            }
            None => false,
        }
    }

    /// Write a payload to the peer and wait for the write to complete
    ///
    /// Fails with `ConnectionClosed` when the session stopped taking writes
    /// before this frame was queued.
    pub async fn send(&self, data: Outbound) -> Result<()> {
        let frame = wire::encode_outbound(self.variant, data)?;
        let (ack_tx, ack_rx) = oneshot::channel();

        self.outbound
            .send((frame, ack_tx))
            .await
            .map_err(|_| GatehouseError::ConnectionClosed(self.id.to_string()))?;

        ack_rx.await.map_err(|_| {
            GatehouseError::Transport(format!("connection {} closed before the write", self.id))
        })?
    }

    /// Count one unanswered ping, returning the new total
    pub fn record_missed_ping(&self) -> u32 {
        self.missed_pings.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn missed_pings(&self) -> u32 {
        self.missed_pings.load(Ordering::SeqCst)
    }

    /// The peer proved it is alive
    pub fn note_alive(&self) {
        self.missed_pings.store(0, Ordering::SeqCst);
        *lock_or_recover(&self.last_alive) = Some(Utc::now());
    }

    pub fn last_alive(&self) -> Option<DateTime<Utc>> {
        *lock_or_recover(&self.last_alive)
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("variant", &self.variant)
            .field("delete_requested", &self.is_delete_requested())
            .field("missed_pings", &self.missed_pings())
            .finish()
    }
}
