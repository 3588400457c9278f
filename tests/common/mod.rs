//! Scripted in-memory peers for connector tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

use gatehouse::connector::{CallbackContext, CallbackInvoker, ConnectorConfig};
use gatehouse::transport::{CloseFrame, Dialer, Frame, FrameSink, FrameStream, Session};
use gatehouse::{GatehouseError, Result};

/// The far end of one dialed session
pub struct Peer {
    pub address: String,
    to_client: Option<mpsc::UnboundedSender<Result<Frame>>>,
    from_client: mpsc::UnboundedReceiver<Frame>,
}

impl Peer {
    /// Push a frame to the connector
    pub fn send(&self, frame: Frame) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(Ok(frame));
        }
    }

    /// Send a close frame
    pub fn close(&self, code: u16, reason: &str) {
        self.send(Frame::Close(Some(CloseFrame {
            code,
            reason: reason.to_string(),
        })));
    }

    /// Drop the connection without a closing handshake
    pub fn reset(&mut self) {
        self.to_client = None;
    }

    /// Next frame written by the connector, skipping pings
    pub async fn next_data(&mut self) -> Option<Frame> {
        loop {
            match self.from_client.recv().await? {
                Frame::Ping(_) => continue,
                frame => return Some(frame),
            }
        }
    }

    /// Next frame written by the connector
    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.from_client.recv().await
    }
}

struct PeerSink {
    tx: mpsc::UnboundedSender<Frame>,
    stall_close: bool,
}

#[async_trait]
impl FrameSink for PeerSink {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        if self.stall_close && matches!(frame, Frame::Close(_)) {
            futures::future::pending::<()>().await;
        }
        self.tx
            .send(frame)
            .map_err(|_| GatehouseError::Transport("peer is gone".into()))
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

struct PeerStream {
    rx: mpsc::UnboundedReceiver<Result<Frame>>,
}

#[async_trait]
impl FrameStream for PeerStream {
    async fn next_frame(&mut self) -> Option<Result<Frame>> {
        self.rx.recv().await
    }
}

/// Dialer handing every session's far end to the test
pub struct ScriptedDialer {
    dials: AtomicUsize,
    refuse: Mutex<VecDeque<bool>>,
    gate: Mutex<Option<Arc<Notify>>>,
    stall_close: AtomicBool,
    peers: mpsc::UnboundedSender<Peer>,
}

impl ScriptedDialer {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Peer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dialer = Arc::new(Self {
            dials: AtomicUsize::new(0),
            refuse: Mutex::new(VecDeque::new()),
            gate: Mutex::new(None),
            stall_close: AtomicBool::new(false),
            peers: tx,
        });
        (dialer, rx)
    }

    /// Refuse the next `n` dials
    pub fn refuse_next(&self, n: usize) {
        let mut refuse = self.refuse.lock().unwrap();
        for _ in 0..n {
            refuse.push_back(true);
        }
    }

    /// Park every following dial until the returned gate is notified
    pub fn hold_dials(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    /// Sessions dialed from now on never finish writing a close frame
    pub fn stall_goodbyes(&self) {
        self.stall_close.store(true, Ordering::SeqCst);
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for ScriptedDialer {
    async fn dial(&self, config: &ConnectorConfig) -> Result<Session> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.refuse.lock().unwrap().pop_front().unwrap_or(false) {
            return Err(GatehouseError::Transport("connection refused".into()));
        }

        let (to_client, client_rx) = mpsc::unbounded_channel();
        let (client_tx, from_client) = mpsc::unbounded_channel();
        let _ = self.peers.send(Peer {
            address: config.address.clone(),
            to_client: Some(to_client),
            from_client,
        });

        Ok(Session {
            sink: Box::new(PeerSink {
                tx: client_tx,
                stall_close: self.stall_close.load(Ordering::SeqCst),
            }),
            stream: Box::new(PeerStream { rx: client_rx }),
        })
    }
}

/// Invoker remembering every callback
#[derive(Default)]
pub struct RecordingInvoker {
    calls: Mutex<Vec<(String, CallbackContext)>>,
}

impl RecordingInvoker {
    pub fn calls(&self) -> Vec<(String, CallbackContext)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, service: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(s, _)| s == service).count()
    }
}

#[async_trait]
impl CallbackInvoker for RecordingInvoker {
    async fn invoke(&self, service: &str, context: &CallbackContext) -> Result<()> {
        self.calls.lock().unwrap().push((service.to_string(), context.clone()));
        Ok(())
    }
}

/// Connector config for scripted peers, with pings out of the way
pub fn scripted_config(id: u64, name: &str) -> ConnectorConfig {
    let mut config = ConnectorConfig::new(id, name, format!("ws://peer.test/{}", name));
    config.ping_interval_secs = Some(3600);
    config.on_connect_service = Some("on.connect".into());
    config.on_message_service = Some("on.message".into());
    config.on_close_service = Some("on.close".into());
    config
}

/// Poll until `check` holds, panicking after `limit` of virtual time
pub async fn eventually<F>(limit: Duration, mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while !check() {
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not reached within {:?}", limit);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
