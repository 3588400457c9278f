//! Outgoing WebSocket transport
//!
//! A [`Dialer`] opens one [`Session`] per connection slot. The connector only
//! sees frames, so tests can swap in a scripted dialer without a network.

pub mod wire;
pub mod ws;

use async_trait::async_trait;

use crate::connector::ConnectorConfig;
use crate::types::Result;

pub use wire::{DataFormat, Inbound, Outbound, WireVariant};
pub use ws::WsDialer;

/// One WebSocket frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(Option<CloseFrame>),
}

/// Close code and reason sent by a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

/// Sending half of a session
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: Frame) -> Result<()>;

    /// Close the session from our side
    async fn close(&mut self) -> Result<()>;
}

/// Receiving half of a session
#[async_trait]
pub trait FrameStream: Send {
    /// Next frame, or `None` once the peer has gone away
    async fn next_frame(&mut self) -> Option<Result<Frame>>;
}

/// A connected session split into halves
pub struct Session {
    pub sink: Box<dyn FrameSink>,
    pub stream: Box<dyn FrameStream>,
}

/// Opens sessions to a connector's address
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, config: &ConnectorConfig) -> Result<Session>;
}
