//! tokio-tungstenite dialer

use async_trait::async_trait;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use std::time::Duration;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{
        http::Request,
        protocol::{frame::coding::CloseCode, CloseFrame as WsCloseFrame},
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::debug;

use super::{CloseFrame, Dialer, Frame, FrameSink, FrameStream, Session};
use crate::connector::ConnectorConfig;
use crate::types::{GatehouseError, Result};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Dials real WebSocket peers
#[derive(Debug, Clone)]
pub struct WsDialer {
    connect_timeout: Duration,
}

impl WsDialer {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsDialer {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl Dialer for WsDialer {
    async fn dial(&self, config: &ConnectorConfig) -> Result<Session> {
        let url = config.address.as_str();
        debug!(connector = %config.name, url = %url, "Connecting to WebSocket");

        let request = Request::builder()
            .uri(url)
            .header("Host", extract_host(url))
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            )
            .body(())
            .map_err(|e| GatehouseError::Transport(format!("Failed to build request: {}", e)))?;

        let (ws, _) = tokio::time::timeout(
            self.connect_timeout,
            connect_async_with_config(request, None, false),
        )
        .await
        .map_err(|_| GatehouseError::Transport(format!("Connect to {} timed out", url)))?
        .map_err(|e| GatehouseError::Transport(format!("WebSocket connect failed: {}", e)))?;

        let (sink, stream) = ws.split();
        debug!(connector = %config.name, url = %url, "WebSocket connected");

        Ok(Session {
            sink: Box::new(WsFrameSink(sink)),
            stream: Box::new(WsFrameStream(stream)),
        })
    }
}

struct WsFrameSink(WsSink);

#[async_trait]
impl FrameSink for WsFrameSink {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        self.0.send(to_message(frame)).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.0.close().await?;
        Ok(())
    }
}

struct WsFrameStream(WsStream);

#[async_trait]
impl FrameStream for WsFrameStream {
    async fn next_frame(&mut self) -> Option<Result<Frame>> {
        loop {
            match self.0.next().await? {
                Ok(Message::Frame(_)) => continue,
                Ok(message) => return Some(Ok(from_message(message))),
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(data) => Message::Binary(data),
        Frame::Ping(data) => Message::Ping(data),
        Frame::Pong(data) => Message::Pong(data),
        Frame::Close(close) => Message::Close(close.map(|c| WsCloseFrame {
            code: CloseCode::from(c.code),
            reason: c.reason.into(),
        })),
    }
}

fn from_message(message: Message) -> Frame {
    match message {
        Message::Text(text) => Frame::Text(text),
        Message::Binary(data) => Frame::Binary(data),
        Message::Ping(data) => Frame::Ping(data),
        Message::Pong(data) => Frame::Pong(data),
        Message::Close(close) => Frame::Close(close.map(|c| CloseFrame {
            code: c.code.into(),
            reason: c.reason.into_owned(),
        })),
        // Raw frames are filtered out by the reader.
        Message::Frame(_) => Frame::Binary(Vec::new()),
    }
}

/// Extract host from URL for Host header
fn extract_host(url: &str) -> &str {
    url.split("//")
        .nth(1)
        .and_then(|s| s.split('/').next())
        .unwrap_or("localhost")
}
