//! Why a connection ended

use std::fmt;

/// Reason attached to every close event
///
/// Administrative reasons mean we closed the connection ourselves and nothing
/// should happen afterwards. Everything else is a failure the connector has to
/// report and, when configured to, recover from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The connector or the handle was deleted on purpose
    AdministrativeDelete,
    /// The peer sent a close frame
    PeerClosed { code: Option<u16>, reason: String },
    /// Read or write failed, or the stream ended without a close frame
    TransportError(String),
    /// The peer violated the wire protocol
    ProtocolError(String),
    /// Too many pings went unanswered
    LivenessTimeout,
    /// The session could not be established
    ConnectFailed(String),
}

impl CloseReason {
    /// Whether the close was initiated by us
    pub fn is_administrative(&self) -> bool {
        matches!(self, Self::AdministrativeDelete)
    }

    /// Close code to send when we are the side closing
    pub fn close_code(&self) -> u16 {
        match self {
            Self::AdministrativeDelete => 1000,
            Self::PeerClosed { code, .. } => code.unwrap_or(1005),
            Self::ProtocolError(_) => 1002,
            Self::TransportError(_) | Self::LivenessTimeout | Self::ConnectFailed(_) => 1011,
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AdministrativeDelete => write!(f, "deleted"),
            Self::PeerClosed { code: Some(code), reason } => {
                write!(f, "closed by peer ({}) {}", code, reason)
            }
            Self::PeerClosed { code: None, reason } => write!(f, "closed by peer {}", reason),
            Self::TransportError(e) => write!(f, "transport error: {}", e),
            Self::ProtocolError(e) => write!(f, "protocol error: {}", e),
            Self::LivenessTimeout => write!(f, "peer stopped answering pings"),
            Self::ConnectFailed(e) => write!(f, "connect failed: {}", e),
        }
    }
}
