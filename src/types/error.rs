//! Error types for Gatehouse
//!
//! Registry duplicates are the only startup-fatal errors; everything else is
//! recoverable and gets contained at the dispatcher or connector boundary.

use crate::broker::ActionCode;

/// Main error type for Gatehouse operations
#[derive(Debug, thiserror::Error)]
pub enum GatehouseError {
    #[error("Duplicate action: {0}")]
    DuplicateCode(String),

    #[error("Handler already registered for action {0}")]
    DuplicateHandler(ActionCode),

    #[error("Unknown action code: {0}")]
    UnknownCode(ActionCode),

    #[error("Action registry full: {0}")]
    RegistryFull(String),

    #[error("No connection available in pool `{0}`")]
    PoolExhausted(String),

    #[error("Connector not found: {0}")]
    ConnectorNotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection {0} is closed")]
    ConnectionClosed(String),

    #[error("Callback `{service}` failed: {message}")]
    Callback { service: String, message: String },

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Invalid broker message: {0}")]
    InvalidMessage(String),

    #[error("NATS error: {0}")]
    Nats(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatehouseError {
    /// Whether this error aborts initialization
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DuplicateCode(_) | Self::DuplicateHandler(_))
    }

    pub(crate) fn callback(service: &str, message: impl Into<String>) -> Self {
        Self::Callback {
            service: service.to_string(),
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for GatehouseError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for GatehouseError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(format!("JSON error: {}", err))
    }
}

impl From<rmp_serde::encode::Error> for GatehouseError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Codec(format!("MessagePack encode error: {}", err))
    }
}

impl From<rmp_serde::decode::Error> for GatehouseError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Codec(format!("MessagePack decode error: {}", err))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for GatehouseError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::{error::ProtocolError, Error};
        match err {
            Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                Self::Transport(err.to_string())
            }
            Error::Protocol(e) => Self::Protocol(e.to_string()),
            other => Self::Transport(other.to_string()),
        }
    }
}

impl From<async_nats::Error> for GatehouseError {
    fn from(err: async_nats::Error) -> Self {
        Self::Nats(err.to_string())
    }
}

impl From<mongodb::error::Error> for GatehouseError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<reqwest::Error> for GatehouseError {
    fn from(err: reqwest::Error) -> Self {
        Self::Scheduler(err.to_string())
    }
}

/// Result type alias for Gatehouse operations
pub type Result<T> = std::result::Result<T, GatehouseError>;
