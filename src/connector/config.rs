//! Outgoing connector configuration
//!
//! Rows come from the configuration source or from broker payloads and are
//! always replaced wholesale. Optional liveness settings fall back to
//! defaults when [`ConnectorConfig::resolved`] builds the runtime settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::broker::Payload;
use crate::transport::{DataFormat, WireVariant};
use crate::types::{GatehouseError, Result};

/// Ping interval used when a row does not set one
pub const DEFAULT_PING_INTERVAL_SECS: u64 = 30;

/// Missed pings tolerated when a row does not set a threshold
pub const DEFAULT_PINGS_MISSED_THRESHOLD: u32 = 5;

/// Delay between a failure and the next connect attempt
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;

fn default_true() -> bool {
    true
}

fn default_pool_size() -> usize {
    1
}

fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY_MS
}

/// One outgoing WebSocket connector as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    pub id: u64,
    pub name: String,
    pub address: String,

    #[serde(default = "default_true")]
    pub is_active: bool,

    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,

    /// Native peers speak the cluster envelope; foreign ones get raw frames
    #[serde(default)]
    pub wire: WireVariant,

    #[serde(default)]
    pub data_format: DataFormat,

    #[serde(default = "default_true")]
    pub has_auto_reconnect: bool,

    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    #[serde(default)]
    pub ping_interval_secs: Option<u64>,
    #[serde(default)]
    pub pings_missed_threshold: Option<u32>,

    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Services invoked on connect, per message and on close
    #[serde(default)]
    pub on_connect_service: Option<String>,
    #[serde(default)]
    pub on_message_service: Option<String>,
    #[serde(default)]
    pub on_close_service: Option<String>,

    /// Socket group closed together by a socket-close broadcast
    #[serde(default)]
    pub group: Option<String>,
}

impl ConnectorConfig {
    /// Minimal config with every optional field at its default
    pub fn new(id: u64, name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            address: address.into(),
            is_active: true,
            username: None,
            secret: None,
            wire: WireVariant::default(),
            data_format: DataFormat::default(),
            has_auto_reconnect: true,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            ping_interval_secs: None,
            pings_missed_threshold: None,
            pool_size: 1,
            on_connect_service: None,
            on_message_service: None,
            on_close_service: None,
            group: None,
        }
    }

    /// Parse a config from a broker payload
    pub fn from_payload(payload: &Payload) -> Result<Self> {
        let value = serde_json::to_value(payload)?;
        serde_json::from_value(value)
            .map_err(|e| GatehouseError::InvalidMessage(format!("bad connector config: {}", e)))
    }

    /// Payload form for broker messages
    pub fn to_payload(&self) -> Result<Payload> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
            _ => Err(GatehouseError::Internal(
                "connector config did not serialize to an object".into(),
            )),
        }
    }

    /// Reject configs that can never work
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(GatehouseError::Config("connector name must not be empty".into()));
        }
        if !(self.address.starts_with("ws://") || self.address.starts_with("wss://")) {
            return Err(GatehouseError::Config(format!(
                "connector `{}` address must be a ws:// or wss:// URL, got `{}`",
                self.name, self.address
            )));
        }
        if self.pool_size == 0 {
            return Err(GatehouseError::Config(format!(
                "connector `{}` pool size must be at least 1",
                self.name
            )));
        }
        Ok(())
    }

    /// Runtime settings with defaults applied
    pub fn resolved(&self) -> ConnectorSettings {
        let ping_interval_secs = match self.ping_interval_secs {
            Some(secs) if secs > 0 => secs,
            _ => {
                debug!(
                    connector = %self.name,
                    "No ping interval set, using {}s",
                    DEFAULT_PING_INTERVAL_SECS
                );
                DEFAULT_PING_INTERVAL_SECS
            }
        };

        let pings_missed_threshold = match self.pings_missed_threshold {
            Some(n) if n > 0 => n,
            _ => {
                debug!(
                    connector = %self.name,
                    "No missed-ping threshold set, using {}",
                    DEFAULT_PINGS_MISSED_THRESHOLD
                );
                DEFAULT_PINGS_MISSED_THRESHOLD
            }
        };

        ConnectorSettings {
            ping_interval: Duration::from_secs(ping_interval_secs),
            pings_missed_threshold,
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
        }
    }
}

/// Timing settings derived from a config
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectorSettings {
    pub ping_interval: Duration,
    pub pings_missed_threshold: u32,
    pub reconnect_delay: Duration,
}
