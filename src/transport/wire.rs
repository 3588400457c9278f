//! Wire variants
//!
//! Native peers speak the cluster's own envelope: every frame is a JSON object
//! `{"meta": {...}, "data": ...}` and a session starts with an authentication
//! request. Foreign peers get the payload as-is.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::Frame;
use crate::types::Result;

/// Which protocol a peer speaks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireVariant {
    Native,
    #[default]
    Foreign,
}

/// How inbound text frames are presented to the on-message callback
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    #[default]
    Json,
    Raw,
}

/// Payload handed to a connector for sending
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text(String),
    Binary(Vec<u8>),
    Json(Value),
}

impl From<String> for Outbound {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Outbound {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Vec<u8>> for Outbound {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(value)
    }
}

impl From<Value> for Outbound {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

/// Payload received from a peer
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Text(String),
    Binary(Vec<u8>),
    Json(Value),
}

impl Inbound {
    /// JSON form for callback contexts; binary data becomes base64
    pub fn to_value(&self) -> Value {
        match self {
            Self::Text(text) => Value::String(text.clone()),
            Self::Binary(data) => Value::String(base64_encode(data)),
            Self::Json(value) => value.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct NativeMeta {
    action: String,
    id: String,
    timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    encoding: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NativeMessage {
    meta: NativeMeta,
    data: Value,
}

impl NativeMessage {
    fn new(action: &str, data: Value) -> Self {
        Self {
            meta: NativeMeta {
                action: action.to_string(),
                id: crate::broker::new_correlation_id(),
                timestamp: chrono::Utc::now().to_rfc3339(),
                encoding: None,
            },
            data,
        }
    }

    fn to_frame(&self) -> Result<Frame> {
        Ok(Frame::Text(serde_json::to_string(self)?))
    }
}

/// First frame sent to a native peer, if any
pub fn handshake(
    variant: WireVariant,
    client_name: &str,
    username: Option<&str>,
    secret: Option<&str>,
) -> Result<Option<Frame>> {
    if variant == WireVariant::Foreign {
        return Ok(None);
    }
    let data = json!({
        "client_name": client_name,
        "username": username,
        "secret": secret,
    });
    NativeMessage::new("create-session", data).to_frame().map(Some)
}

/// Frame carrying an outbound payload
pub fn encode_outbound(variant: WireVariant, data: Outbound) -> Result<Frame> {
    match variant {
        WireVariant::Foreign => Ok(match data {
            Outbound::Text(text) => Frame::Text(text),
            Outbound::Binary(data) => Frame::Binary(data),
            Outbound::Json(value) => Frame::Text(serde_json::to_string(&value)?),
        }),
        WireVariant::Native => {
            let message = match data {
                Outbound::Text(text) => NativeMessage::new("invoke", Value::String(text)),
                Outbound::Json(value) => NativeMessage::new("invoke", value),
                Outbound::Binary(data) => {
                    let mut message =
                        NativeMessage::new("invoke", Value::String(base64_encode(&data)));
                    message.meta.encoding = Some("base64".into());
                    message
                }
            };
            message.to_frame()
        }
    }
}

/// Payload carried by an inbound data frame; `None` for control frames
pub fn decode_inbound(variant: WireVariant, format: DataFormat, frame: Frame) -> Option<Inbound> {
    match frame {
        Frame::Text(text) => {
            if variant == WireVariant::Native {
                if let Ok(message) = serde_json::from_str::<NativeMessage>(&text) {
                    return Some(unwrap_native(message));
                }
                debug!("Native peer sent a frame outside the envelope");
            }
            Some(match format {
                DataFormat::Raw => Inbound::Text(text),
                DataFormat::Json => match serde_json::from_str(&text) {
                    Ok(value) => Inbound::Json(value),
                    Err(e) => {
                        debug!("Inbound text is not JSON ({}), passing it through", e);
                        Inbound::Text(text)
                    }
                },
            })
        }
        Frame::Binary(data) => {
            if variant == WireVariant::Native {
                if let Ok(message) = serde_json::from_slice::<NativeMessage>(&data) {
                    return Some(unwrap_native(message));
                }
            }
            Some(Inbound::Binary(data))
        }
        Frame::Ping(_) | Frame::Pong(_) | Frame::Close(_) => None,
    }
}

fn unwrap_native(message: NativeMessage) -> Inbound {
    if message.meta.encoding.as_deref() == Some("base64") {
        if let Some(Ok(data)) = message.data.as_str().map(base64_decode) {
            return Inbound::Binary(data);
        }
    }
    Inbound::Json(message.data)
}

fn base64_encode(data: &[u8]) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine};
    STANDARD.encode(data)
}

fn base64_decode(data: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    use base64::{engine::general_purpose::STANDARD, Engine};
    STANDARD.decode(data)
}
