//! Broker envelope
//!
//! The unit of transmission between cluster members: an action code, an
//! ordered key/value payload and a correlation id. On the broker the envelope
//! travels as MessagePack; the scheduler HTTP API takes it as JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::action::ActionCode;
use crate::types::{GatehouseError, Result};

/// Ordered payload of an envelope
pub type Payload = BTreeMap<String, Value>;

/// One transmissible administrative command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerEnvelope {
    /// What to do
    pub action: ActionCode,

    /// Resource-specific arguments, owned by the handler
    #[serde(default)]
    pub payload: Payload,

    /// Correlates log lines across nodes
    #[serde(default)]
    pub correlation_id: String,
}

impl BrokerEnvelope {
    /// Create an envelope with a generated correlation id
    pub fn new(action: ActionCode) -> Self {
        Self {
            action,
            payload: Payload::new(),
            correlation_id: new_correlation_id(),
        }
    }

    /// Set a payload entry
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Replace the whole payload
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Set the correlation id
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// Encode for the broker
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Decode a broker frame
    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(data)?)
    }

    /// Serialize to JSON bytes
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from JSON bytes
    pub fn from_json(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Payload string value
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Payload integer value
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.payload.get(key).and_then(Value::as_u64)
    }

    /// Payload string value that the handler cannot do without
    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.get_str(key).ok_or_else(|| {
            GatehouseError::InvalidMessage(format!(
                "action {} ({}) is missing string key `{}`",
                self.action, self.correlation_id, key
            ))
        })
    }
}

/// Generate a correlation id
pub fn new_correlation_id() -> String {
    format!("gh{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::actions;
    use serde_json::json;

    fn sample() -> BrokerEnvelope {
        BrokerEnvelope::new(actions::OUTGOING_WSX_EDIT)
            .with("id", 42)
            .with("name", "crm-feed")
            .with("is_active", true)
            .with("ratio", 0.25)
            .with("offset", -17)
            .with("tags", json!(["a", "b"]))
            .with("extra", json!({"nested": {"deep": null}}))
    }

    #[test]
    fn test_msgpack_roundtrip() {
        let original = sample();
        let bytes = original.encode().unwrap();
        let decoded = BrokerEnvelope::decode(&bytes).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_json_roundtrip() {
        let original = sample();
        let bytes = original.to_json().unwrap();
        let decoded = BrokerEnvelope::from_json(&bytes).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_empty_payload_roundtrip() {
        let original = BrokerEnvelope::new(actions::SOCKET_CLOSE).with_correlation_id("");
        let decoded = BrokerEnvelope::decode(&original.encode().unwrap()).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_payload_is_ordered() {
        let env = BrokerEnvelope::new(actions::SCHEDULER_CREATE)
            .with("zeta", 1)
            .with("alpha", 2);
        let keys: Vec<_> = env.payload.keys().cloned().collect();
        assert_eq!(keys, vec!["alpha".to_string(), "zeta".to_string()]);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let err = BrokerEnvelope::decode(&[0xc1, 0x00, 0xff]).unwrap_err();
        assert!(matches!(err, GatehouseError::Codec(_)));
    }

    #[test]
    fn test_unknown_action_still_decodes() {
        let env = BrokerEnvelope::new(ActionCode(77_777)).with("k", "v");
        let decoded = BrokerEnvelope::decode(&env.encode().unwrap()).unwrap();
        assert_eq!(decoded.action, ActionCode(77_777));
    }

    #[test]
    fn test_correlation_ids_are_unique() {
        let a = BrokerEnvelope::new(actions::SCHEDULER_EXECUTE);
        let b = BrokerEnvelope::new(actions::SCHEDULER_EXECUTE);
        assert_ne!(a.correlation_id, b.correlation_id);
        assert!(a.correlation_id.starts_with("gh"));
    }

    #[test]
    fn test_payload_accessors() {
        let env = sample();
        assert_eq!(env.get_str("name"), Some("crm-feed"));
        assert_eq!(env.get_u64("id"), Some(42));
        assert_eq!(env.get_u64("name"), None);
        assert!(env.require_str("missing").is_err());
    }
}
