//! NATS client wrapper
//!
//! The broker stream rides on plain NATS subjects: fan-out to every
//! subscribed process, best effort, no persistence.

use async_nats::{Client, ConnectOptions};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::time::Duration;
use tracing::info;

use crate::broker::BrokerSink;
use crate::config::NatsArgs;
use crate::connector::{CallbackContext, CallbackInvoker};
use crate::types::{GatehouseError, Result};

/// Default ping interval for keep-alive
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(120);

/// NATS client wrapper
#[derive(Clone)]
pub struct NatsClient {
    client: Client,
    name: String,
}

impl NatsClient {
    /// Connect to NATS
    pub async fn new(args: &NatsArgs, name: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", args.nats_url);

        // Fail fast when NATS is down at startup; reconnects after that are automatic.
        let mut options = ConnectOptions::new()
            .name(name)
            .ping_interval(DEFAULT_PING_INTERVAL)
            .connection_timeout(Duration::from_secs(5));

        if let (Some(user), Some(pass)) = (&args.nats_user, &args.nats_password) {
            options = options.user_and_password(user.clone(), pass.clone());
        }

        let client = options
            .connect(&args.nats_url)
            .await
            .map_err(|e| GatehouseError::Nats(format!("Failed to connect: {}", e)))?;

        info!("Connected to NATS at {}", args.nats_url);

        Ok(Self {
            client,
            name: name.to_string(),
        })
    }

    /// Publish a message to a subject
    pub async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| GatehouseError::Nats(format!("Publish failed: {}", e)))
    }

    /// Subscribe to a subject
    pub async fn subscribe(&self, subject: &str) -> Result<async_nats::Subscriber> {
        self.client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| GatehouseError::Nats(format!("Subscribe failed: {}", e)))
    }

    /// Subscribe and yield raw message bodies, ready for the dispatcher
    pub async fn frames(&self, subject: &str) -> Result<impl Stream<Item = Bytes>> {
        let subscriber = self.subscribe(subject).await?;
        Ok(subscriber.map(|message| message.payload))
    }

    /// Flush pending messages
    pub async fn flush(&self) -> Result<()> {
        self.client
            .flush()
            .await
            .map_err(|e| GatehouseError::Nats(format!("Flush failed: {}", e)))
    }

    /// Get the client name
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl BrokerSink for NatsClient {
    async fn publish_frame(&self, subject: &str, frame: Vec<u8>) -> Result<()> {
        self.publish(subject, Bytes::from(frame)).await
    }
}

/// Runs callbacks by publishing their context to `<prefix>.<service>`
pub struct NatsCallbackInvoker {
    client: NatsClient,
    prefix: String,
}

impl NatsCallbackInvoker {
    pub fn new(client: NatsClient, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }

    /// Subject a service's callbacks are published on
    pub fn subject_for(&self, service: &str) -> String {
        callback_subject(&self.prefix, service)
    }
}

fn callback_subject(prefix: &str, service: &str) -> String {
    format!("{}.{}", prefix, service)
}

#[async_trait]
impl CallbackInvoker for NatsCallbackInvoker {
    async fn invoke(&self, service: &str, context: &CallbackContext) -> Result<()> {
        let body = serde_json::to_vec(context)?;
        self.client
            .publish(&self.subject_for(service), Bytes::from(body))
            .await
            .map_err(|e| GatehouseError::callback(service, e.to_string()))
    }
}
