//! Broker client
//!
//! Sends envelopes to the rest of the cluster. Scheduler-bound actions go to
//! the scheduler's HTTP API when one is configured; everything else is
//! published on the broker subject and fanned out to every process.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::action::{actions, ActionCode};
use super::envelope::BrokerEnvelope;
use crate::types::{GatehouseError, Result};

/// Default timeout for scheduler API calls
const DEFAULT_SCHEDULER_TIMEOUT: Duration = Duration::from_secs(10);

/// Actions the scheduler owns
const SCHEDULER_ACTIONS: &[ActionCode] = &[
    actions::SCHEDULER_CREATE,
    actions::SCHEDULER_EDIT,
    actions::SCHEDULER_DELETE,
    actions::SCHEDULER_EXECUTE,
];

/// Whether an action is routed to the scheduler instead of the broker
pub fn is_scheduler_action(code: ActionCode) -> bool {
    SCHEDULER_ACTIONS.contains(&code)
}

/// Where encoded envelopes are published
#[async_trait]
pub trait BrokerSink: Send + Sync {
    async fn publish_frame(&self, subject: &str, frame: Vec<u8>) -> Result<()>;
}

/// Scheduler HTTP API location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub use_tls: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl SchedulerConfig {
    /// Base URL of the scheduler API
    pub fn url(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{}://{}:{}/", scheme, self.host, self.port)
    }
}

/// Reply from the scheduler API
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerResponse {
    #[serde(default)]
    pub cid: String,
    #[serde(default)]
    pub status: String,
}

impl SchedulerResponse {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Publishes envelopes to the cluster
pub struct BrokerClient {
    sink: Arc<dyn BrokerSink>,
    subject: String,
    scheduler: Option<SchedulerConfig>,
    http: reqwest::Client,
}

impl BrokerClient {
    /// Create a client publishing on `subject`
    pub fn new(sink: Arc<dyn BrokerSink>, subject: impl Into<String>) -> Self {
        Self {
            sink,
            subject: subject.into(),
            scheduler: None,
            http: reqwest::Client::new(),
        }
    }

    /// Route scheduler-bound actions to this scheduler
    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Broker subject
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Send an envelope to wherever it belongs
    pub async fn publish(&self, envelope: &BrokerEnvelope) -> Result<()> {
        if is_scheduler_action(envelope.action) && self.scheduler.is_some() {
            let response = self.invoke_scheduler(envelope).await?;
            if !response.is_ok() {
                return Err(GatehouseError::Scheduler(format!(
                    "scheduler replied `{}` to {}",
                    response.status, envelope.correlation_id
                )));
            }
            return Ok(());
        }

        let frame = envelope.encode()?;
        debug!(
            action = %envelope.action,
            correlation_id = %envelope.correlation_id,
            subject = %self.subject,
            "Publishing broker message"
        );
        self.sink.publish_frame(&self.subject, frame).await
    }

    /// Publish in the background, logging failures
    pub fn publish_detached(self: &Arc<Self>, envelope: BrokerEnvelope) {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = client.publish(&envelope).await {
                warn!(
                    action = %envelope.action,
                    correlation_id = %envelope.correlation_id,
                    "Background publish failed: {}",
                    e
                );
            }
        });
    }

    /// POST an envelope to the scheduler API
    pub async fn invoke_scheduler(&self, envelope: &BrokerEnvelope) -> Result<SchedulerResponse> {
        let scheduler = self
            .scheduler
            .as_ref()
            .ok_or_else(|| GatehouseError::Scheduler("no scheduler configured".into()))?;

        let mut request = self
            .http
            .post(scheduler.url())
            .timeout(DEFAULT_SCHEDULER_TIMEOUT)
            .json(envelope);

        if let Some(username) = &scheduler.username {
            request = request.basic_auth(username, scheduler.password.as_deref());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatehouseError::Scheduler(format!(
                "{} returned HTTP {}",
                scheduler.url(),
                status
            )));
        }

        let reply: SchedulerResponse = response.json().await?;
        info!(
            action = %envelope.action,
            correlation_id = %envelope.correlation_id,
            cid = %reply.cid,
            status = %reply.status,
            "Scheduler accepted message"
        );
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct RecordingSink {
        frames: Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl BrokerSink for RecordingSink {
        async fn publish_frame(&self, subject: &str, frame: Vec<u8>) -> Result<()> {
            self.frames.lock().unwrap().push((subject.to_string(), frame));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_publish_goes_to_broker_subject() {
        let sink = Arc::new(RecordingSink::default());
        let client = BrokerClient::new(sink.clone(), "gatehouse.broker");

        let env = BrokerEnvelope::new(actions::OUTGOING_WSX_DELETE).with("name", "crm");
        client.publish(&env).await.unwrap();

        let frames = sink.frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, "gatehouse.broker");
        assert_eq!(BrokerEnvelope::decode(&frames[0].1).unwrap(), env);
    }

    #[tokio::test]
    async fn test_scheduler_actions_fall_back_to_broker() {
        let sink = Arc::new(RecordingSink::default());
        let client = BrokerClient::new(sink.clone(), "gatehouse.broker");

        client
            .publish(&BrokerEnvelope::new(actions::SCHEDULER_EXECUTE))
            .await
            .unwrap();
        assert_eq!(sink.frames.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_scheduler_routing_table() {
        assert!(is_scheduler_action(actions::SCHEDULER_CREATE));
        assert!(is_scheduler_action(actions::SCHEDULER_EXECUTE));
        assert!(!is_scheduler_action(actions::SCHEDULER_JOB_EXECUTED));
        assert!(!is_scheduler_action(actions::SOCKET_CLOSE));
    }

    #[test]
    fn test_scheduler_url() {
        let mut cfg = SchedulerConfig {
            host: "sched.local".into(),
            port: 31530,
            use_tls: false,
            username: None,
            password: None,
        };
        assert_eq!(cfg.url(), "http://sched.local:31530/");
        cfg.use_tls = true;
        assert_eq!(cfg.url(), "https://sched.local:31530/");
    }

    #[tokio::test]
    async fn test_scheduler_actions_go_over_http() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let mut request = Vec::new();
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(split) = text.find("\r\n\r\n") {
                    let length = text
                        .lines()
                        .find_map(|l| {
                            l.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if request.len() >= split + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }

            let body = r#"{"cid":"sched-1","status":"ok"}"#;
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).to_string()
        });

        let sink = Arc::new(RecordingSink::default());
        let client = BrokerClient::new(sink.clone(), "gatehouse.broker").with_scheduler(
            SchedulerConfig {
                host: "127.0.0.1".into(),
                port,
                use_tls: false,
                username: Some("admin".into()),
                password: Some("secret".into()),
            },
        );

        let env = BrokerEnvelope::new(actions::SCHEDULER_CREATE).with("name", "nightly");
        client.publish(&env).await.unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST / HTTP/1.1"));
        assert!(request.to_ascii_lowercase().contains("authorization: basic "));
        assert!(request.contains("\"nightly\""));
        assert!(sink.frames.lock().unwrap().is_empty());
    }
}
