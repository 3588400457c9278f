//! Application callbacks
//!
//! Connectors report lifecycle events and inbound messages to named services.
//! How a service is actually run belongs to the host application; Gatehouse
//! only needs something implementing [`CallbackInvoker`].

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tracing::{info, warn};

use crate::types::Result;

/// What a callback is told
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CallbackContext {
    Connected {
        connector: String,
        handle: u64,
    },
    Message {
        connector: String,
        handle: u64,
        data: Value,
    },
    Closed {
        connector: String,
        handle: u64,
        code: Option<u16>,
        reason: String,
    },
    /// A scheduled job fired
    Job {
        job: String,
        cid: String,
        extra: Value,
    },
}

impl CallbackContext {
    /// Short event name for logs
    pub fn event(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Message { .. } => "message",
            Self::Closed { .. } => "closed",
            Self::Job { .. } => "job",
        }
    }
}

/// Runs application services
#[async_trait]
pub trait CallbackInvoker: Send + Sync {
    async fn invoke(&self, service: &str, context: &CallbackContext) -> Result<()>;
}

/// Invoker that only logs, used when no application is attached
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingInvoker;

#[async_trait]
impl CallbackInvoker for LoggingInvoker {
    async fn invoke(&self, service: &str, context: &CallbackContext) -> Result<()> {
        info!(service = %service, event = context.event(), "Callback");
        Ok(())
    }
}

/// Invoke a callback, containing errors, panics and overruns
///
/// Returns whether the service completed successfully.
pub async fn invoke_contained(
    invoker: &dyn CallbackInvoker,
    service: &str,
    context: &CallbackContext,
    timeout: Duration,
) -> bool {
    let call = AssertUnwindSafe(invoker.invoke(service, context)).catch_unwind();

    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(Ok(()))) => true,
        Ok(Ok(Err(e))) => {
            warn!(service = %service, event = context.event(), "Could not invoke callback: {}", e);
            false
        }
        Ok(Err(_)) => {
            warn!(service = %service, event = context.event(), "Callback panicked");
            false
        }
        Err(_) => {
            warn!(
                service = %service,
                event = context.event(),
                "Callback did not finish within {:?}",
                timeout
            );
            false
        }
    }
}
