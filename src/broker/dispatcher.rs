//! Broker message dispatcher
//!
//! Resolves the local handler for an envelope's action code and invokes it.
//! A node must tolerate commands for resources it does not host and must keep
//! consuming the shared command stream when a handler misbehaves, so every
//! failure mode here ends in a log line and a [`DispatchOutcome`], never in an
//! error returned to the listener.

use async_trait::async_trait;
use futures::{FutureExt, Stream, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

use super::action::{ActionCode, ActionRegistry};
use super::envelope::BrokerEnvelope;
use crate::pool::lock_or_recover;
use crate::types::{GatehouseError, Result};

/// A local handler for one action code
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, envelope: &BrokerEnvelope) -> Result<()>;
}

/// Adapter turning an async closure into a [`Handler`]
pub struct FnHandler<F>(F);

/// Wrap an async closure as a handler
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(BrokerEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(BrokerEnvelope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn handle(&self, envelope: &BrokerEnvelope) -> Result<()> {
        (self.0)(envelope.clone()).await
    }
}

/// What happened to one envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The handler ran and returned Ok
    Handled,
    /// The code is known but this node hosts no handler for it
    NoHandler,
    /// The code is not in the local registry (skewed cluster versions)
    UnknownAction,
    /// The handler returned an error or panicked
    Failed,
    /// The frame could not be decoded
    Malformed,
}

/// Running totals, mostly for tests and the status endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub handled: u64,
    pub no_handler: u64,
    pub unknown: u64,
    pub failed: u64,
    pub malformed: u64,
}

impl DispatchStats {
    fn record(&mut self, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::Handled => self.handled += 1,
            DispatchOutcome::NoHandler => self.no_handler += 1,
            DispatchOutcome::UnknownAction => self.unknown += 1,
            DispatchOutcome::Failed => self.failed += 1,
            DispatchOutcome::Malformed => self.malformed += 1,
        }
    }
}

/// Table of action code → handler
///
/// Handlers are registered through `&mut self` while the process starts up;
/// once the dispatcher is shared behind an `Arc` the table is fixed.
pub struct Dispatcher {
    registry: Arc<ActionRegistry>,
    handlers: HashMap<ActionCode, Arc<dyn Handler>>,
    totals: Mutex<DispatchStats>,
}

impl Dispatcher {
    /// Create a dispatcher over a frozen action registry
    pub fn new(registry: Arc<ActionRegistry>) -> Self {
        Self {
            registry,
            handlers: HashMap::new(),
            totals: Mutex::new(DispatchStats::default()),
        }
    }

    /// Register the handler for a code
    pub fn register_handler(&mut self, code: ActionCode, handler: Arc<dyn Handler>) -> Result<()> {
        if !self.registry.contains(code) {
            return Err(GatehouseError::UnknownCode(code));
        }
        if self.handlers.contains_key(&code) {
            return Err(GatehouseError::DuplicateHandler(code));
        }
        self.handlers.insert(code, handler);
        Ok(())
    }

    /// Whether a handler exists for the code
    pub fn has_handler(&self, code: ActionCode) -> bool {
        self.handlers.contains_key(&code)
    }

    /// The registry this dispatcher resolves names against
    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// Totals across every run so far
    pub fn stats(&self) -> DispatchStats {
        *lock_or_recover(&self.totals)
    }

    /// Invoke the handler for one envelope
    pub async fn dispatch(&self, envelope: &BrokerEnvelope) -> DispatchOutcome {
        let name = match self.registry.name_of(envelope.action) {
            Ok(name) => name,
            Err(e) => {
                warn!(
                    correlation_id = %envelope.correlation_id,
                    "Ignoring broker message: {}",
                    e
                );
                return DispatchOutcome::UnknownAction;
            }
        };

        let Some(handler) = self.handlers.get(&envelope.action) else {
            debug!(
                action = name,
                correlation_id = %envelope.correlation_id,
                "No local handler, skipping"
            );
            return DispatchOutcome::NoHandler;
        };

        debug!(
            action = name,
            correlation_id = %envelope.correlation_id,
            "Dispatching broker message"
        );

        match AssertUnwindSafe(handler.handle(envelope)).catch_unwind().await {
            Ok(Ok(())) => DispatchOutcome::Handled,
            Ok(Err(e)) => {
                error!(
                    action = name,
                    correlation_id = %envelope.correlation_id,
                    "Handler failed: {}",
                    e
                );
                DispatchOutcome::Failed
            }
            Err(panic) => {
                error!(
                    action = name,
                    correlation_id = %envelope.correlation_id,
                    "Handler panicked: {}",
                    panic_message(&panic)
                );
                DispatchOutcome::Failed
            }
        }
    }

    /// Decode a broker frame and dispatch it
    pub async fn dispatch_bytes(&self, data: &[u8]) -> DispatchOutcome {
        match BrokerEnvelope::decode(data) {
            Ok(envelope) => self.dispatch(&envelope).await,
            Err(e) => {
                warn!("Dropping undecodable broker frame ({} bytes): {}", data.len(), e);
                DispatchOutcome::Malformed
            }
        }
    }

    /// Consume a stream of broker frames in arrival order
    ///
    /// Returns once the stream ends.
    pub async fn run<S, B>(&self, frames: S) -> DispatchStats
    where
        S: Stream<Item = B>,
        B: AsRef<[u8]>,
    {
        let mut stats = DispatchStats::default();
        futures::pin_mut!(frames);

        while let Some(frame) = frames.next().await {
            let outcome = self.dispatch_bytes(frame.as_ref()).await;
            stats.record(outcome);
            lock_or_recover(&self.totals).record(outcome);
        }

        info!(
            handled = stats.handled,
            failed = stats.failed,
            unknown = stats.unknown,
            "Broker stream ended"
        );
        stats
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
