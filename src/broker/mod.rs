//! Cluster broker protocol
//!
//! Action codes, the envelope that carries them, local dispatch and the
//! client that publishes envelopes to the rest of the cluster.

pub mod action;
pub mod client;
pub mod dispatcher;
pub mod envelope;

pub use action::{actions, ActionCode, ActionRegistry, BLOCK_SIZE, DYNAMIC_BLOCK_START};
pub use client::{
    is_scheduler_action, BrokerClient, BrokerSink, SchedulerConfig, SchedulerResponse,
};
pub use dispatcher::{handler_fn, DispatchOutcome, DispatchStats, Dispatcher, Handler};
pub use envelope::{new_correlation_id, BrokerEnvelope, Payload};
