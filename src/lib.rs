//! Gatehouse - cluster control plane and outgoing connectors
//!
//! Gatehouse keeps the nodes of an integration server cluster in agreement
//! about their runtime resources and maintains pools of outgoing WebSocket
//! sessions to remote peers.
//!
//! ## Parts
//!
//! - **Broker**: action registry, envelope codec, dispatcher and publishing client
//! - **Pool**: bounded connection pool with concurrent growth
//! - **Connector**: pooled WebSocket connector with reconnect and liveness
//! - **Supervisor**: connector lifecycle driven by broker messages
//! - **Jobs**: startup job submission and job execution
//! - **Server**: `/health` and `/status` endpoint

pub mod broker;
pub mod config;
pub mod connector;
pub mod jobs;
pub mod logging;
pub mod nats;
pub mod pool;
pub mod server;
pub mod store;
pub mod transport;
pub mod types;

pub use config::Args;
pub use types::{GatehouseError, Result};
