//! Outgoing WebSocket connectors
//!
//! A [`PooledConnector`] keeps a pool of sessions to one peer; the
//! [`ConnectorSupervisor`] owns all connectors of the process and applies
//! connector broker messages to them.

pub mod callbacks;
pub mod close;
pub mod config;
#[allow(clippy::module_inception)]
pub mod connector;
pub mod slot;
pub mod supervisor;

pub use callbacks::{invoke_contained, CallbackContext, CallbackInvoker, LoggingInvoker};
pub use close::CloseReason;
pub use config::{ConnectorConfig, ConnectorSettings};
pub use connector::{ConnectorRuntime, ConnectorStatus, PooledConnector, DEFAULT_CALLBACK_TIMEOUT};
pub use slot::{Slot, SlotState};
pub use supervisor::{ConnectorSupervisor, SUPERVISOR_ACTIONS};
