//! NATS transport for the broker stream and callbacks

pub mod client;

pub use client::{NatsCallbackInvoker, NatsClient};
