//! Connection pooling for outgoing connectors

pub mod handle;
#[allow(clippy::module_inception)]
pub mod pool;

pub use handle::{ConnectionHandle, HandleChannels, HandleId, OutboundRequest};
pub use pool::{ConnectionPool, GrowOutcome, PoolStats, PooledConnection, Removal};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a previous holder panicked
pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
