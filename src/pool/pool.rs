//! Bounded pool of live connections
//!
//! The pool only does bookkeeping; it never dials. Callers hand `grow` a
//! build future and the pool decides whether the attempt may run and whether
//! its result is admitted. Counters live behind a synchronous mutex that is
//! never held across an `.await`; waiting for a free handle uses `Notify`.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info};

use super::handle::{ConnectionHandle, HandleId};
use super::lock_or_recover;
use crate::connector::CloseReason;
use crate::types::{GatehouseError, Result};

#[derive(Default)]
struct PoolState {
    idle: VecDeque<Arc<ConnectionHandle>>,
    borrowed: HashMap<HandleId, Arc<ConnectionHandle>>,
    building: usize,
    draining: bool,
}

impl PoolState {
    fn live(&self) -> usize {
        self.idle.len() + self.borrowed.len()
    }

    fn take(&mut self, id: HandleId) -> Option<Arc<ConnectionHandle>> {
        if let Some(pos) = self.idle.iter().position(|h| h.id() == id) {
            return self.idle.remove(pos);
        }
        self.borrowed.remove(&id)
    }
}

/// Snapshot of pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub target_size: usize,
    pub live: usize,
    pub idle: usize,
    pub borrowed: usize,
    pub building: usize,
    pub draining: bool,
}

/// Result of one growth attempt
#[derive(Debug)]
pub enum GrowOutcome<T> {
    /// The new handle joined the pool
    Admitted(HandleId, T),
    /// The pool is full or draining; nothing was built
    Skipped,
    /// The build future for the given handle id failed
    Failed(HandleId, GatehouseError),
    /// The pool started draining while the handle was being built; the
    /// handle has been asked to close as an administrative delete
    Discarded(T),
}

/// Result of removing a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The handle was not in the pool (already removed or never admitted)
    NotLive,
    /// The handle was removed; `replace` says whether to grow a new one
    Removed { replace: bool },
}

/// Pool of live connections for one connector
pub struct ConnectionPool {
    name: String,
    target_size: usize,
    reconnect: bool,
    state: Mutex<PoolState>,
    available: Notify,
    next_id: AtomicU64,
}

impl ConnectionPool {
    /// Create an empty pool
    pub fn new(name: impl Into<String>, target_size: usize, reconnect: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            target_size,
            reconnect,
            state: Mutex::new(PoolState::default()),
            available: Notify::new(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target_size(&self) -> usize {
        self.target_size
    }

    pub fn is_draining(&self) -> bool {
        self.lock().draining
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        lock_or_recover(&self.state)
    }

    /// Borrow an idle handle, waiting up to `timeout` for one to appear
    ///
    /// A zero timeout checks once. Handles flagged for deletion or whose slot
    /// task has exited are never handed out.
    pub async fn acquire(self: &Arc<Self>, timeout: Duration) -> Result<PooledConnection> {
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            // Register before inspecting state so a release in between is not lost.
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.draining {
                    return Err(GatehouseError::PoolExhausted(self.name.clone()));
                }

                let usable = state
                    .idle
                    .iter()
                    .position(|h| !h.is_delete_requested() && !h.is_closed());

                if let Some(handle) = usable.and_then(|pos| state.idle.remove(pos)) {
                    state.borrowed.insert(handle.id(), Arc::clone(&handle));
                    return Ok(PooledConnection {
                        pool: Arc::clone(self),
                        handle: Some(handle),
                    });
                }
            }

            if timeout.is_zero() || Instant::now() >= deadline {
                return Err(GatehouseError::PoolExhausted(self.name.clone()));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(GatehouseError::PoolExhausted(self.name.clone()));
            }
        }
    }

    /// Return a borrowed handle
    ///
    /// No-op if the handle was removed while it was out.
    pub fn release(&self, handle: Arc<ConnectionHandle>) {
        {
            let mut state = self.lock();
            if state.borrowed.remove(&handle.id()).is_none() {
                return;
            }
            state.idle.push_back(handle);
        }
        self.available.notify_waiters();
    }

    /// Run one growth attempt if the pool has room for it
    ///
    /// `build` receives the id the new handle must carry and resolves to the
    /// handle plus whatever else the caller needs once it is admitted. The
    /// building slot is reserved for exactly as long as `build` runs, even if
    /// the returned future is dropped half way.
    pub async fn grow<F, Fut, T>(&self, build: F) -> GrowOutcome<T>
    where
        F: FnOnce(HandleId) -> Fut,
        Fut: Future<Output = Result<(Arc<ConnectionHandle>, T)>>,
    {
        let Some(reservation) = self.reserve() else {
            return GrowOutcome::Skipped;
        };
        let id = reservation.id;

        let (handle, extra) = match build(id).await {
            Ok(built) => built,
            Err(e) => return GrowOutcome::Failed(id, e),
        };

        let discarded = {
            let mut state = self.lock();
            reservation.complete(&mut state);
            if state.draining {
                true
            } else {
                state.idle.push_back(Arc::clone(&handle));
                false
            }
        };

        if discarded {
            info!(pool = %self.name, handle = %id, "Pool is draining, discarding new connection");
            handle.request_close(CloseReason::AdministrativeDelete);
            return GrowOutcome::Discarded(extra);
        }

        debug!(pool = %self.name, handle = %id, "Connection admitted");
        self.available.notify_waiters();
        GrowOutcome::Admitted(id, extra)
    }

    fn reserve(&self) -> Option<BuildReservation<'_>> {
        let mut state = self.lock();
        if state.draining || state.live() + state.building >= self.target_size {
            return None;
        }
        state.building += 1;
        Some(BuildReservation {
            pool: self,
            id: HandleId(self.next_id.fetch_add(1, Ordering::SeqCst)),
            armed: true,
        })
    }

    /// Take a handle out of the pool and ask it to close
    pub fn remove(&self, id: HandleId, reason: &CloseReason) -> Removal {
        let (handle, replace) = {
            let mut state = self.lock();
            let Some(handle) = state.take(id) else {
                return Removal::NotLive;
            };
            let replace = self.reconnect
                && !state.draining
                && !reason.is_administrative()
                && !handle.is_delete_requested();
            (handle, replace)
        };

        handle.request_close(reason.clone());
        self.available.notify_waiters();
        Removal::Removed { replace }
    }

    /// Stop growing and close every live handle
    ///
    /// Returns how many handles were closed. Waiters in `acquire` fail.
    pub fn drain(&self, reason: CloseReason) -> usize {
        let handles: Vec<_> = {
            let mut state = self.lock();
            state.draining = true;
            let mut handles: Vec<_> = state.idle.drain(..).collect();
            handles.extend(state.borrowed.drain().map(|(_, h)| h));
            handles
        };

        for handle in &handles {
            handle.request_close(reason.clone());
        }
        self.available.notify_waiters();

        info!(pool = %self.name, closed = handles.len(), "Pool drained");
        handles.len()
    }

    /// Live handle by id
    pub fn get(&self, id: HandleId) -> Option<Arc<ConnectionHandle>> {
        let state = self.lock();
        state
            .idle
            .iter()
            .find(|h| h.id() == id)
            .cloned()
            .or_else(|| state.borrowed.get(&id).cloned())
    }

    /// All live handles, idle first
    pub fn live_handles(&self) -> Vec<Arc<ConnectionHandle>> {
        let state = self.lock();
        state
            .idle
            .iter()
            .cloned()
            .chain(state.borrowed.values().cloned())
            .collect()
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            target_size: self.target_size,
            live: state.live(),
            idle: state.idle.len(),
            borrowed: state.borrowed.len(),
            building: state.building,
            draining: state.draining,
        }
    }
}

/// A building slot held for the duration of one `grow` attempt
struct BuildReservation<'a> {
    pool: &'a ConnectionPool,
    id: HandleId,
    armed: bool,
}

impl BuildReservation<'_> {
    /// Release the slot under a lock the caller already holds
    fn complete(mut self, state: &mut PoolState) {
        state.building = state.building.saturating_sub(1);
        self.armed = false;
    }
}

impl Drop for BuildReservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.pool.lock();
            state.building = state.building.saturating_sub(1);
        }
    }
}

/// A borrowed handle, returned to the pool on drop
pub struct PooledConnection {
    pool: Arc<ConnectionPool>,
    handle: Option<Arc<ConnectionHandle>>,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("handle", &self.handle.as_ref().map(|h| h.id()))
            .finish_non_exhaustive()
    }
}

impl PooledConnection {
    pub fn handle(&self) -> &Arc<ConnectionHandle> {
        // Only `Drop` takes the handle out.
        match &self.handle {
            Some(handle) => handle,
            None => unreachable!("pooled connection used after release"),
        }
    }

    pub fn id(&self) -> HandleId {
        self.handle().id()
    }
}

impl std::ops::Deref for PooledConnection {
    type Target = ConnectionHandle;

    fn deref(&self) -> &Self::Target {
        self.handle()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.release(handle);
        }
    }
}
