use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::identity::PeerId;

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Bookkeeping for one live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: u64,
    pub peer: PeerId,
    pub remote_addr: SocketAddr,
    pub protocol: String,
    pub direction: Direction,
}

/// Live connection tasks plus the token that cancels all of them.
///
/// Every reader, writer and accept loop is spawned through the registry, so
/// shutdown can cancel and join them instead of abandoning them.
#[derive(Clone, Debug)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Debug)]
struct RegistryInner {
    tracker: TaskTracker,
    cancel: CancellationToken,
    active: Mutex<HashMap<u64, ConnectionInfo>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                tracker: TaskTracker::new(),
                cancel: CancellationToken::new(),
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Token cancelled when the registry shuts down.
    pub fn child_token(&self) -> CancellationToken {
        self.inner.cancel.child_token()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Spawn a tracked task.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.inner.tracker.spawn(task)
    }

    /// Record a live connection until the returned guard is dropped.
    pub fn register(&self, info: ConnectionInfo) -> ActiveConnection {
        debug!(conn = info.id, peer = %info.peer, "connection registered");
        let id = info.id;
        self.lock().insert(id, info);
        ActiveConnection {
            registry: self.clone(),
            id,
        }
    }

    /// Snapshot of live connections, ordered by id.
    pub fn active(&self) -> Vec<ConnectionInfo> {
        let mut active: Vec<_> = self.lock().values().cloned().collect();
        active.sort_by_key(|info| info.id);
        active
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    /// Number of tracked tasks still running.
    pub fn task_count(&self) -> usize {
        self.inner.tracker.len()
    }

    /// Cancel every task and wait up to `grace` for them to finish.
    ///
    /// Returns `true` when all tasks ended in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        info!(
            connections = self.active_count(),
            tasks = self.task_count(),
            "shutting down connections"
        );
        self.inner.cancel.cancel();
        self.inner.tracker.close();

        match tokio::time::timeout(grace, self.inner.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    tasks = self.task_count(),
                    ?grace,
                    "tasks still running after shutdown grace period"
                );
                false
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, ConnectionInfo>> {
        self.inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes its connection from the registry when dropped.
#[derive(Debug)]
pub struct ActiveConnection {
    registry: ConnectionRegistry,
    id: u64,
}

impl ActiveConnection {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.id);
        debug!(conn = self.id, "connection unregistered");
    }
}
