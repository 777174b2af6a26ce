//! Serialization of requests to the secondary backend.

use std::sync::Arc;

use switchyard_queue::{GateGuard, QueueGates};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One outstanding remote operation at a time.
///
/// Proxied requests enter through [`RemoteLane::enter`], which also raises
/// the queue's remote-busy gate. Context switches use [`RemoteLane::hold`]
/// to keep proxied requests out without gating native commands.
pub struct RemoteLane {
    lock: Arc<Mutex<()>>,
    gates: Arc<QueueGates>,
}

/// Held for the duration of a proxied request.
pub struct RemoteGuard {
    _gate: GateGuard,
    _permit: OwnedMutexGuard<()>,
}

impl RemoteLane {
    pub fn new(gates: Arc<QueueGates>) -> Self {
        Self {
            lock: Arc::new(Mutex::new(())),
            gates,
        }
    }

    pub async fn enter(&self) -> RemoteGuard {
        let permit = Arc::clone(&self.lock).lock_owned().await;
        RemoteGuard {
            _gate: self.gates.begin_remote(),
            _permit: permit,
        }
    }

    pub async fn hold(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.lock).lock_owned().await
    }

    pub fn is_busy(&self) -> bool {
        self.gates.is_remote_busy()
    }
}
