//! Dispatch gates shared between the queue and the context layer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::Notify;

use crate::classify::CommandClass;

/// Flags that hold queued commands back.
///
/// `switching` is raised for the duration of a context switch; `remote_busy`
/// while a request to the secondary backend is outstanding. Lowering either
/// wakes the dispatcher.
#[derive(Debug, Default)]
pub struct QueueGates {
    switching: AtomicBool,
    remote_busy: AtomicUsize,
    changed: Notify,
}

impl QueueGates {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_switching(&self) -> bool {
        self.switching.load(Ordering::Acquire)
    }

    pub fn is_remote_busy(&self) -> bool {
        self.remote_busy.load(Ordering::Acquire) > 0
    }

    /// Whether a command of `class` must wait right now.
    pub fn blocks(&self, class: CommandClass) -> bool {
        (self.is_switching() && class.context_scoped)
            || (self.is_remote_busy() && !class.unblocking)
    }

    /// Raise the switching gate until the guard drops.
    pub fn begin_switch(self: &Arc<Self>) -> GateGuard {
        self.switching.store(true, Ordering::Release);
        GateGuard {
            gates: Arc::clone(self),
            kind: GateKind::Switch,
        }
    }

    /// Mark a remote request outstanding until the guard drops.
    pub fn begin_remote(self: &Arc<Self>) -> GateGuard {
        self.remote_busy.fetch_add(1, Ordering::AcqRel);
        GateGuard {
            gates: Arc::clone(self),
            kind: GateKind::Remote,
        }
    }

    pub(crate) fn notified(&self) -> tokio::sync::futures::Notified<'_> {
        self.changed.notified()
    }

    /// Wake the dispatcher so it re-evaluates the queue.
    pub fn wake(&self) {
        self.changed.notify_waiters();
    }
}

#[derive(Debug, Clone, Copy)]
enum GateKind {
    Switch,
    Remote,
}

/// Lowers its gate on drop.
#[derive(Debug)]
pub struct GateGuard {
    gates: Arc<QueueGates>,
    kind: GateKind,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        match self.kind {
            GateKind::Switch => self.gates.switching.store(false, Ordering::Release),
            GateKind::Remote => {
                self.gates.remote_busy.fetch_sub(1, Ordering::AcqRel);
            }
        }
        self.gates.wake();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCOPED: CommandClass = CommandClass {
        context_scoped: true,
        unblocking: false,
    };
    const UNBLOCKING: CommandClass = CommandClass {
        context_scoped: false,
        unblocking: true,
    };

    #[test]
    fn test_open_gates_block_nothing() {
        let gates = QueueGates::new();
        assert!(!gates.blocks(SCOPED));
        assert!(!gates.blocks(UNBLOCKING));
    }

    #[test]
    fn test_switch_gate_blocks_scoped_only() {
        let gates = QueueGates::new();
        let guard = gates.begin_switch();
        assert!(gates.blocks(SCOPED));
        assert!(!gates.blocks(UNBLOCKING));
        drop(guard);
        assert!(!gates.is_switching());
    }

    #[test]
    fn test_remote_gate_passes_unblocking() {
        let gates = QueueGates::new();
        let first = gates.begin_remote();
        let second = gates.begin_remote();
        assert!(gates.blocks(SCOPED));
        assert!(!gates.blocks(UNBLOCKING));
        drop(first);
        assert!(gates.is_remote_busy());
        drop(second);
        assert!(!gates.is_remote_busy());
    }
}
