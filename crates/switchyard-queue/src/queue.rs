//! Single-flight command queue.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::Value;
use switchyard_protocols::Command;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::classify::{CommandClass, CommandClassifier};
use crate::error::QueueError;
use crate::executor::CommandExecutor;
use crate::gates::QueueGates;
use crate::options::QueueOptions;

/// Outcome delivered to the enqueuer.
pub type CommandResult = Result<Value, QueueError>;

struct QueueEntry {
    seq: u64,
    command: Command,
    class: CommandClass,
    enqueued_at: Instant,
    completion: oneshot::Sender<CommandResult>,
}

#[derive(Default)]
struct QueueState {
    entries: VecDeque<QueueEntry>,
    next_seq: u64,
    closed: Option<String>,
}

struct Inner {
    options: QueueOptions,
    classifier: Arc<dyn CommandClassifier>,
    gates: Arc<QueueGates>,
    state: Mutex<QueueState>,
    busy: watch::Sender<bool>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

/// Per-session FIFO feeding exactly one command at a time to the backend.
#[derive(Clone)]
pub struct CommandQueue {
    inner: Arc<Inner>,
}

impl CommandQueue {
    pub fn new(
        options: QueueOptions,
        classifier: Arc<dyn CommandClassifier>,
        gates: Arc<QueueGates>,
    ) -> Self {
        let (busy, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                options,
                classifier,
                gates,
                state: Mutex::new(QueueState::default()),
                busy,
                dispatcher: Mutex::new(None),
            }),
        }
    }

    pub fn gates(&self) -> &Arc<QueueGates> {
        &self.inner.gates
    }

    /// Spawn the dispatcher task. A second call is ignored.
    pub fn start(&self, executor: Arc<dyn CommandExecutor>) {
        let mut dispatcher = self.inner.dispatcher.lock();
        if dispatcher.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *dispatcher = Some(tokio::spawn(dispatch_loop(inner, executor)));
    }

    /// Accept a command; the receiver fires once with its result.
    pub fn enqueue(&self, command: Command) -> Result<oneshot::Receiver<CommandResult>, QueueError> {
        let class = self.inner.classifier.classify(&command);
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.inner.state.lock();
            if let Some(reason) = &state.closed {
                return Err(QueueError::BackendUnavailable(reason.clone()));
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            debug!(seq, command_id = %command.id, ?class, "Command enqueued");
            state.entries.push_back(QueueEntry {
                seq,
                command,
                class,
                enqueued_at: Instant::now(),
                completion: tx,
            });
        }
        self.inner.gates.wake();
        Ok(rx)
    }

    /// Enqueue a payload and wait for its result.
    pub async fn submit(&self, payload: Value) -> CommandResult {
        let rx = self.enqueue(Command::new(payload))?;
        rx.await.map_err(|_| QueueError::Dropped)?
    }

    /// Fail every queued command and refuse new ones.
    pub fn close(&self, reason: impl Into<String>) {
        close_inner(&self.inner, reason.into());
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed.is_some()
    }

    /// Number of commands waiting for dispatch.
    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a command is currently executing.
    pub fn is_busy(&self) -> bool {
        *self.inner.busy.borrow()
    }

    /// Wait until no command is executing.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.busy.subscribe();
        // The sender lives in `inner`, so this only fails if we were dropped.
        let _ = rx.wait_for(|busy| !*busy).await;
    }

    /// Close the queue and stop the dispatcher.
    pub async fn stop(&self) {
        self.close("queue stopped");
        let handle = self.inner.dispatcher.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Dispatcher task ended abnormally: {}", e);
            }
        }
    }
}

fn close_inner(inner: &Inner, reason: String) {
    let drained: Vec<QueueEntry> = {
        let mut state = inner.state.lock();
        if state.closed.is_none() {
            info!(reason = %reason, "Command queue closed");
            state.closed = Some(reason.clone());
        }
        state.entries.drain(..).collect()
    };
    for entry in drained {
        let _ = entry
            .completion
            .send(Err(QueueError::BackendUnavailable(reason.clone())));
    }
    inner.gates.wake();
}

/// Remove the oldest entry no gate blocks and mark the slot busy.
fn take_next(inner: &Inner) -> Result<Option<QueueEntry>, ()> {
    let mut state = inner.state.lock();
    if state.closed.is_some() {
        return Err(());
    }
    let position = state
        .entries
        .iter()
        .position(|entry| !inner.gates.blocks(entry.class));
    let entry = position.and_then(|i| state.entries.remove(i));
    if entry.is_some() {
        inner.busy.send_replace(true);
    }
    Ok(entry)
}

async fn dispatch_loop(inner: Arc<Inner>, executor: Arc<dyn CommandExecutor>) {
    debug!("Dispatcher started");
    loop {
        let notified = inner.gates.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let entry = match take_next(&inner) {
            Ok(entry) => entry,
            Err(()) => break,
        };

        let Some(entry) = entry else {
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(inner.options.backoff) => {}
            }
            continue;
        };

        debug!(
            seq = entry.seq,
            command_id = %entry.command.id,
            waited_ms = entry.enqueued_at.elapsed().as_millis() as u64,
            "Dispatching command"
        );
        let result = executor.execute(&entry.command).await.map_err(QueueError::from);
        let terminal = match &result {
            Err(e) if e.is_terminal() => Some(e.to_string()),
            _ => None,
        };
        if entry.completion.send(result).is_err() {
            debug!(seq = entry.seq, "Command completed after caller went away");
        }
        inner.busy.send_replace(false);

        if let Some(reason) = terminal {
            warn!(reason = %reason, "Backend gone, failing queued commands");
            close_inner(&inner, reason);
            break;
        }
    }
    inner.busy.send_replace(false);
    debug!("Dispatcher stopped");
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
