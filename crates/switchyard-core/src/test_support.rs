//! Shared fakes for unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use switchyard_config::Config;
use switchyard_protocols::{
    BackendChannel, ChannelError, ChannelState, ExitEvent, ExitStatusInfo,
};
use tokio::sync::broadcast;

use crate::factory::SessionFactory;
use crate::secondary::AttachedLauncher;

type Responder = Box<dyn Fn(&Value) -> Result<Value, ChannelError> + Send + Sync>;

/// In-memory backend channel.
pub(crate) struct FakeChannel {
    state: Mutex<ChannelState>,
    responder: Responder,
    sent: Mutex<Vec<Value>>,
    exit_tx: broadcast::Sender<ExitEvent>,
    fail_start: bool,
    pub(crate) shutdowns: AtomicUsize,
}

impl FakeChannel {
    pub(crate) fn with_responder(
        responder: impl Fn(&Value) -> Result<Value, ChannelError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        let (exit_tx, _) = broadcast::channel(4);
        Arc::new(Self {
            state: Mutex::new(ChannelState::NotStarted),
            responder: Box::new(responder),
            sent: Mutex::new(Vec::new()),
            exit_tx,
            fail_start: false,
            shutdowns: AtomicUsize::new(0),
        })
    }

    /// Answers every command with `{status: 0, value: payload}`.
    pub(crate) fn echo() -> Arc<Self> {
        Self::with_responder(|payload| Ok(json!({"status": 0, "value": payload})))
    }

    pub(crate) fn failing_start() -> Arc<Self> {
        let (exit_tx, _) = broadcast::channel(4);
        Arc::new(Self {
            state: Mutex::new(ChannelState::NotStarted),
            responder: Box::new(|_| Err(ChannelError::NotRunning)),
            sent: Mutex::new(Vec::new()),
            exit_tx,
            fail_start: true,
            shutdowns: AtomicUsize::new(0),
        })
    }

    pub(crate) fn sent(&self) -> Vec<Value> {
        self.sent.lock().clone()
    }

    /// Simulate the backend process dying while idle.
    pub(crate) fn crash(&self, code: i32) {
        *self.state.lock() = ChannelState::Crashed;
        let status = ExitStatusInfo {
            code: Some(code),
            signal: None,
        };
        let _ = self.exit_tx.send(ExitEvent::new(status, None, false));
    }
}

#[async_trait]
impl BackendChannel for FakeChannel {
    fn kind(&self) -> &str {
        "fake"
    }

    fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    async fn start(&self) -> Result<(), ChannelError> {
        if self.fail_start {
            return Err(ChannelError::StartFailed {
                attempts: 1,
                source: Box::new(ChannelError::NeverCheckedIn("launch timeout".to_string())),
            });
        }
        *self.state.lock() = ChannelState::Ready;
        Ok(())
    }

    async fn send_command(&self, payload: Value) -> Result<Value, ChannelError> {
        if !self.state().is_running() {
            return Err(ChannelError::NotRunning);
        }
        self.sent.lock().push(payload.clone());
        (self.responder)(&payload)
    }

    fn subscribe_exit(&self) -> broadcast::Receiver<ExitEvent> {
        self.exit_tx.subscribe()
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        *self.state.lock() = ChannelState::Stopped;
        Ok(())
    }
}

/// Factory wired to `channel` and a secondary server at `secondary_port`.
pub(crate) fn factory_with(
    config: Config,
    channel: Arc<FakeChannel>,
    secondary_port: u16,
) -> SessionFactory {
    SessionFactory::new(Arc::new(config))
        .with_channel_builder(Arc::new(move |_| {
            let channel: Arc<dyn BackendChannel> = channel.clone();
            Ok(channel)
        }))
        .with_launcher(Arc::new(AttachedLauncher::new(
            "127.0.0.1",
            secondary_port,
            "/wd/hub",
        )))
}
