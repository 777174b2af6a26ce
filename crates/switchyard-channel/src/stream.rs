//! Persistent length-prefixed stream channel.
//!
//! One TCP connection for the whole session. The peer's first frame is a
//! greeting naming the actor (`from`) that every outbound command is
//! addressed to (`to`). One command is in flight at a time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use switchyard_config::StreamChannelConfig;
use switchyard_protocols::{
    BackendChannel, ChannelError, ChannelState, ExitEvent, ExitStatusInfo, WireResponse,
};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, warn};

use crate::codec::{Frame, FrameCodec};
use crate::process::{ManagedProcess, ProcessSpec};

#[cfg(test)]
#[path = "stream_tests.rs"]
mod tests;

type Reply = oneshot::Sender<Result<Value, ChannelError>>;

/// Runtime options for [`StreamChannel`].
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub host: String,
    pub port: u16,
    /// Process to launch before connecting, if any.
    pub process: Option<ProcessSpec>,
    pub connect_retries: u32,
    pub connect_backoff: Duration,
    pub command_timeout: Option<Duration>,
    pub max_frame_bytes: usize,
    pub shutdown_grace: Duration,
}

impl StreamOptions {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            process: None,
            connect_retries: 10,
            connect_backoff: Duration::from_millis(500),
            command_timeout: None,
            max_frame_bytes: 16 * 1024 * 1024,
            shutdown_grace: Duration::from_secs(5),
        }
    }

    pub fn from_config(config: &StreamChannelConfig) -> Self {
        let process = config.program.as_ref().map(|program| {
            let mut spec = ProcessSpec::new("backend", program.clone()).args(config.args.clone());
            spec.env = config.env.clone();
            spec.substitute("port", &config.port.to_string())
        });
        Self {
            host: config.host.clone(),
            port: config.port,
            process,
            connect_retries: config.connect_retries,
            connect_backoff: Duration::from_millis(config.connect_backoff_ms),
            command_timeout: (config.command_timeout_secs > 0)
                .then(|| Duration::from_secs(config.command_timeout_secs)),
            max_frame_bytes: config.max_frame_bytes,
            shutdown_grace: Duration::from_millis(config.shutdown_grace_ms),
        }
    }
}

#[derive(Default)]
struct Inbox {
    pending: Option<Reply>,
    /// Replies still owed for commands whose callers timed out.
    abandoned: usize,
}

struct Shared {
    state: Mutex<ChannelState>,
    inbox: Mutex<Inbox>,
    shutting_down: AtomicBool,
    exit_tx: broadcast::Sender<ExitEvent>,
}

impl Shared {
    fn set_state(&self, state: ChannelState) {
        let mut current = self.state.lock();
        if *current != state {
            debug!(from = %*current, to = %state, "Stream channel state change");
            *current = state;
        }
    }

    fn deliver(&self, result: Result<Value, ChannelError>) {
        let mut inbox = self.inbox.lock();
        if inbox.abandoned > 0 {
            inbox.abandoned -= 1;
            info!("Discarding late reply for a timed-out command");
            return;
        }
        match inbox.pending.take() {
            Some(reply) => {
                let _ = reply.send(result);
            }
            None => warn!("Got a frame when we weren't expecting one, ignoring it"),
        }
    }

    fn on_disconnect(&self, process: Option<&ManagedProcess>) {
        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        let pending = self.inbox.lock().pending.take();
        let during_command = pending.is_some();
        let status = process
            .and_then(ManagedProcess::exit_status)
            .unwrap_or(ExitStatusInfo { code: Some(0), signal: None });
        if let Some(reply) = pending {
            let _ = reply.send(Err(ChannelError::DiedMidCommand { code: status.code }));
        }
        error!(during_command, "Backend stream closed unexpectedly");
        self.set_state(ChannelState::Crashed);
        let _ = self
            .exit_tx
            .send(ExitEvent::new(status, None, during_command));
    }
}

/// Map an inbound frame body to a command result.
fn respond(data: Value) -> Result<Value, ChannelError> {
    if let Some(error) = data.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(ChannelError::Remote(message));
    }
    if data.get("id").is_some() {
        return Ok(data);
    }
    let value = data.get("value").cloned().unwrap_or(Value::Null);
    Ok(json!({ "status": 0, "value": value }))
}

/// Variant B backend channel.
pub struct StreamChannel {
    options: StreamOptions,
    shared: Arc<Shared>,
    actor: Mutex<Option<String>>,
    writer: tokio::sync::Mutex<Option<FramedWrite<OwnedWriteHalf, FrameCodec>>>,
    command_lock: tokio::sync::Mutex<()>,
    process: Mutex<Option<ManagedProcess>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl StreamChannel {
    pub fn new(options: StreamOptions) -> Self {
        let (exit_tx, _) = broadcast::channel(16);
        Self {
            options,
            shared: Arc::new(Shared {
                state: Mutex::new(ChannelState::NotStarted),
                inbox: Mutex::new(Inbox::default()),
                shutting_down: AtomicBool::new(false),
                exit_tx,
            }),
            actor: Mutex::new(None),
            writer: tokio::sync::Mutex::new(None),
            command_lock: tokio::sync::Mutex::new(()),
            process: Mutex::new(None),
            reader: Mutex::new(None),
        }
    }

    /// Actor named by the peer's greeting.
    pub fn actor(&self) -> Option<String> {
        self.actor.lock().clone()
    }

    async fn connect(&self, process: Option<&ManagedProcess>) -> Result<TcpStream, ChannelError> {
        let addr = format!("{}:{}", self.options.host, self.options.port);
        let mut attempt = 0;
        loop {
            match TcpStream::connect(&addr).await {
                Ok(stream) => {
                    debug!(%addr, "Backend stream connected");
                    return Ok(stream);
                }
                Err(e) => {
                    if let Some(status) = process.and_then(ManagedProcess::exit_status) {
                        return Err(ChannelError::CrashedOnStartup { code: status.code });
                    }
                    if attempt >= self.options.connect_retries {
                        return Err(ChannelError::Connection(format!("{}: {}", addr, e)));
                    }
                    attempt += 1;
                    debug!(%addr, attempt, "Could not connect yet; retrying");
                    tokio::time::sleep(self.options.connect_backoff).await;
                }
            }
        }
    }

    async fn read_greeting(
        &self,
        reader: &mut FramedRead<OwnedReadHalf, FrameCodec>,
    ) -> Result<String, ChannelError> {
        match reader.next().await {
            Some(Ok(Frame::Message(greeting))) => {
                debug!("Backend greeting: {}", greeting);
                greeting
                    .get("from")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| ChannelError::Protocol("greeting has no 'from' actor".to_string()))
            }
            Some(Ok(Frame::Malformed { reason, .. })) => Err(ChannelError::Protocol(format!(
                "malformed greeting: {}",
                reason
            ))),
            Some(Err(e)) => Err(e),
            None => Err(ChannelError::Connection(
                "stream closed before greeting".to_string(),
            )),
        }
    }

    async fn launch(&self) -> Result<(), ChannelError> {
        let process = match &self.options.process {
            Some(spec) => Some(ManagedProcess::spawn(spec, None)?),
            None => None,
        };
        *self.process.lock() = process.clone();

        let stream = self.connect(process.as_ref()).await?;
        let (read_half, write_half) = stream.into_split();
        let mut reader = FramedRead::new(read_half, FrameCodec::new(self.options.max_frame_bytes));
        let writer = FramedWrite::new(write_half, FrameCodec::new(self.options.max_frame_bytes));

        let actor = self.read_greeting(&mut reader).await?;
        info!(%actor, "Backend stream ready");
        *self.actor.lock() = Some(actor);
        *self.writer.lock().await = Some(writer);

        let shared = self.shared.clone();
        let handle = tokio::spawn(async move {
            while let Some(item) = reader.next().await {
                match item {
                    Ok(Frame::Message(data)) => {
                        debug!("Backend frame: {}", data);
                        shared.deliver(respond(data));
                    }
                    Ok(Frame::Malformed { raw, reason }) => {
                        error!("Couldn't parse backend frame ({}): {}", reason, raw);
                        shared.deliver(Err(ChannelError::Protocol(format!(
                            "malformed frame: {}",
                            reason
                        ))));
                    }
                    Err(e) => {
                        error!("Fatal backend stream error: {}", e);
                        break;
                    }
                }
            }
            shared.on_disconnect(process.as_ref());
        });
        *self.reader.lock() = Some(handle);
        Ok(())
    }

    async fn exchange(&self, payload: Value) -> Result<Value, ChannelError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.shared.inbox.lock().pending = Some(reply_tx);

        let sent = {
            let mut writer = self.writer.lock().await;
            match writer.as_mut() {
                Some(writer) => writer.send(payload).await,
                None => Err(ChannelError::NotRunning),
            }
        };
        if let Err(e) = sent {
            self.shared.inbox.lock().pending = None;
            return Err(e);
        }

        let received = match self.options.command_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, reply_rx).await {
                Ok(received) => received,
                Err(_) => {
                    let mut inbox = self.shared.inbox.lock();
                    if inbox.pending.take().is_some() {
                        inbox.abandoned += 1;
                    }
                    warn!(?timeout, "Backend command timed out");
                    return Ok(WireResponse::failure(format!(
                        "Command timed out after {:?}",
                        timeout
                    )));
                }
            },
            None => reply_rx.await,
        };
        received.map_err(|_| ChannelError::Closed)?
    }
}

#[async_trait]
impl BackendChannel for StreamChannel {
    fn kind(&self) -> &str {
        "stream"
    }

    fn state(&self) -> ChannelState {
        *self.shared.state.lock()
    }

    async fn start(&self) -> Result<(), ChannelError> {
        let _lane = self.command_lock.lock().await;
        if self.state().is_running() {
            return Ok(());
        }
        self.shared.shutting_down.store(false, Ordering::SeqCst);
        self.shared.set_state(ChannelState::Launching);

        match self.launch().await {
            Ok(()) => {
                self.shared.set_state(ChannelState::Ready);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Backend stream failed to start");
                let process = self.process.lock().take();
                if let Some(process) = process {
                    process.terminate(self.options.shutdown_grace).await;
                }
                self.shared.set_state(ChannelState::Crashed);
                Err(e)
            }
        }
    }

    async fn send_command(&self, payload: Value) -> Result<Value, ChannelError> {
        let _lane = self.command_lock.lock().await;
        if !self.state().is_running() {
            return Err(ChannelError::NotRunning);
        }

        let mut payload = payload;
        let actor = self.actor();
        match payload.as_object_mut() {
            Some(map) => {
                if let Some(actor) = actor {
                    map.insert("to".to_string(), Value::String(actor));
                }
            }
            None => {
                return Err(ChannelError::Protocol(
                    "stream commands must be JSON objects".to_string(),
                ));
            }
        }

        debug!("Sending command to backend: {}", payload);
        self.shared.set_state(ChannelState::Busy);
        let result = self.exchange(payload).await;
        if self.state() == ChannelState::Busy {
            self.shared.set_state(ChannelState::Ready);
        }
        result
    }

    fn subscribe_exit(&self) -> broadcast::Receiver<ExitEvent> {
        self.shared.exit_tx.subscribe()
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        if matches!(self.state(), ChannelState::NotStarted | ChannelState::Stopped) {
            return Ok(());
        }
        self.shared.shutting_down.store(true, Ordering::SeqCst);
        self.shared.set_state(ChannelState::ShuttingDown);

        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.close().await;
        }
        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            reader.abort();
        }
        let pending = self.shared.inbox.lock().pending.take();
        if let Some(reply) = pending {
            let _ = reply.send(Err(ChannelError::Closed));
        }
        let process = self.process.lock().take();
        if let Some(process) = process {
            let status = process.terminate(self.options.shutdown_grace).await;
            info!(%status, "Backend stopped");
        }

        self.shared.set_state(ChannelState::Stopped);
        info!("Stream channel shut down");
        Ok(())
    }
}
