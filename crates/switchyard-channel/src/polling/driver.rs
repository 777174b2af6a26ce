//! Single-task state machine behind [`super::PollingChannel`].
//!
//! Holds one pending-command slot (sent, awaiting its result), one
//! queued-command slot (accepted, awaiting a connection) and one parked
//! connection (the backend waiting for work).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde_json::{Value, json};
use switchyard_protocols::{
    ChannelError, ChannelState, ExitEvent, ExitStatusInfo, WireResponse,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};

use super::{PollingOptions, Shared};
use crate::process::ManagedProcess;

type Reply = oneshot::Sender<Result<Value, ChannelError>>;

pub(crate) enum DriverEvent {
    /// A connection whose request body has been read to EOF.
    Inbound { stream: UnixStream, body: Vec<u8> },
    Command { payload: Value, reply: Reply },
    Stdout(String),
    Exited(ExitStatusInfo),
    Shutdown { done: oneshot::Sender<()> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// A command written to the backend and not yet answered.
struct Pending {
    /// `None` once the caller has been answered by a timeout.
    reply: Option<Reply>,
    deadline: Option<Instant>,
}

impl Pending {
    fn is_awaited(&self) -> bool {
        self.reply.is_some()
    }

    fn complete(mut self, result: Result<Value, ChannelError>) {
        match self.reply.take() {
            Some(reply) => {
                let _ = reply.send(result);
            }
            None => info!("Discarding late result for a timed-out command"),
        }
    }
}

struct Queued {
    payload: Value,
    reply: Reply,
}

pub(crate) struct Driver {
    shared: Arc<Shared>,
    process: ManagedProcess,
    accept_task: JoinHandle<()>,
    socket_path: PathBuf,
    launch_marker: Option<Regex>,
    artifact_pattern: Option<Regex>,
    launch_recorded: bool,
    launch_tx: Option<oneshot::Sender<Result<(), ChannelError>>>,
    launch_deadline: Instant,
    checkin_timeout: Duration,
    command_timeout: Option<Duration>,
    shutdown_grace: Duration,
    trace_dir: Option<PathBuf>,
    remove_trace_dir: bool,
    pending: Option<Pending>,
    queued: Option<Queued>,
    parked: Option<UnixStream>,
    artifact_dir: Option<PathBuf>,
}

impl Driver {
    pub(crate) fn new(
        options: &PollingOptions,
        shared: Arc<Shared>,
        process: ManagedProcess,
        accept_task: JoinHandle<()>,
        launch_tx: oneshot::Sender<Result<(), ChannelError>>,
    ) -> Self {
        Self {
            shared,
            process,
            accept_task,
            socket_path: options.socket_path.clone(),
            launch_marker: options.launch_marker.clone(),
            artifact_pattern: options.artifact_pattern.clone(),
            // Without a marker the launch counts as recorded at spawn.
            launch_recorded: options.launch_marker.is_none(),
            launch_tx: Some(launch_tx),
            launch_deadline: Instant::now() + options.checkin_timeout,
            checkin_timeout: options.checkin_timeout,
            command_timeout: options.command_timeout,
            shutdown_grace: options.shutdown_grace,
            trace_dir: options.trace_dir.clone(),
            remove_trace_dir: options.remove_trace_dir,
            pending: None,
            queued: None,
            parked: None,
            artifact_dir: None,
        }
    }

    fn launching(&self) -> bool {
        self.launch_tx.is_some()
    }

    fn next_deadline(&self) -> Option<Instant> {
        if self.launching() {
            Some(self.launch_deadline)
        } else {
            self.pending.as_ref().and_then(|p| p.deadline)
        }
    }

    pub(crate) async fn run(mut self, mut events: mpsc::UnboundedReceiver<DriverEvent>) {
        loop {
            let deadline = self.next_deadline();
            let flow = tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => Flow::Stop,
                },
                _ = sleep_until_opt(deadline) => self.on_deadline().await,
            };
            if flow == Flow::Stop {
                break;
            }
        }
        self.accept_task.abort();
        debug!("Polling driver stopped");
    }

    async fn handle(&mut self, event: DriverEvent) -> Flow {
        match event {
            DriverEvent::Stdout(line) => {
                self.on_stdout(&line);
                Flow::Continue
            }
            DriverEvent::Inbound { stream, body } => {
                self.on_inbound(stream, &body).await;
                Flow::Continue
            }
            DriverEvent::Command { payload, reply } => {
                self.on_command(payload, reply).await;
                Flow::Continue
            }
            DriverEvent::Exited(status) => self.on_exit(status).await,
            DriverEvent::Shutdown { done } => {
                self.on_shutdown().await;
                let _ = done.send(());
                Flow::Stop
            }
        }
    }

    fn on_stdout(&mut self, line: &str) {
        if !self.launch_recorded
            && self.launch_marker.as_ref().is_some_and(|re| re.is_match(line))
        {
            debug!("Launch marker seen");
            self.launch_recorded = true;
        }
        if let Some(dir) = self
            .artifact_pattern
            .as_ref()
            .and_then(|re| re.captures(line))
            .and_then(|caps| caps.get(1))
        {
            info!(dir = dir.as_str(), "Backend reported artifact directory");
            self.artifact_dir = Some(PathBuf::from(dir.as_str()));
        }
    }

    async fn on_inbound(&mut self, stream: UnixStream, body: &[u8]) {
        if let Some(launch_tx) = self.launch_tx.take() {
            debug!("Backend socket client checked in");
            self.shared.set_state(ChannelState::Ready);
            let _ = launch_tx.send(Ok(()));
            self.serve(stream).await;
            return;
        }

        let data: Value = match serde_json::from_slice(body) {
            Ok(data) => data,
            Err(e) => {
                error!(
                    "Couldn't parse JSON from backend socket: {} ({})",
                    e,
                    String::from_utf8_lossy(body)
                );
                json!({
                    "event": "cmd",
                    "result": WireResponse::failure("Error parsing socket data from backend"),
                })
            }
        };

        match data.get("event").and_then(Value::as_str) {
            Some("cmd") => {
                self.on_result(data.get("result").cloned());
                self.serve(stream).await;
            }
            Some(other) => {
                error!(event = other, "Backend asked for an unknown event");
            }
            None => {
                error!("Backend socket data came in without event: {}", data);
            }
        }
    }

    fn on_result(&mut self, result: Option<Value>) {
        match (result, self.pending.take()) {
            (Some(_), None) => info!("Got a result when we weren't expecting one, ignoring it"),
            (Some(result), Some(pending)) => {
                debug!("Got result from backend: {}", result);
                pending.complete(Ok(result));
            }
            (None, Some(pending)) => {
                warn!("Backend didn't send a result even though we were expecting one");
                pending.complete(Ok(WireResponse::failure(
                    "Backend answered without a result",
                )));
            }
            (None, None) => {}
        }
        self.refresh_state();
    }

    /// Answer a waiting connection with the queued command, or park it.
    async fn serve(&mut self, stream: UnixStream) {
        match self.queued.take() {
            Some(queued) => self.dispatch(stream, queued).await,
            None => {
                if self.parked.replace(stream).is_some() {
                    warn!("Backend opened a second waiting connection, dropping the first");
                }
            }
        }
    }

    async fn dispatch(&mut self, mut stream: UnixStream, queued: Queued) {
        let message = json!({ "nextCommand": queued.payload });
        debug!("Sending command to backend: {}", message);

        let written = async {
            stream.write_all(message.to_string().as_bytes()).await?;
            stream.shutdown().await
        }
        .await;

        match written {
            Ok(()) => {
                self.pending = Some(Pending {
                    reply: Some(queued.reply),
                    deadline: self.command_timeout.map(|t| Instant::now() + t),
                });
            }
            Err(e) => {
                warn!("Failed to hand command to backend: {}", e);
                let _ = queued.reply.send(Err(ChannelError::Connection(e.to_string())));
            }
        }
        self.refresh_state();
    }

    async fn on_command(&mut self, payload: Value, reply: Reply) {
        if !self.shared.state.lock().is_running() {
            let _ = reply.send(Err(ChannelError::NotRunning));
            return;
        }
        if self.queued.is_some() || self.pending.as_ref().is_some_and(Pending::is_awaited) {
            let _ = reply.send(Err(ChannelError::Busy));
            return;
        }

        let queued = Queued { payload, reply };
        if self.pending.is_none() {
            if let Some(stream) = self.parked.take() {
                self.dispatch(stream, queued).await;
                return;
            }
        }
        self.queued = Some(queued);
        self.refresh_state();
    }

    async fn on_exit(&mut self, status: ExitStatusInfo) -> Flow {
        if self.launching() {
            let err = if self.launch_recorded {
                ChannelError::NeverCheckedIn(format!("backend exited with {} before checking in", status))
            } else {
                ChannelError::CrashedOnStartup { code: status.code }
            };
            self.fail_launch(err).await;
            return Flow::Stop;
        }

        let during_command = self.pending.as_ref().is_some_and(Pending::is_awaited) || self.queued.is_some();
        error!(%status, during_command, "Backend exited unexpectedly");

        let died = || ChannelError::DiedMidCommand { code: status.code };
        if let Some(pending) = self.pending.take() {
            pending.complete(Err(died()));
        }
        if let Some(queued) = self.queued.take() {
            let _ = queued.reply.send(Err(died()));
        }
        self.parked = None;
        self.shared.set_state(ChannelState::Crashed);
        self.cleanup().await;

        let _ = self.shared.exit_tx.send(ExitEvent::new(
            status,
            self.artifact_dir.clone(),
            during_command,
        ));
        Flow::Stop
    }

    async fn on_shutdown(&mut self) {
        self.shared.set_state(ChannelState::ShuttingDown);
        if let Some(pending) = self.pending.take() {
            pending.complete(Err(ChannelError::Closed));
        }
        if let Some(queued) = self.queued.take() {
            let _ = queued.reply.send(Err(ChannelError::Closed));
        }
        self.parked = None;

        let status = self.process.terminate(self.shutdown_grace).await;
        info!(%status, "Backend stopped");
        self.cleanup().await;
        self.shared.set_state(ChannelState::Stopped);
    }

    async fn on_deadline(&mut self) -> Flow {
        if self.launching() {
            error!(timeout = ?self.checkin_timeout, "Backend socket client never checked in; timing out");
            self.process.terminate(self.shutdown_grace).await;
            self.fail_launch(ChannelError::NeverCheckedIn(format!(
                "no check-in within {:?}",
                self.checkin_timeout
            )))
            .await;
            return Flow::Stop;
        }

        if let Some(pending) = self.pending.as_mut() {
            if let Some(reply) = pending.reply.take() {
                warn!(timeout = ?self.command_timeout, "Backend command timed out");
                let message = match self.command_timeout {
                    Some(timeout) => format!("Command timed out after {:?}", timeout),
                    None => "Command timed out".to_string(),
                };
                let _ = reply.send(Ok(WireResponse::failure(message)));
            }
            pending.deadline = None;
        }
        self.refresh_state();
        Flow::Continue
    }

    async fn fail_launch(&mut self, err: ChannelError) {
        warn!(error = %err, "Backend launch attempt failed");
        self.process.terminate(self.shutdown_grace).await;
        let _ = tokio::fs::remove_file(&self.socket_path).await;
        if let Some(launch_tx) = self.launch_tx.take() {
            let _ = launch_tx.send(Err(err));
        }
    }

    async fn cleanup(&mut self) {
        self.accept_task.abort();
        let _ = tokio::fs::remove_file(&self.socket_path).await;
        if self.remove_trace_dir {
            let dirs = self.trace_dir.iter().chain(self.artifact_dir.iter());
            for dir in dirs {
                debug!(dir = %dir.display(), "Removing trace directory");
                if let Err(e) = tokio::fs::remove_dir_all(dir).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(dir = %dir.display(), "Failed to remove trace directory: {}", e);
                    }
                }
            }
        }
    }

    /// Busy while a caller is waiting on the backend.
    fn refresh_state(&self) {
        let busy = self.queued.is_some() || self.pending.as_ref().is_some_and(Pending::is_awaited);
        let mut state = self.shared.state.lock();
        if state.is_running() {
            *state = if busy {
                ChannelState::Busy
            } else {
                ChannelState::Ready
            };
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Accept backend connections and read each request to EOF.
pub(crate) async fn accept_loop(listener: UnixListener, events: mpsc::UnboundedSender<DriverEvent>) {
    loop {
        match listener.accept().await {
            Ok((mut stream, _)) => {
                let events = events.clone();
                tokio::spawn(async move {
                    let mut body = Vec::new();
                    match stream.read_to_end(&mut body).await {
                        Ok(_) => {
                            let _ = events.send(DriverEvent::Inbound { stream, body });
                        }
                        Err(e) => warn!("Failed to read from backend connection: {}", e),
                    }
                });
            }
            Err(e) => {
                error!("Backend socket accept failed: {}", e);
                break;
            }
        }
    }
}
