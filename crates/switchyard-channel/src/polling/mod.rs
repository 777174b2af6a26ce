//! Request-per-connection polling channel.
//!
//! The backend connects to our Unix socket, writes one JSON object tagged
//! with `event`, half-closes, and waits. We answer on the same connection
//! with `{"nextCommand": payload}` once a command is available, then close
//! it. The first connection is the backend checking in.

mod driver;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::Value;
use switchyard_config::PollingChannelConfig;
use switchyard_protocols::{BackendChannel, ChannelError, ChannelState, ExitEvent};
use tokio::net::UnixListener;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::process::{LineHandler, ManagedProcess, ProcessSpec};
use driver::{Driver, DriverEvent};

#[cfg(test)]
#[path = "polling_tests.rs"]
mod tests;

/// Environment variable carrying the socket path to the backend.
pub const SOCKET_ENV: &str = "SWITCHYARD_SOCKET";

/// Runtime options for [`PollingChannel`].
#[derive(Debug, Clone)]
pub struct PollingOptions {
    pub socket_path: PathBuf,
    pub process: ProcessSpec,
    /// Stdout pattern that marks the launch as recorded.
    pub launch_marker: Option<Regex>,
    /// Stdout pattern whose first group names the artifact directory.
    pub artifact_pattern: Option<Regex>,
    pub checkin_timeout: Duration,
    pub flakey_retries: u32,
    pub command_timeout: Option<Duration>,
    pub trace_dir: Option<PathBuf>,
    pub remove_trace_dir: bool,
    pub shutdown_grace: Duration,
}

impl PollingOptions {
    pub fn new(socket_path: impl Into<PathBuf>, process: ProcessSpec) -> Self {
        Self {
            socket_path: socket_path.into(),
            process,
            launch_marker: None,
            artifact_pattern: None,
            checkin_timeout: Duration::from_secs(90),
            flakey_retries: 3,
            command_timeout: None,
            trace_dir: None,
            remove_trace_dir: false,
            shutdown_grace: Duration::from_secs(5),
        }
    }

    pub fn from_config(config: &PollingChannelConfig) -> Result<Self, ChannelError> {
        let compile = |field: &str, pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| ChannelError::InvalidConfig(format!("channel.{}: {}", field, e)))
        };

        let mut process = ProcessSpec::new("backend", config.program.clone()).args(config.args.clone());
        process.env = config.env.clone();

        Ok(Self {
            socket_path: config.socket_path.clone(),
            process,
            launch_marker: config
                .launch_marker
                .as_deref()
                .map(|p| compile("launch_marker", p))
                .transpose()?,
            artifact_pattern: Some(compile("artifact_pattern", &config.artifact_pattern)?),
            checkin_timeout: Duration::from_secs(config.checkin_timeout_secs),
            flakey_retries: config.flakey_retries,
            command_timeout: (config.command_timeout_secs > 0)
                .then(|| Duration::from_secs(config.command_timeout_secs)),
            trace_dir: config.trace_dir.clone(),
            remove_trace_dir: config.remove_trace_dir,
            shutdown_grace: Duration::from_millis(config.shutdown_grace_ms),
        })
    }

    fn launch_spec(&self) -> ProcessSpec {
        let socket = self.socket_path.display().to_string();
        let mut spec = self
            .process
            .clone()
            .substitute("socket", &socket)
            .env(SOCKET_ENV, socket);
        if let Some(dir) = &self.trace_dir {
            spec = spec.substitute("trace_dir", &dir.display().to_string());
        }
        spec
    }
}

/// State visible outside the driver task.
pub(crate) struct Shared {
    pub(crate) state: Mutex<ChannelState>,
    pub(crate) pid: Mutex<Option<u32>>,
    pub(crate) exit_tx: broadcast::Sender<ExitEvent>,
}

impl Shared {
    pub(crate) fn set_state(&self, state: ChannelState) {
        let mut current = self.state.lock();
        if *current != state {
            debug!(from = %*current, to = %state, "Polling channel state change");
            *current = state;
        }
    }
}

/// Variant A backend channel.
pub struct PollingChannel {
    options: PollingOptions,
    shared: Arc<Shared>,
    events: Mutex<Option<mpsc::UnboundedSender<DriverEvent>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    start_lock: tokio::sync::Mutex<()>,
}

impl PollingChannel {
    pub fn new(options: PollingOptions) -> Self {
        let (exit_tx, _) = broadcast::channel(16);
        Self {
            options,
            shared: Arc::new(Shared {
                state: Mutex::new(ChannelState::NotStarted),
                pid: Mutex::new(None),
                exit_tx,
            }),
            events: Mutex::new(None),
            driver: Mutex::new(None),
            start_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// PID of the current backend process.
    pub fn pid(&self) -> Option<u32> {
        *self.shared.pid.lock()
    }

    pub fn socket_path(&self) -> &Path {
        &self.options.socket_path
    }

    async fn launch_once(&self, attempt: u32) -> Result<(), ChannelError> {
        remove_stale_socket(&self.options.socket_path).await?;
        let listener = UnixListener::bind(&self.options.socket_path).map_err(|e| {
            ChannelError::Bind(format!("{}: {}", self.options.socket_path.display(), e))
        })?;
        debug!(socket = %self.options.socket_path.display(), attempt, "Backend socket listening");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let accept_task = tokio::spawn(driver::accept_loop(listener, events_tx.clone()));

        let line_tx = events_tx.clone();
        let on_stdout: LineHandler = Arc::new(move |line: &str| {
            let _ = line_tx.send(DriverEvent::Stdout(line.to_string()));
        });
        let process = match ManagedProcess::spawn(&self.options.launch_spec(), Some(on_stdout)) {
            Ok(process) => process,
            Err(e) => {
                accept_task.abort();
                let _ = tokio::fs::remove_file(&self.options.socket_path).await;
                return Err(e);
            }
        };
        *self.shared.pid.lock() = process.pid();

        let exit_tx = events_tx.clone();
        let watched = process.clone();
        tokio::spawn(async move {
            let status = watched.wait().await;
            let _ = exit_tx.send(DriverEvent::Exited(status));
        });

        let (launch_tx, launch_rx) = oneshot::channel();
        let driver = Driver::new(
            &self.options,
            self.shared.clone(),
            process,
            accept_task,
            launch_tx,
        );
        let handle = tokio::spawn(driver.run(events_rx));

        match launch_rx.await {
            Ok(Ok(())) => {
                *self.events.lock() = Some(events_tx);
                *self.driver.lock() = Some(handle);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.await;
                Err(e)
            }
            Err(_) => Err(ChannelError::Closed),
        }
    }

    async fn wipe_trace_dir(&self) {
        if let Some(dir) = &self.options.trace_dir {
            debug!(dir = %dir.display(), "Wiping trace directory before relaunch");
            if let Err(e) = tokio::fs::remove_dir_all(dir).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(dir = %dir.display(), "Failed to wipe trace directory: {}", e);
                }
            }
        }
    }
}

/// Remove a socket file left behind by a previous run.
async fn remove_stale_socket(path: &Path) -> Result<(), ChannelError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!(socket = %path.display(), "Removed stale socket");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ChannelError::Bind(format!(
            "cannot remove stale socket {}: {}",
            path.display(),
            e
        ))),
    }
}

#[async_trait]
impl BackendChannel for PollingChannel {
    fn kind(&self) -> &str {
        "polling"
    }

    fn state(&self) -> ChannelState {
        *self.shared.state.lock()
    }

    async fn start(&self) -> Result<(), ChannelError> {
        let _guard = self.start_lock.lock().await;
        if self.state().is_running() {
            return Ok(());
        }

        let attempts = self.options.flakey_retries + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.shared.set_state(ChannelState::Launching);
            info!(attempt, attempts, "Launching backend");

            match self.launch_once(attempt).await {
                Ok(()) => {
                    info!(attempt, "Backend checked in");
                    return Ok(());
                }
                Err(err) if err.is_flakey_launch() && attempt < attempts => {
                    warn!(attempt, error = %err, "Backend launch failed, retrying");
                    self.wipe_trace_dir().await;
                }
                Err(err) => {
                    self.shared.set_state(ChannelState::Crashed);
                    error!(attempt, error = %err, "Backend failed to start");
                    if err.is_flakey_launch() {
                        return Err(ChannelError::StartFailed {
                            attempts: attempt,
                            source: Box::new(err),
                        });
                    }
                    return Err(err);
                }
            }
        }
    }

    async fn send_command(&self, payload: Value) -> Result<Value, ChannelError> {
        let sender = self.events.lock().clone().ok_or(ChannelError::NotRunning)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        sender
            .send(DriverEvent::Command {
                payload,
                reply: reply_tx,
            })
            .map_err(|_| ChannelError::NotRunning)?;
        reply_rx.await.map_err(|_| ChannelError::Closed)?
    }

    fn subscribe_exit(&self) -> broadcast::Receiver<ExitEvent> {
        self.shared.exit_tx.subscribe()
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        let Some(sender) = self.events.lock().take() else {
            return Ok(());
        };

        let (done_tx, done_rx) = oneshot::channel();
        if sender.send(DriverEvent::Shutdown { done: done_tx }).is_ok() {
            let _ = done_rx.await;
        }
        let handle = self.driver.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("Polling channel shut down");
        Ok(())
    }
}
