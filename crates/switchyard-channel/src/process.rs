//! Supervised child processes.
//!
//! Output lines are re-emitted as tracing events under the `backend`
//! target. Exit is observed by a dedicated task and published through a
//! watch channel after stdout has been drained, so any number of holders
//! can wait for it.

use std::collections::HashMap;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use switchyard_protocols::{ChannelError, ExitStatusInfo};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;

/// How long exit reporting waits for stdout to reach EOF. Bounded because
/// a grandchild may inherit the pipe and keep it open.
const STDOUT_DRAIN: Duration = Duration::from_secs(2);

/// Callback invoked for every stdout line.
pub type LineHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// What to run.
#[derive(Debug, Clone, Default)]
pub struct ProcessSpec {
    /// Name used in log events.
    pub label: String,
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl ProcessSpec {
    pub fn new(label: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Replace `{name}` placeholders in every argument.
    pub fn substitute(mut self, name: &str, value: &str) -> Self {
        let placeholder = format!("{{{}}}", name);
        for arg in &mut self.args {
            if arg.contains(&placeholder) {
                *arg = arg.replace(&placeholder, value);
            }
        }
        self
    }
}

/// Handle to a spawned child process.
///
/// Clones share the same exit watch; the process itself is owned by the
/// waiter task and killed if the runtime drops it.
#[derive(Debug, Clone)]
pub struct ManagedProcess {
    label: String,
    pid: Option<u32>,
    exit_rx: watch::Receiver<Option<ExitStatusInfo>>,
}

impl ManagedProcess {
    /// Spawn the process with piped output.
    pub fn spawn(spec: &ProcessSpec, on_stdout: Option<LineHandler>) -> Result<Self, ChannelError> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        let mut child = command
            .spawn()
            .map_err(|e| ChannelError::Spawn(format!("{}: {}", spec.program, e)))?;
        let pid = child.id();
        info!(process = %spec.label, pid = ?pid, "Spawned {} {:?}", spec.program, spec.args);

        let stdout_reader = child.stdout.take().map(|stdout| {
            let label = spec.label.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(target: "backend", process = %label, "{}", line);
                    if let Some(handler) = &on_stdout {
                        handler(&line);
                    }
                }
            })
        });

        if let Some(stderr) = child.stderr.take() {
            let label = spec.label.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(target: "backend", process = %label, "{}", line);
                }
            });
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let label = spec.label.clone();
        tokio::spawn(async move {
            let status = match child.wait().await {
                Ok(status) => ExitStatusInfo {
                    code: status.code(),
                    signal: status.signal(),
                },
                Err(e) => {
                    warn!(process = %label, "Failed to wait for process: {}", e);
                    ExitStatusInfo::default()
                }
            };
            // Exit is published only once stdout is drained, so line
            // handlers have seen everything the process printed.
            if let Some(reader) = stdout_reader {
                if tokio::time::timeout(STDOUT_DRAIN, reader).await.is_err() {
                    debug!(process = %label, "Stdout still open {:?} after exit", STDOUT_DRAIN);
                }
            }
            info!(process = %label, "Process exited with {}", status);
            let _ = exit_tx.send(Some(status));
        });

        Ok(Self {
            label: spec.label.clone(),
            pid,
            exit_rx,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Exit status, if the process has exited.
    pub fn exit_status(&self) -> Option<ExitStatusInfo> {
        *self.exit_rx.borrow()
    }

    pub fn has_exited(&self) -> bool {
        self.exit_status().is_some()
    }

    /// Wait for the process to exit.
    pub async fn wait(&self) -> ExitStatusInfo {
        let mut rx = self.exit_rx.clone();
        match rx.wait_for(Option::is_some).await {
            Ok(status) => (*status).unwrap_or_default(),
            Err(_) => ExitStatusInfo::default(),
        }
    }

    /// Send a signal unless the process is already gone.
    pub fn signal(&self, signal: Signal) -> Result<(), ChannelError> {
        if self.has_exited() {
            return Ok(());
        }
        let Some(pid) = self.pid else {
            return Ok(());
        };
        debug!(process = %self.label, pid, "Sending {:?}", signal);
        kill(Pid::from_raw(pid as i32), signal)
            .map_err(|e| ChannelError::Io(std::io::Error::from(e)))
    }

    /// SIGTERM, then SIGKILL once `grace` has elapsed.
    pub async fn terminate(&self, grace: Duration) -> ExitStatusInfo {
        if let Some(status) = self.exit_status() {
            return status;
        }
        if let Err(e) = self.signal(Signal::SIGTERM) {
            warn!(process = %self.label, "Failed to send SIGTERM: {}", e);
        }
        match tokio::time::timeout(grace, self.wait()).await {
            Ok(status) => status,
            Err(_) => {
                warn!(process = %self.label, "Process ignored SIGTERM for {:?}, killing", grace);
                if let Err(e) = self.signal(Signal::SIGKILL) {
                    warn!(process = %self.label, "Failed to send SIGKILL: {}", e);
                }
                self.wait().await
            }
        }
    }
}
