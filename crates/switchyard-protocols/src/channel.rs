//! Backend channel protocol definitions.
//!
//! A backend channel owns one external automation process and exchanges
//! exactly one command/result pair with it at a time.
//!
//! ## Lifecycle
//!
//! `NotStarted -> Launching -> Ready <-> Busy -> (Crashed | ShuttingDown -> Stopped)`

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::ChannelError;

#[cfg(test)]
#[path = "channel_tests.rs"]
mod tests;

/// Channel lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    #[default]
    NotStarted,
    Launching,
    Ready,
    Busy,
    Crashed,
    ShuttingDown,
    Stopped,
}

impl ChannelState {
    /// Whether commands can be accepted in this state.
    pub fn is_running(self) -> bool {
        matches!(self, Self::Ready | Self::Busy)
    }

    /// Whether the channel has reached a final state.
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Crashed | Self::Stopped)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "not_started",
            Self::Launching => "launching",
            Self::Ready => "ready",
            Self::Busy => "busy",
            Self::Crashed => "crashed",
            Self::ShuttingDown => "shutting_down",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// How a process terminated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatusInfo {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal, if killed by one.
    pub signal: Option<i32>,
}

impl fmt::Display for ExitStatusInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => f.write_str("unknown exit status"),
        }
    }
}

/// Notification that the backend went away without being asked to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitEvent {
    pub status: ExitStatusInfo,
    /// Trace/artifact directory reported by the backend, if any.
    pub artifact_dir: Option<PathBuf>,
    /// Whether a command was in flight when the backend died.
    pub during_command: bool,
    pub at: DateTime<Utc>,
}

impl ExitEvent {
    pub fn new(status: ExitStatusInfo, artifact_dir: Option<PathBuf>, during_command: bool) -> Self {
        Self {
            status,
            artifact_dir,
            during_command,
            at: Utc::now(),
        }
    }
}

/// Transport to one external automation process.
///
/// Implementations serialize commands themselves, but callers are expected
/// to keep at most one command outstanding.
#[async_trait]
pub trait BackendChannel: Send + Sync {
    /// Short name for logs, e.g. "polling" or "stream".
    fn kind(&self) -> &str;

    /// Current lifecycle state.
    fn state(&self) -> ChannelState;

    /// Launch/connect the backend. Returns once it is ready for commands.
    async fn start(&self) -> Result<(), ChannelError>;

    /// Send one command and wait for its result.
    async fn send_command(&self, payload: Value) -> Result<Value, ChannelError>;

    /// Subscribe to unexpected-exit notifications.
    fn subscribe_exit(&self) -> broadcast::Receiver<ExitEvent>;

    /// Stop the backend. Idempotent.
    async fn shutdown(&self) -> Result<(), ChannelError>;
}
