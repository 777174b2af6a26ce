//! Backend channel errors.

use thiserror::Error;

use crate::types::WireStatus;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Invalid channel configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to bind backend socket: {0}")]
    Bind(String),

    #[error("Failed to spawn backend process: {0}")]
    Spawn(String),

    #[error("Backend crashed on startup (exit code {code:?})")]
    CrashedOnStartup { code: Option<i32> },

    #[error("Backend never checked in: {0}")]
    NeverCheckedIn(String),

    #[error("Backend failed to start after {attempts} attempt(s): {source}")]
    StartFailed {
        attempts: u32,
        #[source]
        source: Box<ChannelError>,
    },

    #[error("Backend connection failed: {0}")]
    Connection(String),

    #[error("Backend is not running")]
    NotRunning,

    #[error("Backend already has a command in flight")]
    Busy,

    #[error("Backend died mid-command (exit code {code:?})")]
    DiedMidCommand { code: Option<i32> },

    #[error("Backend protocol error: {0}")]
    Protocol(String),

    #[error("Backend returned an error: {0}")]
    Remote(String),

    #[error("Backend channel closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChannelError {
    /// Whether the failure means no further command can be served.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::NotRunning | Self::DiedMidCommand { .. } | Self::Closed
        )
    }

    /// Whether a failed launch may be retried with a fresh process.
    pub fn is_flakey_launch(&self) -> bool {
        matches!(self, Self::CrashedOnStartup { .. } | Self::NeverCheckedIn(_))
    }

    pub fn wire_status(&self) -> WireStatus {
        WireStatus::UnknownError
    }
}
