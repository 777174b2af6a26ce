//! Queue errors.

use switchyard_protocols::{ChannelError, WireStatus};
use thiserror::Error;

/// Queue error types.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The backend is gone; nothing more will be dispatched.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The backend rejected or failed the command.
    #[error("{0}")]
    Channel(#[from] ChannelError),

    /// The queue dropped the command without an answer.
    #[error("Command dropped before completion")]
    Dropped,
}

impl QueueError {
    /// Whether the queue can serve no further commands after this error.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::BackendUnavailable(_) | Self::Dropped => true,
            Self::Channel(err) => err.is_terminal(),
        }
    }

    pub fn wire_status(&self) -> WireStatus {
        match self {
            Self::Channel(err) => err.wire_status(),
            _ => WireStatus::UnknownError,
        }
    }
}
