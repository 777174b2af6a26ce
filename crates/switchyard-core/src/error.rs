//! Session-level errors.

use switchyard_protocols::{ChannelError, ContextError, ProxyError, WireStatus};
use switchyard_queue::QueueError;
use thiserror::Error;

/// Errors raised while creating or driving a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("A new session could not be created: {0}")]
    NotCreated(String),

    #[error("Session {0} does not exist")]
    NoSuchSession(String),

    #[error("Startup step '{step}' failed: {source}")]
    Startup {
        step: String,
        #[source]
        source: Box<SessionError>,
    },

    /// The native backend answered with something that is not a response.
    #[error("Native backend protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Proxy(#[from] ProxyError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    pub fn wire_status(&self) -> WireStatus {
        match self {
            Self::NotCreated(_) | Self::Startup { .. } => WireStatus::SessionNotCreated,
            Self::NoSuchSession(_) => WireStatus::NoSuchDriver,
            Self::Channel(err) => err.wire_status(),
            Self::Queue(err) => err.wire_status(),
            Self::Context(err) => err.wire_status(),
            Self::Proxy(err) => err.wire_status(),
            Self::Protocol(_) | Self::Io(_) => WireStatus::UnknownError,
        }
    }
}
