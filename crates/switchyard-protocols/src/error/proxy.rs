//! Secondary backend and reverse-proxy errors.

use thiserror::Error;

use crate::types::WireStatus;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Failed to launch secondary server: {0}")]
    Launch(String),

    #[error("Secondary server refused connection: {0}")]
    ConnectionRefused(String),

    #[error("Secondary session not created: {0}")]
    SessionNotCreated(String),

    #[error("Proxy request failed: {0}")]
    Request(String),

    #[error("Invalid response from secondary server: {0}")]
    InvalidResponse(String),

    #[error("Secondary server exited")]
    Exited,

    #[error("No proxy target installed")]
    NoTarget,
}

impl ProxyError {
    pub fn wire_status(&self) -> WireStatus {
        match self {
            Self::SessionNotCreated(_) => WireStatus::SessionNotCreated,
            _ => WireStatus::UnknownError,
        }
    }
}
