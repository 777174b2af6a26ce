//! Context switching errors.

use thiserror::Error;

use super::{ChannelError, ProxyError};
use crate::types::WireStatus;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("No such context: {0}")]
    NoSuchContext(String),

    #[error("Context discovery failed: {0}")]
    Discovery(String),

    #[error("Secondary backend error: {0}")]
    Secondary(#[from] ProxyError),

    #[error("Native backend error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Context switch aborted: {0}")]
    Aborted(String),
}

impl ContextError {
    pub fn wire_status(&self) -> WireStatus {
        match self {
            Self::NoSuchContext(_) => WireStatus::NoSuchContext,
            Self::Secondary(err) => err.wire_status(),
            _ => WireStatus::UnknownError,
        }
    }
}
