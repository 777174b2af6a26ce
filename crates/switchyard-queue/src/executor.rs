//! Command execution seam.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use switchyard_protocols::{BackendChannel, ChannelError, Command};

/// Runs one dequeued command to completion.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, command: &Command) -> Result<Value, ChannelError>;
}

/// Executes commands on a backend channel.
pub struct ChannelExecutor {
    channel: Arc<dyn BackendChannel>,
}

impl ChannelExecutor {
    pub fn new(channel: Arc<dyn BackendChannel>) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl CommandExecutor for ChannelExecutor {
    async fn execute(&self, command: &Command) -> Result<Value, ChannelError> {
        self.channel.send_command(command.payload.clone()).await
    }
}
