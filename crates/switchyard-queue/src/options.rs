//! Queue runtime options.

use std::time::Duration;

use switchyard_config::QueueConfig;

/// Queue runtime options.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Re-check interval while every queued command is gated.
    pub backoff: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            backoff: Duration::from_millis(500),
        }
    }
}

impl From<&QueueConfig> for QueueOptions {
    fn from(config: &QueueConfig) -> Self {
        Self {
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }
}
