//! Application state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use switchyard_core::SessionRegistry;

use crate::proxy::Forwarder;

/// State shared across handlers.
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub forwarder: Forwarder,
    start_time: Instant,
}

impl AppState {
    pub fn new(registry: Arc<SessionRegistry>, forwarder: Forwarder) -> Self {
        Self {
            registry,
            forwarder,
            start_time: Instant::now(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }
}
