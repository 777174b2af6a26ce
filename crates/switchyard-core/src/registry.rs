//! The server's active session.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use switchyard_config::Config;
use tracing::{info, warn};

use crate::error::SessionError;
use crate::factory::SessionFactory;
use crate::session::Session;

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;

type Slot = Arc<Mutex<Option<Arc<Session>>>>;

/// Holds at most one running session.
pub struct SessionRegistry {
    factory: SessionFactory,
    current: Slot,
    create_lock: tokio::sync::Mutex<()>,
    session_override: bool,
    new_command_timeout: Option<Duration>,
}

impl SessionRegistry {
    pub fn new(factory: SessionFactory) -> Self {
        let config: &Config = factory.config();
        let session_override = config.server.session_override;
        let timeout_secs = config.session.new_command_timeout_secs;
        Self {
            factory,
            current: Arc::new(Mutex::new(None)),
            create_lock: tokio::sync::Mutex::new(()),
            session_override,
            new_command_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
        }
    }

    /// Start a session, replacing the running one only when overriding is on.
    pub async fn create(&self, desired: Map<String, Value>) -> Result<Arc<Session>, SessionError> {
        let _creating = self.create_lock.lock().await;

        if let Some(existing) = self.current() {
            if !self.session_override {
                return Err(SessionError::NotCreated(format!(
                    "session {} is already running",
                    existing.id()
                )));
            }
            info!(session_id = %existing.id(), "Overriding running session");
            existing.shutdown("replaced by a new session").await;
            self.remove(existing.id());
        }

        let session = self.factory.start(desired).await?;
        *self.current.lock() = Some(Arc::clone(&session));
        self.spawn_reaper(&session);
        if let Some(timeout) = self.command_timeout_for(session.capabilities()) {
            spawn_watchdog(Arc::clone(&session), timeout);
        }
        info!(session_id = %session.id(), "Session created");
        Ok(session)
    }

    /// The running session, if any.
    pub fn current(&self) -> Option<Arc<Session>> {
        self.current
            .lock()
            .as_ref()
            .filter(|session| !session.is_terminated())
            .cloned()
    }

    pub fn get(&self, id: &str) -> Result<Arc<Session>, SessionError> {
        self.current()
            .filter(|session| session.id() == id)
            .ok_or_else(|| SessionError::NoSuchSession(id.to_string()))
    }

    pub fn list(&self) -> Vec<Arc<Session>> {
        self.current().into_iter().collect()
    }

    pub async fn delete(&self, id: &str) -> Result<(), SessionError> {
        let session = self.get(id)?;
        session.shutdown("deleted by client").await;
        self.remove(id);
        Ok(())
    }

    /// Stop the running session, if any.
    pub async fn shutdown(&self) {
        let session = self.current.lock().take();
        if let Some(session) = session {
            session.shutdown("server shutting down").await;
        }
    }

    /// The `newCommandTimeout` capability in seconds, else the configured
    /// default. Zero disables the watchdog.
    fn command_timeout_for(&self, capabilities: &Map<String, Value>) -> Option<Duration> {
        let requested = capabilities.get("newCommandTimeout").and_then(|value| match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        });
        match requested {
            Some(secs) if secs.is_finite() && secs > 0.0 => Some(Duration::from_secs_f64(secs)),
            Some(secs) if secs == 0.0 => None,
            _ => self.new_command_timeout,
        }
    }

    fn remove(&self, id: &str) {
        remove_from(&self.current, id);
    }

    fn spawn_reaper(&self, session: &Arc<Session>) {
        let slot = Arc::clone(&self.current);
        let terminated = session.terminated();
        let id = session.id().to_string();
        tokio::spawn(async move {
            terminated.cancelled().await;
            remove_from(&slot, &id);
        });
    }
}

fn remove_from(slot: &Slot, id: &str) {
    let mut slot = slot.lock();
    if slot.as_ref().is_some_and(|session| session.id() == id) {
        *slot = None;
        info!(session_id = id, "Session removed");
    }
}

/// Shut the session down once no request arrived for `timeout`.
fn spawn_watchdog(session: Arc<Session>, timeout: Duration) {
    tokio::spawn(async move {
        let terminated = session.terminated();
        loop {
            let idle = session.idle_for();
            if idle >= timeout {
                warn!(session_id = %session.id(), "No command received for {:?}", timeout);
                session
                    .shutdown(&format!("New command timeout of {:?} expired", timeout))
                    .await;
                return;
            }
            tokio::select! {
                _ = terminated.cancelled() => return,
                _ = tokio::time::sleep(timeout - idle) => {}
            }
        }
    });
}
