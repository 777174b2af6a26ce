//! One running automation session.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use switchyard_protocols::{BackendChannel, Context, ProxyCell, ProxyTarget, WireResponse};
use switchyard_queue::{ChannelExecutor, CommandQueue};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::{ContextEvent, ContextStateMachine};
use crate::error::SessionError;
use crate::lane::{RemoteGuard, RemoteLane};
use crate::normalize::normalize_native;
use crate::router::{ProxyRouter, Route};

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;

/// Components a session is assembled from.
pub struct SessionParts {
    pub id: String,
    pub channel: Arc<dyn BackendChannel>,
    pub queue: CommandQueue,
    pub contexts: Arc<ContextStateMachine>,
    pub router: ProxyRouter,
    pub lane: Arc<RemoteLane>,
    pub proxy: ProxyCell,
    pub capabilities: Map<String, Value>,
}

/// A session: native channel, command queue and context state machine.
pub struct Session {
    id: String,
    channel: Arc<dyn BackendChannel>,
    queue: CommandQueue,
    contexts: Arc<ContextStateMachine>,
    router: ProxyRouter,
    lane: Arc<RemoteLane>,
    proxy: ProxyCell,
    capabilities: Map<String, Value>,
    created_at: DateTime<Utc>,
    last_activity: Mutex<Instant>,
    terminated: CancellationToken,
    end_reason: Mutex<Option<String>>,
}

impl Session {
    pub fn new(parts: SessionParts) -> Arc<Self> {
        Arc::new(Self {
            id: parts.id,
            channel: parts.channel,
            queue: parts.queue,
            contexts: parts.contexts,
            router: parts.router,
            lane: parts.lane,
            proxy: parts.proxy,
            capabilities: parts.capabilities,
            created_at: Utc::now(),
            last_activity: Mutex::new(Instant::now()),
            terminated: CancellationToken::new(),
            end_reason: Mutex::new(None),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn capabilities(&self) -> &Map<String, Value> {
        &self.capabilities
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn channel(&self) -> &Arc<dyn BackendChannel> {
        &self.channel
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn contexts(&self) -> &Arc<ContextStateMachine> {
        &self.contexts
    }

    /// Start the native backend and the dispatcher feeding it.
    pub async fn start_backend(&self) -> Result<(), SessionError> {
        self.channel.start().await?;
        self.queue
            .start(Arc::new(ChannelExecutor::new(Arc::clone(&self.channel))));
        info!(session_id = %self.id, channel = self.channel.kind(), "Native backend ready");
        Ok(())
    }

    /// Tear the session down when the native backend or the active
    /// secondary server dies.
    pub fn spawn_supervisor(self: &Arc<Self>) {
        let mut exits = self.channel.subscribe_exit();
        let mut context_events = self.contexts.subscribe();
        let terminated = self.terminated.clone();
        let session: Weak<Session> = Arc::downgrade(self);

        tokio::spawn(async move {
            let reason = loop {
                tokio::select! {
                    _ = terminated.cancelled() => return,
                    event = exits.recv() => match event {
                        Ok(event) => {
                            let mut reason = format!("Native backend exited with {}", event.status);
                            if let Some(dir) = &event.artifact_dir {
                                reason.push_str(&format!(" (artifacts in {})", dir.display()));
                            }
                            break reason;
                        }
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => return,
                    },
                    event = context_events.recv() => match event {
                        Ok(ContextEvent::ActiveSecondaryDied { context, status }) => {
                            break format!("Secondary server for {} exited with {}", context, status);
                        }
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => return,
                    },
                }
            };
            if let Some(session) = session.upgrade() {
                warn!(session_id = %session.id, "{}", reason);
                session.shutdown(&reason).await;
            }
        });
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Time since the last client request.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Run a native command and normalize its result.
    pub async fn execute(&self, payload: Value) -> Result<WireResponse, SessionError> {
        self.touch();
        let raw = self.queue.submit(payload).await?;
        let mut response = normalize_native(raw)?;
        response.session_id = Some(self.id.clone());
        Ok(response)
    }

    pub fn current_context(&self) -> Context {
        self.contexts.current()
    }

    pub async fn list_contexts(&self) -> Result<Vec<String>, SessionError> {
        self.touch();
        Ok(self.contexts.discover_contexts().await?)
    }

    pub async fn set_context(&self, name: Option<&str>) -> Result<Context, SessionError> {
        self.touch();
        Ok(self.contexts.set_context(name).await?)
    }

    /// Routing decision for a path relative to the server prefix.
    pub fn route(&self, method: &str, path: &str) -> Route {
        self.router.decide(method, path)
    }

    pub fn proxy_target(&self) -> Option<ProxyTarget> {
        self.proxy.target()
    }

    /// Enter the remote lane for a proxied request.
    pub async fn enter_remote(&self) -> RemoteGuard {
        self.touch();
        self.lane.enter().await
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.is_cancelled()
    }

    /// Cancelled once the session has begun shutting down.
    pub fn terminated(&self) -> CancellationToken {
        self.terminated.clone()
    }

    pub fn end_reason(&self) -> Option<String> {
        self.end_reason.lock().clone()
    }

    /// Summary for `GET /sessions`.
    pub fn describe(&self) -> Value {
        json!({
            "id": self.id,
            "capabilities": self.capabilities,
            "context": self.current_context().name(),
        })
    }

    /// Stop everything the session owns. Later calls are no-ops.
    pub async fn shutdown(&self, reason: &str) {
        {
            let mut end_reason = self.end_reason.lock();
            if end_reason.is_some() {
                return;
            }
            *end_reason = Some(reason.to_string());
        }
        info!(session_id = %self.id, reason, "Shutting down session");
        self.queue.close(reason);
        self.terminated.cancel();
        self.contexts.shutdown().await;
        self.queue.stop().await;
        if let Err(e) = self.channel.shutdown().await {
            warn!(session_id = %self.id, "Native backend shutdown failed: {}", e);
        }
        debug!(session_id = %self.id, "Session stopped");
    }
}
