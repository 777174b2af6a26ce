//! Context state machine.
//!
//! Tracks whether the session talks to the native backend or to a web view,
//! and owns the cache of secondary sessions keyed by web view id. The
//! current context only changes once a switch has fully succeeded.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::{Map, Value};
use switchyard_protocols::{
    Context, ContextDiscovery, ContextError, ExitStatusInfo, NATIVE_APP, ProxyCell, ProxyState,
    WEBVIEW_ALIAS,
};
use switchyard_queue::CommandQueue;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::lane::RemoteLane;
use crate::secondary::{SecondaryManager, SecondarySession};

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;

/// Notifications emitted by the state machine.
#[derive(Debug, Clone)]
pub enum ContextEvent {
    /// The secondary serving the current context exited.
    ActiveSecondaryDied {
        context: String,
        status: ExitStatusInfo,
    },
}

#[derive(Default)]
struct ContextInner {
    current: Context,
    cache: HashMap<String, Arc<SecondarySession>>,
    /// Proxy state from before the first web view was entered.
    saved_proxy: Option<ProxyState>,
}

/// Native / web view switching for one session.
pub struct ContextStateMachine {
    inner: Arc<Mutex<ContextInner>>,
    switch_lock: tokio::sync::Mutex<()>,
    manager: Arc<SecondaryManager>,
    discovery: Arc<dyn ContextDiscovery>,
    proxy: ProxyCell,
    queue: CommandQueue,
    lane: Arc<RemoteLane>,
    default_context: String,
    capabilities: Map<String, Value>,
    events: broadcast::Sender<ContextEvent>,
}

impl ContextStateMachine {
    pub fn new(
        manager: Arc<SecondaryManager>,
        discovery: Arc<dyn ContextDiscovery>,
        proxy: ProxyCell,
        queue: CommandQueue,
        lane: Arc<RemoteLane>,
        default_context: impl Into<String>,
        capabilities: Map<String, Value>,
    ) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(Mutex::new(ContextInner::default())),
            switch_lock: tokio::sync::Mutex::new(()),
            manager,
            discovery,
            proxy,
            queue,
            lane,
            default_context: default_context.into(),
            capabilities,
            events,
        }
    }

    pub fn current(&self) -> Context {
        self.inner.lock().current.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ContextEvent> {
        self.events.subscribe()
    }

    /// Web view ids with a cached secondary session.
    pub fn cached(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.lock().cache.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// `NATIVE_APP` followed by the reachable web views.
    pub async fn discover_contexts(&self) -> Result<Vec<String>, ContextError> {
        let mut contexts = vec![NATIVE_APP.to_string()];
        contexts.extend(self.discovery.webviews().await?);
        Ok(contexts)
    }

    /// Switch to `name`, or to the default context when `None`.
    pub async fn set_context(&self, name: Option<&str>) -> Result<Context, ContextError> {
        let _switch = self.switch_lock.lock().await;
        let requested = name.unwrap_or(&self.default_context);
        let target = self.resolve(requested).await?;

        if target == self.current() {
            debug!(context = %target, "Already in requested context");
            return Ok(target);
        }

        let _lane = self.lane.hold().await;
        let _gate = self.queue.gates().begin_switch();
        self.queue.wait_idle().await;

        match &target {
            Context::Native => self.leave_to_native(),
            Context::Webview(id) => self.enter_webview(id).await?,
        }
        info!(context = %target, "Context switched");
        Ok(target)
    }

    async fn resolve(&self, name: &str) -> Result<Context, ContextError> {
        if name == NATIVE_APP {
            return Ok(Context::Native);
        }
        let webviews = self.discovery.webviews().await?;
        if name == WEBVIEW_ALIAS {
            return webviews
                .into_iter()
                .next()
                .map(Context::Webview)
                .ok_or_else(|| ContextError::NoSuchContext(name.to_string()));
        }
        if webviews.iter().any(|w| w == name) {
            Ok(Context::Webview(name.to_string()))
        } else {
            Err(ContextError::NoSuchContext(name.to_string()))
        }
    }

    fn leave_to_native(&self) {
        let mut inner = self.inner.lock();
        let saved = inner.saved_proxy.take().unwrap_or_default();
        self.proxy.set(saved);
        inner.current = Context::Native;
    }

    async fn enter_webview(&self, id: &str) -> Result<(), ContextError> {
        let cached = self.inner.lock().cache.get(id).cloned();
        let session = match cached {
            Some(session) => {
                if self.manager.probe(&session).await {
                    debug!(context = id, "Reusing cached secondary session");
                    session
                } else {
                    info!(context = id, "Cached secondary session failed its probe, restarting");
                    self.inner.lock().cache.remove(id);
                    self.manager.stop(&session).await;
                    self.start_secondary(id).await?
                }
            }
            None => self.start_secondary(id).await?,
        };

        let mut inner = self.inner.lock();
        let previous = self.proxy.replace(ProxyState::proxy(session.target.clone()));
        if inner.current.is_native() {
            inner.saved_proxy = Some(previous);
        }
        inner.current = Context::Webview(id.to_string());
        Ok(())
    }

    async fn start_secondary(&self, id: &str) -> Result<Arc<SecondarySession>, ContextError> {
        let session = Arc::new(self.manager.start_session(id, &self.capabilities).await?);
        self.inner
            .lock()
            .cache
            .insert(id.to_string(), Arc::clone(&session));
        self.watch_exit(Arc::clone(&session));
        Ok(session)
    }

    fn watch_exit(&self, session: Arc<SecondarySession>) {
        if session.process.is_none() {
            return;
        }
        let inner: Weak<Mutex<ContextInner>> = Arc::downgrade(&self.inner);
        let events = self.events.clone();
        tokio::spawn(async move {
            let status = session.wait_exit().await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let mut inner = inner.lock();
            let is_current = inner
                .cache
                .get(&session.context)
                .is_some_and(|cached| cached.instance_id == session.instance_id);
            if !is_current {
                return;
            }
            inner.cache.remove(&session.context);
            if inner.current.webview_id() == Some(session.context.as_str()) {
                warn!(context = %session.context, %status, "Active secondary server died");
                let _ = events.send(ContextEvent::ActiveSecondaryDied {
                    context: session.context.clone(),
                    status,
                });
            } else {
                info!(context = %session.context, %status, "Evicted dead secondary session");
            }
        });
    }

    /// Stop every cached secondary session and go back to direct mode.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<SecondarySession>> = {
            let mut inner = self.inner.lock();
            let saved = inner.saved_proxy.take().unwrap_or_default();
            self.proxy.set(saved);
            inner.current = Context::Native;
            inner.cache.drain().map(|(_, session)| session).collect()
        };
        for session in sessions {
            self.manager.stop(&session).await;
        }
    }
}
