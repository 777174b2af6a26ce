//! Reverse-proxy target state.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[cfg(test)]
#[path = "proxy_tests.rs"]
mod tests;

/// Address of a secondary WebDriver session that requests are forwarded to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyTarget {
    pub host: String,
    pub port: u16,
    /// URL prefix of the secondary server, e.g. `/wd/hub` or empty.
    pub base_path: String,
    /// Session ID on the secondary server.
    pub session_id: String,
}

impl ProxyTarget {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        base_path: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            base_path: base_path.into(),
            session_id: session_id.into(),
        }
    }

    /// Server root, e.g. `http://127.0.0.1:9515/wd/hub`.
    pub fn base_url(&self) -> String {
        format!(
            "http://{}:{}{}",
            self.host,
            self.port,
            self.base_path.trim_end_matches('/')
        )
    }

    /// Absolute URL for a path relative to the server root.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url(), path)
        } else {
            format!("{}/{}", self.base_url(), path)
        }
    }

    /// URL of a path under this target's session.
    pub fn session_url(&self, suffix: &str) -> String {
        let suffix = suffix.trim_start_matches('/');
        if suffix.is_empty() {
            self.url(&format!("/session/{}", self.session_id))
        } else {
            self.url(&format!("/session/{}/{}", self.session_id, suffix))
        }
    }
}

/// Proxy state: either direct (no proxy) or forwarding to a target.
///
/// "No proxy" is a valid value and is saved and restored like any other.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyState {
    pub target: Option<ProxyTarget>,
}

impl ProxyState {
    pub fn direct() -> Self {
        Self { target: None }
    }

    pub fn proxy(target: ProxyTarget) -> Self {
        Self {
            target: Some(target),
        }
    }

    pub fn is_proxy(&self) -> bool {
        self.target.is_some()
    }
}

/// Shared cell holding the current [`ProxyState`].
///
/// Cloning yields another handle to the same cell. Updates are whole-value
/// swaps, so readers never see a partially written target.
#[derive(Debug, Clone, Default)]
pub struct ProxyCell {
    inner: Arc<RwLock<ProxyState>>,
}

impl ProxyCell {
    pub fn new(state: ProxyState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    /// Snapshot of the current state.
    pub fn get(&self) -> ProxyState {
        self.inner.read().clone()
    }

    /// Current target, if proxying.
    pub fn target(&self) -> Option<ProxyTarget> {
        self.inner.read().target.clone()
    }

    pub fn is_proxy(&self) -> bool {
        self.inner.read().is_proxy()
    }

    /// Install a new state and return the previous one.
    pub fn replace(&self, state: ProxyState) -> ProxyState {
        std::mem::replace(&mut *self.inner.write(), state)
    }

    pub fn set(&self, state: ProxyState) {
        *self.inner.write() = state;
    }
}
