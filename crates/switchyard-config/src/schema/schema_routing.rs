//! Queue, secondary backend and proxy configuration.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::schema_channel::default_shutdown_grace_ms;

/// Command queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Retry delay while every queued command is gated.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Command names or session-relative paths that may run while a proxied
    /// request is outstanding.
    #[serde(default = "default_unblocking_prefixes")]
    pub unblocking_prefixes: Vec<String>,

    /// Command prefixes held back during a context switch (empty means all).
    #[serde(default)]
    pub context_scoped_prefixes: Vec<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backoff_ms: default_backoff_ms(),
            unblocking_prefixes: default_unblocking_prefixes(),
            context_scoped_prefixes: Vec::new(),
        }
    }
}

fn default_backoff_ms() -> u64 {
    500
}

fn default_unblocking_prefixes() -> Vec<String> {
    [
        "au.alertIsPresent",
        "au.getAlertText",
        "au.acceptAlert",
        "au.dismissAlert",
        "au.setAlertText",
        "au.waitForAlertToClose",
        "/alert_text",
        "/accept_alert",
        "/dismiss_alert",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Secondary WebDriver server configuration.
///
/// `{port}` and `{base_path}` in `args` are replaced before launch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecondaryConfig {
    #[serde(default = "default_secondary_program")]
    pub program: String,

    #[serde(default = "default_secondary_args")]
    pub args: Vec<String>,

    #[serde(default = "default_secondary_host")]
    pub host: String,

    /// Fixed port; 0 picks a free loopback port per launch.
    #[serde(default)]
    pub port: u16,

    #[serde(default = "default_secondary_base_path")]
    pub base_path: String,

    /// Capabilities sent with `POST /session`.
    #[serde(default)]
    pub capabilities: HashMap<String, Value>,

    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,

    /// Retries of `POST /session` while the server refuses connections.
    #[serde(default = "default_create_retries")]
    pub create_retries: u32,

    #[serde(default = "default_create_backoff_ms")]
    pub create_backoff_ms: u64,

    /// Health probe path; `{sessionId}` is replaced with the secondary id.
    #[serde(default = "default_probe_path")]
    pub probe_path: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for SecondaryConfig {
    fn default() -> Self {
        Self {
            program: default_secondary_program(),
            args: default_secondary_args(),
            host: default_secondary_host(),
            port: 0,
            base_path: default_secondary_base_path(),
            capabilities: HashMap::new(),
            startup_timeout_secs: default_startup_timeout(),
            create_retries: default_create_retries(),
            create_backoff_ms: default_create_backoff_ms(),
            probe_path: default_probe_path(),
            request_timeout_secs: default_request_timeout(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

fn default_secondary_program() -> String {
    "chromedriver".to_string()
}

fn default_secondary_args() -> Vec<String> {
    vec!["--port={port}".to_string(), "--url-base={base_path}".to_string()]
}

fn default_secondary_host() -> String {
    "127.0.0.1".to_string()
}

fn default_secondary_base_path() -> String {
    "/wd/hub".to_string()
}

fn default_startup_timeout() -> u64 {
    30
}

fn default_create_retries() -> u32 {
    5
}

fn default_create_backoff_ms() -> u64 {
    500
}

fn default_probe_path() -> String {
    "/session/{sessionId}/url".to_string()
}

fn default_request_timeout() -> u64 {
    240
}

/// A request that stays local while proxying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionRule {
    /// HTTP method, upper case.
    pub method: String,
    /// Regex matched against the path below the server prefix.
    pub path: String,
}

impl ExclusionRule {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
        }
    }
}

/// Proxy router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_exclusions")]
    pub exclusions: Vec<ExclusionRule>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            exclusions: default_exclusions(),
        }
    }
}

fn default_exclusions() -> Vec<ExclusionRule> {
    vec![
        ExclusionRule::new("POST", r"^/session/[^/]+/window$"),
        ExclusionRule::new("GET", r"^/session/[^/]+/window_handles$"),
        ExclusionRule::new("GET", r"^/session/[^/]+/window_handle$"),
        ExclusionRule::new("POST", r"^/session/[^/]+/context$"),
        ExclusionRule::new("GET", r"^/session/[^/]+/context$"),
        ExclusionRule::new("GET", r"^/session/[^/]+/contexts$"),
        ExclusionRule::new("GET", r"^/session/[^/]+/alert_text$"),
        ExclusionRule::new("POST", r"^/session/[^/]+/alert_text$"),
        ExclusionRule::new("POST", r"^/session/[^/]+/accept_alert$"),
        ExclusionRule::new("POST", r"^/session/[^/]+/dismiss_alert$"),
    ]
}
