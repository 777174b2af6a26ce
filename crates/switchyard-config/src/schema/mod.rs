//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;

mod schema_channel;
mod schema_routing;

pub use schema_channel::*;
pub use schema_routing::*;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub channel: ChannelConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub secondary: SecondaryConfig,

    #[serde(default)]
    pub proxy: ProxyConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// URL prefix for every WebDriver route.
    #[serde(default = "default_base_path")]
    pub base_path: String,

    /// Replace a running session on `POST /session` instead of refusing.
    #[serde(default)]
    pub session_override: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_path: default_base_path(),
            session_override: false,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4723
}

fn default_base_path() -> String {
    "/wd/hub".to_string()
}

/// Automation session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Context selected when the client asks for the default one.
    #[serde(default = "default_context")]
    pub default_context: String,

    /// Enter the first web view as part of session startup.
    #[serde(default)]
    pub auto_webview: bool,

    /// Tear the session down after this many idle seconds (0 disables).
    #[serde(default = "default_new_command_timeout")]
    pub new_command_timeout_secs: u64,

    /// Fixed list of web view contexts, used when no discovery command is set.
    #[serde(default)]
    pub webviews: Vec<String>,

    /// Native command that answers `{status: 0, value: [names]}`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovery_command: Option<Value>,

    /// Scratch directory prepared before the backend starts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,

    /// Capabilities merged under every client's desired capabilities.
    #[serde(default)]
    pub capabilities: HashMap<String, Value>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_context: default_context(),
            auto_webview: false,
            new_command_timeout_secs: default_new_command_timeout(),
            webviews: Vec::new(),
            discovery_command: None,
            work_dir: None,
            capabilities: HashMap::new(),
        }
    }
}

fn default_context() -> String {
    "NATIVE_APP".to_string()
}

fn default_new_command_timeout() -> u64 {
    60
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`.
    #[serde(default = "default_level")]
    pub level: String,

    /// Directory for daily-rolling log files.
    #[serde(default = "default_log_dir")]
    pub dir: String,

    /// Write logs to files in addition to the console.
    #[serde(default = "default_file_logging")]
    pub file: bool,

    /// Emit JSON instead of plain text in log files.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            dir: default_log_dir(),
            file: default_file_logging(),
            json: false,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> String {
    "~/.switchyard/logs".to_string()
}

fn default_file_logging() -> bool {
    true
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
