//! Backend channel configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Which channel variant drives the native backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelConfig {
    /// Request-per-connection Unix socket polling.
    Polling(PollingChannelConfig),
    /// Persistent length-prefixed TCP stream.
    Stream(StreamChannelConfig),
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::Polling(PollingChannelConfig::default())
    }
}

impl ChannelConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Polling(_) => "polling",
            Self::Stream(_) => "stream",
        }
    }
}

/// Polling channel configuration.
///
/// `{socket}` and `{trace_dir}` in `args` are replaced before launch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingChannelConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    #[serde(default)]
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Stdout pattern that marks the launch as recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launch_marker: Option<String>,

    /// Stdout pattern whose first capture group is the artifact directory.
    #[serde(default = "default_artifact_pattern")]
    pub artifact_pattern: String,

    #[serde(default = "default_checkin_timeout")]
    pub checkin_timeout_secs: u64,

    /// Relaunch attempts after a crash on startup or a missed check-in.
    #[serde(default = "default_flakey_retries")]
    pub flakey_retries: u32,

    /// Per-command timeout (0 disables).
    #[serde(default)]
    pub command_timeout_secs: u64,

    /// Directory the backend writes traces to; wiped between launch attempts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_dir: Option<PathBuf>,

    /// Remove the trace directory once the backend has exited.
    #[serde(default)]
    pub remove_trace_dir: bool,

    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for PollingChannelConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            program: String::new(),
            args: Vec::new(),
            env: HashMap::new(),
            launch_marker: None,
            artifact_pattern: default_artifact_pattern(),
            checkin_timeout_secs: default_checkin_timeout(),
            flakey_retries: default_flakey_retries(),
            command_timeout_secs: 0,
            trace_dir: None,
            remove_trace_dir: false,
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/tmp/switchyard_backend.sock")
}

fn default_artifact_pattern() -> String {
    r"Trace Complete.+Output : ([^\)]+)\)".to_string()
}

fn default_checkin_timeout() -> u64 {
    90
}

fn default_flakey_retries() -> u32 {
    3
}

pub(crate) fn default_shutdown_grace_ms() -> u64 {
    5000
}

/// Stream channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChannelConfig {
    #[serde(default = "default_stream_host")]
    pub host: String,

    #[serde(default = "default_stream_port")]
    pub port: u16,

    /// Optional process to launch before connecting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,

    #[serde(default = "default_connect_backoff_ms")]
    pub connect_backoff_ms: u64,

    /// Per-command timeout (0 disables).
    #[serde(default)]
    pub command_timeout_secs: u64,

    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for StreamChannelConfig {
    fn default() -> Self {
        Self {
            host: default_stream_host(),
            port: default_stream_port(),
            program: None,
            args: Vec::new(),
            env: HashMap::new(),
            connect_retries: default_connect_retries(),
            connect_backoff_ms: default_connect_backoff_ms(),
            command_timeout_secs: 0,
            max_frame_bytes: default_max_frame_bytes(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

fn default_stream_host() -> String {
    "127.0.0.1".to_string()
}

fn default_stream_port() -> u16 {
    2828
}

fn default_connect_retries() -> u32 {
    10
}

fn default_connect_backoff_ms() -> u64 {
    500
}

fn default_max_frame_bytes() -> usize {
    16 * 1024 * 1024
}
