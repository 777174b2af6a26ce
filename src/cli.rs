//! CLI definitions for Switchyard.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use switchyard_config::Config;

/// Switchyard CLI.
#[derive(Parser)]
#[command(name = "switchyard")]
#[command(about = "WebDriver server routing commands between native and web-view backends")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the server in foreground (default)
    Run(RunArgs),

    /// Load and validate the configuration, then exit
    Check,
}

/// Overrides applied on top of the configuration file.
#[derive(Args, Default, Debug)]
pub(crate) struct RunArgs {
    /// Listen host
    #[arg(long, env = "SWITCHYARD_HOST")]
    pub host: Option<String>,

    /// Listen port
    #[arg(long, env = "SWITCHYARD_PORT")]
    pub port: Option<u16>,

    /// URL prefix for the WebDriver routes
    #[arg(long)]
    pub base_path: Option<String>,

    /// Replace a running session on POST /session
    #[arg(long)]
    pub session_override: bool,
}

impl RunArgs {
    pub fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(base_path) = &self.base_path {
            config.server.base_path = base_path.clone();
        }
        if self.session_override {
            config.server.session_override = true;
        }
    }
}
