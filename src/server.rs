//! Server initialization and startup logic for Switchyard.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use switchyard_api::{ApiServer, AppState, Forwarder};
use switchyard_config::{Config, ConfigLoader, ConfigValidator, LoggingConfig};
use switchyard_core::{SessionFactory, SessionRegistry};

/// `~/.switchyard`, or `.switchyard` when there is no home directory.
pub(crate) fn switchyard_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".switchyard"))
        .unwrap_or_else(|| PathBuf::from(".switchyard"))
}

/// The given config file, falling back to `~/.switchyard/config.toml`.
pub(crate) fn resolve_config_path(requested: &Path, home: &Path) -> PathBuf {
    if requested.exists() {
        return requested.to_path_buf();
    }
    let fallback = home.join("config.toml");
    if fallback.exists() {
        fallback
    } else {
        requested.to_path_buf()
    }
}

/// Load the configuration and reject invalid values.
pub(crate) fn load_config(path: &Path) -> Result<(Config, Vec<String>), Box<dyn std::error::Error>> {
    let path = resolve_config_path(path, &switchyard_dir());
    let config = ConfigLoader::load_or_default(&path)?;
    let warnings = ConfigValidator::validate(&config)?
        .into_result()?
        .into_iter()
        .map(|w| format!("{}: {}", w.path, w.message))
        .collect();
    Ok((config, warnings))
}

/// Initialize tracing with console and optional file output.
///
/// Files roll daily under `logging.dir`; `RUST_LOG` overrides `logging.level`.
pub(crate) fn init_tracing(logging: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let console = fmt::layer().with_target(true).with_ansi(true);

    let file = if logging.file {
        let log_dir = PathBuf::from(ConfigLoader::expand_path(&logging.dir));
        std::fs::create_dir_all(&log_dir)?;

        let file_appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("switchyard")
            .filename_suffix("log")
            .max_log_files(30)
            .build(&log_dir)?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
            std::sync::OnceLock::new();
        let _ = GUARD.set(guard);

        let layer = fmt::layer().with_writer(non_blocking).with_ansi(false);
        Some(if logging.json {
            layer.json().boxed()
        } else {
            layer.boxed()
        })
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file)
        .init();

    Ok(())
}

/// Run the server in foreground until Ctrl-C.
pub(crate) async fn run_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting Switchyard v{}", env!("CARGO_PKG_VERSION"));
    info!(channel = config.channel.kind(), "Native backend configured");

    let config = Arc::new(config);
    let forwarder = Forwarder::new(Duration::from_secs(config.secondary.request_timeout_secs))?;
    let registry = Arc::new(SessionRegistry::new(SessionFactory::new(Arc::clone(&config))));
    let state = Arc::new(AppState::new(registry, forwarder));
    let server = ApiServer::new(config.server.clone(), state);

    server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received Ctrl-C, shutting down");
        })
        .await
}
