//! Secondary server launchers.

use std::net::TcpListener;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use switchyard_channel::{ManagedProcess, ProcessSpec};
use switchyard_config::SecondaryConfig;
use switchyard_protocols::ProxyError;
use tracing::{debug, info, warn};

use super::{LaunchedSecondary, SecondaryLauncher};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Spawns the configured WebDriver server on a loopback port.
pub struct ProcessLauncher {
    config: SecondaryConfig,
    client: reqwest::Client,
}

impl ProcessLauncher {
    pub fn new(config: SecondaryConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn pick_port(&self) -> Result<u16, ProxyError> {
        if self.config.port != 0 {
            return Ok(self.config.port);
        }
        let listener = TcpListener::bind((self.config.host.as_str(), 0))
            .map_err(|e| ProxyError::Launch(format!("no free port on {}: {}", self.config.host, e)))?;
        let port = listener
            .local_addr()
            .map_err(|e| ProxyError::Launch(e.to_string()))?
            .port();
        Ok(port)
    }

    async fn wait_ready(&self, process: &ManagedProcess, status_url: &str) -> Result<(), ProxyError> {
        let timeout = Duration::from_secs(self.config.startup_timeout_secs);
        let started = Instant::now();
        loop {
            if let Some(status) = process.exit_status() {
                return Err(ProxyError::Launch(format!(
                    "{} exited during startup with {}",
                    self.config.program, status
                )));
            }
            match self.client.get(status_url).send().await {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => debug!("Secondary not ready yet: HTTP {}", response.status()),
                Err(e) => debug!("Secondary not ready yet: {}", e),
            }
            if started.elapsed() >= timeout {
                return Err(ProxyError::Launch(format!(
                    "{} did not answer {} within {:?}",
                    self.config.program, status_url, timeout
                )));
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl SecondaryLauncher for ProcessLauncher {
    async fn launch(&self, context: &str) -> Result<LaunchedSecondary, ProxyError> {
        let port = self.pick_port()?;
        let spec = ProcessSpec::new(format!("secondary:{}", context), &self.config.program)
            .args(self.config.args.iter().cloned())
            .substitute("port", &port.to_string())
            .substitute("base_path", &self.config.base_path);
        let process =
            ManagedProcess::spawn(&spec, None).map_err(|e| ProxyError::Launch(e.to_string()))?;

        let status_url = format!(
            "http://{}:{}{}/status",
            self.config.host,
            port,
            self.config.base_path.trim_end_matches('/')
        );
        if let Err(e) = self.wait_ready(&process, &status_url).await {
            warn!(context, "Secondary server failed to start: {}", e);
            process
                .terminate(Duration::from_millis(self.config.shutdown_grace_ms))
                .await;
            return Err(e);
        }

        info!(context, port, pid = ?process.pid(), "Secondary server ready");
        Ok(LaunchedSecondary {
            host: self.config.host.clone(),
            port,
            base_path: self.config.base_path.clone(),
            process: Some(process),
        })
    }
}

/// Uses a server that is already running and managed elsewhere.
#[derive(Debug, Clone)]
pub struct AttachedLauncher {
    host: String,
    port: u16,
    base_path: String,
}

impl AttachedLauncher {
    pub fn new(host: impl Into<String>, port: u16, base_path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            base_path: base_path.into(),
        }
    }
}

#[async_trait]
impl SecondaryLauncher for AttachedLauncher {
    async fn launch(&self, _context: &str) -> Result<LaunchedSecondary, ProxyError> {
        Ok(LaunchedSecondary {
            host: self.host.clone(),
            port: self.port,
            base_path: self.base_path.clone(),
            process: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_program_fails_launch() {
        let launcher = ProcessLauncher::new(SecondaryConfig {
            program: "/nonexistent/webdriver-server".to_string(),
            ..Default::default()
        });
        let err = launcher.launch("WEBVIEW_1").await.unwrap_err();
        assert!(matches!(err, ProxyError::Launch(_)));
    }

    #[tokio::test]
    async fn test_early_exit_fails_launch() {
        let launcher = ProcessLauncher::new(SecondaryConfig {
            program: "true".to_string(),
            args: Vec::new(),
            startup_timeout_secs: 5,
            ..Default::default()
        });
        let err = launcher.launch("WEBVIEW_1").await.unwrap_err();
        assert!(err.to_string().contains("exited during startup"));
    }

    #[test]
    fn test_fixed_port_is_used() {
        let launcher = ProcessLauncher::new(SecondaryConfig {
            port: 9515,
            ..Default::default()
        });
        assert_eq!(launcher.pick_port().unwrap(), 9515);
    }

    #[test]
    fn test_free_port_is_picked() {
        let launcher = ProcessLauncher::new(SecondaryConfig::default());
        assert_ne!(launcher.pick_port().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_attached_launcher() {
        let launcher = AttachedLauncher::new("127.0.0.1", 9515, "/wd/hub");
        let launched = launcher.launch("WEBVIEW_1").await.unwrap();
        assert_eq!(launched.port, 9515);
        assert!(launched.process.is_none());
    }
}
