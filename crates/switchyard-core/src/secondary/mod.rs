//! Secondary WebDriver servers, one per web view context.

mod launcher;
mod manager;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use switchyard_channel::ManagedProcess;
use switchyard_protocols::{ExitStatusInfo, ProxyError, ProxyTarget};
use uuid::Uuid;

pub use launcher::{AttachedLauncher, ProcessLauncher};
pub use manager::{SecondaryManager, SecondaryOptions};

/// A secondary server that is up and accepting HTTP.
#[derive(Debug)]
pub struct LaunchedSecondary {
    pub host: String,
    pub port: u16,
    pub base_path: String,
    /// `None` when the server is not owned by us.
    pub process: Option<ManagedProcess>,
}

/// Starts a secondary server for a web view context.
#[async_trait]
pub trait SecondaryLauncher: Send + Sync {
    async fn launch(&self, context: &str) -> Result<LaunchedSecondary, ProxyError>;
}

/// A live session on a secondary server.
#[derive(Debug)]
pub struct SecondarySession {
    /// Distinguishes restarts of the same context.
    pub instance_id: Uuid,
    pub context: String,
    pub target: ProxyTarget,
    pub process: Option<ManagedProcess>,
    pub started_at: DateTime<Utc>,
}

impl SecondarySession {
    pub fn session_id(&self) -> &str {
        &self.target.session_id
    }

    pub fn has_exited(&self) -> bool {
        self.process.as_ref().is_some_and(ManagedProcess::has_exited)
    }

    /// Resolves when the owned process exits; never for attached servers.
    pub async fn wait_exit(&self) -> ExitStatusInfo {
        match &self.process {
            Some(process) => process.wait().await,
            None => std::future::pending().await,
        }
    }
}
