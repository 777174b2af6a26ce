//! Ordered session startup.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use switchyard_protocols::WEBVIEW_ALIAS;
use tracing::info;

use crate::error::SessionError;
use crate::session::Session;

/// One fallible step of session startup.
#[async_trait]
pub trait StartupStep: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, session: &Arc<Session>) -> Result<(), SessionError>;
}

/// Runs steps in order; the first failure aborts the rest.
#[derive(Default, Clone)]
pub struct StartupPipeline {
    steps: Vec<Arc<dyn StartupStep>>,
}

impl StartupPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_step(mut self, step: Arc<dyn StartupStep>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    pub async fn run(&self, session: &Arc<Session>) -> Result<(), SessionError> {
        for step in &self.steps {
            info!(session_id = %session.id(), step = step.name(), "Running startup step");
            step.run(session)
                .await
                .map_err(|e| SessionError::Startup {
                    step: step.name().to_string(),
                    source: Box::new(e),
                })?;
        }
        Ok(())
    }
}

/// Creates the session's scratch directory.
pub struct PrepareWorkDir {
    dir: PathBuf,
}

impl PrepareWorkDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl StartupStep for PrepareWorkDir {
    fn name(&self) -> &str {
        "prepare_work_dir"
    }

    async fn run(&self, _session: &Arc<Session>) -> Result<(), SessionError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }
}

/// Starts the native backend and its dispatcher.
pub struct StartBackend;

#[async_trait]
impl StartupStep for StartBackend {
    fn name(&self) -> &str {
        "start_backend"
    }

    async fn run(&self, session: &Arc<Session>) -> Result<(), SessionError> {
        session.start_backend().await
    }
}

/// Enters the first discovered web view.
pub struct EnterWebview;

#[async_trait]
impl StartupStep for EnterWebview {
    fn name(&self) -> &str {
        "enter_webview"
    }

    async fn run(&self, session: &Arc<Session>) -> Result<(), SessionError> {
        session.set_context(Some(WEBVIEW_ALIAS)).await.map(|_| ())
    }
}
