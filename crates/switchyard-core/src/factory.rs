//! Session assembly from configuration.

use std::sync::Arc;

use serde_json::{Map, Value};
use switchyard_config::{ChannelConfig, Config};
use switchyard_protocols::{
    BackendChannel, ChannelError, ContextDiscovery, ProxyCell, StaticDiscovery,
};
use switchyard_queue::{CommandClassifier, CommandQueue, PrefixClassifier, QueueGates, QueueOptions};
use uuid::Uuid;

use crate::context::ContextStateMachine;
use crate::discovery::ChannelDiscovery;
use crate::error::SessionError;
use crate::lane::RemoteLane;
use crate::pipeline::{EnterWebview, PrepareWorkDir, StartBackend, StartupPipeline, StartupStep};
use crate::router::ProxyRouter;
use crate::secondary::{ProcessLauncher, SecondaryLauncher, SecondaryManager, SecondaryOptions};
use crate::session::{Session, SessionParts};

/// Builds the native channel for a session.
pub type ChannelBuilder =
    Arc<dyn Fn(&ChannelConfig) -> Result<Arc<dyn BackendChannel>, ChannelError> + Send + Sync>;

/// Creates sessions: assembles the components, then runs the startup pipeline.
pub struct SessionFactory {
    config: Arc<Config>,
    channel_builder: ChannelBuilder,
    launcher: Arc<dyn SecondaryLauncher>,
    discovery: Option<Arc<dyn ContextDiscovery>>,
    classifier: Arc<dyn CommandClassifier>,
    extra_steps: Vec<Arc<dyn StartupStep>>,
}

impl SessionFactory {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            channel_builder: Arc::new(switchyard_channel::channel_from_config),
            launcher: Arc::new(ProcessLauncher::new(config.secondary.clone())),
            discovery: None,
            classifier: Arc::new(PrefixClassifier::from_config(&config.queue)),
            extra_steps: Vec::new(),
            config,
        }
    }

    pub fn with_channel_builder(mut self, builder: ChannelBuilder) -> Self {
        self.channel_builder = builder;
        self
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn SecondaryLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_discovery(mut self, discovery: Arc<dyn ContextDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn CommandClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Append a step that runs after the built-in ones.
    pub fn with_step(mut self, step: Arc<dyn StartupStep>) -> Self {
        self.extra_steps.push(step);
        self
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn pipeline(&self) -> StartupPipeline {
        let session = &self.config.session;
        let mut pipeline = StartupPipeline::new();
        if let Some(dir) = &session.work_dir {
            pipeline = pipeline.with_step(Arc::new(PrepareWorkDir::new(dir.clone())));
        }
        pipeline = pipeline.with_step(Arc::new(StartBackend));
        if session.auto_webview {
            pipeline = pipeline.with_step(Arc::new(EnterWebview));
        }
        self.extra_steps
            .iter()
            .fold(pipeline, |pipeline, step| pipeline.with_step(Arc::clone(step)))
    }

    /// Assemble and start a session for the client's desired capabilities.
    pub async fn start(&self, desired: Map<String, Value>) -> Result<Arc<Session>, SessionError> {
        let config = &self.config;
        let mut capabilities: Map<String, Value> = config
            .session
            .capabilities
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        capabilities.extend(desired);

        let channel = (self.channel_builder)(&config.channel)?;
        let gates = QueueGates::new();
        let queue = CommandQueue::new(
            QueueOptions::from(&config.queue),
            Arc::clone(&self.classifier),
            Arc::clone(&gates),
        );
        let lane = Arc::new(RemoteLane::new(gates));
        let proxy = ProxyCell::default();
        let router = ProxyRouter::new(&config.proxy, proxy.clone())?;

        let discovery: Arc<dyn ContextDiscovery> =
            match (&self.discovery, &config.session.discovery_command) {
                (Some(discovery), _) => Arc::clone(discovery),
                (None, Some(command)) => {
                    Arc::new(ChannelDiscovery::new(queue.clone(), command.clone()))
                }
                (None, None) => Arc::new(StaticDiscovery::new(config.session.webviews.clone())),
            };
        let manager = Arc::new(SecondaryManager::new(
            Arc::clone(&self.launcher),
            SecondaryOptions::from_config(&config.secondary),
        )?);
        let contexts = Arc::new(ContextStateMachine::new(
            manager,
            discovery,
            proxy.clone(),
            queue.clone(),
            Arc::clone(&lane),
            config.session.default_context.clone(),
            capabilities.clone(),
        ));

        let session = Session::new(SessionParts {
            id: Uuid::new_v4().to_string(),
            channel,
            queue,
            contexts,
            router,
            lane,
            proxy,
            capabilities,
        });
        session.spawn_supervisor();

        if let Err(e) = self.pipeline().run(&session).await {
            session.shutdown(&e.to_string()).await;
            return Err(e);
        }
        Ok(session)
    }
}

#[cfg(test)]
#[path = "factory_tests.rs"]
mod tests;
