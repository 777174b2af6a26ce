//! Secondary session lifecycle over HTTP.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::StatusCode;
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use serde_json::{Map, Value, json};
use switchyard_config::SecondaryConfig;
use switchyard_protocols::{ProxyError, ProxyTarget, WireStatus};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{LaunchedSecondary, SecondaryLauncher, SecondarySession};

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;

/// Session creation and shutdown settings.
#[derive(Debug, Clone)]
pub struct SecondaryOptions {
    pub capabilities: Map<String, Value>,
    pub create_retries: u32,
    pub create_backoff: Duration,
    /// `{sessionId}` is replaced with the secondary session id.
    pub probe_path: String,
    pub request_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl Default for SecondaryOptions {
    fn default() -> Self {
        Self::from_config(&SecondaryConfig::default())
    }
}

impl SecondaryOptions {
    pub fn from_config(config: &SecondaryConfig) -> Self {
        Self {
            capabilities: config
                .capabilities
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            create_retries: config.create_retries,
            create_backoff: Duration::from_millis(config.create_backoff_ms),
            probe_path: config.probe_path.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            shutdown_grace: Duration::from_millis(config.shutdown_grace_ms),
        }
    }
}

/// Starts, probes and stops secondary sessions.
pub struct SecondaryManager {
    launcher: Arc<dyn SecondaryLauncher>,
    options: SecondaryOptions,
    client: reqwest::Client,
}

impl SecondaryManager {
    pub fn new(launcher: Arc<dyn SecondaryLauncher>, options: SecondaryOptions) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .timeout(options.request_timeout)
            .build()
            .map_err(|e| ProxyError::Request(e.to_string()))?;
        Ok(Self {
            launcher,
            options,
            client,
        })
    }

    pub fn options(&self) -> &SecondaryOptions {
        &self.options
    }

    /// Launch a server for `context` and create a session on it.
    ///
    /// `capabilities` are merged over the configured ones.
    pub async fn start_session(
        &self,
        context: &str,
        capabilities: &Map<String, Value>,
    ) -> Result<SecondarySession, ProxyError> {
        let launched = self.launcher.launch(context).await?;
        let mut desired = self.options.capabilities.clone();
        desired.extend(capabilities.iter().map(|(k, v)| (k.clone(), v.clone())));

        match self.create_session(&launched, &desired).await {
            Ok(session_id) => {
                let target = ProxyTarget::new(
                    &launched.host,
                    launched.port,
                    &launched.base_path,
                    session_id,
                );
                info!(context, session_id = %target.session_id, url = %target.base_url(), "Secondary session created");
                Ok(SecondarySession {
                    instance_id: Uuid::new_v4(),
                    context: context.to_string(),
                    target,
                    process: launched.process,
                    started_at: Utc::now(),
                })
            }
            Err(e) => {
                if let Some(process) = &launched.process {
                    process.terminate(self.options.shutdown_grace).await;
                }
                Err(e)
            }
        }
    }

    async fn create_session(
        &self,
        launched: &LaunchedSecondary,
        desired: &Map<String, Value>,
    ) -> Result<String, ProxyError> {
        let url = format!(
            "http://{}:{}{}/session",
            launched.host,
            launched.port,
            launched.base_path.trim_end_matches('/')
        );
        let body = json!({ "desiredCapabilities": desired });

        let mut attempt = 0;
        let response = loop {
            match self.client.post(&url).json(&body).send().await {
                Ok(response) => break response,
                Err(e) if e.is_connect() && attempt < self.options.create_retries => {
                    attempt += 1;
                    debug!(attempt, "Secondary refused connection, retrying: {}", e);
                    tokio::time::sleep(self.options.create_backoff).await;
                }
                Err(e) if e.is_connect() => return Err(ProxyError::ConnectionRefused(e.to_string())),
                Err(e) => return Err(ProxyError::Request(e.to_string())),
            }
        };

        if response.status() == StatusCode::SEE_OTHER {
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| ProxyError::InvalidResponse("303 without Location".to_string()))?;
            return session_id_from_location(location).ok_or_else(|| {
                ProxyError::InvalidResponse(format!("no session id in Location '{}'", location))
            });
        }

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| ProxyError::InvalidResponse(e.to_string()))?;
        session_id_from_body(&body).ok_or_else(|| {
            let message = body
                .pointer("/value/message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("HTTP {}: {}", status, body));
            ProxyError::SessionNotCreated(message)
        })
    }

    /// Whether the session still answers.
    pub async fn probe(&self, session: &SecondarySession) -> bool {
        if session.has_exited() {
            return false;
        }
        let path = self
            .options
            .probe_path
            .replace("{sessionId}", session.session_id());
        let response = match self.client.get(session.target.url(&path)).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!(context = %session.context, "Secondary probe failed: {}", e);
                return false;
            }
        };
        if !response.status().is_success() {
            return false;
        }
        match response.json::<Value>().await {
            Ok(body) => body
                .get("status")
                .and_then(Value::as_i64)
                .is_none_or(|code| code == WireStatus::Success.code()),
            Err(_) => false,
        }
    }

    /// Delete the remote session, then stop the owned process.
    pub async fn stop(&self, session: &SecondarySession) {
        if !session.has_exited() {
            let url = session.target.session_url("");
            match self.client.delete(&url).send().await {
                Ok(response) => debug!(context = %session.context, "Secondary session deleted: HTTP {}", response.status()),
                Err(e) => warn!(context = %session.context, "Failed to delete secondary session: {}", e),
            }
        }
        if let Some(process) = &session.process {
            process.terminate(self.options.shutdown_grace).await;
        }
        info!(context = %session.context, session_id = %session.session_id(), "Secondary session stopped");
    }
}

fn session_id_from_location(location: &str) -> Option<String> {
    location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty() && *segment != "session")
        .map(str::to_string)
}

fn session_id_from_body(body: &Value) -> Option<String> {
    let legacy = body
        .get("sessionId")
        .and_then(Value::as_str)
        .filter(|_| body.get("status").and_then(Value::as_i64) == Some(0));
    let w3c = body.pointer("/value/sessionId").and_then(Value::as_str);
    legacy.or(w3c).map(str::to_string)
}
