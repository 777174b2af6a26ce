//! Web view discovery through the native backend.

use async_trait::async_trait;
use serde_json::Value;
use switchyard_protocols::{ContextDiscovery, ContextError};
use switchyard_queue::CommandQueue;

use crate::normalize::normalize_native;

/// Asks the native backend for web views with a configured command.
///
/// The backend answers `{status: 0, value: [names]}`.
pub struct ChannelDiscovery {
    queue: CommandQueue,
    command: Value,
}

impl ChannelDiscovery {
    pub fn new(queue: CommandQueue, command: Value) -> Self {
        Self { queue, command }
    }
}

#[async_trait]
impl ContextDiscovery for ChannelDiscovery {
    async fn webviews(&self) -> Result<Vec<String>, ContextError> {
        let raw = self
            .queue
            .submit(self.command.clone())
            .await
            .map_err(|e| ContextError::Discovery(e.to_string()))?;
        let response = normalize_native(raw).map_err(|e| ContextError::Discovery(e.to_string()))?;
        if !response.is_success() {
            return Err(ContextError::Discovery(format!(
                "backend answered status {}: {}",
                response.status, response.value
            )));
        }
        match response.value {
            Value::Array(items) => Ok(items
                .into_iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()),
            Value::Null => Ok(Vec::new()),
            Value::String(s) if s.is_empty() => Ok(Vec::new()),
            other => Err(ContextError::Discovery(format!(
                "expected a list of web views, got {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;
    use switchyard_protocols::{ChannelError, Command};
    use switchyard_queue::{CommandExecutor, PrefixClassifier, QueueGates, QueueOptions};

    struct FixedExecutor(Value);

    #[async_trait]
    impl CommandExecutor for FixedExecutor {
        async fn execute(&self, _command: &Command) -> Result<Value, ChannelError> {
            Ok(self.0.clone())
        }
    }

    fn discovery(answer: Value) -> ChannelDiscovery {
        let queue = CommandQueue::new(
            QueueOptions::default(),
            Arc::new(PrefixClassifier::default()),
            QueueGates::new(),
        );
        queue.start(Arc::new(FixedExecutor(answer)));
        ChannelDiscovery::new(queue, json!("au.webviews()"))
    }

    #[tokio::test]
    async fn test_lists_webviews() {
        let found = discovery(json!({"status": 0, "value": ["WEBVIEW_1", "WEBVIEW_2"]}))
            .webviews()
            .await
            .unwrap();
        assert_eq!(found, vec!["WEBVIEW_1", "WEBVIEW_2"]);
    }

    #[tokio::test]
    async fn test_missing_result_is_empty() {
        let found = discovery(Value::Null).webviews().await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_error_status_fails() {
        let err = discovery(json!({"status": 13, "value": {"message": "no app"}}))
            .webviews()
            .await
            .unwrap_err();
        assert!(matches!(err, ContextError::Discovery(_)));
    }
}
