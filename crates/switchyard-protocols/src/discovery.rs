//! Web view discovery.

use async_trait::async_trait;

use crate::error::ContextError;

/// Platform lookup of the web views currently reachable.
#[async_trait]
pub trait ContextDiscovery: Send + Sync {
    /// Returns web view context names, in platform order.
    async fn webviews(&self) -> Result<Vec<String>, ContextError>;
}

/// Discovery backed by a fixed list.
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    webviews: Vec<String>,
}

impl StaticDiscovery {
    pub fn new<I, S>(webviews: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            webviews: webviews.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ContextDiscovery for StaticDiscovery {
    async fn webviews(&self) -> Result<Vec<String>, ContextError> {
        Ok(self.webviews.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_discovery() {
        let discovery = StaticDiscovery::new(["WEBVIEW_1", "WEBVIEW_2"]);
        let found = discovery.webviews().await.unwrap();
        assert_eq!(found, vec!["WEBVIEW_1", "WEBVIEW_2"]);
    }

    #[tokio::test]
    async fn test_static_discovery_empty() {
        let discovery = StaticDiscovery::default();
        assert!(discovery.webviews().await.unwrap().is_empty());
    }
}
