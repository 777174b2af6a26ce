//! Execution contexts.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of the native context.
pub const NATIVE_APP: &str = "NATIVE_APP";

/// Alias that selects the first discovered web view.
pub const WEBVIEW_ALIAS: &str = "WEBVIEW";

/// Where commands for the session are executed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Context {
    /// The native automation backend.
    #[default]
    Native,
    /// A web view served by a secondary WebDriver server.
    Webview(String),
}

impl Context {
    /// Parse a context name as reported to clients.
    pub fn from_name(name: &str) -> Self {
        if name == NATIVE_APP {
            Self::Native
        } else {
            Self::Webview(name.to_string())
        }
    }

    /// Returns the client-facing name.
    pub fn name(&self) -> &str {
        match self {
            Self::Native => NATIVE_APP,
            Self::Webview(id) => id,
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, Self::Native)
    }

    pub fn webview_id(&self) -> Option<&str> {
        match self {
            Self::Native => None,
            Self::Webview(id) => Some(id),
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
