//! Commands addressed to a backend.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A command sent to the native automation backend.
///
/// The payload is opaque to the server; only the backend script
/// understands it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Unique command ID.
    pub id: Uuid,
    /// Backend-specific payload.
    pub payload: Value,
}

impl Command {
    /// Create a command with a fresh ID.
    pub fn new(payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
        }
    }

    /// Returns the command name used for classification.
    ///
    /// A string payload is its own name. Object payloads are named by
    /// their `cmd`, `type` or `path` field, in that order.
    pub fn name(&self) -> Option<&str> {
        match &self.payload {
            Value::String(s) => Some(s.as_str()),
            Value::Object(map) => ["cmd", "type", "path"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_new_has_unique_ids() {
        let a = Command::new(json!("au.getTree()"));
        let b = Command::new(json!("au.getTree()"));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_command_name_from_string() {
        let cmd = Command::new(json!("au.alertIsPresent()"));
        assert_eq!(cmd.name(), Some("au.alertIsPresent()"));
    }

    #[test]
    fn test_command_name_from_object() {
        let cmd = Command::new(json!({"type": "getMarionetteID"}));
        assert_eq!(cmd.name(), Some("getMarionetteID"));

        let cmd = Command::new(json!({"method": "GET", "path": "/source"}));
        assert_eq!(cmd.name(), Some("/source"));
    }

    #[test]
    fn test_command_name_missing() {
        let cmd = Command::new(json!({"foo": 1}));
        assert!(cmd.name().is_none());
        assert!(Command::new(json!(42)).name().is_none());
    }
}
