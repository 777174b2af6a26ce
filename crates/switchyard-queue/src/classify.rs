//! Command classification.

use switchyard_config::QueueConfig;
use switchyard_protocols::Command;

/// How the gates treat a command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandClass {
    /// Held back while a context switch is in progress.
    pub context_scoped: bool,
    /// Allowed through while a proxied request is outstanding.
    pub unblocking: bool,
}

/// Decides the [`CommandClass`] of a command at enqueue time.
pub trait CommandClassifier: Send + Sync {
    fn classify(&self, command: &Command) -> CommandClass;
}

/// Classifies by command-name prefix.
#[derive(Debug, Clone, Default)]
pub struct PrefixClassifier {
    /// Empty means every command is context-scoped.
    context_scoped: Vec<String>,
    unblocking: Vec<String>,
}

impl PrefixClassifier {
    pub fn new(context_scoped: Vec<String>, unblocking: Vec<String>) -> Self {
        Self {
            context_scoped,
            unblocking,
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(
            config.context_scoped_prefixes.clone(),
            config.unblocking_prefixes.clone(),
        )
    }
}

impl CommandClassifier for PrefixClassifier {
    fn classify(&self, command: &Command) -> CommandClass {
        let name = command.name().unwrap_or_default();
        let matches = |prefixes: &[String]| prefixes.iter().any(|p| name.starts_with(p.as_str()));
        CommandClass {
            context_scoped: self.context_scoped.is_empty() || matches(&self.context_scoped),
            unblocking: !name.is_empty() && matches(&self.unblocking),
        }
    }
}
