//! Errors raised while loading or validating a configuration file.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// `load` was pointed at a path that does not exist.
    #[error("No configuration at {0}")]
    NotFound(String),

    /// First validation error; the path is dotted, e.g. `queue.command_timeout_secs`.
    #[error("{field}: {message}")]
    InvalidValue { field: String, message: String },

    /// `${VAR}` reference with no value in the environment.
    #[error("${{{0}}} is referenced but not set")]
    EnvVarNotSet(String),

    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed configuration: {0}")]
    TomlParse(#[from] toml::de::Error),
}
