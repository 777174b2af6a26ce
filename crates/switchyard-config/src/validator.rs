//! Configuration validation.

use regex::Regex;

use crate::error::ConfigError;
use crate::schema::{ChannelConfig, Config};

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Convert into an error if any validation error was recorded.
    pub fn into_result(self) -> Result<Vec<ValidationWarning>, ConfigError> {
        if let Some(first) = self.errors.first() {
            return Err(ConfigError::InvalidValue {
                field: first.path.clone(),
                message: first.message.clone(),
            });
        }
        Ok(self.warnings)
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> Result<ValidationResult, ConfigError> {
        let mut result = ValidationResult::default();

        Self::validate_server(config, &mut result);
        Self::validate_session(config, &mut result);
        Self::validate_channel(config, &mut result);
        Self::validate_queue(config, &mut result);
        Self::validate_secondary(config, &mut result);
        Self::validate_proxy(config, &mut result);

        Ok(result)
    }

    fn validate_server(config: &Config, result: &mut ValidationResult) {
        if config.server.port == 0 {
            result.add_error(ValidationError::new("server.port", "Port cannot be 0"));
        }

        if config.server.host.is_empty() {
            result.add_error(ValidationError::new("server.host", "Host cannot be empty"));
        }

        let base = &config.server.base_path;
        if !base.is_empty() && (!base.starts_with('/') || base.ends_with('/')) {
            result.add_error(ValidationError::new(
                "server.base_path",
                "base_path must be empty or start with '/' and not end with '/'",
            ));
        }
    }

    fn validate_session(config: &Config, result: &mut ValidationResult) {
        if config.session.default_context.is_empty() {
            result.add_error(ValidationError::new(
                "session.default_context",
                "default_context cannot be empty",
            ));
        }

        if config.session.auto_webview
            && config.session.webviews.is_empty()
            && config.session.discovery_command.is_none()
        {
            result.add_warning(ValidationWarning::new(
                "session.auto_webview",
                "auto_webview is set but no web views can be discovered",
            ));
        }
    }

    fn validate_channel(config: &Config, result: &mut ValidationResult) {
        match &config.channel {
            ChannelConfig::Polling(polling) => {
                if polling.program.is_empty() {
                    result.add_error(ValidationError::new(
                        "channel.program",
                        "program is required for the polling channel",
                    ));
                }
                if polling.checkin_timeout_secs == 0 {
                    result.add_error(ValidationError::new(
                        "channel.checkin_timeout_secs",
                        "checkin_timeout_secs must be greater than 0",
                    ));
                }
                if let Some(marker) = &polling.launch_marker {
                    Self::check_pattern("channel.launch_marker", marker, result);
                }
                Self::check_pattern("channel.artifact_pattern", &polling.artifact_pattern, result);
                if polling.flakey_retries > 10 {
                    result.add_warning(ValidationWarning::new(
                        "channel.flakey_retries",
                        "flakey_retries is very high (>10), startup failures may take long to surface",
                    ));
                }
            }
            ChannelConfig::Stream(stream) => {
                if stream.port == 0 {
                    result.add_error(ValidationError::new("channel.port", "Port cannot be 0"));
                }
                if stream.max_frame_bytes == 0 {
                    result.add_error(ValidationError::new(
                        "channel.max_frame_bytes",
                        "max_frame_bytes must be greater than 0",
                    ));
                }
            }
        }
    }

    fn validate_queue(config: &Config, result: &mut ValidationResult) {
        if config.queue.backoff_ms == 0 {
            result.add_error(ValidationError::new(
                "queue.backoff_ms",
                "backoff_ms must be greater than 0",
            ));
        }
    }

    fn validate_secondary(config: &Config, result: &mut ValidationResult) {
        if config.secondary.program.is_empty() {
            result.add_warning(ValidationWarning::new(
                "secondary.program",
                "No secondary program configured, web view contexts cannot be entered",
            ));
        }
        if !config.secondary.probe_path.starts_with('/') {
            result.add_error(ValidationError::new(
                "secondary.probe_path",
                "probe_path must start with '/'",
            ));
        }
        if config.secondary.startup_timeout_secs == 0 {
            result.add_error(ValidationError::new(
                "secondary.startup_timeout_secs",
                "startup_timeout_secs must be greater than 0",
            ));
        }
    }

    fn validate_proxy(config: &Config, result: &mut ValidationResult) {
        for (i, rule) in config.proxy.exclusions.iter().enumerate() {
            let path = format!("proxy.exclusions[{}]", i);
            if rule.method.is_empty() || rule.method != rule.method.to_uppercase() {
                result.add_error(ValidationError::new(
                    format!("{}.method", path),
                    "method must be a non-empty upper case HTTP method",
                ));
            }
            Self::check_pattern(&format!("{}.path", path), &rule.path, result);
        }
    }

    fn check_pattern(path: &str, pattern: &str, result: &mut ValidationResult) {
        if let Err(e) = Regex::new(pattern) {
            result.add_error(ValidationError::new(path, format!("Invalid pattern: {}", e)));
        }
    }
}
