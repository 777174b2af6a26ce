use super::*;
use crate::schema::{ExclusionRule, PollingChannelConfig, StreamChannelConfig};

fn valid_config() -> Config {
    let mut config = Config::default();
    config.channel = ChannelConfig::Polling(PollingChannelConfig {
        program: "/usr/bin/instruments".to_string(),
        ..Default::default()
    });
    config
}

#[test]
fn test_validate_valid_config() {
    let result = ConfigValidator::validate(&valid_config()).unwrap();
    assert!(result.is_valid());
}

#[test]
fn test_validate_default_config_requires_program() {
    let result = ConfigValidator::validate(&Config::default()).unwrap();
    assert!(!result.is_valid());
    assert!(result.errors.iter().any(|e| e.path == "channel.program"));
}

#[test]
fn test_validate_invalid_port() {
    let mut config = valid_config();
    config.server.port = 0;

    let result = ConfigValidator::validate(&config).unwrap();
    assert!(!result.is_valid());
    assert!(result.errors.iter().any(|e| e.path == "server.port"));
}

#[test]
fn test_validate_base_path() {
    let mut config = valid_config();
    config.server.base_path = "wd/hub/".to_string();
    let result = ConfigValidator::validate(&config).unwrap();
    assert!(result.errors.iter().any(|e| e.path == "server.base_path"));

    config.server.base_path = String::new();
    let result = ConfigValidator::validate(&config).unwrap();
    assert!(result.is_valid());
}

#[test]
fn test_validate_bad_launch_marker() {
    let mut config = valid_config();
    if let ChannelConfig::Polling(polling) = &mut config.channel {
        polling.launch_marker = Some("(unclosed".to_string());
    }
    let result = ConfigValidator::validate(&config).unwrap();
    assert!(result.errors.iter().any(|e| e.path == "channel.launch_marker"));
}

#[test]
fn test_validate_high_retries_warning() {
    let mut config = valid_config();
    if let ChannelConfig::Polling(polling) = &mut config.channel {
        polling.flakey_retries = 50;
    }
    let result = ConfigValidator::validate(&config).unwrap();
    assert!(result.is_valid());
    assert!(result.warnings.iter().any(|w| w.path == "channel.flakey_retries"));
}

#[test]
fn test_validate_stream_channel() {
    let mut config = Config::default();
    config.channel = ChannelConfig::Stream(StreamChannelConfig::default());
    assert!(ConfigValidator::validate(&config).unwrap().is_valid());

    config.channel = ChannelConfig::Stream(StreamChannelConfig {
        port: 0,
        ..Default::default()
    });
    let result = ConfigValidator::validate(&config).unwrap();
    assert!(result.errors.iter().any(|e| e.path == "channel.port"));
}

#[test]
fn test_validate_exclusion_rules() {
    let mut config = valid_config();
    config.proxy.exclusions.push(ExclusionRule::new("get", "^/ok$"));
    config.proxy.exclusions.push(ExclusionRule::new("GET", "[bad"));

    let result = ConfigValidator::validate(&config).unwrap();
    assert_eq!(result.errors.len(), 2);
    assert!(result.errors.iter().any(|e| e.path.ends_with(".method")));
    assert!(result.errors.iter().any(|e| e.path.ends_with(".path")));
}

#[test]
fn test_validate_auto_webview_warning() {
    let mut config = valid_config();
    config.session.auto_webview = true;
    let result = ConfigValidator::validate(&config).unwrap();
    assert!(result.is_valid());
    assert!(result.warnings.iter().any(|w| w.path == "session.auto_webview"));
}

#[test]
fn test_into_result() {
    let mut config = valid_config();
    config.queue.backoff_ms = 0;
    let err = ConfigValidator::validate(&config).unwrap().into_result().unwrap_err();
    assert!(err.to_string().contains("queue.backoff_ms"));

    let warnings = ConfigValidator::validate(&valid_config())
        .unwrap()
        .into_result()
        .unwrap();
    assert!(warnings.is_empty());
}
