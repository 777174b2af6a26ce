use super::*;

#[test]
fn test_server_config_default() {
    let config = ServerConfig::default();
    assert_eq!(config.host, "127.0.0.1");
    assert_eq!(config.port, 4723);
    assert_eq!(config.base_path, "/wd/hub");
    assert!(!config.session_override);
}

#[test]
fn test_session_config_default() {
    let config = SessionConfig::default();
    assert_eq!(config.default_context, "NATIVE_APP");
    assert!(!config.auto_webview);
    assert_eq!(config.new_command_timeout_secs, 60);
    assert!(config.discovery_command.is_none());
}

#[test]
fn test_channel_config_default_is_polling() {
    let config = ChannelConfig::default();
    assert_eq!(config.kind(), "polling");
    match config {
        ChannelConfig::Polling(polling) => {
            assert_eq!(polling.flakey_retries, 3);
            assert_eq!(polling.command_timeout_secs, 0);
            assert!(polling.launch_marker.is_none());
        }
        ChannelConfig::Stream(_) => panic!("expected polling"),
    }
}

#[test]
fn test_queue_config_default_prefixes() {
    let config = QueueConfig::default();
    assert_eq!(config.backoff_ms, 500);
    assert_eq!(config.unblocking_prefixes.len(), 9);
    assert!(config.unblocking_prefixes.iter().any(|p| p == "au.acceptAlert"));
    assert!(config.unblocking_prefixes.iter().any(|p| p == "/alert_text"));
    assert!(config.context_scoped_prefixes.is_empty());
}

#[test]
fn test_secondary_config_default() {
    let config = SecondaryConfig::default();
    assert_eq!(config.port, 0);
    assert_eq!(config.create_retries, 5);
    assert_eq!(config.probe_path, "/session/{sessionId}/url");
    assert!(config.args.iter().any(|a| a.contains("{port}")));
}

#[test]
fn test_proxy_config_default_exclusions() {
    let config = ProxyConfig::default();
    assert!(config
        .exclusions
        .iter()
        .any(|rule| rule.method == "GET" && rule.path.contains("contexts")));
    assert!(config
        .exclusions
        .iter()
        .any(|rule| rule.method == "POST" && rule.path.ends_with("window$")));
    for endpoint in ["alert_text", "accept_alert", "dismiss_alert"] {
        assert!(config
            .exclusions
            .iter()
            .any(|rule| rule.method == "POST" && rule.path.contains(endpoint)));
    }
}

#[test]
fn test_logging_config_default() {
    let config = LoggingConfig::default();
    assert_eq!(config.level, "info");
    assert!(config.dir.starts_with('~'));
    assert!(config.file);
    assert!(!config.json);
}

#[test]
fn test_config_serialization_roundtrip() {
    let config = Config::default();
    let toml_str = toml::to_string(&config).unwrap();
    let parsed: Config = toml::from_str(&toml_str).unwrap();
    assert_eq!(parsed.server.port, config.server.port);
    assert_eq!(parsed.channel.kind(), "polling");
}
