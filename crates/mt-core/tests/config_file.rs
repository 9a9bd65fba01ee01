//! Configuration file tests

use std::time::Duration;

use mt_core::config::{
    load_config, save_config, AgentConfig, DEFAULT_QUEUE_CAPACITY, DEFAULT_READ_CHUNK_SIZE,
    DEFAULT_SHUTDOWN_TIMEOUT,
};
use mt_core::ConfigError;

#[test]
fn test_partial_file_keeps_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agent.toml");
    std::fs::write(
        &path,
        r#"
broker = "wss://broker.example.com:8084/mqtt"
username = "alice"
password = "hunter2"
name = "rpi"
shutdown_timeout = 3
"#,
    )
    .unwrap();

    let config: AgentConfig = load_config(&path).unwrap();
    assert_eq!(config.device_name(), "rpi");
    assert_eq!(config.shutdown_timeout, Duration::from_secs(3));
    assert_eq!(config.queue_capacity, 200);
    assert!(config.validate().is_ok());
}

#[test]
fn test_save_then_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("agent.toml");

    let config = AgentConfig {
        broker: "mqtt://localhost:1884".to_string(),
        command: Some("/bin/sh".to_string()),
        env: vec![("LANG".to_string(), "C.UTF-8".to_string())],
        ..Default::default()
    };
    save_config(&path, &config).unwrap();

    let loaded: AgentConfig = load_config(&path).unwrap();
    assert_eq!(loaded.broker, config.broker);
    assert_eq!(loaded.shell(), Some("/bin/sh"));
    assert_eq!(loaded.env, config.env);
    assert_eq!(loaded.reset_backoff, config.reset_backoff);
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let result: Result<AgentConfig, _> = load_config(&dir.path().join("absent.toml"));
    assert!(matches!(result, Err(ConfigError::NotFound(_))));
}

#[test]
fn test_empty_file_uses_published_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agent.toml");
    std::fs::write(&path, "").unwrap();

    let config: AgentConfig = load_config(&path).unwrap();
    assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    assert_eq!(config.read_chunk_size, DEFAULT_READ_CHUNK_SIZE);
    assert_eq!(config.shutdown_timeout, DEFAULT_SHUTDOWN_TIMEOUT);
}
