//! 설정 로드 통합 테스트 (파일 + 환경 변수).

use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use trader_core::{StreamKind, SyncConfig};

fn write_config(name: &str, body: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("signal-{}-{}.toml", name, std::process::id()));
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_load_file_then_env_overrides() {
    let path = write_config(
        "override",
        r#"
[rest]
base_url = "https://api.example.com/api"

[polling]
base_interval_ms = 10000
idle_multiplier = 2

[push]
market_url = "wss://api.example.com/ws/market"
"#,
    );

    std::env::set_var("SIGNAL_POLLING__MAX_INTERVAL_MS", "45000");
    std::env::set_var("SIGNAL_PUSH__ENABLED", "false");
    let config = SyncConfig::load(Some(&path));
    std::env::remove_var("SIGNAL_POLLING__MAX_INTERVAL_MS");
    std::env::remove_var("SIGNAL_PUSH__ENABLED");
    fs::remove_file(&path).ok();

    let config = config.unwrap();
    assert_eq!(config.rest.base_url, "https://api.example.com/api");
    assert_eq!(config.polling.base_interval(), Duration::from_secs(10));
    assert_eq!(config.polling.max_interval(), Duration::from_secs(45));
    assert_eq!(config.polling.idle_multiplier, 2);
    assert!(!config.push.enabled);
    assert_eq!(
        config.push.url_for(StreamKind::Market),
        "wss://api.example.com/ws/market"
    );
    assert_eq!(config.reconnect.max_attempts, 5);
}

#[test]
fn test_missing_file_uses_defaults() {
    let path = std::env::temp_dir().join("signal-does-not-exist.toml");
    let config = SyncConfig::load(Some(&path)).unwrap();
    assert_eq!(config.polling.base_interval(), Duration::from_secs(30));
}

#[test]
fn test_invalid_file_is_rejected() {
    let path = write_config(
        "invalid",
        r#"
[polling]
base_interval_ms = 90000
max_interval_ms = 60000
"#,
    );
    let result = SyncConfig::load(Some(&path));
    fs::remove_file(&path).ok();
    assert!(result.is_err());
}
