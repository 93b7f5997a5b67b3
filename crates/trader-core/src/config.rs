//! 설정 관리.
//!
//! 동기화 계층이 사용하는 엔드포인트, 폴링 주기, 재연결 정책을 정의합니다.
//! TOML 파일(선택)에서 로드한 뒤 `SIGNAL_` 접두사 환경 변수로 덮어씁니다.
//!
//! ```text
//! SIGNAL_REST__BASE_URL=https://api.example.com/api
//! SIGNAL_PUSH__MARKET_URL=wss://api.example.com/ws/market
//! SIGNAL_POLLING__BASE_INTERVAL_MS=15000
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::domain::StreamKind;
use crate::error::{CoreError, CoreResult};

/// 환경 변수 접두사.
pub const ENV_PREFIX: &str = "SIGNAL";

/// 동기화 계층 설정.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SyncConfig {
    /// 푸시 채널 설정
    #[serde(default)]
    pub push: PushConfig,
    /// REST 스냅샷 설정
    #[serde(default)]
    pub rest: RestConfig,
    /// 폴링 설정
    #[serde(default)]
    pub polling: PollingConfig,
    /// 재연결 설정
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    /// 로깅 설정
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 푸시 채널 (WebSocket) 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PushConfig {
    /// 푸시 채널 사용 여부 (false면 폴링만 사용)
    #[serde(default = "default_push_enabled")]
    pub enabled: bool,
    /// 알림 스트림 URL
    #[serde(default = "default_notifications_url")]
    pub notifications_url: String,
    /// 시세 스트림 URL
    #[serde(default = "default_market_url")]
    pub market_url: String,
}

fn default_push_enabled() -> bool {
    true
}
fn default_notifications_url() -> String {
    "ws://127.0.0.1:3000/ws/notifications".to_string()
}
fn default_market_url() -> String {
    "ws://127.0.0.1:3000/ws/market".to_string()
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: default_push_enabled(),
            notifications_url: default_notifications_url(),
            market_url: default_market_url(),
        }
    }
}

impl PushConfig {
    /// 스트림별 URL.
    pub fn url_for(&self, stream: StreamKind) -> &str {
        match stream {
            StreamKind::Notifications => &self.notifications_url,
            StreamKind::Market => &self.market_url,
        }
    }
}

/// REST 스냅샷 엔드포인트 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RestConfig {
    /// REST API 기본 URL
    #[serde(default = "default_rest_base_url")]
    pub base_url: String,
    /// 요청 타임아웃 (초)
    #[serde(default = "default_rest_timeout")]
    pub timeout_secs: u64,
}

fn default_rest_base_url() -> String {
    "http://127.0.0.1:3000/api".to_string()
}
fn default_rest_timeout() -> u64 {
    10
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: default_rest_base_url(),
            timeout_secs: default_rest_timeout(),
        }
    }
}

impl RestConfig {
    /// 요청 타임아웃.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// 폴링 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollingConfig {
    /// 기본 폴링 간격 (밀리초)
    #[serde(default = "default_poll_interval")]
    pub base_interval_ms: u64,
    /// 실패 시 확장 상한 (밀리초)
    #[serde(default = "default_poll_max_interval")]
    pub max_interval_ms: u64,
    /// 페이지 숨김/비활성 시 간격 배수
    #[serde(default = "default_idle_multiplier")]
    pub idle_multiplier: u32,
    /// 알림 스냅샷 페이지 크기
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// 시세 심볼 목록 폴링 여부
    #[serde(default = "default_poll_symbols")]
    pub poll_active_symbols: bool,
}

fn default_poll_interval() -> u64 {
    30_000
}
fn default_poll_max_interval() -> u64 {
    60_000
}
fn default_idle_multiplier() -> u32 {
    4
}
fn default_page_size() -> u32 {
    50
}
fn default_poll_symbols() -> bool {
    true
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: default_poll_interval(),
            max_interval_ms: default_poll_max_interval(),
            idle_multiplier: default_idle_multiplier(),
            page_size: default_page_size(),
            poll_active_symbols: default_poll_symbols(),
        }
    }
}

impl PollingConfig {
    /// 기본 폴링 간격.
    pub fn base_interval(&self) -> Duration {
        Duration::from_millis(self.base_interval_ms)
    }

    /// 실패 확장 상한.
    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }
}

/// 재연결 (backoff) 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconnectConfig {
    /// 기본 지연 (밀리초)
    #[serde(default = "default_reconnect_base")]
    pub base_delay_ms: u64,
    /// 최대 지연 (밀리초)
    #[serde(default = "default_reconnect_max")]
    pub max_delay_ms: u64,
    /// 최대 연속 실패 횟수
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Ping 간격 (초)
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
}

fn default_reconnect_base() -> u64 {
    3_000
}
fn default_reconnect_max() -> u64 {
    30_000
}
fn default_max_attempts() -> u32 {
    5
}
fn default_ping_interval() -> u64 {
    30
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_reconnect_base(),
            max_delay_ms: default_reconnect_max(),
            max_attempts: default_max_attempts(),
            ping_interval_secs: default_ping_interval(),
        }
    }
}

impl ReconnectConfig {
    /// Ping 간격.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }
}

/// 로깅 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// 로그 레벨
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 로그 형식 (pretty, json, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
    /// 연결 span 진입/종료 기록 여부
    #[serde(default)]
    pub span_events: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            span_events: false,
        }
    }
}

impl SyncConfig {
    /// 파일(선택)과 환경 변수에서 설정을 로드합니다.
    ///
    /// 파일이 없으면 기본값에 환경 변수만 적용합니다.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> CoreResult<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path.as_ref()).required(false));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: SyncConfig = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// 기본 경로에서 설정을 로드합니다.
    pub fn load_default() -> CoreResult<Self> {
        Self::load(Some("config/signal.toml"))
    }

    /// 값 검증.
    pub fn validate(&self) -> CoreResult<()> {
        if self.polling.base_interval_ms == 0 {
            return Err(CoreError::Config(
                "polling.base_interval_ms는 0보다 커야 합니다".to_string(),
            ));
        }
        if self.polling.max_interval_ms < self.polling.base_interval_ms {
            return Err(CoreError::Config(
                "polling.max_interval_ms는 base_interval_ms 이상이어야 합니다".to_string(),
            ));
        }
        if self.polling.idle_multiplier == 0 {
            return Err(CoreError::Config(
                "polling.idle_multiplier는 1 이상이어야 합니다".to_string(),
            ));
        }
        if self.reconnect.base_delay_ms == 0 || self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return Err(CoreError::Config(
                "reconnect.base_delay_ms는 0보다 크고 max_delay_ms 이하여야 합니다".to_string(),
            ));
        }
        if self.reconnect.ping_interval_secs == 0 {
            return Err(CoreError::Config(
                "reconnect.ping_interval_secs는 0보다 커야 합니다".to_string(),
            ));
        }

        for stream in StreamKind::all() {
            let url = self.push.url_for(stream);
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                return Err(CoreError::Config(format!(
                    "{} 푸시 URL은 ws:// 또는 wss:// 여야 합니다: {}",
                    stream, url
                )));
            }
        }

        if !(self.rest.base_url.starts_with("http://") || self.rest.base_url.starts_with("https://")) {
            return Err(CoreError::Config(format!(
                "rest.base_url은 http:// 또는 https:// 여야 합니다: {}",
                self.rest.base_url
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.polling.base_interval(), Duration::from_secs(30));
        assert_eq!(config.polling.max_interval(), Duration::from_secs(60));
        assert_eq!(config.reconnect.base_delay_ms, 3_000);
        assert_eq!(config.reconnect.max_delay_ms, 30_000);
        assert_eq!(config.reconnect.max_attempts, 5);
        assert!(config.push.enabled);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: SyncConfig = from_json(
            r#"{"rest": {"base_url": "https://api.example.com"}, "polling": {"base_interval_ms": 5000}}"#,
        );
        assert_eq!(config.rest.base_url, "https://api.example.com");
        assert_eq!(config.rest.timeout_secs, 10);
        assert_eq!(config.polling.base_interval_ms, 5000);
        assert_eq!(config.polling.idle_multiplier, 4);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = SyncConfig::default();
        config.polling.base_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = SyncConfig::default();
        config.reconnect.base_delay_ms = 60_000;
        assert!(config.validate().is_err());

        let mut config = SyncConfig::default();
        config.push.market_url = "http://example.com".to_string();
        assert!(config.validate().is_err());

        let mut config = SyncConfig::default();
        config.rest.base_url = "ftp://example.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_url_for_stream() {
        let config = PushConfig::default();
        assert!(config.url_for(StreamKind::Market).ends_with("/ws/market"));
        assert!(config
            .url_for(StreamKind::Notifications)
            .ends_with("/ws/notifications"));
    }

    fn from_json(json: &str) -> SyncConfig {
        serde_json::from_str(json).unwrap()
    }
}
