//! CLI 명령어 구현 모듈.

pub mod notifications;
pub mod watch;

use anyhow::Result;
use trader_core::{to_datetime, LogicalTimestamp};
use trader_realtime::AuthSession;

/// bearer 토큰 환경 변수.
pub const TOKEN_ENV: &str = "SIGNAL_TOKEN";

/// 출력 형식.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

impl OutputFormat {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            _ => Err(anyhow::anyhow!("Invalid format: {}. Use: table, json", s)),
        }
    }
}

/// 환경 변수의 토큰으로 세션 생성. 없으면 익명 세션.
pub fn session_from_env() -> AuthSession {
    match std::env::var(TOKEN_ENV) {
        Ok(token) if !token.trim().is_empty() => AuthSession::with_token(token),
        _ => AuthSession::anonymous(),
    }
}

/// 서버 타임스탬프를 사람이 읽는 형식으로.
pub fn format_timestamp(ts: LogicalTimestamp) -> String {
    to_datetime(ts)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_parse() {
        assert_eq!(OutputFormat::parse("TABLE").unwrap(), OutputFormat::Table);
        assert_eq!(OutputFormat::parse("json").unwrap(), OutputFormat::Json);
        assert!(OutputFormat::parse("csv").is_err());
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00");
        assert_eq!(format_timestamp(1_700_000_000_000), "2023-11-14 22:13:20");
    }
}
