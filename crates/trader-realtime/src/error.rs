//! 동기화 계층 에러 타입.

use reqwest::StatusCode;
use thiserror::Error;
use tokio_tungstenite::tungstenite;
use trader_core::{CoreError, StreamKind};

/// 동기화 계층 에러.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// 일시적 네트워크/연결 에러 (backoff 또는 폴링 정책에 따라 재시도)
    #[error("네트워크 에러: {0}")]
    Network(String),

    /// 요청 타임아웃
    #[error("요청 타임아웃: {0}")]
    Timeout(String),

    /// 인증 실패 (자동 재시도 대상 아님)
    #[error("인증 에러: {0}")]
    Auth(String),

    /// 최대 재연결 시도 횟수 초과 (명시적으로 다시 활성화할 때까지 중단)
    #[error("{stream} 스트림 최대 재연결 시도 횟수 초과 ({attempts}회)")]
    MaxRetriesExceeded { stream: StreamKind, attempts: u32 },

    /// 낙관적 변경이 서버에서 거부되어 롤백됨
    #[error("{action} 실패 ({resource}): {reason}")]
    OptimisticMutationFailed {
        action: String,
        resource: String,
        reason: String,
    },

    /// 리소스를 찾을 수 없음
    #[error("찾을 수 없음: {0}")]
    NotFound(String),

    /// 응답/프레임 파싱 에러
    #[error("파싱 에러: {0}")]
    Parse(String),

    /// 푸시 채널 프로토콜 에러
    #[error("프로토콜 에러: {0}")]
    Protocol(String),

    /// 설정 에러
    #[error("설정 에러: {0}")]
    Config(String),

    /// 이미 종료된 구성 요소에 요청
    #[error("동기화 허브가 종료됨")]
    Closed,
}

/// 동기화 작업을 위한 Result 타입.
pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    /// 재시도 가능한 에러인지 확인.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Network(_) | SyncError::Timeout(_))
    }

    /// 인증 에러인지 확인.
    pub fn is_auth_error(&self) -> bool {
        matches!(self, SyncError::Auth(_))
    }

    /// 자동 재시도를 멈춰야 하는 에러인지 확인.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Auth(_)
                | SyncError::MaxRetriesExceeded { .. }
                | SyncError::Config(_)
                | SyncError::Closed
        )
    }

    /// HTTP 상태 코드를 에러로 분류.
    pub fn from_status(status: StatusCode, context: impl Into<String>) -> Self {
        let context = context.into();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                SyncError::Auth(format!("{} ({})", context, status))
            }
            StatusCode::NOT_FOUND => SyncError::NotFound(context),
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                SyncError::Timeout(format!("{} ({})", context, status))
            }
            s if s == StatusCode::TOO_MANY_REQUESTS || s.is_server_error() => {
                SyncError::Network(format!("{} ({})", context, status))
            }
            s => SyncError::Protocol(format!("{} ({})", context, s)),
        }
    }

    /// 낙관적 변경 실패 에러 생성.
    pub fn mutation_failed(action: &str, resource: impl Into<String>, cause: &SyncError) -> Self {
        SyncError::OptimisticMutationFailed {
            action: action.to_string(),
            resource: resource.into(),
            reason: cause.to_string(),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout(err.to_string())
        } else if err.is_decode() {
            SyncError::Parse(err.to_string())
        } else if let Some(status) = err.status() {
            SyncError::from_status(status, err.to_string())
        } else {
            SyncError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Parse(err.to_string())
    }
}

impl From<tungstenite::Error> for SyncError {
    fn from(err: tungstenite::Error) -> Self {
        match &err {
            tungstenite::Error::Http(response)
                if response.status().as_u16() == 401 || response.status().as_u16() == 403 =>
            {
                SyncError::Auth(format!("WebSocket 핸드셰이크 거부: {}", response.status()))
            }
            tungstenite::Error::Url(e) => SyncError::Config(e.to_string()),
            _ => SyncError::Network(err.to_string()),
        }
    }
}

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        SyncError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_and_fatal() {
        assert!(SyncError::Network("reset".to_string()).is_retryable());
        assert!(SyncError::Timeout("10s".to_string()).is_retryable());
        assert!(!SyncError::Auth("expired".to_string()).is_retryable());

        assert!(SyncError::Auth("expired".to_string()).is_fatal());
        assert!(SyncError::MaxRetriesExceeded {
            stream: StreamKind::Market,
            attempts: 5
        }
        .is_fatal());
        assert!(!SyncError::Network("reset".to_string()).is_fatal());
    }

    #[test]
    fn test_from_status() {
        assert!(SyncError::from_status(StatusCode::UNAUTHORIZED, "x").is_auth_error());
        assert!(SyncError::from_status(StatusCode::FORBIDDEN, "x").is_auth_error());
        assert_eq!(
            SyncError::from_status(StatusCode::NOT_FOUND, "n1"),
            SyncError::NotFound("n1".to_string())
        );
        assert!(SyncError::from_status(StatusCode::BAD_GATEWAY, "x").is_retryable());
        assert!(SyncError::from_status(StatusCode::TOO_MANY_REQUESTS, "x").is_retryable());
        assert!(matches!(
            SyncError::from_status(StatusCode::BAD_REQUEST, "x"),
            SyncError::Protocol(_)
        ));
    }

    #[test]
    fn test_mutation_failed_message() {
        let err = SyncError::mutation_failed(
            "mark_as_read",
            "n1",
            &SyncError::Network("connection reset".to_string()),
        );
        assert_eq!(
            err.to_string(),
            "mark_as_read 실패 (n1): 네트워크 에러: connection reset"
        );
    }
}
