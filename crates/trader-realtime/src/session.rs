//! 인증 세션 (bearer 토큰 보관).
//!
//! 토큰 발급/갱신은 외부 인증 시스템의 책임이며, 이 모듈은 현재 토큰을
//! 보관하고 요청 시점에 읽어갈 수 있게만 합니다. 토큰이 없으면 REST 요청과
//! WebSocket 연결 모두 시도하지 않습니다.

use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::{SyncError, SyncResult};

/// 공유 인증 세션.
///
/// 복제본은 같은 토큰 저장소를 가리킵니다.
#[derive(Clone)]
pub struct AuthSession {
    token: Arc<watch::Sender<Option<SecretString>>>,
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

impl Default for AuthSession {
    fn default() -> Self {
        Self::anonymous()
    }
}

impl AuthSession {
    /// 토큰이 없는 세션.
    pub fn anonymous() -> Self {
        let (tx, _) = watch::channel(None);
        Self { token: Arc::new(tx) }
    }

    /// 토큰을 가진 세션.
    pub fn with_token(token: impl Into<String>) -> Self {
        let session = Self::anonymous();
        session.set_token(token);
        session
    }

    /// 토큰 설정 (로그인/갱신).
    pub fn set_token(&self, token: impl Into<String>) {
        let token: String = token.into();
        let value = if token.trim().is_empty() {
            None
        } else {
            Some(SecretString::from(token))
        };
        self.token.send_replace(value);
    }

    /// 토큰 제거 (로그아웃).
    pub fn clear(&self) {
        self.token.send_replace(None);
    }

    /// 인증 여부.
    pub fn is_authenticated(&self) -> bool {
        self.token.borrow().is_some()
    }

    /// 현재 토큰. 없으면 `SyncError::Auth`.
    pub fn token(&self) -> SyncResult<SecretString> {
        self.token
            .borrow()
            .clone()
            .ok_or_else(|| SyncError::Auth("인증되지 않은 세션".to_string()))
    }

    /// `Authorization` 헤더 값.
    pub fn bearer_header(&self) -> SyncResult<String> {
        let token = self.token()?;
        Ok(format!("Bearer {}", token.expose_secret()))
    }

    /// 토큰 변경 알림 수신기.
    pub fn watch(&self) -> watch::Receiver<Option<SecretString>> {
        self.token.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous_session_has_no_token() {
        let session = AuthSession::anonymous();
        assert!(!session.is_authenticated());
        assert!(session.token().unwrap_err().is_auth_error());
        assert!(session.bearer_header().is_err());
    }

    #[test]
    fn test_clones_share_token() {
        let session = AuthSession::anonymous();
        let clone = session.clone();

        session.set_token("abc");
        assert!(clone.is_authenticated());
        assert_eq!(clone.bearer_header().unwrap(), "Bearer abc");

        clone.clear();
        assert!(!session.is_authenticated());
    }

    #[test]
    fn test_blank_token_is_treated_as_absent() {
        let session = AuthSession::with_token("   ");
        assert!(!session.is_authenticated());
    }

    #[test]
    fn test_debug_does_not_leak_token() {
        let session = AuthSession::with_token("super-secret");
        let debug = format!("{:?}", session);
        assert!(!debug.contains("super-secret"));
    }
}
