//! 논리 스트림 구분.

use serde::{Deserialize, Serialize};
use std::fmt;

/// 독립적으로 동기화되는 논리 스트림.
///
/// 스트림마다 별도의 연결과 장애 도메인을 가집니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// 사용자 알림
    Notifications,
    /// 시세
    Market,
}

impl StreamKind {
    /// 모든 스트림.
    pub fn all() -> [StreamKind; 2] {
        [StreamKind::Notifications, StreamKind::Market]
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Notifications => write!(f, "notifications"),
            StreamKind::Market => write!(f, "market"),
        }
    }
}
