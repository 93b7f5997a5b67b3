//! 사용자 알림 도메인 모델.

use serde::{Deserialize, Serialize};

use crate::types::{timestamp, LogicalTimestamp};

/// 알림 유형.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// 매매 신호 발생
    Signal,
    /// 가격 알림
    PriceAlert,
    /// 구독 상태 변경
    Subscription,
    /// 결제 관련
    Payment,
    /// 시스템 공지
    #[default]
    System,
    /// 알 수 없는 유형
    #[serde(other)]
    Other,
}

impl NotificationKind {
    /// 직렬화 이름.
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Signal => "signal",
            NotificationKind::PriceAlert => "price_alert",
            NotificationKind::Subscription => "subscription",
            NotificationKind::Payment => "payment",
            NotificationKind::System => "system",
            NotificationKind::Other => "other",
        }
    }
}

/// 사용자 알림.
///
/// `updated_at`은 서버가 마지막으로 이 알림을 변경한 시각이며
/// 동기화 순서 판정의 기준이 됩니다 (도착 시각이 아님).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// 알림 ID
    pub id: String,
    /// 제목
    #[serde(default)]
    pub title: String,
    /// 본문
    #[serde(default)]
    pub message: String,
    /// 알림 유형
    #[serde(default, rename = "type")]
    pub kind: NotificationKind,
    /// 관련 심볼 (신호/가격 알림)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    /// 읽음 여부
    #[serde(default)]
    pub is_read: bool,
    /// 생성 시각 (서버, 밀리초)
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: LogicalTimestamp,
    /// 마지막 변경 시각 (서버, 밀리초)
    #[serde(
        default,
        deserialize_with = "timestamp::deserialize_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<LogicalTimestamp>,
}

impl Notification {
    /// 새 알림 생성 (읽지 않음 상태).
    pub fn new(id: impl Into<String>, title: impl Into<String>, created_at: LogicalTimestamp) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            message: String::new(),
            kind: NotificationKind::default(),
            symbol: None,
            is_read: false,
            created_at,
            updated_at: None,
        }
    }

    /// 본문 설정.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// 유형 설정.
    pub fn with_kind(mut self, kind: NotificationKind) -> Self {
        self.kind = kind;
        self
    }

    /// 읽음 상태 설정.
    pub fn with_read(mut self, is_read: bool) -> Self {
        self.is_read = is_read;
        self
    }

    /// 마지막 변경 시각 설정.
    pub fn with_updated_at(mut self, updated_at: LogicalTimestamp) -> Self {
        self.updated_at = Some(updated_at);
        self
    }

    /// 순서 판정에 사용하는 논리 타임스탬프.
    pub fn timestamp(&self) -> LogicalTimestamp {
        self.updated_at.map_or(self.created_at, |u| u.max(self.created_at))
    }

    /// 읽음 처리된 사본 반환.
    pub fn marked_read(&self, at: Option<LogicalTimestamp>) -> Self {
        let mut read = self.clone();
        read.is_read = true;
        if let Some(at) = at {
            read.updated_at = Some(at.max(self.timestamp()));
        }
        read
    }
}

/// 알림 목록 조회 옵션.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationQuery {
    /// 최대 개수
    pub limit: u32,
    /// 시작 위치
    pub offset: u32,
    /// 읽지 않은 알림만
    pub unread_only: bool,
}

impl Default for NotificationQuery {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
            unread_only: false,
        }
    }
}

impl NotificationQuery {
    /// 첫 페이지 조회.
    pub fn first_page(limit: u32) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    /// 읽지 않은 알림만 조회하도록 설정.
    pub fn unread(mut self) -> Self {
        self.unread_only = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_rest_payload() {
        let json = r#"{
            "id": "n1",
            "title": "BTC 매수 신호",
            "message": "RSI 30 하향 돌파",
            "type": "signal",
            "symbol": "BTCUSDT",
            "isRead": false,
            "createdAt": "2024-01-01T00:00:00Z"
        }"#;

        let n: Notification = serde_json::from_str(json).unwrap();
        assert_eq!(n.id, "n1");
        assert_eq!(n.kind, NotificationKind::Signal);
        assert_eq!(n.symbol.as_deref(), Some("BTCUSDT"));
        assert_eq!(n.created_at, 1_704_067_200_000);
        assert_eq!(n.timestamp(), n.created_at);
    }

    #[test]
    fn test_unknown_kind_falls_back() {
        let json = r#"{"id": "n2", "type": "admin_approval", "createdAt": 10}"#;
        let n: Notification = serde_json::from_str(json).unwrap();
        assert_eq!(n.kind, NotificationKind::Other);
        assert!(!n.is_read);
    }

    #[test]
    fn test_timestamp_uses_latest_change() {
        let n = Notification::new("n1", "t", 100).with_updated_at(150);
        assert_eq!(n.timestamp(), 150);

        // updated_at이 생성 시각보다 앞설 수 없음
        let n = Notification::new("n1", "t", 100).with_updated_at(50);
        assert_eq!(n.timestamp(), 100);
    }

    #[test]
    fn test_marked_read_never_moves_backwards() {
        let n = Notification::new("n1", "t", 100);
        let read = n.marked_read(Some(40));
        assert!(read.is_read);
        assert_eq!(read.timestamp(), 100);

        let read = n.marked_read(None);
        assert_eq!(read.updated_at, None);
    }
}
