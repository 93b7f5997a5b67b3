//! 동기화 계층의 도메인 이벤트.
//!
//! 푸시 채널과 폴링 스냅샷이 전달하는 모든 변경은 이 타입으로 정규화된 뒤
//! reconciler에 제출됩니다. 모든 이벤트는 리소스 ID와 서버 논리 타임스탬프를
//! 가지며, 같은 리소스에 대한 이벤트는 타임스탬프로 전순서가 정해집니다.

use std::fmt;

use super::market::{ApiStatus, PriceTick};
use super::notification::Notification;
use crate::types::LogicalTimestamp;

/// 이벤트 대상 리소스 식별자.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceId {
    /// 알림 (알림 ID)
    Notification(String),
    /// 시세 (심볼)
    Price(String),
    /// 서버 측 구독 확인 상태
    Subscriptions,
    /// 서버가 스트리밍 중인 심볼 목록
    ActiveSymbols,
    /// 상위 API 상태
    ApiStatus,
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceId::Notification(id) => write!(f, "notification:{}", id),
            ResourceId::Price(symbol) => write!(f, "price:{}", symbol),
            ResourceId::Subscriptions => write!(f, "subscriptions"),
            ResourceId::ActiveSymbols => write!(f, "active_symbols"),
            ResourceId::ApiStatus => write!(f, "api_status"),
        }
    }
}

/// 도메인 이벤트.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    /// 알림 생성 (또는 서버가 보낸 전체 알림 상태)
    NotificationCreated(Notification),
    /// 알림 읽음 처리
    NotificationRead {
        id: String,
        timestamp: LogicalTimestamp,
    },
    /// 알림 삭제
    NotificationDeleted {
        id: String,
        timestamp: LogicalTimestamp,
    },
    /// 시세 갱신
    PriceTick(PriceTick),
    /// 구독/구독 해제 확인
    SubscriptionAck {
        symbols: Vec<String>,
        subscribed: bool,
        /// 서버 시각 (없으면 순서 정보 없음)
        timestamp: Option<LogicalTimestamp>,
    },
    /// 활성 심볼 목록 (푸시 또는 폴링)
    ActiveSymbols {
        symbols: Vec<String>,
        /// 서버 시각. 폴링 결과처럼 서버 시각이 없으면 `None`
        timestamp: Option<LogicalTimestamp>,
    },
    /// 상위 API 상태
    ApiStatus(ApiStatus),
}

impl DomainEvent {
    /// 대상 리소스 ID.
    pub fn resource_id(&self) -> ResourceId {
        match self {
            DomainEvent::NotificationCreated(n) => ResourceId::Notification(n.id.clone()),
            DomainEvent::NotificationRead { id, .. } | DomainEvent::NotificationDeleted { id, .. } => {
                ResourceId::Notification(id.clone())
            }
            DomainEvent::PriceTick(tick) => ResourceId::Price(tick.symbol.clone()),
            DomainEvent::SubscriptionAck { .. } => ResourceId::Subscriptions,
            DomainEvent::ActiveSymbols { .. } => ResourceId::ActiveSymbols,
            DomainEvent::ApiStatus(_) => ResourceId::ApiStatus,
        }
    }

    /// 서버 논리 타임스탬프. 서버 시각이 없는 이벤트는 `None`.
    pub fn timestamp(&self) -> Option<LogicalTimestamp> {
        match self {
            DomainEvent::NotificationCreated(n) => Some(n.timestamp()),
            DomainEvent::NotificationRead { timestamp, .. }
            | DomainEvent::NotificationDeleted { timestamp, .. } => Some(*timestamp),
            DomainEvent::SubscriptionAck { timestamp, .. }
            | DomainEvent::ActiveSymbols { timestamp, .. } => *timestamp,
            DomainEvent::PriceTick(tick) => Some(tick.timestamp),
            DomainEvent::ApiStatus(status) => Some(status.timestamp),
        }
    }

    /// 로그용 이벤트 이름.
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::NotificationCreated(_) => "notification-created",
            DomainEvent::NotificationRead { .. } => "notification-read",
            DomainEvent::NotificationDeleted { .. } => "notification-deleted",
            DomainEvent::PriceTick(_) => "price-tick",
            DomainEvent::SubscriptionAck { .. } => "subscription-ack",
            DomainEvent::ActiveSymbols { .. } => "active-symbols",
            DomainEvent::ApiStatus(_) => "api-status",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_resource_id_and_timestamp() {
        let created = DomainEvent::NotificationCreated(Notification::new("n1", "t", 100));
        assert_eq!(created.resource_id(), ResourceId::Notification("n1".to_string()));
        assert_eq!(created.timestamp(), Some(100));

        let read = DomainEvent::NotificationRead {
            id: "n1".to_string(),
            timestamp: 120,
        };
        assert_eq!(read.resource_id(), created.resource_id());
        assert_eq!(read.name(), "notification-read");

        let tick = DomainEvent::PriceTick(PriceTick::new("btcusdt", dec!(1), 7));
        assert_eq!(tick.resource_id().to_string(), "price:BTCUSDT");
        assert_eq!(tick.timestamp(), Some(7));

        let polled = DomainEvent::ActiveSymbols {
            symbols: vec!["BTCUSDT".to_string()],
            timestamp: None,
        };
        assert_eq!(polled.timestamp(), None);
    }
}
