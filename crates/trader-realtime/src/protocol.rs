//! 푸시 채널 메시지 타입.
//!
//! 모든 프레임은 `type` 필드로 구분되는 JSON 텍스트 프레임입니다.
//!
//! - 클라이언트 → 서버: `subscribe_symbols`, `unsubscribe_symbols`, `get_active_symbols`
//! - 서버 → 클라이언트: `price_update`, `initial_market_data`, `api_status`,
//!   `active_symbols`, `subscribed`, `unsubscribed`, `error`,
//!   `notification_created`, `notification_read`, `notification_deleted`

use serde::{Deserialize, Serialize};
use trader_core::types::timestamp;
use trader_core::{
    normalize_symbol, ApiStatus, DomainEvent, LogicalTimestamp, Notification, PriceTick,
};

use crate::error::{SyncError, SyncResult};

/// 인증 실패로 간주하는 `error` 프레임 코드.
const AUTH_ERROR_CODES: &[&str] = &[
    "UNAUTHORIZED",
    "AUTH_FAILED",
    "AUTH_ERROR",
    "INVALID_TOKEN",
    "TOKEN_EXPIRED",
    "FORBIDDEN",
];

// ==================== 클라이언트 → 서버 ====================

/// 클라이언트가 보내는 프레임.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// 심볼 구독
    SubscribeSymbols { symbols: Vec<String> },
    /// 심볼 구독 해제
    UnsubscribeSymbols { symbols: Vec<String> },
    /// 활성 심볼 목록 요청
    GetActiveSymbols,
}

impl ClientFrame {
    /// JSON 문자열로 직렬화.
    pub fn to_json(&self) -> SyncResult<String> {
        serde_json::to_string(self).map_err(SyncError::from)
    }
}

// ==================== 서버 → 클라이언트 ====================

/// 서버가 보내는 프레임.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// 단일 심볼 시세
    PriceUpdate(PriceTick),
    /// 연결 직후 전체 시세
    InitialMarketData {
        data: Vec<PriceTick>,
    },
    /// 상위 API 상태
    ApiStatus(ApiStatus),
    /// 서버가 스트리밍 중인 심볼
    ActiveSymbols {
        symbols: Vec<String>,
        #[serde(default, deserialize_with = "timestamp::deserialize_option")]
        timestamp: Option<LogicalTimestamp>,
    },
    /// 구독 확인
    Subscribed {
        symbols: Vec<String>,
        #[serde(default, deserialize_with = "timestamp::deserialize_option")]
        timestamp: Option<LogicalTimestamp>,
    },
    /// 구독 해제 확인
    Unsubscribed {
        symbols: Vec<String>,
        #[serde(default, deserialize_with = "timestamp::deserialize_option")]
        timestamp: Option<LogicalTimestamp>,
    },
    /// 에러
    Error {
        #[serde(default)]
        code: Option<String>,
        message: String,
    },
    /// 새 알림
    NotificationCreated(Notification),
    /// 알림 읽음
    NotificationRead {
        id: String,
        #[serde(alias = "readAt", deserialize_with = "timestamp::deserialize")]
        timestamp: LogicalTimestamp,
    },
    /// 알림 삭제
    NotificationDeleted {
        id: String,
        #[serde(alias = "deletedAt", deserialize_with = "timestamp::deserialize")]
        timestamp: LogicalTimestamp,
    },
    /// 알 수 없는 프레임 (무시)
    #[serde(other)]
    Unknown,
}

/// 프레임 해석 결과.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// reconciler에 제출할 이벤트
    Events(Vec<DomainEvent>),
    /// 서버가 인증을 거부함 (재시도 금지)
    AuthRejected(String),
    /// 서버 에러 (로그만 남김)
    ServerError(String),
    /// 무시
    Ignored,
}

impl ServerFrame {
    /// JSON 문자열에서 파싱.
    pub fn from_json(json: &str) -> SyncResult<Self> {
        serde_json::from_str(json).map_err(|e| SyncError::Parse(e.to_string()))
    }

    /// 프레임을 도메인 이벤트로 변환.
    ///
    /// 제어 프레임에 서버 타임스탬프가 없으면 수신 시각으로 채우지 않고
    /// `None`으로 넘깁니다.
    pub fn into_outcome(self) -> FrameOutcome {
        match self {
            ServerFrame::PriceUpdate(tick) => {
                FrameOutcome::Events(vec![DomainEvent::PriceTick(normalized(tick))])
            }
            ServerFrame::InitialMarketData { data } => FrameOutcome::Events(
                data.into_iter()
                    .map(|tick| DomainEvent::PriceTick(normalized(tick)))
                    .collect(),
            ),
            ServerFrame::ApiStatus(status) => {
                FrameOutcome::Events(vec![DomainEvent::ApiStatus(status)])
            }
            ServerFrame::ActiveSymbols { symbols, timestamp } => {
                FrameOutcome::Events(vec![DomainEvent::ActiveSymbols {
                    symbols: normalize_all(symbols),
                    timestamp,
                }])
            }
            ServerFrame::Subscribed { symbols, timestamp } => {
                FrameOutcome::Events(vec![DomainEvent::SubscriptionAck {
                    symbols: normalize_all(symbols),
                    subscribed: true,
                    timestamp,
                }])
            }
            ServerFrame::Unsubscribed { symbols, timestamp } => {
                FrameOutcome::Events(vec![DomainEvent::SubscriptionAck {
                    symbols: normalize_all(symbols),
                    subscribed: false,
                    timestamp,
                }])
            }
            ServerFrame::Error { code, message } => match code {
                Some(code) if is_auth_code(&code) => {
                    FrameOutcome::AuthRejected(format!("{}: {}", code, message))
                }
                Some(code) => FrameOutcome::ServerError(format!("{}: {}", code, message)),
                None => FrameOutcome::ServerError(message),
            },
            ServerFrame::NotificationCreated(notification) => {
                FrameOutcome::Events(vec![DomainEvent::NotificationCreated(notification)])
            }
            ServerFrame::NotificationRead { id, timestamp } => {
                FrameOutcome::Events(vec![DomainEvent::NotificationRead { id, timestamp }])
            }
            ServerFrame::NotificationDeleted { id, timestamp } => {
                FrameOutcome::Events(vec![DomainEvent::NotificationDeleted { id, timestamp }])
            }
            ServerFrame::Unknown => FrameOutcome::Ignored,
        }
    }
}

fn is_auth_code(code: &str) -> bool {
    AUTH_ERROR_CODES
        .iter()
        .any(|known| known.eq_ignore_ascii_case(code))
}

fn normalized(mut tick: PriceTick) -> PriceTick {
    tick.symbol = normalize_symbol(&tick.symbol);
    tick
}

fn normalize_all(symbols: Vec<String>) -> Vec<String> {
    symbols.iter().map(|s| normalize_symbol(s)).collect()
}
