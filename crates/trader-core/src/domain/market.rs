//! 실시간 시세 도메인 모델.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{timestamp, LogicalTimestamp};

/// 심볼 표기 정규화 (공백 제거, 대문자).
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

/// 심볼별 최신 시세.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceTick {
    /// 심볼 (예: "BTCUSDT")
    pub symbol: String,
    /// 현재가
    pub price: Decimal,
    /// 전일 대비
    #[serde(default)]
    pub change: Decimal,
    /// 등락률 (%)
    #[serde(default)]
    pub change_percent: Decimal,
    /// 거래량
    #[serde(default)]
    pub volume: Decimal,
    /// 서버 시각 (밀리초)
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub timestamp: LogicalTimestamp,
}

impl PriceTick {
    /// 새 시세 생성.
    pub fn new(symbol: impl AsRef<str>, price: Decimal, timestamp: LogicalTimestamp) -> Self {
        Self {
            symbol: normalize_symbol(symbol.as_ref()),
            price,
            change: Decimal::ZERO,
            change_percent: Decimal::ZERO,
            volume: Decimal::ZERO,
            timestamp,
        }
    }

    /// 등락 정보 설정.
    pub fn with_change(mut self, change: Decimal, change_percent: Decimal) -> Self {
        self.change = change;
        self.change_percent = change_percent;
        self
    }

    /// 거래량 설정.
    pub fn with_volume(mut self, volume: Decimal) -> Self {
        self.volume = volume;
        self
    }
}

/// 상위 시세 API 상태.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiStatus {
    /// 상위 API 연결 여부
    pub connected: bool,
    /// 상태 메시지
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// 서버 시각 (밀리초)
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub timestamp: LogicalTimestamp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_normalize_symbol() {
        assert_eq!(normalize_symbol(" btcusdt "), "BTCUSDT");
        assert_eq!(normalize_symbol("005930"), "005930");
    }

    #[test]
    fn test_price_tick_from_frame_payload() {
        let json = r#"{
            "symbol": "ethusdt",
            "price": "2250.15",
            "changePercent": "-1.2",
            "timestamp": 1700000000000
        }"#;
        let tick: PriceTick = serde_json::from_str(json).unwrap();
        assert_eq!(tick.price, dec!(2250.15));
        assert_eq!(tick.change_percent, dec!(-1.2));
        assert_eq!(tick.volume, Decimal::ZERO);
        // 역직렬화는 원본 표기를 유지하고, 정규화는 수신 측에서 수행
        assert_eq!(tick.symbol, "ethusdt");
    }

    #[test]
    fn test_price_tick_builder_normalizes() {
        let tick = PriceTick::new("btcusdt", dec!(42000), 1).with_volume(dec!(3.5));
        assert_eq!(tick.symbol, "BTCUSDT");
        assert_eq!(tick.volume, dec!(3.5));
    }
}
