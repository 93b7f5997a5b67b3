//! 서버 논리 타임스탬프 (Unix epoch 밀리초).
//!
//! REST 스냅샷과 WebSocket 프레임은 시각을 숫자(밀리초) 또는
//! RFC 3339 문자열로 전달합니다. 두 형식 모두 밀리초 `i64`로 정규화합니다.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer};

/// 서버가 부여한 논리 타임스탬프 (밀리초).
pub type LogicalTimestamp = i64;

/// 현재 시각을 밀리초로 반환.
pub fn now_millis() -> LogicalTimestamp {
    Utc::now().timestamp_millis()
}

/// 밀리초 타임스탬프를 `DateTime<Utc>`로 변환.
pub fn to_datetime(ts: LogicalTimestamp) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ts).single()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Millis(i64),
    Float(f64),
    Text(String),
}

impl RawTimestamp {
    fn into_millis<E: serde::de::Error>(self) -> Result<i64, E> {
        match self {
            RawTimestamp::Millis(ms) => Ok(ms),
            RawTimestamp::Float(ms) => Ok(ms as i64),
            RawTimestamp::Text(text) => {
                if let Ok(ms) = text.parse::<i64>() {
                    return Ok(ms);
                }
                DateTime::parse_from_rfc3339(&text)
                    .map(|dt| dt.timestamp_millis())
                    .map_err(|e| E::custom(format!("잘못된 타임스탬프 '{}': {}", text, e)))
            }
        }
    }
}

/// 숫자 또는 RFC 3339 문자열을 밀리초로 역직렬화.
pub fn deserialize<'de, D>(deserializer: D) -> Result<LogicalTimestamp, D::Error>
where
    D: Deserializer<'de>,
{
    RawTimestamp::deserialize(deserializer)?.into_millis()
}

/// 선택적 타임스탬프 필드용 역직렬화.
pub fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<LogicalTimestamp>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<RawTimestamp>::deserialize(deserializer)?
        .map(RawTimestamp::into_millis)
        .transpose()
}
