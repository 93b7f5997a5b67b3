//! signal-watch CLI 도구 모음.
//!
//! 이 crate는 다음 기능을 제공합니다:
//! - 실시간 동기화 모니터링 (`watch`)
//! - 알림 목록 단발 조회 (`notifications`)

pub mod commands;

pub use commands::*;
