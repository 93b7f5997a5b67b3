//! # Trader Core
//!
//! 시그널 대시보드 실시간 동기화 계층의 공통 타입을 제공합니다:
//! - 알림/시세 도메인 모델
//! - 도메인 이벤트 (리소스 ID + 서버 논리 타임스탬프)
//! - 설정 관리
//! - 로깅 인프라

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod types;

pub use config::*;
pub use domain::*;
pub use error::*;
pub use logging::*;
pub use types::*;
