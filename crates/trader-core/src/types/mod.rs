//! 공통 타입.

pub mod timestamp;

pub use timestamp::{now_millis, to_datetime, LogicalTimestamp};
