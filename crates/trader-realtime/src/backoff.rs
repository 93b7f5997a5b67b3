//! 재연결 backoff 정책.
//!
//! `k`번째 연속 실패 후 지연: `min(base × 2^(k-1), max)`.
//! 연속 실패가 `max_attempts`에 도달하면 더 이상 자동 재연결하지 않습니다.

use std::time::Duration;
use trader_core::ReconnectConfig;

/// 재연결 정책.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// 첫 재시도 지연
    pub base_delay: Duration,
    /// 지연 상한
    pub max_delay: Duration,
    /// 최대 연속 실패 횟수
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_attempts: config.max_attempts,
        }
    }
}

impl ReconnectPolicy {
    /// 새 정책 생성.
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
        }
    }

    /// `failures`번 연속 실패한 뒤의 재연결 지연.
    ///
    /// 재시도를 더 하지 않아야 하면 `None`.
    pub fn delay_for(&self, failures: u32) -> Option<Duration> {
        if failures == 0 || failures >= self.max_attempts {
            return None;
        }
        Some(self.raw_delay(failures))
    }

    /// 시도 한도와 무관한 지연 계산.
    pub fn raw_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// 재시도 한도 도달 여부.
    pub fn is_exhausted(&self, failures: u32) -> bool {
        failures >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_failures_with_three_second_base() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u128> = (1..=3)
            .map(|k| policy.delay_for(k).unwrap().as_millis())
            .collect();
        assert_eq!(delays, vec![3000, 6000, 12000]);
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = ReconnectPolicy::new(Duration::from_secs(3), Duration::from_secs(30), 10);
        assert_eq!(policy.delay_for(4), Some(Duration::from_secs(24)));
        assert_eq!(policy.delay_for(5), Some(Duration::from_secs(30)));
        assert_eq!(policy.delay_for(9), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_no_retry_after_max_attempts() {
        let policy = ReconnectPolicy::default();
        assert!(policy.delay_for(4).is_some());
        assert_eq!(policy.delay_for(5), None);
        assert_eq!(policy.delay_for(6), None);
        assert!(policy.is_exhausted(5));
        assert!(!policy.is_exhausted(4));
    }

    #[test]
    fn test_zero_failures_has_no_delay() {
        assert_eq!(ReconnectPolicy::default().delay_for(0), None);
    }

    #[test]
    fn test_huge_failure_count_does_not_overflow() {
        let policy = ReconnectPolicy::new(Duration::from_secs(3), Duration::from_secs(30), u32::MAX);
        assert_eq!(policy.raw_delay(200), Duration::from_secs(30));
    }

    #[test]
    fn test_from_config() {
        let config = ReconnectConfig::default();
        let policy = ReconnectPolicy::from(&config);
        assert_eq!(policy, ReconnectPolicy::default());
    }
}
