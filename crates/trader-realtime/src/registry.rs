//! 구독 레지스트리.
//!
//! 푸시 채널로 받고 싶은 심볼 집합을 관리합니다. 집합은 전송 장애로 지워지지
//! 않으며, 연결 관리자는 (재)연결될 때마다 전체 집합을 서버에 다시 보냅니다.
//! 서버는 재연결 사이에 구독 상태를 기억하지 않는다고 가정합니다.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};
use tracing::debug;
use trader_core::normalize_symbol;

/// 공유 구독 집합.
///
/// 복제본은 같은 집합을 가리킵니다.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionRegistry {
    topics: Arc<RwLock<BTreeSet<String>>>,
}

impl SubscriptionRegistry {
    /// 빈 레지스트리 생성.
    pub fn new() -> Self {
        Self::default()
    }

    /// 토픽 추가 (합집합). 새로 추가된 토픽만 반환합니다.
    pub fn subscribe<I, S>(&self, topics: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = self.topics.write().unwrap_or_else(|e| e.into_inner());
        let added: Vec<String> = topics
            .into_iter()
            .map(|t| normalize_symbol(t.as_ref()))
            .filter(|t| !t.is_empty())
            .filter(|t| set.insert(t.clone()))
            .collect();

        if !added.is_empty() {
            debug!(added = ?added, total = set.len(), "구독 추가");
        }
        added
    }

    /// 토픽 제거. 실제로 제거된 토픽만 반환합니다.
    pub fn unsubscribe<I, S>(&self, topics: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = self.topics.write().unwrap_or_else(|e| e.into_inner());
        let removed: Vec<String> = topics
            .into_iter()
            .map(|t| normalize_symbol(t.as_ref()))
            .filter(|t| set.remove(t))
            .collect();

        if !removed.is_empty() {
            debug!(removed = ?removed, total = set.len(), "구독 해제");
        }
        removed
    }

    /// 전체 구독 해제. 제거된 토픽을 반환합니다.
    pub fn unsubscribe_all(&self) -> Vec<String> {
        let mut set = self.topics.write().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *set).into_iter().collect()
    }

    /// 현재 집합 (정렬됨).
    pub fn snapshot(&self) -> Vec<String> {
        self.topics
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// 구독 여부.
    pub fn contains(&self, topic: &str) -> bool {
        self.topics
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&normalize_symbol(topic))
    }

    /// 구독 수.
    pub fn len(&self) -> usize {
        self.topics.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// 비어 있는지 확인.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_is_idempotent_union() {
        let registry = SubscriptionRegistry::new();
        assert_eq!(registry.subscribe(["btcusdt", "ETHUSDT"]), vec!["BTCUSDT", "ETHUSDT"]);
        assert_eq!(registry.subscribe(["BTCUSDT"]), Vec::<String>::new());
        assert_eq!(registry.subscribe(["ethusdt", "SOLUSDT"]), vec!["SOLUSDT"]);
        assert_eq!(registry.snapshot(), vec!["BTCUSDT", "ETHUSDT", "SOLUSDT"]);
    }

    #[test]
    fn test_unsubscribe_reports_only_removed() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(["BTCUSDT", "ETHUSDT"]);

        assert_eq!(registry.unsubscribe(["btcusdt", "XRPUSDT"]), vec!["BTCUSDT"]);
        assert_eq!(registry.unsubscribe(["BTCUSDT"]), Vec::<String>::new());
        assert!(!registry.contains("BTCUSDT"));
        assert!(registry.contains("ethusdt"));
    }

    #[test]
    fn test_clones_share_set() {
        let registry = SubscriptionRegistry::new();
        let shared = registry.clone();
        registry.subscribe(["BTCUSDT"]);
        assert_eq!(shared.len(), 1);

        assert_eq!(shared.unsubscribe_all(), vec!["BTCUSDT"]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_blank_topics_are_ignored() {
        let registry = SubscriptionRegistry::new();
        assert!(registry.subscribe(["", "  "]).is_empty());
        assert!(registry.is_empty());
    }
}
