//! 메모리 기반 스냅샷 서버.
//!
//! REST 서버를 흉내 냅니다. 작업별로 다음 호출을 실패시키거나, 목록 조회를
//! 게이트로 붙잡아 "진행 중인 폴링"을 재현할 수 있습니다.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Semaphore;
use trader_core::{now_millis, Notification, NotificationQuery};

use crate::error::{SyncError, SyncResult};
use crate::fetcher::SnapshotSource;

/// 스냅샷 서버 작업 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnapshotOp {
    List,
    UnreadCount,
    MarkRead,
    MarkAllRead,
    Delete,
    ActiveSymbols,
}

#[derive(Default)]
struct ServerState {
    notifications: BTreeMap<String, Notification>,
    symbols: Vec<String>,
    failures: HashMap<SnapshotOp, VecDeque<SyncError>>,
    calls: HashMap<SnapshotOp, usize>,
    list_gate: Option<Arc<Semaphore>>,
}

/// 시뮬레이션 스냅샷 서버.
///
/// 복제본은 같은 서버 상태를 공유합니다.
#[derive(Clone, Default)]
pub struct SimulatedSnapshotSource {
    state: Arc<Mutex<ServerState>>,
}

impl SimulatedSnapshotSource {
    /// 빈 서버.
    pub fn new() -> Self {
        Self::default()
    }

    /// 초기 알림을 가진 서버.
    pub fn with_notifications(notifications: impl IntoIterator<Item = Notification>) -> Self {
        let source = Self::new();
        for notification in notifications {
            source.upsert(notification);
        }
        source
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 알림 추가/교체.
    pub fn upsert(&self, notification: Notification) {
        self.state()
            .notifications
            .insert(notification.id.clone(), notification);
    }

    /// 알림 제거.
    pub fn remove(&self, id: &str) -> Option<Notification> {
        self.state().notifications.remove(id)
    }

    /// 서버 측 알림 조회.
    pub fn get(&self, id: &str) -> Option<Notification> {
        self.state().notifications.get(id).cloned()
    }

    /// 활성 심볼 설정.
    pub fn set_symbols<I, S>(&self, symbols: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state().symbols = symbols.into_iter().map(Into::into).collect();
    }

    /// 다음 `op` 호출을 `error`로 실패시킴.
    pub fn fail_next(&self, op: SnapshotOp, error: SyncError) {
        self.state().failures.entry(op).or_default().push_back(error);
    }

    /// `op` 호출 횟수.
    pub fn calls(&self, op: SnapshotOp) -> usize {
        self.state().calls.get(&op).copied().unwrap_or(0)
    }

    /// 이후 목록 조회를 `release_lists`까지 붙잡음.
    pub fn hold_lists(&self) {
        self.state().list_gate = Some(Arc::new(Semaphore::new(0)));
    }

    /// 붙잡힌 목록 조회를 모두 풀어줌.
    pub fn release_lists(&self) {
        if let Some(gate) = self.state().list_gate.take() {
            // 닫힌 게이트는 모든 대기자를 통과시킴
            gate.close();
        }
    }

    fn begin(&self, op: SnapshotOp) -> SyncResult<()> {
        let mut state = self.state();
        *state.calls.entry(op).or_default() += 1;
        match state.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SnapshotSource for SimulatedSnapshotSource {
    async fn list_notifications(&self, query: NotificationQuery) -> SyncResult<Vec<Notification>> {
        self.begin(SnapshotOp::List)?;

        let gate = self.state().list_gate.clone();
        if let Some(gate) = gate {
            let _ = gate.acquire().await;
        }

        let state = self.state();
        let mut items: Vec<Notification> = state
            .notifications
            .values()
            .filter(|n| !query.unread_only || !n.is_read)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        Ok(items
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .collect())
    }

    async fn unread_count(&self) -> SyncResult<u64> {
        self.begin(SnapshotOp::UnreadCount)?;
        Ok(self
            .state()
            .notifications
            .values()
            .filter(|n| !n.is_read)
            .count() as u64)
    }

    async fn mark_read(&self, id: &str) -> SyncResult<()> {
        self.begin(SnapshotOp::MarkRead)?;
        let mut state = self.state();
        let notification = state
            .notifications
            .get_mut(id)
            .ok_or_else(|| SyncError::NotFound(id.to_string()))?;
        *notification = notification.marked_read(Some(now_millis()));
        Ok(())
    }

    async fn mark_all_read(&self) -> SyncResult<()> {
        self.begin(SnapshotOp::MarkAllRead)?;
        let now = now_millis();
        for notification in self.state().notifications.values_mut() {
            if !notification.is_read {
                *notification = notification.marked_read(Some(now));
            }
        }
        Ok(())
    }

    async fn delete_notification(&self, id: &str) -> SyncResult<()> {
        self.begin(SnapshotOp::Delete)?;
        self.state()
            .notifications
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| SyncError::NotFound(id.to_string()))
    }

    async fn active_symbols(&self) -> SyncResult<Vec<String>> {
        self.begin(SnapshotOp::ActiveSymbols)?;
        Ok(self.state().symbols.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(id: &str, created_at: i64, read: bool) -> Notification {
        Notification::new(id, "알림", created_at).with_read(read)
    }

    #[tokio::test]
    async fn test_list_respects_query() {
        let source = SimulatedSnapshotSource::with_notifications([
            notification("a", 1, false),
            notification("b", 3, true),
            notification("c", 2, false),
        ]);

        let all = source.list_notifications(NotificationQuery::default()).await.unwrap();
        let ids: Vec<_> = all.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);

        let unread = source
            .list_notifications(NotificationQuery::first_page(1).unread())
            .await
            .unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].id, "c");
        assert_eq!(source.unread_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_scripted_failure_is_consumed_once() {
        let source = SimulatedSnapshotSource::with_notifications([notification("a", 1, false)]);
        source.fail_next(SnapshotOp::MarkRead, SyncError::Network("down".into()));

        assert!(source.mark_read("a").await.is_err());
        assert!(source.mark_read("a").await.is_ok());
        assert!(source.get("a").unwrap().is_read);
        assert_eq!(source.calls(SnapshotOp::MarkRead), 2);
    }

    #[tokio::test]
    async fn test_missing_notification_is_not_found() {
        let source = SimulatedSnapshotSource::new();
        assert_eq!(
            source.delete_notification("x").await.unwrap_err(),
            SyncError::NotFound("x".to_string())
        );
    }

    #[tokio::test]
    async fn test_held_list_waits_for_release() {
        let source = SimulatedSnapshotSource::with_notifications([notification("a", 1, false)]);
        source.hold_lists();

        let pending = {
            let source = source.clone();
            tokio::spawn(async move { source.list_notifications(NotificationQuery::default()).await })
        };
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        source.release_lists();
        assert_eq!(pending.await.unwrap().unwrap().len(), 1);
    }
}
