//! 이벤트 조정기 (reconciler).
//!
//! 푸시 이벤트, 폴링 스냅샷, 로컬 낙관적 변경을 하나의 일관된 상태로 합칩니다.
//! I/O가 없는 순수 상태 기계이며, 상위의 단일 태스크가 소유합니다.
//!
//! # 규칙
//!
//! - 같은 리소스의 이벤트는 서버 타임스탬프가 저장된 값 이상일 때만 반영 (LWW)
//! - 같은 이벤트를 두 번 적용해도 결과가 같음
//! - 낙관적 변경이 대기 중인 알림은 서버 값으로 덮어쓰지 않음.
//!   대신 가장 먼저 대기 중인 변경의 롤백 값을 더 새로운 서버 값으로 교체
//! - 삭제는 대기 중인 변경보다 우선하며, 삭제 시각 이하의 생성/스냅샷은 무시 (tombstone)
//! - 스냅샷은 병합만 하고, 스냅샷에 없는 알림을 지우지 않음
//! - 읽지 않은 알림 수는 저장하지 않고 항상 알림 맵에서 계산

use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;
use trader_core::{
    ApiStatus, DomainEvent, LogicalTimestamp, Notification, PriceTick, ResourceId, StreamKind,
};

use crate::error::{SyncError, SyncResult};

/// 낙관적 변경 식별자 (생성 순서대로 증가).
pub type MutationId = u64;

/// 낙관적 변경 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    /// 알림 하나 읽음
    MarkRead,
    /// 전체 읽음
    MarkAllRead,
    /// 알림 삭제
    Delete,
}

impl MutationKind {
    /// 사용자 동작 이름.
    pub fn action(&self) -> &'static str {
        match self {
            MutationKind::MarkRead => "mark_as_read",
            MutationKind::MarkAllRead => "mark_all_as_read",
            MutationKind::Delete => "delete",
        }
    }
}

/// 서버 확인 전에 적용된 로컬 변경.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOptimisticMutation {
    /// 식별자
    pub id: MutationId,
    /// 종류
    pub kind: MutationKind,
    /// 대상 알림별 롤백 값 (`None`은 로컬에 없음)
    pub priors: BTreeMap<String, Option<Notification>>,
}

impl PendingOptimisticMutation {
    /// 대상 알림 ID.
    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.priors.keys().map(String::as_str)
    }
}

/// 이벤트 적용 결과.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// 상태가 바뀜
    Applied,
    /// 이미 같은 상태 (중복)
    Unchanged,
    /// 저장된 값보다 오래된 이벤트
    StaleDropped {
        stored: LogicalTimestamp,
        incoming: LogicalTimestamp,
    },
    /// 대기 중인 낙관적 변경이 보호 중 (롤백 값만 갱신될 수 있음)
    Shielded { mutation: MutationId },
    /// 삭제된 알림의 부활 시도
    Tombstoned { deleted_at: LogicalTimestamp },
    /// 알 수 없는 리소스에 대한 부분 갱신
    Ignored,
}

impl ApplyOutcome {
    /// 관측 상태가 바뀌었는지.
    pub fn changed(&self) -> bool {
        matches!(self, ApplyOutcome::Applied)
    }
}

/// 스냅샷 병합 요약.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotSummary {
    pub applied: usize,
    pub unchanged: usize,
    pub stale: usize,
    pub shielded: usize,
    pub tombstoned: usize,
}

impl SnapshotSummary {
    fn record(&mut self, outcome: &ApplyOutcome) {
        match outcome {
            ApplyOutcome::Applied => self.applied += 1,
            ApplyOutcome::Unchanged | ApplyOutcome::Ignored => self.unchanged += 1,
            ApplyOutcome::StaleDropped { .. } => self.stale += 1,
            ApplyOutcome::Shielded { .. } => self.shielded += 1,
            ApplyOutcome::Tombstoned { .. } => self.tombstoned += 1,
        }
    }
}

/// 스트림별 연결 여부.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Connectivity {
    pub notifications: bool,
    pub market: bool,
}

impl Connectivity {
    /// 스트림 연결 여부.
    pub fn get(&self, stream: StreamKind) -> bool {
        match stream {
            StreamKind::Notifications => self.notifications,
            StreamKind::Market => self.market,
        }
    }

    fn set(&mut self, stream: StreamKind, connected: bool) -> bool {
        let slot = match stream {
            StreamKind::Notifications => &mut self.notifications,
            StreamKind::Market => &mut self.market,
        };
        let changed = *slot != connected;
        *slot = connected;
        changed
    }
}

/// 스트림별 마지막 폴링 실패. 다음 조회가 성공하면 지워집니다.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollFailures {
    pub notifications: Option<SyncError>,
    pub market: Option<SyncError>,
}

impl PollFailures {
    /// 스트림의 마지막 실패.
    pub fn get(&self, stream: StreamKind) -> Option<&SyncError> {
        match stream {
            StreamKind::Notifications => self.notifications.as_ref(),
            StreamKind::Market => self.market.as_ref(),
        }
    }

    fn set(&mut self, stream: StreamKind, failure: Option<SyncError>) -> bool {
        let slot = match stream {
            StreamKind::Notifications => &mut self.notifications,
            StreamKind::Market => &mut self.market,
        };
        let changed = *slot != failure;
        *slot = failure;
        changed
    }
}

/// 외부에 공개되는 조정 결과.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciledState {
    /// 알림 (최신순)
    pub notifications: Vec<Notification>,
    /// 심볼별 최신 시세
    pub prices: BTreeMap<String, PriceTick>,
    /// 서버가 구독을 확인한 심볼
    pub acknowledged_symbols: Vec<String>,
    /// 서버가 스트리밍 중인 심볼
    pub active_symbols: Vec<String>,
    /// 상위 API 상태
    pub api_status: Option<ApiStatus>,
    /// 스트림별 연결 여부
    pub connectivity: Connectivity,
    /// 스트림별 마지막 폴링 실패
    pub poll_failures: PollFailures,
    /// 마지막 서버 동기화 시각
    pub last_synced_at: Option<LogicalTimestamp>,
    /// 대기 중인 낙관적 변경 수
    pub pending_mutations: usize,
}

impl ReconciledState {
    /// 읽지 않은 알림 수.
    pub fn unread_count(&self) -> usize {
        self.notifications.iter().filter(|n| !n.is_read).count()
    }

    /// 스트림 연결 여부.
    pub fn is_connected(&self, stream: StreamKind) -> bool {
        self.connectivity.get(stream)
    }

    /// 스트림의 마지막 폴링 실패.
    pub fn poll_failure(&self, stream: StreamKind) -> Option<&SyncError> {
        self.poll_failures.get(stream)
    }

    /// 폴링이 인증 에러로 실패 중인지 (자격 증명 갱신 또는 로그아웃 필요).
    pub fn requires_reauth(&self) -> bool {
        StreamKind::all()
            .into_iter()
            .any(|stream| self.poll_failure(stream).is_some_and(SyncError::is_auth_error))
    }

    /// ID로 알림 조회.
    pub fn notification(&self, id: &str) -> Option<&Notification> {
        self.notifications.iter().find(|n| n.id == id)
    }

    /// 심볼 시세 조회.
    pub fn price(&self, symbol: &str) -> Option<&PriceTick> {
        self.prices.get(symbol)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Versioned<T> {
    value: T,
    timestamp: LogicalTimestamp,
}

/// 이벤트 조정기.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    notifications: HashMap<String, Notification>,
    tombstones: HashMap<String, LogicalTimestamp>,
    prices: BTreeMap<String, PriceTick>,
    acknowledged: Versioned<BTreeSet<String>>,
    active_symbols: Option<Versioned<Vec<String>>>,
    api_status: Option<ApiStatus>,
    connectivity: Connectivity,
    poll_failures: PollFailures,
    last_synced_at: Option<LogicalTimestamp>,
    pending: BTreeMap<MutationId, PendingOptimisticMutation>,
    next_mutation: MutationId,
}

impl Reconciler {
    /// 빈 조정기.
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== 서버 이벤트 ====================

    /// 도메인 이벤트 적용.
    pub fn apply(&mut self, event: DomainEvent) -> ApplyOutcome {
        let resource = event.resource_id();
        let name = event.name();
        let outcome = match event {
            DomainEvent::NotificationCreated(notification) => self.apply_notification(notification),
            DomainEvent::NotificationRead { id, timestamp } => self.apply_read(&id, timestamp),
            DomainEvent::NotificationDeleted { id, timestamp } => self.apply_delete(&id, timestamp),
            DomainEvent::PriceTick(tick) => self.apply_price(tick),
            DomainEvent::SubscriptionAck {
                symbols,
                subscribed,
                timestamp,
            } => self.apply_ack(symbols, subscribed, timestamp),
            DomainEvent::ActiveSymbols { symbols, timestamp } => {
                self.apply_active_symbols(symbols, timestamp)
            }
            DomainEvent::ApiStatus(status) => self.apply_api_status(status),
        };

        match &outcome {
            ApplyOutcome::StaleDropped { stored, incoming } => {
                debug!(%resource, event = name, stored, incoming, "StaleEventDropped");
            }
            ApplyOutcome::Shielded { mutation } => {
                debug!(%resource, event = name, mutation, "낙관적 변경 대기 중, 롤백 값만 갱신");
            }
            ApplyOutcome::Tombstoned { deleted_at } => {
                debug!(%resource, event = name, deleted_at, "삭제된 알림, 무시");
            }
            _ => {}
        }
        outcome
    }

    /// 폴링 스냅샷 병합.
    ///
    /// 각 행은 `NotificationCreated`와 같은 규칙으로 병합됩니다.
    pub fn apply_snapshot(&mut self, rows: impl IntoIterator<Item = Notification>) -> SnapshotSummary {
        let mut summary = SnapshotSummary::default();
        for row in rows {
            let outcome = self.apply(DomainEvent::NotificationCreated(row));
            summary.record(&outcome);
        }
        summary
    }

    /// 스트림 연결 여부 갱신. 바뀌었으면 `true`.
    pub fn set_connected(&mut self, stream: StreamKind, connected: bool) -> bool {
        self.connectivity.set(stream, connected)
    }

    /// 폴링 결과 기록. 실패면 에러를 남기고 성공(`None`)이면 지웁니다.
    /// 바뀌었으면 `true`.
    pub fn set_poll_failure(&mut self, stream: StreamKind, failure: Option<SyncError>) -> bool {
        self.poll_failures.set(stream, failure)
    }

    /// 서버 동기화 시각 기록.
    pub fn mark_synced(&mut self, at: LogicalTimestamp) {
        self.last_synced_at = Some(self.last_synced_at.map_or(at, |prev| prev.max(at)));
    }

    fn apply_notification(&mut self, notification: Notification) -> ApplyOutcome {
        let id = notification.id.clone();
        let incoming = notification.timestamp();

        if let Some(&deleted_at) = self.tombstones.get(&id) {
            if incoming <= deleted_at {
                return ApplyOutcome::Tombstoned { deleted_at };
            }
            self.tombstones.remove(&id);
        }

        if let Some(mutation) = self.earliest_pending_mut(&id) {
            let mutation_id = mutation.id;
            if let Some(prior) = mutation.priors.get_mut(&id) {
                let newer = prior.as_ref().map_or(true, |p| incoming >= p.timestamp());
                if newer {
                    *prior = Some(notification);
                }
            }
            return ApplyOutcome::Shielded {
                mutation: mutation_id,
            };
        }

        match self.notifications.get(&id) {
            Some(stored) if incoming < stored.timestamp() => ApplyOutcome::StaleDropped {
                stored: stored.timestamp(),
                incoming,
            },
            Some(stored) if *stored == notification => ApplyOutcome::Unchanged,
            _ => {
                self.notifications.insert(id, notification);
                ApplyOutcome::Applied
            }
        }
    }

    fn apply_read(&mut self, id: &str, timestamp: LogicalTimestamp) -> ApplyOutcome {
        if let Some(mutation) = self.earliest_pending_mut(id) {
            let mutation_id = mutation.id;
            if let Some(Some(prior)) = mutation.priors.get_mut(id) {
                if timestamp >= prior.timestamp() {
                    *prior = prior.marked_read(Some(timestamp));
                }
            }
            return ApplyOutcome::Shielded {
                mutation: mutation_id,
            };
        }

        let Some(stored) = self.notifications.get_mut(id) else {
            return match self.tombstones.get(id) {
                Some(&deleted_at) => ApplyOutcome::Tombstoned { deleted_at },
                None => ApplyOutcome::Ignored,
            };
        };

        if timestamp < stored.timestamp() {
            return ApplyOutcome::StaleDropped {
                stored: stored.timestamp(),
                incoming: timestamp,
            };
        }

        let read = stored.marked_read(Some(timestamp));
        if read == *stored {
            ApplyOutcome::Unchanged
        } else {
            *stored = read;
            ApplyOutcome::Applied
        }
    }

    /// 삭제는 낙관적 변경으로 보호하지 않음. 롤백 값도 "없음"으로 바뀜.
    fn apply_delete(&mut self, id: &str, timestamp: LogicalTimestamp) -> ApplyOutcome {
        if let Some(stored) = self.notifications.get(id) {
            if timestamp < stored.timestamp() {
                return ApplyOutcome::StaleDropped {
                    stored: stored.timestamp(),
                    incoming: timestamp,
                };
            }
        }

        let tombstone = self.tombstones.entry(id.to_string()).or_insert(timestamp);
        let advanced = timestamp > *tombstone;
        if advanced {
            *tombstone = timestamp;
        }

        for mutation in self.pending.values_mut() {
            if let Some(prior) = mutation.priors.get_mut(id) {
                *prior = None;
            }
        }

        if self.notifications.remove(id).is_some() || advanced {
            ApplyOutcome::Applied
        } else {
            ApplyOutcome::Unchanged
        }
    }

    fn apply_price(&mut self, tick: PriceTick) -> ApplyOutcome {
        match self.prices.get(&tick.symbol) {
            Some(stored) if tick.timestamp < stored.timestamp => ApplyOutcome::StaleDropped {
                stored: stored.timestamp,
                incoming: tick.timestamp,
            },
            Some(stored) if *stored == tick => ApplyOutcome::Unchanged,
            _ => {
                self.prices.insert(tick.symbol.clone(), tick);
                ApplyOutcome::Applied
            }
        }
    }

    fn apply_ack(
        &mut self,
        symbols: Vec<String>,
        subscribed: bool,
        timestamp: Option<LogicalTimestamp>,
    ) -> ApplyOutcome {
        if let Some(stale) = stale_against(self.acknowledged.timestamp, timestamp) {
            return stale;
        }

        let set = &mut self.acknowledged.value;
        let mut changed = false;
        for symbol in symbols {
            changed |= if subscribed {
                set.insert(symbol)
            } else {
                set.remove(&symbol)
            };
        }
        if let Some(timestamp) = timestamp {
            self.acknowledged.timestamp = timestamp;
        }

        if changed {
            ApplyOutcome::Applied
        } else {
            ApplyOutcome::Unchanged
        }
    }

    /// 서버 시각이 없는 목록(폴링 결과 등)은 값만 바꾸고 저장된 서버 시각은 유지.
    /// 이후 서버 시각이 있는 프레임은 저장된 시각 이상이면 항상 반영됩니다.
    fn apply_active_symbols(
        &mut self,
        mut symbols: Vec<String>,
        timestamp: Option<LogicalTimestamp>,
    ) -> ApplyOutcome {
        symbols.sort();
        symbols.dedup();

        let stored_at = self.active_symbols.as_ref().map_or(0, |v| v.timestamp);
        if let Some(stale) = stale_against(stored_at, timestamp) {
            return stale;
        }

        match &mut self.active_symbols {
            Some(stored) if stored.value == symbols => {
                if let Some(timestamp) = timestamp {
                    stored.timestamp = timestamp;
                }
                ApplyOutcome::Unchanged
            }
            _ => {
                self.active_symbols = Some(Versioned {
                    value: symbols,
                    timestamp: timestamp.unwrap_or(stored_at),
                });
                ApplyOutcome::Applied
            }
        }
    }

    fn apply_api_status(&mut self, status: ApiStatus) -> ApplyOutcome {
        match &self.api_status {
            Some(stored) if status.timestamp < stored.timestamp => ApplyOutcome::StaleDropped {
                stored: stored.timestamp,
                incoming: status.timestamp,
            },
            Some(stored) if *stored == status => ApplyOutcome::Unchanged,
            _ => {
                self.api_status = Some(status);
                ApplyOutcome::Applied
            }
        }
    }

    // ==================== 낙관적 변경 ====================

    /// 알림 하나를 즉시 읽음 처리.
    ///
    /// # Errors
    /// 로컬에 없는 알림이면 `SyncError::NotFound`.
    pub fn begin_mark_read(&mut self, id: &str) -> SyncResult<MutationId> {
        let current = self
            .notifications
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(ResourceId::Notification(id.to_string()).to_string()))?;

        let read = current.marked_read(None);
        self.notifications.insert(id.to_string(), read);
        Ok(self.record(MutationKind::MarkRead, [(id.to_string(), Some(current))]))
    }

    /// 읽지 않은 모든 알림을 즉시 읽음 처리.
    pub fn begin_mark_all_read(&mut self) -> MutationId {
        let mut priors = Vec::new();
        for notification in self.notifications.values_mut().filter(|n| !n.is_read) {
            priors.push((notification.id.clone(), Some(notification.clone())));
            *notification = notification.marked_read(None);
        }
        self.record(MutationKind::MarkAllRead, priors)
    }

    /// 알림을 즉시 삭제.
    ///
    /// # Errors
    /// 로컬에 없는 알림이면 `SyncError::NotFound`.
    pub fn begin_delete(&mut self, id: &str) -> SyncResult<MutationId> {
        let current = self
            .notifications
            .remove(id)
            .ok_or_else(|| SyncError::NotFound(ResourceId::Notification(id.to_string()).to_string()))?;
        Ok(self.record(MutationKind::Delete, [(id.to_string(), Some(current))]))
    }

    /// 서버가 변경을 확인함.
    ///
    /// 보호 중에 들어온 더 새로운 서버 값이 있으면 그 위에 변경을 다시 적용합니다.
    pub fn confirm(&mut self, mutation: MutationId) -> Option<PendingOptimisticMutation> {
        let resolved = self.pending.remove(&mutation)?;

        for (id, prior) in &resolved.priors {
            if let Some(next) = self.later_pending_mut(mutation, id) {
                // 다음 변경의 롤백 값은 이 변경이 확정된 상태여야 함
                if let (Some(slot), Some(prior)) = (next.priors.get_mut(id), prior) {
                    let newer = slot
                        .as_ref()
                        .is_some_and(|next_prior| prior.timestamp() > next_prior.timestamp());
                    if newer {
                        *slot = rebase(resolved.kind, prior);
                    }
                }
                continue;
            }

            match resolved.kind {
                MutationKind::MarkRead | MutationKind::MarkAllRead => {
                    let Some(prior) = prior else { continue };
                    match self.notifications.get_mut(id) {
                        Some(local) if prior.timestamp() <= local.timestamp() => {}
                        Some(local) => *local = prior.marked_read(None),
                        // 서버 삭제 후 다시 생성된 알림은 로컬에 없으므로 새로 넣음
                        None => {
                            self.notifications.insert(id.clone(), prior.marked_read(None));
                        }
                    }
                }
                MutationKind::Delete => {
                    let deleted_at = prior.as_ref().map_or(0, Notification::timestamp);
                    let tombstone = self.tombstones.entry(id.clone()).or_insert(deleted_at);
                    *tombstone = (*tombstone).max(deleted_at);
                    self.notifications.remove(id);
                }
            }
        }

        debug!(mutation, kind = resolved.kind.action(), "낙관적 변경 확정");
        Some(resolved)
    }

    /// 서버가 변경을 거부함. 이전 값을 정확히 복원합니다.
    ///
    /// 같은 알림에 더 나중의 변경이 대기 중이면 복원 대신 그 변경에 롤백 값을 넘깁니다.
    pub fn rollback(&mut self, mutation: MutationId) -> Option<PendingOptimisticMutation> {
        let resolved = self.pending.remove(&mutation)?;

        for (id, prior) in &resolved.priors {
            if let Some(next) = self.later_pending_mut(mutation, id) {
                next.priors.insert(id.clone(), prior.clone());
                continue;
            }

            match prior {
                Some(prior) => {
                    self.notifications.insert(id.clone(), prior.clone());
                }
                None => {
                    self.notifications.remove(id);
                }
            }
        }

        debug!(mutation, kind = resolved.kind.action(), "낙관적 변경 롤백");
        Some(resolved)
    }

    fn record(
        &mut self,
        kind: MutationKind,
        priors: impl IntoIterator<Item = (String, Option<Notification>)>,
    ) -> MutationId {
        self.next_mutation += 1;
        let id = self.next_mutation;
        let mutation = PendingOptimisticMutation {
            id,
            kind,
            priors: priors.into_iter().collect(),
        };
        debug!(mutation = id, kind = kind.action(), targets = mutation.priors.len(), "낙관적 변경 적용");
        self.pending.insert(id, mutation);
        id
    }

    fn earliest_pending_mut(&mut self, id: &str) -> Option<&mut PendingOptimisticMutation> {
        self.pending
            .values_mut()
            .find(|m| m.priors.contains_key(id))
    }

    fn later_pending_mut(
        &mut self,
        after: MutationId,
        id: &str,
    ) -> Option<&mut PendingOptimisticMutation> {
        self.pending
            .range_mut(after + 1..)
            .map(|(_, m)| m)
            .find(|m| m.priors.contains_key(id))
    }

    // ==================== 조회 ====================

    /// 대기 중인 낙관적 변경.
    pub fn pending(&self) -> impl Iterator<Item = &PendingOptimisticMutation> {
        self.pending.values()
    }

    /// 알림에 대기 중인 변경이 있는지.
    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.values().any(|m| m.priors.contains_key(id))
    }

    /// ID로 알림 조회.
    pub fn notification(&self, id: &str) -> Option<&Notification> {
        self.notifications.get(id)
    }

    /// 읽지 않은 알림 수.
    pub fn unread_count(&self) -> usize {
        self.notifications.values().filter(|n| !n.is_read).count()
    }

    /// 공개 상태 생성.
    pub fn view(&self) -> ReconciledState {
        let mut notifications: Vec<Notification> = self.notifications.values().cloned().collect();
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        ReconciledState {
            notifications,
            prices: self.prices.clone(),
            acknowledged_symbols: self.acknowledged.value.iter().cloned().collect(),
            active_symbols: self
                .active_symbols
                .as_ref()
                .map(|v| v.value.clone())
                .unwrap_or_default(),
            api_status: self.api_status.clone(),
            connectivity: self.connectivity,
            poll_failures: self.poll_failures.clone(),
            last_synced_at: self.last_synced_at,
            pending_mutations: self.pending.len(),
        }
    }
}

/// 서버 시각이 있는 이벤트가 저장된 시각보다 오래되었으면 `StaleDropped`.
fn stale_against(stored: LogicalTimestamp, incoming: Option<LogicalTimestamp>) -> Option<ApplyOutcome> {
    match incoming {
        Some(incoming) if incoming < stored => Some(ApplyOutcome::StaleDropped { stored, incoming }),
        _ => None,
    }
}

/// 확정된 변경을 새 서버 값 위에 다시 적용.
fn rebase(kind: MutationKind, prior: &Notification) -> Option<Notification> {
    match kind {
        MutationKind::MarkRead | MutationKind::MarkAllRead => Some(prior.marked_read(None)),
        MutationKind::Delete => None,
    }
}
