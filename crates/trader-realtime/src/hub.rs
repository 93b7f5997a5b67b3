//! 동기화 허브.
//!
//! 조정기, 스트림별 연결 관리자와 폴러, 구독 레지스트리, 스냅샷 조회기를
//! 소유하고 소비자에게 읽기 전용 상태와 명령을 제공합니다.
//!
//! 조정기는 단일 엔진 태스크가 입력 큐를 하나씩 처리하며 소유합니다.
//! 다른 구성 요소는 입력만 제출하고, 상태는 `watch` 채널로 공개됩니다.
//!
//! # 예제
//!
//! ```ignore
//! let hub = SyncHub::start(config, fetcher, Arc::new(WebSocketTransport::new()), session);
//! let mut view = hub.watch();
//! hub.subscribe_to_symbols(["BTCUSDT"])?;
//! hub.mark_as_read("n1").await?;
//! hub.shutdown();
//! ```

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use trader_core::{
    normalize_symbol, now_millis, DomainEvent, Notification, NotificationQuery, StreamKind,
    SyncConfig,
};

use crate::backoff::ReconnectPolicy;
use crate::connection::{ConnectionManager, ConnectionState, PushTransport, StreamUpdate};
use crate::error::{SyncError, SyncResult};
use crate::fetcher::SnapshotSource;
use crate::polling::{spawn_poller, Activity, ActivityMonitor, PollHandle, PollSchedule};
use crate::reconciler::{MutationId, ReconciledState, Reconciler};
use crate::registry::SubscriptionRegistry;
use crate::session::AuthSession;

/// 푸시 이벤트 채널 용량.
const UPDATE_CHANNEL_CAPACITY: usize = 1024;

/// 낙관적 동작 대상.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ActionTarget {
    MarkRead(String),
    MarkAllRead,
    Delete(String),
}

impl ActionTarget {
    fn action(&self) -> &'static str {
        match self {
            ActionTarget::MarkRead(_) => "mark_as_read",
            ActionTarget::MarkAllRead => "mark_all_as_read",
            ActionTarget::Delete(_) => "delete",
        }
    }

    fn resource(&self) -> String {
        match self {
            ActionTarget::MarkRead(id) | ActionTarget::Delete(id) => format!("notification:{}", id),
            ActionTarget::MarkAllRead => "notifications".to_string(),
        }
    }
}

/// 스냅샷 조회 결과.
enum Polled {
    Notifications(Vec<Notification>),
    ActiveSymbols(Vec<String>),
}

enum HubInput {
    Update(StreamUpdate),
    Polled {
        stream: StreamKind,
        result: SyncResult<Polled>,
        /// 반영 후 알림 (`refresh` 대기용)
        applied: Option<oneshot::Sender<()>>,
    },
    Begin {
        target: ActionTarget,
        reply: oneshot::Sender<SyncResult<MutationId>>,
    },
    Resolve {
        mutation: MutationId,
        target: ActionTarget,
        result: SyncResult<()>,
        reply: oneshot::Sender<SyncResult<()>>,
    },
}

/// 스트림 하나의 연결과 폴러.
struct StreamSlot {
    manager: ConnectionManager,
    poller: Option<PollHandle>,
}

impl StreamSlot {
    fn stop(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.stop();
        }
        self.manager.disable();
    }
}

struct Streams {
    notifications: StreamSlot,
    market: StreamSlot,
}

impl Streams {
    fn get_mut(&mut self, stream: StreamKind) -> &mut StreamSlot {
        match stream {
            StreamKind::Notifications => &mut self.notifications,
            StreamKind::Market => &mut self.market,
        }
    }
}

/// 실시간 동기화 허브.
pub struct SyncHub {
    config: SyncConfig,
    session: AuthSession,
    fetcher: Arc<dyn SnapshotSource>,
    registry: SubscriptionRegistry,
    activity: ActivityMonitor,
    inputs: mpsc::UnboundedSender<HubInput>,
    state: watch::Receiver<ReconciledState>,
    streams: Mutex<Streams>,
    cancel: CancellationToken,
}

impl SyncHub {
    /// 허브 시작.
    ///
    /// 엔진 태스크와 두 스트림의 폴러를 시작하고, `push.enabled`이면 푸시
    /// 연결도 시작합니다. 토큰이 없어 푸시를 시작하지 못해도 폴링은 계속됩니다.
    /// tokio 런타임 안에서 호출해야 합니다.
    pub fn start(
        config: SyncConfig,
        fetcher: Arc<dyn SnapshotSource>,
        transport: Arc<dyn PushTransport>,
        session: AuthSession,
    ) -> Self {
        let cancel = CancellationToken::new();
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (update_tx, update_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ReconciledState::default());

        let engine = Engine {
            reconciler: Reconciler::new(),
            state: state_tx,
            inputs: input_rx,
            updates: update_rx,
            cancel: cancel.clone(),
        };
        tokio::spawn(engine.run().instrument(info_span!("sync_engine")));

        let registry = SubscriptionRegistry::new();
        let slot = |stream: StreamKind| StreamSlot {
            manager: ConnectionManager::new(
                stream,
                config.push.url_for(stream),
                Arc::clone(&transport),
                session.clone(),
                update_tx.clone(),
            )
            .with_policy(ReconnectPolicy::from(&config.reconnect))
            .with_ping_interval(config.reconnect.ping_interval()),
            poller: None,
        };
        let mut market = slot(StreamKind::Market);
        market.manager = market.manager.with_registry(registry.clone());
        let streams = Streams {
            notifications: slot(StreamKind::Notifications),
            market,
        };

        let hub = Self {
            config,
            session,
            fetcher,
            registry,
            activity: ActivityMonitor::new(),
            inputs: input_tx,
            state: state_rx,
            streams: Mutex::new(streams),
            cancel,
        };

        for stream in StreamKind::all() {
            if let Err(e) = hub.enable_stream(stream) {
                warn!(%stream, error = %e, "푸시 연결을 시작하지 못함, 폴링만 사용");
            }
        }
        info!(push = hub.config.push.enabled, "동기화 허브 시작");
        hub
    }

    // ==================== 조회 ====================

    /// 현재 조정 상태.
    pub fn state(&self) -> ReconciledState {
        self.state.borrow().clone()
    }

    /// 조정 상태 변경 수신기.
    pub fn watch(&self) -> watch::Receiver<ReconciledState> {
        self.state.clone()
    }

    /// 스트림 연결 상태.
    pub fn connection_state(&self, stream: StreamKind) -> ConnectionState {
        self.with_slot(stream, |slot| slot.manager.state())
    }

    /// 스트림 연결 상태 변경 수신기.
    pub fn watch_connection(&self, stream: StreamKind) -> watch::Receiver<ConnectionState> {
        self.with_slot(stream, |slot| slot.manager.watch())
    }

    /// 구독 레지스트리.
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// 인증 세션.
    pub fn session(&self) -> &AuthSession {
        &self.session
    }

    /// 활동 상태 공급자.
    pub fn activity(&self) -> &ActivityMonitor {
        &self.activity
    }

    /// 종료 여부.
    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // ==================== 낙관적 동작 ====================

    /// 알림 읽음 처리.
    ///
    /// 로컬 상태는 즉시 바뀌고, 서버가 거부하면 이전 값으로 복원된 뒤
    /// `SyncError::OptimisticMutationFailed`를 반환합니다.
    pub async fn mark_as_read(&self, id: &str) -> SyncResult<()> {
        let fetcher = Arc::clone(&self.fetcher);
        let target_id = id.to_string();
        self.run_action(ActionTarget::MarkRead(id.to_string()), move || async move {
            fetcher.mark_read(&target_id).await
        })
        .await
    }

    /// 모든 알림 읽음 처리.
    pub async fn mark_all_as_read(&self) -> SyncResult<()> {
        let fetcher = Arc::clone(&self.fetcher);
        self.run_action(ActionTarget::MarkAllRead, move || async move {
            fetcher.mark_all_read().await
        })
        .await
    }

    /// 알림 삭제.
    pub async fn delete(&self, id: &str) -> SyncResult<()> {
        let fetcher = Arc::clone(&self.fetcher);
        let target_id = id.to_string();
        self.run_action(ActionTarget::Delete(id.to_string()), move || async move {
            fetcher.delete_notification(&target_id).await
        })
        .await
    }

    async fn run_action<F, Fut>(&self, target: ActionTarget, call: F) -> SyncResult<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = SyncResult<()>> + Send + 'static,
    {
        self.ensure_open()?;

        let (begin_tx, begin_rx) = oneshot::channel();
        self.submit(HubInput::Begin {
            target: target.clone(),
            reply: begin_tx,
        })?;
        let mutation = begin_rx.await.map_err(|_| SyncError::Closed)??;

        // 호출자가 기다리지 않아도 서버 호출과 확정/롤백은 끝까지 진행
        let (done_tx, done_rx) = oneshot::channel();
        let inputs = self.inputs.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = call() => result,
            };
            let _ = inputs.send(HubInput::Resolve {
                mutation,
                target,
                result,
                reply: done_tx,
            });
        });

        done_rx.await.map_err(|_| SyncError::Closed)?
    }

    // ==================== 구독 ====================

    /// 심볼 구독. 새로 추가된 심볼을 반환합니다.
    pub fn subscribe_to_symbols<I, S>(&self, symbols: I) -> SyncResult<Vec<String>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.ensure_open()?;
        Ok(self.with_slot(StreamKind::Market, |slot| slot.manager.subscribe(symbols)))
    }

    /// 심볼 구독 해제. 실제로 제거된 심볼을 반환합니다.
    pub fn unsubscribe_from_symbols<I, S>(&self, symbols: I) -> SyncResult<Vec<String>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.ensure_open()?;
        Ok(self.with_slot(StreamKind::Market, |slot| slot.manager.unsubscribe(symbols)))
    }

    /// 전체 구독 해제. 해제된 심볼을 반환합니다.
    pub fn unsubscribe_all_symbols(&self) -> SyncResult<Vec<String>> {
        self.ensure_open()?;
        Ok(self.with_slot(StreamKind::Market, |slot| slot.manager.unsubscribe_all()))
    }

    /// 활성 심볼 목록 요청.
    ///
    /// 시세 스트림이 연결되어 있으면 푸시로, 아니면 폴링으로 가져옵니다.
    pub fn request_active_symbols(&self) -> SyncResult<()> {
        self.ensure_open()?;
        self.with_slot(StreamKind::Market, |slot| {
            if slot.manager.state().is_connected() && slot.manager.request_active_symbols() {
                return;
            }
            if let Some(poller) = &slot.poller {
                poller.trigger_now();
            }
        });
        Ok(())
    }

    // ==================== 스트림 제어 ====================

    /// 스냅샷을 즉시 다시 조회하고 반영될 때까지 기다림.
    ///
    /// 알림 목록(그리고 `poll_active_symbols`이면 활성 심볼)을 가져와 병합합니다.
    /// 실패는 상태의 `poll_failures`에도 기록됩니다.
    ///
    /// # Errors
    /// 조회 실패를 그대로 반환합니다. 인증 실패는 `SyncError::Auth`이며
    /// 자격 증명을 갱신하거나 로그아웃해야 합니다.
    pub async fn refresh(&self) -> SyncResult<()> {
        self.ensure_open()?;

        let query = NotificationQuery::first_page(self.config.polling.page_size);
        let notifications = self
            .fetch_and_apply(StreamKind::Notifications, async {
                self.fetcher
                    .list_notifications(query)
                    .await
                    .map(Polled::Notifications)
            })
            .await;

        let symbols = if self.config.polling.poll_active_symbols {
            self.fetch_and_apply(StreamKind::Market, async {
                self.fetcher.active_symbols().await.map(Polled::ActiveSymbols)
            })
            .await
        } else {
            Ok(())
        };

        notifications.and(symbols)
    }

    async fn fetch_and_apply(
        &self,
        stream: StreamKind,
        fetch: impl Future<Output = SyncResult<Polled>>,
    ) -> SyncResult<()> {
        let result = tokio::select! {
            _ = self.cancel.cancelled() => return Err(SyncError::Closed),
            result = fetch => result,
        };
        let outcome = result.as_ref().map(|_| ()).map_err(Clone::clone);

        let (applied_tx, applied_rx) = oneshot::channel();
        self.submit(HubInput::Polled {
            stream,
            result,
            applied: Some(applied_tx),
        })?;
        applied_rx.await.map_err(|_| SyncError::Closed)?;
        outcome
    }

    /// 스트림 활성화 (폴러 + 푸시 연결).
    ///
    /// # Errors
    /// 토큰이 없으면 푸시 연결은 시작하지 않고 `SyncError::Auth`를 반환합니다.
    /// 이 경우에도 폴러는 시작됩니다.
    pub fn enable_stream(&self, stream: StreamKind) -> SyncResult<()> {
        self.ensure_open()?;
        let mut streams = self.slots();
        let slot = streams.get_mut(stream);

        if slot.poller.as_ref().map_or(true, PollHandle::is_stopped) {
            slot.poller = self.spawn_stream_poller(stream);
        }
        if self.config.push.enabled {
            slot.manager.enable()?;
        }
        Ok(())
    }

    /// 스트림 비활성화 (의도적 종료). 타이머와 연결을 즉시 멈춥니다.
    pub fn disable_stream(&self, stream: StreamKind) {
        self.slots().get_mut(stream).stop();
        info!(%stream, "스트림 비활성화");
    }

    /// 스트림 중단 사유 확인 처리.
    pub fn dismiss_condition(&self, stream: StreamKind) {
        self.with_slot(stream, |slot| slot.manager.dismiss_condition());
    }

    /// 활동 상태 설정.
    pub fn set_activity(&self, activity: Activity) {
        self.activity.set(activity);
    }

    /// 허브 종료.
    ///
    /// 모든 타이머와 연결을 즉시 멈추고 조정기를 분리합니다. 이후 도착하는
    /// 입력은 상태를 바꾸지 않습니다. 여러 번 호출해도 안전합니다.
    pub fn shutdown(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        let mut streams = self.slots();
        for stream in StreamKind::all() {
            streams.get_mut(stream).stop();
        }
        info!("동기화 허브 종료");
    }

    fn spawn_stream_poller(&self, stream: StreamKind) -> Option<PollHandle> {
        let schedule = PollSchedule::from(&self.config.polling);
        let fetcher = Arc::clone(&self.fetcher);
        let inputs = self.inputs.clone();

        match stream {
            StreamKind::Notifications => {
                let query = NotificationQuery::first_page(self.config.polling.page_size);
                Some(spawn_poller(
                    "notifications",
                    schedule,
                    self.activity.subscribe(),
                    move || {
                        let fetcher = Arc::clone(&fetcher);
                        async move { fetcher.list_notifications(query).await }
                    },
                    move |result: SyncResult<Vec<Notification>>| {
                        let _ = inputs.send(HubInput::Polled {
                            stream: StreamKind::Notifications,
                            result: result.map(Polled::Notifications),
                            applied: None,
                        });
                    },
                ))
            }
            StreamKind::Market if self.config.polling.poll_active_symbols => Some(spawn_poller(
                "active_symbols",
                schedule,
                self.activity.subscribe(),
                move || {
                    let fetcher = Arc::clone(&fetcher);
                    async move { fetcher.active_symbols().await }
                },
                move |result: SyncResult<Vec<String>>| {
                    let _ = inputs.send(HubInput::Polled {
                        stream: StreamKind::Market,
                        result: result.map(Polled::ActiveSymbols),
                        applied: None,
                    });
                },
            )),
            StreamKind::Market => None,
        }
    }

    fn ensure_open(&self) -> SyncResult<()> {
        if self.cancel.is_cancelled() {
            Err(SyncError::Closed)
        } else {
            Ok(())
        }
    }

    fn submit(&self, input: HubInput) -> SyncResult<()> {
        self.inputs.send(input).map_err(|_| SyncError::Closed)
    }

    fn slots(&self) -> MutexGuard<'_, Streams> {
        self.streams.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_slot<R>(&self, stream: StreamKind, f: impl FnOnce(&mut StreamSlot) -> R) -> R {
        f(self.slots().get_mut(stream))
    }
}

impl Drop for SyncHub {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// 엔진
// ============================================================================

struct Engine {
    reconciler: Reconciler,
    state: watch::Sender<ReconciledState>,
    inputs: mpsc::UnboundedReceiver<HubInput>,
    updates: mpsc::Receiver<StreamUpdate>,
    cancel: CancellationToken,
}

impl Engine {
    async fn run(mut self) {
        loop {
            let input = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                Some(input) = self.inputs.recv() => input,
                Some(update) = self.updates.recv() => HubInput::Update(update),
                else => break,
            };

            // 종료 이후 도착한 입력은 반영하지 않음
            if self.cancel.is_cancelled() {
                debug!("종료 후 입력 폐기");
                break;
            }

            if self.handle(input) {
                self.publish();
            }
        }
        debug!("동기화 엔진 종료");
    }

    fn publish(&self) {
        self.state.send_replace(self.reconciler.view());
    }

    fn apply_polled(&mut self, polled: Polled) {
        match polled {
            Polled::Notifications(rows) => {
                let summary = self.reconciler.apply_snapshot(rows);
                debug!(
                    applied = summary.applied,
                    stale = summary.stale,
                    shielded = summary.shielded,
                    tombstoned = summary.tombstoned,
                    "스냅샷 병합"
                );
            }
            // 폴링 결과에는 서버 시각이 없음
            Polled::ActiveSymbols(symbols) => {
                self.reconciler.apply(DomainEvent::ActiveSymbols {
                    symbols: symbols.iter().map(|s| normalize_symbol(s)).collect(),
                    timestamp: None,
                });
            }
        }
    }

    fn handle(&mut self, input: HubInput) -> bool {
        match input {
            HubInput::Update(StreamUpdate::Event { stream, event }) => {
                debug!(%stream, event = event.name(), resource = %event.resource_id(), "푸시 이벤트");
                self.reconciler.apply(event);
                self.reconciler.mark_synced(now_millis());
                true
            }
            HubInput::Update(StreamUpdate::Connectivity { stream, connected }) => {
                self.reconciler.set_connected(stream, connected)
            }
            HubInput::Polled {
                stream,
                result,
                applied,
            } => {
                let changed = match result {
                    Ok(polled) => {
                        self.apply_polled(polled);
                        self.reconciler.set_poll_failure(stream, None);
                        self.reconciler.mark_synced(now_millis());
                        true
                    }
                    Err(e) => self.reconciler.set_poll_failure(stream, Some(e)),
                };
                if changed {
                    self.publish();
                }
                if let Some(applied) = applied {
                    let _ = applied.send(());
                }
                false
            }
            HubInput::Begin { target, reply } => {
                let result = match &target {
                    ActionTarget::MarkRead(id) => self.reconciler.begin_mark_read(id),
                    ActionTarget::MarkAllRead => Ok(self.reconciler.begin_mark_all_read()),
                    ActionTarget::Delete(id) => self.reconciler.begin_delete(id),
                };
                let changed = result.is_ok();
                // 호출자가 이미 사라졌으면 서버 호출도 없으므로 즉시 되돌림
                if let Err(Ok(mutation)) = reply.send(result) {
                    self.reconciler.rollback(mutation);
                    return false;
                }
                changed
            }
            HubInput::Resolve {
                mutation,
                target,
                result,
                reply,
            } => {
                let reply_result = match result {
                    Ok(()) => {
                        self.reconciler.confirm(mutation);
                        Ok(())
                    }
                    // 서버에 이미 없는 알림의 삭제는 성공으로 간주
                    Err(SyncError::NotFound(_)) if matches!(target, ActionTarget::Delete(_)) => {
                        self.reconciler.confirm(mutation);
                        Ok(())
                    }
                    Err(e) => {
                        warn!(action = target.action(), resource = %target.resource(), error = %e, "낙관적 변경 실패, 롤백");
                        self.reconciler.rollback(mutation);
                        Err(SyncError::mutation_failed(target.action(), target.resource(), &e))
                    }
                };
                // 응답보다 상태 공개가 먼저
                self.publish();
                let _ = reply.send(reply_result);
                false
            }
        }
    }
}
