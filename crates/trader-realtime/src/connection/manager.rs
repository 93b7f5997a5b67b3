//! 스트림별 푸시 연결 관리자.
//!
//! 하나의 관리자는 하나의 논리 스트림(알림 또는 시세)을 담당합니다.
//!
//! - 연결 실패나 예기치 않은 끊김은 backoff 정책에 따라 재연결
//! - 연속 실패가 한도에 도달하면 `RetriesExhausted` 상태로 멈춤
//! - 인증 거부는 재시도하지 않고 `AuthRejected` 상태로 멈춤
//! - 연결될 때마다 구독 레지스트리의 전체 집합을 다시 전송
//! - `disable`은 의도적 종료이며 재연결을 일으키지 않음
//!
//! 상태는 `watch` 채널로 공개되고, 수신 이벤트는 `mpsc` 채널로 전달됩니다.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use trader_core::{DomainEvent, StreamKind};

use super::transport::{ConnectRequest, Incoming, PushConnection, PushTransport};
use crate::backoff::ReconnectPolicy;
use crate::error::{SyncError, SyncResult};
use crate::protocol::{ClientFrame, FrameOutcome};
use crate::registry::SubscriptionRegistry;
use crate::session::AuthSession;

/// 기본 keepalive 간격.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// 연결 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// 연결 중
    Connecting,
    /// 연결됨
    Connected,
    /// 연결 안 됨 (비활성 또는 재연결 대기)
    Disconnected,
    /// 에러 (재연결 대기 또는 중단)
    Errored,
}

/// 사용자에게 보여줄 중단 사유.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamCondition {
    /// 최대 재연결 시도 횟수 초과
    RetriesExhausted { attempts: u32 },
    /// 서버가 인증을 거부함
    AuthRejected { reason: String },
}

impl StreamCondition {
    /// 조건에 대응하는 에러.
    pub fn to_error(&self, stream: StreamKind) -> SyncError {
        match self {
            StreamCondition::RetriesExhausted { attempts } => SyncError::MaxRetriesExceeded {
                stream,
                attempts: *attempts,
            },
            StreamCondition::AuthRejected { reason } => SyncError::Auth(reason.clone()),
        }
    }
}

/// 스트림 연결 상태 스냅샷.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    /// 스트림
    pub stream: StreamKind,
    /// 현재 상태
    pub status: ConnectionStatus,
    /// 연속 실패 횟수 (연결 성공 시 0)
    pub attempt_count: u32,
    /// 마지막 에러 메시지
    pub last_error: Option<String>,
    /// 확인 전까지 유지되는 중단 사유
    pub condition: Option<StreamCondition>,
    /// 예약된 재연결까지 남은 지연
    pub next_retry_in: Option<Duration>,
}

impl ConnectionState {
    /// 비활성 초기 상태.
    pub fn idle(stream: StreamKind) -> Self {
        Self {
            stream,
            status: ConnectionStatus::Disconnected,
            attempt_count: 0,
            last_error: None,
            condition: None,
            next_retry_in: None,
        }
    }

    /// 연결 여부.
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

/// 관리자가 상위로 전달하는 항목.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamUpdate {
    /// 서버 이벤트
    Event {
        stream: StreamKind,
        event: DomainEvent,
    },
    /// 연결 여부 변경
    Connectivity { stream: StreamKind, connected: bool },
}

#[derive(Debug)]
enum Command {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
    RequestActiveSymbols,
}

impl Command {
    fn into_frame(self) -> ClientFrame {
        match self {
            Command::Subscribe(symbols) => ClientFrame::SubscribeSymbols { symbols },
            Command::Unsubscribe(symbols) => ClientFrame::UnsubscribeSymbols { symbols },
            Command::RequestActiveSymbols => ClientFrame::GetActiveSymbols,
        }
    }
}

/// 세대 번호로 보호되는 상태 저장소.
///
/// 이전 세대의 워커는 종료 중에도 새 세대의 상태를 덮어쓰지 못합니다.
struct StateCell {
    tx: watch::Sender<ConnectionState>,
    generation: AtomicU64,
}

impl StateCell {
    fn update(&self, generation: u64, f: impl FnOnce(&mut ConnectionState)) {
        self.tx.send_if_modified(|state| {
            if self.generation.load(Ordering::SeqCst) != generation {
                return false;
            }
            f(state);
            true
        });
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }
}

struct WorkerHandle {
    cancel: CancellationToken,
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

/// 스트림 연결 관리자.
pub struct ConnectionManager {
    stream: StreamKind,
    url: String,
    policy: ReconnectPolicy,
    ping_interval: Duration,
    transport: Arc<dyn PushTransport>,
    session: AuthSession,
    registry: Option<SubscriptionRegistry>,
    updates: mpsc::Sender<StreamUpdate>,
    state: Arc<StateCell>,
    worker: Option<WorkerHandle>,
}

impl ConnectionManager {
    /// 새 관리자 생성 (비활성 상태).
    pub fn new(
        stream: StreamKind,
        url: impl Into<String>,
        transport: Arc<dyn PushTransport>,
        session: AuthSession,
        updates: mpsc::Sender<StreamUpdate>,
    ) -> Self {
        let (tx, _) = watch::channel(ConnectionState::idle(stream));
        Self {
            stream,
            url: url.into(),
            policy: ReconnectPolicy::default(),
            ping_interval: DEFAULT_PING_INTERVAL,
            transport,
            session,
            registry: None,
            updates,
            state: Arc::new(StateCell {
                tx,
                generation: AtomicU64::new(0),
            }),
            worker: None,
        }
    }

    /// 재연결 정책 설정.
    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// keepalive 간격 설정.
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// 심볼 구독을 사용하는 스트림에 레지스트리 연결.
    pub fn with_registry(mut self, registry: SubscriptionRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// 담당 스트림.
    pub fn stream(&self) -> StreamKind {
        self.stream
    }

    /// 현재 상태.
    pub fn state(&self) -> ConnectionState {
        self.state.tx.borrow().clone()
    }

    /// 상태 변경 수신기.
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.tx.subscribe()
    }

    /// 워커가 동작 중인지 (연결 중, 연결됨, 재연결 대기).
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.task.is_finished())
    }

    /// 스트림 활성화.
    ///
    /// 이미 동작 중이면 아무 일도 하지 않습니다. 중단된 스트림은 시도 횟수를
    /// 초기화하고 다시 연결합니다.
    ///
    /// # Errors
    /// 세션에 토큰이 없으면 연결을 시도하지 않고 `SyncError::Auth`를 반환합니다.
    pub fn enable(&mut self) -> SyncResult<()> {
        if self.is_running() {
            return Ok(());
        }

        if let Err(e) = self.session.token() {
            warn!(stream = %self.stream, "토큰 없음, 연결하지 않음");
            return Err(e);
        }

        let generation = self.state.next_generation();
        self.state.tx.send_replace(ConnectionState {
            status: ConnectionStatus::Connecting,
            ..ConnectionState::idle(self.stream)
        });

        let cancel = CancellationToken::new();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let worker = Worker {
            stream: self.stream,
            url: self.url.clone(),
            policy: self.policy,
            ping_interval: self.ping_interval,
            transport: Arc::clone(&self.transport),
            session: self.session.clone(),
            registry: self.registry.clone(),
            updates: self.updates.clone(),
            state: Arc::clone(&self.state),
            generation,
            cancel: cancel.clone(),
            commands: command_rx,
        };

        let span = trader_core::stream_span!("push_connection", self.stream, self.url);
        let task = tokio::spawn(worker.run().instrument(span));
        self.worker = Some(WorkerHandle {
            cancel,
            commands: command_tx,
            task,
        });
        Ok(())
    }

    /// 스트림 비활성화 (의도적 종료).
    ///
    /// 즉시 상태를 `Disconnected`로 바꾸며, 이후 워커는 어떤 이벤트도
    /// 전달하지 않습니다. 여러 번 호출해도 안전합니다.
    pub fn disable(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        worker.cancel.cancel();
        self.state.next_generation();
        self.state.tx.send_modify(|state| {
            state.status = ConnectionStatus::Disconnected;
            state.attempt_count = 0;
            state.next_retry_in = None;
        });
        info!(stream = %self.stream, "스트림 비활성화");
    }

    /// 중단 사유 확인 처리.
    pub fn dismiss_condition(&self) {
        self.state.tx.send_if_modified(|state| state.condition.take().is_some());
    }

    /// 심볼 구독 추가. 새로 추가된 심볼만 서버에 보냅니다.
    pub fn subscribe<I, S>(&self, symbols: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let Some(registry) = &self.registry else {
            return Vec::new();
        };
        let added = registry.subscribe(symbols);
        if !added.is_empty() {
            self.send_command(Command::Subscribe(added.clone()));
        }
        added
    }

    /// 심볼 구독 해제. 실제로 제거된 심볼만 서버에 보냅니다.
    pub fn unsubscribe<I, S>(&self, symbols: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let Some(registry) = &self.registry else {
            return Vec::new();
        };
        let removed = registry.unsubscribe(symbols);
        if !removed.is_empty() {
            self.send_command(Command::Unsubscribe(removed.clone()));
        }
        removed
    }

    /// 전체 구독 해제. 제거된 심볼을 한 번에 서버에 보냅니다.
    pub fn unsubscribe_all(&self) -> Vec<String> {
        let Some(registry) = &self.registry else {
            return Vec::new();
        };
        let removed = registry.unsubscribe_all();
        if !removed.is_empty() {
            self.send_command(Command::Unsubscribe(removed.clone()));
        }
        removed
    }

    /// 서버에 활성 심볼 목록 요청.
    ///
    /// 연결되어 있지 않으면 다음 연결 시 요청합니다.
    pub fn request_active_symbols(&self) -> bool {
        self.send_command(Command::RequestActiveSymbols)
    }

    fn send_command(&self, command: Command) -> bool {
        match &self.worker {
            Some(worker) => worker.commands.send(command).is_ok(),
            None => {
                debug!(stream = %self.stream, ?command, "비활성 스트림, 명령 생략");
                false
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.cancel.cancel();
        }
    }
}

// ============================================================================
// 워커
// ============================================================================

enum SessionEnd {
    Intentional,
    AuthRejected(String),
    Dropped(String),
}

struct Worker {
    stream: StreamKind,
    url: String,
    policy: ReconnectPolicy,
    ping_interval: Duration,
    transport: Arc<dyn PushTransport>,
    session: AuthSession,
    registry: Option<SubscriptionRegistry>,
    updates: mpsc::Sender<StreamUpdate>,
    state: Arc<StateCell>,
    generation: u64,
    cancel: CancellationToken,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl Worker {
    async fn run(mut self) {
        let mut failures: u32 = 0;

        loop {
            let token = match self.session.token() {
                Ok(token) => token,
                Err(e) => {
                    self.halt_auth(e.to_string());
                    return;
                }
            };

            self.update(|state| {
                state.status = ConnectionStatus::Connecting;
                state.next_retry_in = None;
            });

            let request = ConnectRequest {
                stream: self.stream,
                url: self.url.clone(),
                token,
            };
            let connected = tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = self.transport.connect(request) => result,
            };

            let (status, reason) = match connected {
                Ok(connection) => {
                    failures = 0;
                    match self.serve(connection).await {
                        SessionEnd::Intentional => return,
                        SessionEnd::AuthRejected(reason) => {
                            self.halt_auth(reason);
                            return;
                        }
                        SessionEnd::Dropped(reason) => (ConnectionStatus::Disconnected, reason),
                    }
                }
                Err(e) if e.is_auth_error() => {
                    self.halt_auth(e.to_string());
                    return;
                }
                Err(e) => (ConnectionStatus::Errored, e.to_string()),
            };

            failures += 1;
            let Some(delay) = self.policy.delay_for(failures) else {
                error!(attempts = failures, error = %reason, "최대 재연결 시도 횟수 초과, 재연결 중단");
                self.update(|state| {
                    state.status = ConnectionStatus::Errored;
                    state.attempt_count = failures;
                    state.last_error = Some(reason);
                    state.condition = Some(StreamCondition::RetriesExhausted { attempts: failures });
                    state.next_retry_in = None;
                });
                return;
            };

            warn!(
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                error = %reason,
                "연결 실패, 재연결 예약"
            );
            self.update(|state| {
                state.status = status;
                state.attempt_count = failures;
                state.last_error = Some(reason);
                state.next_retry_in = Some(delay);
            });

            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = sleep(delay) => {}
            }
        }
    }

    /// 연결 직후 처리: 대기 명령 정리, 상태 갱신, 구독 복원.
    async fn on_connected(&mut self, connection: &mut dyn PushConnection) -> SyncResult<()> {
        // 레지스트리 전체 집합이 대기 중인 구독 명령을 대체함
        let mut want_active = self.stream == StreamKind::Market;
        while let Ok(command) = self.commands.try_recv() {
            if matches!(command, Command::RequestActiveSymbols) {
                want_active = true;
            }
        }

        self.update(|state| {
            state.status = ConnectionStatus::Connected;
            state.attempt_count = 0;
            state.last_error = None;
            state.condition = None;
            state.next_retry_in = None;
        });
        info!("푸시 연결됨");
        self.forward(StreamUpdate::Connectivity {
            stream: self.stream,
            connected: true,
        })
        .await;

        if let Some(registry) = &self.registry {
            let symbols = registry.snapshot();
            if !symbols.is_empty() {
                info!(count = symbols.len(), "구독 복원");
                connection
                    .send(&ClientFrame::SubscribeSymbols { symbols })
                    .await?;
            }
        }
        if want_active {
            connection.send(&ClientFrame::GetActiveSymbols).await?;
        }
        Ok(())
    }

    async fn serve(&mut self, mut connection: Box<dyn PushConnection>) -> SessionEnd {
        if let Err(e) = self.on_connected(connection.as_mut()).await {
            self.disconnected().await;
            return SessionEnd::Dropped(e.to_string());
        }

        let mut ping = interval_at(Instant::now() + self.ping_interval, self.ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let end = 'session: loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break SessionEnd::Intentional,

                command = self.commands.recv() => {
                    let Some(command) = command else {
                        break SessionEnd::Intentional;
                    };
                    if let Err(e) = connection.send(&command.into_frame()).await {
                        break SessionEnd::Dropped(e.to_string());
                    }
                }

                incoming = connection.recv() => match incoming {
                    Ok(Incoming::Frame(frame)) => match frame.into_outcome() {
                        FrameOutcome::Events(events) => {
                            for event in events {
                                let update = StreamUpdate::Event { stream: self.stream, event };
                                if !self.forward(update).await {
                                    break 'session SessionEnd::Intentional;
                                }
                            }
                        }
                        FrameOutcome::AuthRejected(reason) => {
                            break SessionEnd::AuthRejected(reason);
                        }
                        FrameOutcome::ServerError(message) => {
                            warn!(error = %message, "서버 에러 프레임");
                        }
                        FrameOutcome::Ignored => {}
                    },
                    Ok(Incoming::Malformed(reason)) => {
                        warn!(error = %reason, "프레임 파싱 실패, 무시");
                    }
                    Ok(Incoming::Closed(reason)) => {
                        break SessionEnd::Dropped(
                            reason.unwrap_or_else(|| "연결이 종료됨".to_string()),
                        );
                    }
                    Err(e) => break SessionEnd::Dropped(e.to_string()),
                },

                _ = ping.tick() => {
                    if let Err(e) = connection.ping().await {
                        break SessionEnd::Dropped(e.to_string());
                    }
                }
            }
        };

        if !matches!(end, SessionEnd::Dropped(_)) {
            if let Err(e) = connection.close().await {
                debug!(error = %e, "연결 종료 중 에러");
            }
        }
        self.disconnected().await;
        end
    }

    async fn disconnected(&self) {
        self.forward(StreamUpdate::Connectivity {
            stream: self.stream,
            connected: false,
        })
        .await;
    }

    /// 상위로 전달. 종료되었거나 수신자가 없으면 `false`.
    ///
    /// 채널이 가득 차 대기하는 중에 종료되어도 전달하지 않습니다.
    async fn forward(&self, update: StreamUpdate) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.updates.send(update) => sent.is_ok(),
        }
    }

    fn halt_auth(&self, reason: String) {
        error!(error = %reason, "인증 거부, 재연결하지 않음");
        self.update(|state| {
            state.status = ConnectionStatus::Errored;
            state.last_error = Some(reason.clone());
            state.condition = Some(StreamCondition::AuthRejected { reason });
            state.next_retry_in = None;
        });
    }

    fn update(&self, f: impl FnOnce(&mut ConnectionState)) {
        self.state.update(self.generation, f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{ConnectScript, SimulatedTransport};

    const MARKET: StreamKind = StreamKind::Market;

    struct Fixture {
        manager: ConnectionManager,
        transport: SimulatedTransport,
        updates: mpsc::Receiver<StreamUpdate>,
    }

    fn fixture(session: AuthSession) -> Fixture {
        fixture_with_capacity(session, 64)
    }

    fn fixture_with_capacity(session: AuthSession, capacity: usize) -> Fixture {
        let transport = SimulatedTransport::new();
        let (tx, rx) = mpsc::channel(capacity);
        let manager = ConnectionManager::new(
            MARKET,
            "ws://simulated/ws/market",
            Arc::new(transport.clone()),
            session,
            tx,
        )
        .with_registry(SubscriptionRegistry::new());
        Fixture {
            manager,
            transport,
            updates: rx,
        }
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met in time");
    }

    async fn wait_connected(manager: &ConnectionManager) {
        let mut rx = manager.watch();
        rx.wait_for(|s| s.is_connected()).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_delays_between_attempts() {
        let mut f = fixture(AuthSession::with_token("t"));
        f.transport.refuse_next(MARKET, 3);

        f.manager.enable().unwrap();
        wait_connected(&f.manager).await;

        let times = f.transport.attempt_times(MARKET);
        assert_eq!(times.len(), 4);
        let gaps: Vec<u128> = times.windows(2).map(|w| (w[1] - w[0]).as_millis()).collect();
        for (gap, expected) in gaps.iter().zip([3000u128, 6000, 12000]) {
            assert!(
                *gap >= expected && *gap < expected + 50,
                "gap {} expected {}",
                gap,
                expected
            );
        }
        assert_eq!(f.manager.state().attempt_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_stops_reconnecting() {
        let mut f = fixture(AuthSession::with_token("t"));
        f.transport.refuse_next(MARKET, 10);

        f.manager.enable().unwrap();
        let mut rx = f.manager.watch();
        rx.wait_for(|s| s.condition.is_some()).await.unwrap();

        let state = f.manager.state();
        assert_eq!(state.status, ConnectionStatus::Errored);
        assert_eq!(state.condition, Some(StreamCondition::RetriesExhausted { attempts: 5 }));
        assert_eq!(
            state.condition.as_ref().unwrap().to_error(MARKET),
            SyncError::MaxRetriesExceeded {
                stream: MARKET,
                attempts: 5
            }
        );

        sleep(Duration::from_secs(600)).await;
        assert_eq!(f.transport.connect_count(MARKET), 5);
        assert!(!f.manager.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_enable_after_exhaustion_resets_attempts() {
        let mut f = fixture(AuthSession::with_token("t"));
        f.transport.refuse_next(MARKET, 5);

        f.manager.enable().unwrap();
        let mut rx = f.manager.watch();
        rx.wait_for(|s| s.condition.is_some()).await.unwrap();

        f.manager.enable().unwrap();
        wait_connected(&f.manager).await;
        let state = f.manager.state();
        assert_eq!(state.attempt_count, 0);
        assert_eq!(state.condition, None);
        assert_eq!(f.transport.connect_count(MARKET), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribes_full_set_after_reconnect() {
        let mut f = fixture(AuthSession::with_token("t"));
        f.manager.subscribe(["btcusdt", "ETHUSDT"]);

        f.manager.enable().unwrap();
        wait_connected(&f.manager).await;
        assert_eq!(f.manager.subscribe(["SOLUSDT", "BTCUSDT"]), vec!["SOLUSDT"]);

        let transport = f.transport.clone();
        eventually(|| transport.sent_frames(MARKET).len() == 3).await;

        assert!(f.transport.drop_connection(MARKET));
        eventually(|| transport.connect_count(MARKET) == 2).await;
        wait_connected(&f.manager).await;
        eventually(|| transport.sent_frames(MARKET).len() == 5).await;

        let frames = f.transport.sent_frames(MARKET);
        assert_eq!(
            frames,
            vec![
                ClientFrame::SubscribeSymbols {
                    symbols: vec!["BTCUSDT".into(), "ETHUSDT".into()]
                },
                ClientFrame::GetActiveSymbols,
                ClientFrame::SubscribeSymbols {
                    symbols: vec!["SOLUSDT".into()]
                },
                ClientFrame::SubscribeSymbols {
                    symbols: vec!["BTCUSDT".into(), "ETHUSDT".into(), "SOLUSDT".into()]
                },
                ClientFrame::GetActiveSymbols,
            ]
        );

        // 끊김도 실패로 간주되어 첫 번째 지연 후 재연결
        let times = f.transport.attempt_times(MARKET);
        assert!((times[1] - times[0]).as_millis() >= 3000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_is_intentional_and_idempotent() {
        let mut f = fixture(AuthSession::with_token("t"));
        f.manager.enable().unwrap();
        wait_connected(&f.manager).await;

        f.manager.disable();
        f.manager.disable();
        assert_eq!(f.manager.state().status, ConnectionStatus::Disconnected);

        sleep(Duration::from_secs(120)).await;
        assert_eq!(f.transport.connect_count(MARKET), 1);
        assert_eq!(f.transport.close_count(MARKET), 1);
        assert_eq!(f.manager.state().status, ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_auth_rejection_is_not_retried() {
        let mut f = fixture(AuthSession::with_token("expired"));
        f.transport.script(
            MARKET,
            [ConnectScript::Refuse(SyncError::Auth("401".into()))],
        );

        f.manager.enable().unwrap();
        let mut rx = f.manager.watch();
        rx.wait_for(|s| s.condition.is_some()).await.unwrap();

        assert!(matches!(
            f.manager.state().condition,
            Some(StreamCondition::AuthRejected { .. })
        ));
        sleep(Duration::from_secs(120)).await;
        assert_eq!(f.transport.connect_count(MARKET), 1);

        f.manager.dismiss_condition();
        assert_eq!(f.manager.state().condition, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_error_frame_stops_stream() {
        let mut f = fixture(AuthSession::with_token("t"));
        f.manager.enable().unwrap();
        wait_connected(&f.manager).await;

        f.transport
            .push_json(MARKET, r#"{"type":"error","code":"UNAUTHORIZED","message":"expired"}"#);
        let mut rx = f.manager.watch();
        rx.wait_for(|s| s.condition.is_some()).await.unwrap();

        assert_eq!(f.manager.state().status, ConnectionStatus::Errored);
        sleep(Duration::from_secs(120)).await;
        assert_eq!(f.transport.connect_count(MARKET), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_token_makes_no_attempt() {
        let mut f = fixture(AuthSession::anonymous());
        assert!(f.manager.enable().unwrap_err().is_auth_error());

        sleep(Duration::from_secs(10)).await;
        assert_eq!(f.transport.connect_count(MARKET), 0);
        assert_eq!(f.manager.state().status, ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_are_forwarded_in_order() {
        let mut f = fixture(AuthSession::with_token("t"));
        f.manager.enable().unwrap();
        wait_connected(&f.manager).await;

        f.transport.push_json(MARKET, "garbage");
        f.transport.push_json(
            MARKET,
            r#"{"type":"price_update","symbol":"BTCUSDT","price":"1","timestamp":10}"#,
        );

        assert_eq!(
            f.updates.recv().await.unwrap(),
            StreamUpdate::Connectivity {
                stream: MARKET,
                connected: true
            }
        );
        match f.updates.recv().await.unwrap() {
            StreamUpdate::Event { event, .. } => assert_eq!(event.timestamp(), Some(10)),
            other => panic!("unexpected update: {:?}", other),
        }
        assert!(f.manager.state().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_updates_after_disable() {
        let mut f = fixture(AuthSession::with_token("t"));
        f.manager.enable().unwrap();
        wait_connected(&f.manager).await;
        assert!(matches!(
            f.updates.recv().await,
            Some(StreamUpdate::Connectivity { connected: true, .. })
        ));

        f.manager.disable();
        f.transport.push_json(
            MARKET,
            r#"{"type":"price_update","symbol":"BTCUSDT","price":"1","timestamp":10}"#,
        );
        sleep(Duration::from_secs(1)).await;
        assert!(f.updates.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_waiting_on_full_channel_is_dropped_after_disable() {
        let mut f = fixture_with_capacity(AuthSession::with_token("t"), 1);
        f.manager.enable().unwrap();
        wait_connected(&f.manager).await;

        // 연결 알림이 채널을 채운 상태에서 시세가 전달 대기
        f.transport.push_json(
            MARKET,
            r#"{"type":"price_update","symbol":"BTCUSDT","price":"1","timestamp":10}"#,
        );
        sleep(Duration::from_millis(50)).await;

        f.manager.disable();
        assert!(matches!(
            f.updates.recv().await,
            Some(StreamUpdate::Connectivity { connected: true, .. })
        ));
        sleep(Duration::from_secs(1)).await;
        assert!(f.updates.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_all_sends_removed_set() {
        let mut f = fixture(AuthSession::with_token("t"));
        f.manager.subscribe(["BTCUSDT", "ETHUSDT"]);
        f.manager.enable().unwrap();
        wait_connected(&f.manager).await;

        assert_eq!(f.manager.unsubscribe_all(), vec!["BTCUSDT", "ETHUSDT"]);
        assert!(f.manager.unsubscribe_all().is_empty());

        let transport = f.transport.clone();
        eventually(|| {
            transport
                .sent_frames(MARKET)
                .contains(&ClientFrame::UnsubscribeSymbols {
                    symbols: vec!["BTCUSDT".into(), "ETHUSDT".into()],
                })
        })
        .await;
    }
}
