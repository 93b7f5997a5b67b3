//! 트레이딩 시그널 대시보드를 위한 실시간 동기화 계층.
//!
//! 이 크레이트는 다음을 제공합니다:
//! - REST 스냅샷 조회 (`SnapshotSource`)
//! - 스트림별 푸시 연결 관리와 지수 backoff 재연결
//! - 활동 상태에 따라 간격이 바뀌는 폴링 스케줄러
//! - 서버 타임스탬프 기준 last-writer-wins 조정과 낙관적 변경 롤백
//! - 재연결 시 자동 재구독되는 구독 레지스트리
//!
//! 위 구성 요소는 [`SyncHub`]가 묶어서 소비자에게 제공합니다.

pub mod backoff;
pub mod connection;
pub mod error;
pub mod fetcher;
pub mod hub;
pub mod polling;
pub mod protocol;
pub mod reconciler;
pub mod registry;
pub mod session;
pub mod simulated;

pub use backoff::ReconnectPolicy;
pub use connection::{
    ConnectionManager, ConnectionState, ConnectionStatus, PushConnection, PushTransport,
    StreamCondition, StreamUpdate, WebSocketTransport,
};
pub use error::*;
pub use fetcher::{RestSnapshotClient, SnapshotSource};
pub use hub::SyncHub;
pub use polling::{spawn_poller, Activity, ActivityMonitor, PollHandle, PollSchedule};
pub use protocol::{ClientFrame, FrameOutcome, ServerFrame};
pub use reconciler::{
    ApplyOutcome, Connectivity, MutationId, MutationKind, PendingOptimisticMutation,
    PollFailures, ReconciledState, Reconciler, SnapshotSummary,
};
pub use registry::SubscriptionRegistry;
pub use session::AuthSession;
pub use simulated::{SimulatedSnapshotSource, SimulatedTransport, SnapshotOp};
