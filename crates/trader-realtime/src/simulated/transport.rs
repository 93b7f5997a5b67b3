//! 메모리 기반 푸시 전송.
//!
//! 실제 서버 없이 연결 수락/거부, 서버 프레임 주입, 연결 끊김을 재현합니다.
//! 스트림별로 가장 최근 연결 하나를 "서버 측"에서 조작할 수 있습니다.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;
use trader_core::StreamKind;

use crate::connection::{ConnectRequest, Incoming, PushConnection, PushTransport};
use crate::error::{SyncError, SyncResult};
use crate::protocol::{ClientFrame, ServerFrame};

/// 연결 시도 결과 스크립트.
#[derive(Debug, Clone)]
pub enum ConnectScript {
    /// 연결 수락
    Accept,
    /// 연결 거부
    Refuse(SyncError),
}

#[derive(Default)]
struct StreamSide {
    /// 다음 연결 시도들의 결과 (비어 있으면 수락)
    script: VecDeque<ConnectScript>,
    /// 연결 시도 시각
    attempts: Vec<Instant>,
    /// 현재 연결에 프레임을 넣는 송신기
    server_tx: Option<mpsc::UnboundedSender<Incoming>>,
    /// 클라이언트가 보낸 프레임 (전체 연결 누적)
    sent: Vec<ClientFrame>,
    /// 정상 종료 횟수
    closes: usize,
}

/// 시뮬레이션 전송.
///
/// 복제본은 같은 서버 상태를 공유합니다.
#[derive(Clone, Default)]
pub struct SimulatedTransport {
    sides: Arc<Mutex<HashMap<StreamKind, StreamSide>>>,
}

impl SimulatedTransport {
    /// 모든 연결을 수락하는 전송.
    pub fn new() -> Self {
        Self::default()
    }

    fn sides(&self) -> MutexGuard<'_, HashMap<StreamKind, StreamSide>> {
        self.sides.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 다음 연결 시도들의 결과를 예약.
    pub fn script(&self, stream: StreamKind, steps: impl IntoIterator<Item = ConnectScript>) {
        self.sides()
            .entry(stream)
            .or_default()
            .script
            .extend(steps);
    }

    /// 다음 `count`번의 연결을 네트워크 에러로 거부.
    pub fn refuse_next(&self, stream: StreamKind, count: usize) {
        self.script(
            stream,
            (0..count).map(|_| ConnectScript::Refuse(SyncError::Network("connection refused".into()))),
        );
    }

    /// 현재 연결에 JSON 프레임 주입. 연결이 없으면 `false`.
    pub fn push_json(&self, stream: StreamKind, json: &str) -> bool {
        let incoming = match ServerFrame::from_json(json) {
            Ok(frame) => Incoming::Frame(frame),
            Err(e) => Incoming::Malformed(e.to_string()),
        };
        self.push(stream, incoming)
    }

    /// 현재 연결에 항목 주입. 연결이 없으면 `false`.
    pub fn push(&self, stream: StreamKind, incoming: Incoming) -> bool {
        self.sides()
            .get(&stream)
            .and_then(|side| side.server_tx.as_ref())
            .map(|tx| tx.send(incoming).is_ok())
            .unwrap_or(false)
    }

    /// 서버 측에서 현재 연결을 끊음.
    pub fn drop_connection(&self, stream: StreamKind) -> bool {
        let tx = self
            .sides()
            .get_mut(&stream)
            .and_then(|side| side.server_tx.take());
        match tx {
            Some(tx) => tx.send(Incoming::Closed(Some("server closed".into()))).is_ok(),
            None => false,
        }
    }

    /// 연결 시도 횟수.
    pub fn connect_count(&self, stream: StreamKind) -> usize {
        self.sides().get(&stream).map_or(0, |side| side.attempts.len())
    }

    /// 연결 시도 시각.
    pub fn attempt_times(&self, stream: StreamKind) -> Vec<Instant> {
        self.sides()
            .get(&stream)
            .map(|side| side.attempts.clone())
            .unwrap_or_default()
    }

    /// 클라이언트가 보낸 프레임.
    pub fn sent_frames(&self, stream: StreamKind) -> Vec<ClientFrame> {
        self.sides()
            .get(&stream)
            .map(|side| side.sent.clone())
            .unwrap_or_default()
    }

    /// 클라이언트가 정상 종료한 횟수.
    pub fn close_count(&self, stream: StreamKind) -> usize {
        self.sides().get(&stream).map_or(0, |side| side.closes)
    }

    /// 현재 열린 연결이 있는지.
    pub fn is_open(&self, stream: StreamKind) -> bool {
        self.sides()
            .get(&stream)
            .and_then(|side| side.server_tx.as_ref())
            .is_some_and(|tx| !tx.is_closed())
    }
}

#[async_trait]
impl PushTransport for SimulatedTransport {
    async fn connect(&self, request: ConnectRequest) -> SyncResult<Box<dyn PushConnection>> {
        let mut sides = self.sides();
        let side = sides.entry(request.stream).or_default();
        side.attempts.push(Instant::now());

        match side.script.pop_front().unwrap_or(ConnectScript::Accept) {
            ConnectScript::Refuse(err) => {
                debug!(stream = %request.stream, error = %err, "시뮬레이션 연결 거부");
                Err(err)
            }
            ConnectScript::Accept => {
                let (tx, rx) = mpsc::unbounded_channel();
                side.server_tx = Some(tx);
                Ok(Box::new(SimulatedConnection {
                    stream: request.stream,
                    rx,
                    sides: Arc::clone(&self.sides),
                    closed: false,
                }))
            }
        }
    }
}

/// 시뮬레이션 연결.
pub struct SimulatedConnection {
    stream: StreamKind,
    rx: mpsc::UnboundedReceiver<Incoming>,
    sides: Arc<Mutex<HashMap<StreamKind, StreamSide>>>,
    closed: bool,
}

impl SimulatedConnection {
    fn with_side<R>(&self, f: impl FnOnce(&mut StreamSide) -> R) -> R {
        let mut sides = self.sides.lock().unwrap_or_else(|e| e.into_inner());
        f(sides.entry(self.stream).or_default())
    }
}

#[async_trait]
impl PushConnection for SimulatedConnection {
    async fn send(&mut self, frame: &ClientFrame) -> SyncResult<()> {
        if self.closed {
            return Err(SyncError::Network("connection closed".into()));
        }
        let frame = frame.clone();
        self.with_side(|side| side.sent.push(frame));
        Ok(())
    }

    async fn recv(&mut self) -> SyncResult<Incoming> {
        Ok(self
            .rx
            .recv()
            .await
            .unwrap_or(Incoming::Closed(None)))
    }

    async fn ping(&mut self) -> SyncResult<()> {
        Ok(())
    }

    async fn close(&mut self) -> SyncResult<()> {
        self.closed = true;
        self.rx.close();
        self.with_side(|side| {
            side.closes += 1;
            side.server_tx = None;
        });
        Ok(())
    }
}
