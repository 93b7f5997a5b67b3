//! 푸시 채널 전송 계층.
//!
//! `PushTransport`는 연결을 만들고, `PushConnection`은 열린 연결 하나에서
//! 프레임을 주고받습니다. 실제 구현은 tokio-tungstenite WebSocket이며,
//! 테스트와 데모는 `simulated` 모듈의 메모리 구현을 사용합니다.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use trader_core::StreamKind;

use crate::error::{SyncError, SyncResult};
use crate::protocol::{ClientFrame, ServerFrame};

/// 연결 요청.
#[derive(Clone)]
pub struct ConnectRequest {
    /// 대상 스트림
    pub stream: StreamKind,
    /// WebSocket URL
    pub url: String,
    /// 연결 시점의 bearer 토큰
    pub token: SecretString,
}

impl std::fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("stream", &self.stream)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

/// 연결에서 수신한 항목.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// 해석된 서버 프레임
    Frame(ServerFrame),
    /// 해석할 수 없는 프레임 (연결은 유지)
    Malformed(String),
    /// 연결 종료 (사유)
    Closed(Option<String>),
}

/// 연결 팩토리.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// 연결 및 핸드셰이크.
    ///
    /// 서버가 인증을 거부하면 `SyncError::Auth`를 반환해야 합니다.
    async fn connect(&self, request: ConnectRequest) -> SyncResult<Box<dyn PushConnection>>;
}

/// 열린 푸시 연결.
#[async_trait]
pub trait PushConnection: Send {
    /// 프레임 전송.
    async fn send(&mut self, frame: &ClientFrame) -> SyncResult<()>;

    /// 다음 항목 수신.
    async fn recv(&mut self) -> SyncResult<Incoming>;

    /// keepalive ping 전송.
    async fn ping(&mut self) -> SyncResult<()>;

    /// 정상 종료.
    async fn close(&mut self) -> SyncResult<()>;
}

// ============================================================================
// tokio-tungstenite 구현
// ============================================================================

/// WebSocket 전송.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// 새 전송 생성.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PushTransport for WebSocketTransport {
    async fn connect(&self, request: ConnectRequest) -> SyncResult<Box<dyn PushConnection>> {
        let mut upgrade = request.url.as_str().into_client_request()?;
        let bearer = format!("Bearer {}", request.token.expose_secret());
        let header = HeaderValue::from_str(&bearer)
            .map_err(|e| SyncError::Auth(format!("토큰을 헤더로 사용할 수 없음: {}", e)))?;
        upgrade.headers_mut().insert("Authorization", header);

        info!(stream = %request.stream, url = %request.url, "WebSocket 연결 중");
        let (ws, response) = connect_async(upgrade).await?;
        debug!(stream = %request.stream, status = %response.status(), "WebSocket 핸드셰이크 완료");

        Ok(Box::new(WebSocketConnection { ws }))
    }
}

/// 열린 WebSocket 연결.
pub struct WebSocketConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl PushConnection for WebSocketConnection {
    async fn send(&mut self, frame: &ClientFrame) -> SyncResult<()> {
        let json = frame.to_json()?;
        self.ws.send(Message::Text(json)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> SyncResult<Incoming> {
        loop {
            let message = match self.ws.next().await {
                Some(message) => message?,
                None => return Ok(Incoming::Closed(None)),
            };

            let text = match message {
                Message::Text(text) => text,
                Message::Binary(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(e) => return Ok(Incoming::Malformed(e.to_string())),
                },
                Message::Ping(data) => {
                    debug!("Ping 수신, Pong 응답");
                    self.ws.send(Message::Pong(data)).await?;
                    continue;
                }
                Message::Pong(_) | Message::Frame(_) => continue,
                Message::Close(frame) => {
                    return Ok(Incoming::Closed(frame.map(|f| f.reason.to_string())));
                }
            };

            return Ok(match ServerFrame::from_json(&text) {
                Ok(frame) => Incoming::Frame(frame),
                Err(e) => Incoming::Malformed(e.to_string()),
            });
        }
    }

    async fn ping(&mut self) -> SyncResult<()> {
        self.ws.send(Message::Ping(Vec::new())).await?;
        Ok(())
    }

    async fn close(&mut self) -> SyncResult<()> {
        match self.ws.close(None).await {
            Ok(()) => Ok(()),
            // 이미 닫힌 연결은 정상 종료로 취급
            Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed)
            | Err(tokio_tungstenite::tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
