//! 푸시 채널 연결 관리.

mod manager;
mod transport;

pub use manager::{
    ConnectionManager, ConnectionState, ConnectionStatus, StreamCondition, StreamUpdate,
    DEFAULT_PING_INTERVAL,
};
pub use transport::{
    ConnectRequest, Incoming, PushConnection, PushTransport, WebSocketConnection,
    WebSocketTransport,
};
