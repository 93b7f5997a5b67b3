//! 테스트와 오프라인 실행을 위한 시뮬레이션 구현.
//!
//! - [`SimulatedTransport`]: 스크립트로 제어하는 푸시 채널
//! - [`SimulatedSnapshotSource`]: 메모리 기반 REST 스냅샷 저장소

mod snapshot;
mod transport;

pub use snapshot::{SimulatedSnapshotSource, SnapshotOp};
pub use transport::{ConnectScript, SimulatedConnection, SimulatedTransport};
