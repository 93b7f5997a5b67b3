//! 실시간 동기화 모니터링.
//!
//! 허브를 실행하고 조정된 상태와 스트림 연결 상태가 바뀔 때마다 출력합니다.

use anyhow::{Context, Result};
use std::future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use trader_core::{StreamKind, SyncConfig};
use trader_realtime::{
    Activity, AuthSession, ConnectionState, ConnectionStatus, ReconciledState,
    RestSnapshotClient, SyncHub, WebSocketTransport,
};

use super::format_timestamp;

/// 모니터링 설정.
#[derive(Debug, Clone, Default)]
pub struct WatchConfig {
    /// 구독할 심볼
    pub symbols: Vec<String>,
    /// 실행 시간 (없으면 Ctrl-C까지)
    pub duration: Option<Duration>,
    /// 유휴 상태로 시작 (폴링 간격 확장)
    pub idle: bool,
}

/// 허브를 실행하며 상태 변화를 출력.
pub async fn run_watch(settings: SyncConfig, session: AuthSession, config: WatchConfig) -> Result<()> {
    let fetcher = RestSnapshotClient::new(&settings.rest, session.clone())
        .context("Failed to create REST client")?;
    let hub = SyncHub::start(
        settings,
        Arc::new(fetcher),
        Arc::new(WebSocketTransport::new()),
        session,
    );

    if config.idle {
        hub.set_activity(Activity {
            page_visible: false,
            user_active: false,
        });
    }
    if !config.symbols.is_empty() {
        let added = hub.subscribe_to_symbols(&config.symbols)?;
        info!(symbols = ?added, "심볼 구독");
    }

    let mut view = hub.watch();
    let mut notifications = hub.watch_connection(StreamKind::Notifications);
    let mut market = hub.watch_connection(StreamKind::Market);

    let deadline = async {
        match config.duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("중단 요청");
                break;
            }
            _ = &mut deadline => break,
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("{}", render_summary(&view.borrow_and_update()));
            }
            Some(line) = connection_line(&mut notifications) => println!("{}", line),
            Some(line) = connection_line(&mut market) => println!("{}", line),
        }
    }

    hub.shutdown();
    Ok(())
}

async fn connection_line(rx: &mut watch::Receiver<ConnectionState>) -> Option<String> {
    rx.changed().await.ok()?;
    let line = render_connection(&rx.borrow_and_update());
    Some(line)
}

/// 조정 상태 한 줄 요약.
pub fn render_summary(state: &ReconciledState) -> String {
    let mut parts = vec![format!(
        "알림 {}건 (안 읽음 {})",
        state.notifications.len(),
        state.unread_count()
    )];

    for (symbol, tick) in &state.prices {
        parts.push(format!("{} {}", symbol, tick.price));
    }

    if let Some(status) = &state.api_status {
        if !status.connected {
            parts.push(format!("API 장애: {}", status.message.as_deref().unwrap_or("-")));
        }
    }
    for stream in StreamKind::all() {
        if let Some(e) = state.poll_failure(stream) {
            parts.push(format!("[{}] 폴링 실패: {}", stream, e));
        }
    }
    if state.requires_reauth() {
        parts.push("다시 로그인 필요".to_string());
    }
    if state.pending_mutations > 0 {
        parts.push(format!("대기 중 변경 {}", state.pending_mutations));
    }
    if let Some(at) = state.last_synced_at {
        parts.push(format!("동기화 {}", format_timestamp(at)));
    }
    parts.join(" | ")
}

/// 연결 상태 한 줄 요약.
pub fn render_connection(state: &ConnectionState) -> String {
    let status = match state.status {
        ConnectionStatus::Connecting => "연결 중",
        ConnectionStatus::Connected => "연결됨",
        ConnectionStatus::Disconnected => "연결 안 됨",
        ConnectionStatus::Errored => "에러",
    };
    let mut line = format!("[{}] {}", state.stream, status);

    if let Some(condition) = &state.condition {
        line.push_str(&format!(" - {}", condition.to_error(state.stream)));
    } else if let Some(delay) = state.next_retry_in {
        line.push_str(&format!(
            " - {}초 후 재연결 (시도 {})",
            delay.as_secs(),
            state.attempt_count
        ));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use trader_realtime::{StreamCondition, SyncError};

    #[test]
    fn test_render_summary_for_empty_state() {
        assert_eq!(render_summary(&ReconciledState::default()), "알림 0건 (안 읽음 0)");
    }

    #[test]
    fn test_render_summary_shows_poll_failure() {
        let mut state = ReconciledState::default();
        state.poll_failures.notifications = Some(SyncError::Auth("401".to_string()));
        let line = render_summary(&state);
        assert!(line.contains("[notifications] 폴링 실패: 인증 에러: 401"));
        assert!(line.ends_with("다시 로그인 필요"));
    }

    #[test]
    fn test_render_connection_with_retry() {
        let mut state = ConnectionState::idle(StreamKind::Market);
        state.status = ConnectionStatus::Errored;
        state.attempt_count = 2;
        state.next_retry_in = Some(Duration::from_secs(6));
        assert_eq!(render_connection(&state), "[market] 에러 - 6초 후 재연결 (시도 2)");
    }

    #[test]
    fn test_render_connection_with_condition() {
        let mut state = ConnectionState::idle(StreamKind::Notifications);
        state.status = ConnectionStatus::Errored;
        state.condition = Some(StreamCondition::RetriesExhausted { attempts: 5 });
        let line = render_connection(&state);
        assert!(line.starts_with("[notifications] 에러 - "));
        assert!(line.contains("5회"));
    }
}
