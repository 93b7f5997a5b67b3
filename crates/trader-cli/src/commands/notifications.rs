//! 알림 목록 단발 조회.

use anyhow::{Context, Result};
use trader_core::{Notification, NotificationQuery, SyncConfig};
use trader_realtime::{AuthSession, RestSnapshotClient, SnapshotSource};

use super::{format_timestamp, OutputFormat};

/// 알림 조회 설정.
#[derive(Debug, Clone)]
pub struct ListNotificationsConfig {
    /// 안 읽은 알림만
    pub unread_only: bool,
    /// 최대 개수
    pub limit: u32,
    /// 출력 형식
    pub format: OutputFormat,
}

/// REST 스냅샷을 한 번 가져와 출력. 조회한 개수를 반환합니다.
pub async fn list_notifications(
    settings: &SyncConfig,
    session: AuthSession,
    config: ListNotificationsConfig,
) -> Result<usize> {
    let client = RestSnapshotClient::new(&settings.rest, session)
        .context("Failed to create REST client")?;

    let mut query = NotificationQuery::first_page(config.limit);
    if config.unread_only {
        query = query.unread();
    }

    let notifications = client
        .list_notifications(query)
        .await
        .with_context(|| format!("Failed to fetch notifications from {}", client.base_url()))?;
    let unread = client.unread_count().await.context("Failed to fetch unread count")?;

    match config.format {
        OutputFormat::Table => print!("{}", render_table(&notifications, unread)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&notifications)?),
    }
    Ok(notifications.len())
}

/// 알림 목록 표 렌더링.
pub fn render_table(notifications: &[Notification], unread: u64) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:<3} {:<20} {:<14} {:<10} {}\n",
        "", "시각", "종류", "심볼", "제목"
    ));
    for n in notifications {
        out.push_str(&format!(
            "{:<3} {:<20} {:<14} {:<10} {}\n",
            if n.is_read { "" } else { "●" },
            format_timestamp(n.created_at),
            n.kind.as_str(),
            n.symbol.as_deref().unwrap_or("-"),
            n.title
        ));
    }
    out.push_str(&format!("\n총 {}건, 안 읽음 {}건\n", notifications.len(), unread));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_table_marks_unread() {
        let rows = vec![
            Notification::new("n1", "BTC 매수 신호", 1_700_000_000_000),
            Notification::new("n2", "점검 안내", 1_700_000_000_000).with_read(true),
        ];
        let table = render_table(&rows, 1);
        let lines: Vec<&str> = table.lines().collect();

        assert!(lines[1].starts_with('●'));
        assert!(lines[1].ends_with("BTC 매수 신호"));
        assert!(!lines[2].contains('●'));
        assert!(table.contains("총 2건, 안 읽음 1건"));
    }
}
