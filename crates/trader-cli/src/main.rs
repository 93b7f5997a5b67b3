//! 트레이딩 시그널 실시간 동기화 CLI.
//!
//! # 사용 예시
//!
//! ```bash
//! # 알림과 시세를 실시간으로 모니터링
//! SIGNAL_TOKEN=... signal-watch watch -s BTCUSDT,ETHUSDT
//!
//! # 5분 동안 유휴 상태로 실행 (폴링 간격 확장)
//! signal-watch watch --idle --duration 300
//!
//! # 안 읽은 알림 목록 (JSON)
//! signal-watch notifications --unread -f json
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use trader_core::{init_logging, LogConfig, SyncConfig};

use trader_cli::commands::notifications::{list_notifications, ListNotificationsConfig};
use trader_cli::commands::watch::{run_watch, WatchConfig};
use trader_cli::commands::{session_from_env, OutputFormat, TOKEN_ENV};

#[derive(Parser)]
#[command(name = "signal-watch")]
#[command(about = "Trading signals CLI - 알림/시세 실시간 동기화 클라이언트", long_about = None)]
#[command(version)]
struct Cli {
    /// 설정 파일 (TOML, 없으면 기본값과 환경 변수만 사용)
    #[arg(short, long, global = true, default_value = "config/signal.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 알림과 시세를 실시간으로 동기화하며 출력
    Watch {
        /// 구독할 심볼 (쉼표로 구분, 예: BTCUSDT,ETHUSDT)
        #[arg(short, long, value_delimiter = ',')]
        symbols: Vec<String>,

        /// 실행 시간 (초, 지정하지 않으면 Ctrl-C까지)
        #[arg(short, long)]
        duration: Option<u64>,

        /// 유휴 상태로 시작
        #[arg(long, default_value = "false")]
        idle: bool,

        /// 푸시 채널 없이 폴링만 사용
        #[arg(long, default_value = "false")]
        no_push: bool,
    },

    /// 알림 목록 조회
    Notifications {
        /// 안 읽은 알림만
        #[arg(short, long, default_value = "false")]
        unread: bool,

        /// 최대 개수
        #[arg(short, long, default_value = "50")]
        limit: u32,

        /// 출력 형식 (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let mut settings = SyncConfig::load(Some(&cli.config))
        .with_context(|| format!("Failed to load config: {}", cli.config.display()))?;

    init_logging(LogConfig::from_settings(&settings.logging))
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    let session = session_from_env();
    if !session.is_authenticated() {
        info!("{} 없음, 인증 없이 실행", TOKEN_ENV);
    }

    match cli.command {
        Commands::Watch {
            symbols,
            duration,
            idle,
            no_push,
        } => {
            if no_push {
                settings.push.enabled = false;
            }
            let config = WatchConfig {
                symbols,
                duration: duration.map(Duration::from_secs),
                idle,
            };
            if let Err(e) = run_watch(settings, session, config).await {
                error!("Watch failed: {:#}", e);
                return Err(e);
            }
        }

        Commands::Notifications {
            unread,
            limit,
            format,
        } => {
            let config = ListNotificationsConfig {
                unread_only: unread,
                limit,
                format: OutputFormat::parse(&format)?,
            };
            let count = list_notifications(&settings, session, config).await?;
            info!("Fetched {} notifications", count);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_watch_symbols() {
        let cli = Cli::try_parse_from(["signal-watch", "watch", "-s", "BTCUSDT,ethusdt", "--idle"])
            .unwrap();
        match cli.command {
            Commands::Watch {
                symbols,
                idle,
                no_push,
                duration,
            } => {
                assert_eq!(symbols, vec!["BTCUSDT", "ethusdt"]);
                assert!(idle);
                assert!(!no_push);
                assert_eq!(duration, None);
            }
            _ => panic!("expected watch"),
        }
        assert_eq!(cli.config, PathBuf::from("config/signal.toml"));
    }

    #[test]
    fn test_parse_notifications() {
        let cli = Cli::try_parse_from([
            "signal-watch",
            "notifications",
            "--unread",
            "-l",
            "10",
            "-c",
            "other.toml",
        ])
        .unwrap();
        match cli.command {
            Commands::Notifications { unread, limit, format } => {
                assert!(unread);
                assert_eq!(limit, 10);
                assert_eq!(format, "table");
            }
            _ => panic!("expected notifications"),
        }
        assert_eq!(cli.config, PathBuf::from("other.toml"));
    }
}
