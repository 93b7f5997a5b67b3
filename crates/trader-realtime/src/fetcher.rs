//! REST 스냅샷 조회.
//!
//! 처리 기능:
//! - 알림 목록 (GET /notifications?limit&offset&unreadOnly)
//! - 읽지 않은 알림 수 (GET /notifications/unread-count)
//! - 읽음 처리 (PATCH /notifications/{id}/read, PATCH /notifications/mark-all-read)
//! - 삭제 (DELETE /notifications/{id})
//! - 시세 심볼 목록 (GET /market/symbols)
//!
//! 모든 요청에 현재 bearer 토큰을 붙이며, 토큰이 없으면 요청 없이
//! `SyncError::Auth`를 반환합니다. 재시도는 하지 않습니다.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};
use trader_core::{Notification, NotificationQuery, RestConfig};

use crate::error::{SyncError, SyncResult};
use crate::session::AuthSession;

/// 스냅샷 조회 인터페이스.
///
/// 폴링과 최초 로드 모두 이 trait을 통해 서버 상태를 읽습니다.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// 알림 목록 조회.
    async fn list_notifications(&self, query: NotificationQuery) -> SyncResult<Vec<Notification>>;

    /// 읽지 않은 알림 수 조회.
    async fn unread_count(&self) -> SyncResult<u64>;

    /// 알림 읽음 처리.
    async fn mark_read(&self, id: &str) -> SyncResult<()>;

    /// 모든 알림 읽음 처리.
    async fn mark_all_read(&self) -> SyncResult<()>;

    /// 알림 삭제.
    async fn delete_notification(&self, id: &str) -> SyncResult<()>;

    /// 서버가 스트리밍 중인 심볼 목록.
    async fn active_symbols(&self) -> SyncResult<Vec<String>>;
}

/// 목록 응답은 배열 그대로이거나 객체로 감싸져 있을 수 있음.
#[derive(Deserialize)]
#[serde(untagged)]
enum ListEnvelope<T> {
    Bare(Vec<T>),
    Notifications { notifications: Vec<T> },
    Data { data: Vec<T> },
    Symbols { symbols: Vec<T> },
}

impl<T> ListEnvelope<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            ListEnvelope::Bare(items)
            | ListEnvelope::Notifications { notifications: items }
            | ListEnvelope::Data { data: items }
            | ListEnvelope::Symbols { symbols: items } => items,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CountEnvelope {
    Bare(u64),
    Wrapped {
        #[serde(alias = "unreadCount", alias = "unread_count")]
        count: u64,
    },
}

/// reqwest 기반 스냅샷 클라이언트.
#[derive(Clone)]
pub struct RestSnapshotClient {
    client: Client,
    base_url: Url,
    session: AuthSession,
}

impl RestSnapshotClient {
    /// 새 클라이언트 생성.
    ///
    /// # Errors
    /// 기본 URL이 잘못되었거나 HTTP 클라이언트 생성에 실패하면
    /// `SyncError::Config`를 반환합니다.
    pub fn new(config: &RestConfig, session: AuthSession) -> SyncResult<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| SyncError::Config(format!("잘못된 rest.base_url {}: {}", config.base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(SyncError::Config(format!(
                "rest.base_url은 경로를 가질 수 있어야 함: {}",
                config.base_url
            )));
        }

        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| SyncError::Config(format!("HTTP client 생성 실패: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            session,
        })
    }

    /// 기본 URL.
    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// 경로 세그먼트는 각각 인코딩되므로 ID에 `/`, `?`, `#`가 있어도 같은 리소스를 가리킵니다.
    fn url(&self, segments: &[&str]) -> SyncResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::Config(format!("잘못된 rest.base_url: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> SyncResult<RequestBuilder> {
        // 토큰이 없으면 요청 자체를 만들지 않음
        let bearer = self.session.bearer_header()?;
        let url = self.url(segments)?;
        debug!(%method, %url, "스냅샷 요청");
        Ok(self
            .client
            .request(method, url)
            .header(reqwest::header::AUTHORIZATION, bearer))
    }

    async fn send(&self, builder: RequestBuilder, context: &str) -> SyncResult<Response> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        warn!(%status, context, body = %body, "스냅샷 요청 실패");
        Err(SyncError::from_status(status, context))
    }

    async fn get_json<T: DeserializeOwned>(&self, builder: RequestBuilder, context: &str) -> SyncResult<T> {
        let response = self.send(builder, context).await?;
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| SyncError::Parse(format!("{}: {}", context, e)))
    }
}

#[async_trait]
impl SnapshotSource for RestSnapshotClient {
    async fn list_notifications(&self, query: NotificationQuery) -> SyncResult<Vec<Notification>> {
        let builder = self.request(Method::GET, &["notifications"])?.query(&[
            ("limit", query.limit.to_string()),
            ("offset", query.offset.to_string()),
            ("unreadOnly", query.unread_only.to_string()),
        ]);
        let envelope: ListEnvelope<Notification> = self.get_json(builder, "notifications").await?;
        Ok(envelope.into_vec())
    }

    async fn unread_count(&self) -> SyncResult<u64> {
        let builder = self.request(Method::GET, &["notifications", "unread-count"])?;
        let envelope: CountEnvelope = self.get_json(builder, "unread-count").await?;
        Ok(match envelope {
            CountEnvelope::Bare(count) | CountEnvelope::Wrapped { count } => count,
        })
    }

    async fn mark_read(&self, id: &str) -> SyncResult<()> {
        let builder = self.request(Method::PATCH, &["notifications", id, "read"])?;
        self.send(builder, id).await?;
        Ok(())
    }

    async fn mark_all_read(&self) -> SyncResult<()> {
        let builder = self.request(Method::PATCH, &["notifications", "mark-all-read"])?;
        self.send(builder, "mark-all-read").await?;
        Ok(())
    }

    async fn delete_notification(&self, id: &str) -> SyncResult<()> {
        let builder = self.request(Method::DELETE, &["notifications", id])?;
        self.send(builder, id).await?;
        Ok(())
    }

    async fn active_symbols(&self) -> SyncResult<Vec<String>> {
        let builder = self.request(Method::GET, &["market", "symbols"])?;
        let envelope: ListEnvelope<String> = self.get_json(builder, "market-symbols").await?;
        Ok(envelope.into_vec())
    }
}
